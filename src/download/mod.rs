//! Concurrent chapter-download pipeline.
//!
//! This module implements the download core: a streaming page fetcher, a
//! bounded worker pool, and the per-chapter orchestrator that drives them
//! in sequential batches and hands the fetched pages to the archive
//! builder.
//!
//! # Features
//!
//! - Streaming page downloads (memory-efficient, pages are several MB)
//! - Bounded, configuration-controlled concurrency per batch
//! - Exactly-once result accounting keyed by page index
//! - All-or-nothing archive policy on page failures
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use mangadl_core::download::{ChapterDownloadRequest, ChapterDownloader, PageFetcher};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = ChapterDownloader::with_fetcher(Arc::new(PageFetcher::new()), 4)?;
//! let request = ChapterDownloadRequest::new(
//!     "berserk",
//!     12.5,
//!     vec!["https://example.com/p/1.jpg".to_string()],
//!     PathBuf::from("./library/berserk"),
//! );
//! if let Some(path) = downloader.download_chapter(&request, |f| println!("{:.0}%", f * 100.0)).await? {
//!     println!("archived: {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod chapter;
mod constants;
mod error;
mod fetcher;
mod pool;

pub use chapter::{ChapterDownloadRequest, ChapterDownloader, ChapterError, DownloadProgressState};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_WORKER_COUNT, MAX_WORKER_COUNT, MIN_WORKER_COUNT,
    READ_TIMEOUT_SECS,
};
pub use error::DownloadError;
pub use fetcher::PageFetcher;
pub use pool::{PageFetchJob, PageFetchResult, WorkerPool};
