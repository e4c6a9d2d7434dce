//! Chapter download orchestration.
//!
//! This module provides the `ChapterDownloader` which drives the worker
//! pool over one chapter's page list in sequential batches, aggregates
//! per-page failures, and assembles the final cbz archive only when every
//! page was fetched.
//!
//! # Overview
//!
//! Pages are processed in batches of `min(worker_count, remaining)`; batch
//! N+1 does not start until batch N's results are fully drained, which
//! bounds the number of concurrent connections across the whole chapter.
//! Any page failure aborts archive creation: a partial chapter archive is
//! worse than no archive, since a reader would get a truncated chapter.
//! History persistence is the caller's job and must happen only after a
//! successful return.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::constants::{MAX_WORKER_COUNT, MIN_WORKER_COUNT};
use super::error::DownloadError;
use super::fetcher::PageFetcher;
use super::pool::{PageFetchJob, PageFetchResult, WorkerPool};
use crate::archive::{self, ArchiveError};
use crate::library::Config;

/// Error type for chapter download attempts.
#[derive(Debug, thiserror::Error)]
pub enum ChapterError {
    /// Invalid worker count supplied.
    #[error(
        "invalid worker count {value}: must be between {MIN_WORKER_COUNT} and {MAX_WORKER_COUNT}"
    )]
    InvalidWorkerCount {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The per-attempt scratch directory could not be created.
    #[error("cannot create scratch directory: {source}")]
    Scratch {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// One or more pages failed to download; the chapter was not archived.
    #[error(
        "{failed} of {total} pages failed; first failure: page {page_index} (HTTP {status}) from {url}"
    )]
    Page {
        /// Zero-based index of the first failing page.
        page_index: usize,
        /// URL of the first failing page.
        url: String,
        /// HTTP status of the first failure; 0 when no response was received.
        status: u16,
        /// Total number of failed pages in this attempt.
        failed: usize,
        /// Total number of pages in the chapter.
        total: usize,
        /// The first failure's underlying error.
        #[source]
        source: DownloadError,
    },

    /// Archive assembly failed after all pages were fetched.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The download was cancelled between batches.
    #[error("chapter download cancelled")]
    Cancelled,

    /// A batch produced fewer results than jobs (a worker died without
    /// reporting). The chapter cannot be trusted as complete.
    #[error("batch result accounting violated: expected {expected} results, received {received}")]
    ResultAccounting {
        /// Results expected for the batch.
        expected: usize,
        /// Results actually received.
        received: usize,
    },

    /// The blocking archive-build task was aborted or panicked.
    #[error("archive build task aborted: {source}")]
    ArchiveTask {
        /// The underlying join error.
        #[source]
        source: tokio::task::JoinError,
    },
}

impl ChapterError {
    /// Builds the summary error for a failed attempt from the first
    /// recorded failure.
    fn page_failure(first: PageFetchResult, failed: usize, total: usize) -> Self {
        let PageFetchResult {
            page_index,
            url,
            http_status,
            error,
        } = first;
        let source =
            error.unwrap_or_else(|| DownloadError::http_status(url.clone(), http_status));
        Self::Page {
            page_index,
            url,
            status: http_status,
            failed,
            total,
            source,
        }
    }
}

/// One chapter to download: the title it belongs to, its (possibly
/// fractional) chapter number, the ordered page URLs, and where the
/// finished archive goes.
///
/// Page URL order is semantically significant: index = page number, and
/// the final archive must reproduce it regardless of fetch completion
/// order. Requests are immutable and consumed once per attempt.
#[derive(Debug, Clone)]
pub struct ChapterDownloadRequest {
    /// Stable identifier for the manga title (used in paths).
    pub title_id: String,
    /// Chapter number; fractional values identify special sub-chapters.
    pub chapter_id: f64,
    /// One URL per page, in reading order.
    pub page_urls: Vec<String>,
    /// Directory where the finished archive is placed.
    pub destination_dir: PathBuf,
}

impl ChapterDownloadRequest {
    /// Creates a new download request.
    #[must_use]
    pub fn new(
        title_id: impl Into<String>,
        chapter_id: f64,
        page_urls: Vec<String>,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            title_id: title_id.into(),
            chapter_id,
            page_urls,
            destination_dir: destination_dir.into(),
        }
    }
}

/// Progress bookkeeping for one chapter attempt.
///
/// Owned and mutated only by the orchestrator's own control flow, after
/// draining a batch's results; workers never touch it, which rules out
/// data races by construction.
#[derive(Debug)]
pub struct DownloadProgressState {
    total_pages: usize,
    completed_pages: usize,
    failures: Vec<PageFetchResult>,
}

impl DownloadProgressState {
    /// Creates the state for a chapter with `total_pages` pages.
    #[must_use]
    pub fn new(total_pages: usize) -> Self {
        Self {
            total_pages,
            completed_pages: 0,
            failures: Vec::new(),
        }
    }

    /// Total number of pages in the chapter.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Pages accounted for so far (success or failure).
    #[must_use]
    pub fn completed_pages(&self) -> usize {
        self.completed_pages
    }

    /// Failures recorded so far, in drain order.
    #[must_use]
    pub fn failures(&self) -> &[PageFetchResult] {
        &self.failures
    }

    /// Records one drained result, keeping failures for the final report.
    pub fn record(&mut self, result: PageFetchResult) {
        if result.is_failure() {
            self.failures.push(result);
        }
    }

    /// Advances the completed-page counter after a fully drained batch.
    /// The counter only ever increases and never exceeds the total.
    pub fn advance(&mut self, batch_size: usize) {
        debug_assert!(self.completed_pages + batch_size <= self.total_pages);
        self.completed_pages += batch_size;
    }

    /// Fraction of pages attempted so far, in `[0, 1]`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            return 1.0;
        }
        self.completed_pages as f64 / self.total_pages as f64
    }

    fn into_failures(self) -> Vec<PageFetchResult> {
        self.failures
    }
}

/// Orchestrates the download of one chapter at a time.
///
/// The downloader itself runs as a single control-flow sequence per
/// chapter; only page fetches within a batch run in parallel. It can be
/// reused across chapters and across retries of the same chapter — every
/// attempt gets a fresh scratch directory, so re-invocation after a
/// failure is safe.
#[derive(Debug)]
pub struct ChapterDownloader {
    fetcher: Arc<PageFetcher>,
    worker_count: usize,
    cancel: Arc<AtomicBool>,
}

impl ChapterDownloader {
    /// Creates a downloader from the application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChapterError::InvalidWorkerCount`] if the configured
    /// worker count is outside `1..=100`.
    pub fn new(config: &Config) -> Result<Self, ChapterError> {
        let fetcher = PageFetcher::with_timeouts(
            config.connect_timeout_secs,
            config.read_timeout_secs,
        );
        Self::with_fetcher(Arc::new(fetcher), config.worker_count)
    }

    /// Creates a downloader with an explicit fetcher (used by tests and
    /// callers that share one fetcher across components).
    ///
    /// # Errors
    ///
    /// Returns [`ChapterError::InvalidWorkerCount`] if `worker_count` is
    /// outside `1..=100`.
    pub fn with_fetcher(
        fetcher: Arc<PageFetcher>,
        worker_count: usize,
    ) -> Result<Self, ChapterError> {
        if !(MIN_WORKER_COUNT..=MAX_WORKER_COUNT).contains(&worker_count) {
            return Err(ChapterError::InvalidWorkerCount {
                value: worker_count,
            });
        }
        Ok(Self {
            fetcher,
            worker_count,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns a handle that cancels in-flight downloads when set.
    ///
    /// Cancellation is coarse-grained: it is checked between batches, so a
    /// batch already in flight still runs to completion.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Downloads every page of `request` and assembles the chapter archive.
    ///
    /// `progress` is invoked with the attempted fraction
    /// (`completed / total`, in `[0, 1]`) at least once per batch; values
    /// never decrease across invocations. Progress reflects pages
    /// *attempted*, not pages succeeded.
    ///
    /// Returns `Ok(None)` when the page list is empty — a legitimate
    /// "nothing to download" outcome (e.g. the chapter was removed
    /// upstream), not a failure. Returns `Ok(Some(path))` with the archive
    /// path on success.
    ///
    /// # Errors
    ///
    /// Any page failure fails the whole attempt with
    /// [`ChapterError::Page`] naming the first failing page; no archive is
    /// produced and the scratch directory is removed. Filesystem and
    /// archive errors propagate as their own variants. There are no
    /// internal retries — the caller may simply invoke again.
    #[instrument(
        skip(self, request, progress),
        fields(title = %request.title_id, chapter = request.chapter_id, pages = request.page_urls.len())
    )]
    pub async fn download_chapter<F>(
        &self,
        request: &ChapterDownloadRequest,
        mut progress: F,
    ) -> Result<Option<PathBuf>, ChapterError>
    where
        F: FnMut(f64),
    {
        let total = request.page_urls.len();
        if total == 0 {
            info!("chapter has no pages, nothing to download");
            return Ok(None);
        }

        // Fresh scratch directory per attempt; unique name avoids collisions
        // with concurrent downloads of the same or other titles. Removed on
        // drop for every failure path; the archive builder removes it on
        // success.
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", request.title_id))
            .tempdir()
            .map_err(|e| ChapterError::Scratch { source: e })?;

        info!(scratch = %scratch.path().display(), "starting chapter download");

        let pool = WorkerPool::new(Arc::clone(&self.fetcher), self.worker_count)?;
        let mut state = DownloadProgressState::new(total);

        while state.completed_pages() < total {
            if self.cancel.load(Ordering::SeqCst) {
                info!("chapter download cancelled");
                return Err(ChapterError::Cancelled);
            }

            let start = state.completed_pages();
            let batch_size = self.worker_count.min(total - start);
            let jobs: Vec<PageFetchJob> = (start..start + batch_size)
                .map(|index| {
                    PageFetchJob::new(index, request.page_urls[index].clone(), scratch.path())
                })
                .collect();

            debug!(start, batch_size, "dispatching batch");

            let (tx, mut rx) = mpsc::channel(batch_size);
            pool.run(jobs, tx).await;

            // Synchronization point: the sink closes once every worker has
            // exited, so draining to end-of-stream collects the whole batch.
            let mut drained = 0usize;
            while let Some(result) = rx.recv().await {
                drained += 1;
                if let Some(error) = &result.error {
                    warn!(
                        page = result.page_index,
                        url = %result.url,
                        status = result.http_status,
                        error = %error,
                        "page download failed"
                    );
                }
                state.record(result);
                progress((start + drained) as f64 / total as f64);
            }

            if drained != batch_size {
                return Err(ChapterError::ResultAccounting {
                    expected: batch_size,
                    received: drained,
                });
            }
            state.advance(batch_size);
        }

        let total_pages = state.total_pages();
        let failures = state.into_failures();
        let failed = failures.len();
        // Results within a batch drain in completion order; report the
        // lowest-indexed failure so the summary is deterministic.
        if let Some(first) = failures.into_iter().min_by_key(|f| f.page_index) {
            return Err(ChapterError::page_failure(first, failed, total_pages));
        }

        // All pages on disk: assemble the archive on the blocking pool
        // (the zip writer is synchronous).
        let output_dir = request.destination_dir.clone();
        let scratch_path = scratch.path().to_path_buf();
        let title_id = request.title_id.clone();
        let chapter_id = request.chapter_id;
        let archive_path = tokio::task::spawn_blocking(move || {
            archive::build(&output_dir, &scratch_path, &title_id, chapter_id)
        })
        .await
        .map_err(|e| ChapterError::ArchiveTask { source: e })??;

        info!(path = %archive_path.display(), "chapter archive created");
        Ok(Some(archive_path))
    }
}
