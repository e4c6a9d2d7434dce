//! Fixed-size worker pool for fetching page images in parallel.
//!
//! The pool spawns exactly `worker_count` tokio tasks, each looping:
//! pull the next job from a shared queue, fetch the page, push a
//! [`PageFetchResult`] into the caller's sink. Jobs are picked up in
//! submission order, but completion order is NOT guaranteed, which is
//! why results carry their `page_index` and the caller must never rely
//! on arrival order.
//!
//! Concurrency is intentionally capped: manga hosts throttle or ban
//! aggressive clients, so `worker_count` is a backpressure knob rather
//! than a throughput maximizer.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, instrument, warn};

use super::chapter::ChapterError;
use super::constants::{MAX_WORKER_COUNT, MIN_WORKER_COUNT};
use super::error::DownloadError;
use super::fetcher::PageFetcher;

/// One unit of work: fetch the page at `url` into the chapter's scratch
/// directory under a name derived from `page_index`.
///
/// The index-to-file-name mapping is fixed here, before dispatch, and is
/// never reassigned; archive entry ordering depends on it.
#[derive(Debug, Clone)]
pub struct PageFetchJob {
    /// Zero-based page number within the chapter.
    pub page_index: usize,
    /// Source URL for this page image.
    pub url: String,
    /// Scratch directory shared by all pages of this chapter attempt.
    pub scratch_dir: PathBuf,
}

impl PageFetchJob {
    /// Creates a new fetch job.
    #[must_use]
    pub fn new(page_index: usize, url: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_index,
            url: url.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// File name for this page, zero-padded so that name-sorted archive
    /// enumeration reconstructs reading order.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("page_{:03}.jpg", self.page_index)
    }

    /// Full destination path inside the scratch directory.
    #[must_use]
    pub fn dest_path(&self) -> PathBuf {
        self.scratch_dir.join(self.file_name())
    }
}

/// Outcome of one fetch job. Exactly one result is produced per
/// submitted job, no duplicates, no loss.
#[derive(Debug)]
pub struct PageFetchResult {
    /// Zero-based page number, copied from the job.
    pub page_index: usize,
    /// Source URL, copied from the job.
    pub url: String,
    /// HTTP status code; 0 when no response was received (connect
    /// failure, timeout).
    pub http_status: u16,
    /// The failure, if the page could not be fetched.
    pub error: Option<DownloadError>,
}

impl PageFetchResult {
    /// Returns true if this page failed to download.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Pool of page-fetch workers sharing one [`PageFetcher`].
///
/// # Termination
///
/// `run` submits every job up front and closes the job queue; workers
/// exit when the queue is exhausted. Each worker holds its own clone of
/// the result sender, so the result sink only closes once every worker
/// has exited — the caller can therefore drain the receiver to
/// completion as a synchronization barrier.
#[derive(Debug)]
pub struct WorkerPool {
    fetcher: Arc<PageFetcher>,
    worker_count: usize,
}

impl WorkerPool {
    /// Creates a pool with the given worker count.
    ///
    /// # Errors
    ///
    /// Returns [`ChapterError::InvalidWorkerCount`] if `worker_count` is
    /// outside `1..=100`.
    pub fn new(fetcher: Arc<PageFetcher>, worker_count: usize) -> Result<Self, ChapterError> {
        if !(MIN_WORKER_COUNT..=MAX_WORKER_COUNT).contains(&worker_count) {
            return Err(ChapterError::InvalidWorkerCount {
                value: worker_count,
            });
        }
        Ok(Self {
            fetcher,
            worker_count,
        })
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs the pool over one batch of jobs, pushing one result per job
    /// into `results`.
    ///
    /// Returns once every worker has exited; at that point all result
    /// sender clones have been dropped and the receiving side observes
    /// end-of-stream after the last result. Worker panics are logged and
    /// surface to the caller as missing results.
    ///
    /// The caller must either drain `results` concurrently or hand over a
    /// sink with capacity for the whole batch; otherwise workers block on
    /// a full channel and this method never returns.
    #[instrument(skip(self, jobs, results), fields(jobs = jobs.len(), workers = self.worker_count))]
    pub async fn run(&self, jobs: Vec<PageFetchJob>, results: mpsc::Sender<PageFetchResult>) {
        if jobs.is_empty() {
            return;
        }

        // Pre-fill the job queue and close it; capacity == len so no send blocks.
        let (job_tx, job_rx) = mpsc::channel(jobs.len());
        for job in jobs {
            // Cannot fail: the receiver is alive and capacity is sufficient.
            let _ = job_tx.send(job).await;
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut handles = Vec::with_capacity(self.worker_count);

        for worker_id in 0..self.worker_count {
            let fetcher = Arc::clone(&self.fetcher);
            let job_rx = Arc::clone(&job_rx);
            let results = results.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    // Lock held only for the dequeue; the queue is pre-filled
                    // and closed, so recv never waits on a producer.
                    let job = job_rx.lock().await.recv().await;
                    let Some(job) = job else { break };

                    debug!(worker_id, page = job.page_index, url = %job.url, "worker picked up page");
                    let result = fetch_job(&fetcher, job).await;

                    if results.send(result).await.is_err() {
                        // Receiver dropped; nothing left to report to.
                        break;
                    }
                }
            }));
        }

        // Drop our own sender clone so the sink closes once workers exit.
        drop(results);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "fetch worker panicked");
            }
        }
    }
}

/// Fetches one job, mapping the outcome into a [`PageFetchResult`].
async fn fetch_job(fetcher: &PageFetcher, job: PageFetchJob) -> PageFetchResult {
    let dest = job.dest_path();
    match fetcher.fetch_page(&job.url, &dest).await {
        Ok(status) => PageFetchResult {
            page_index: job.page_index,
            url: job.url,
            http_status: status,
            error: None,
        },
        Err(e) => PageFetchResult {
            page_index: job.page_index,
            url: job.url,
            http_status: e.status().unwrap_or(0),
            error: Some(e),
        },
    }
}
