//! HTTP fetcher for single page images.
//!
//! This module provides the `PageFetcher` struct which streams one page
//! image from a URL to a file on disk, with bounded timeouts and a
//! `no-cache` request header (manga hosts are prone to serving stale
//! cached redirects otherwise).

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// HTTP client for fetching page images with streaming support.
///
/// Page images can be several MB and hundreds may download concurrently,
/// so response bodies are streamed straight to disk rather than buffered
/// in memory. The fetcher is designed to be created once per run and
/// shared across workers, taking advantage of connection pooling.
///
/// # Example
///
/// ```no_run
/// use mangadl_core::download::PageFetcher;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = PageFetcher::new();
/// let status = fetcher
///     .fetch_page("https://example.com/p/1.jpg", Path::new("/tmp/page_000.jpg"))
///     .await?;
/// assert_eq!(status, 200);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
}

impl Default for PageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFetcher {
    /// Creates a new page fetcher with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 10 seconds
    /// - Read timeout: 30 seconds per page
    /// - `cache-control: no-cache` sent on every request
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new page fetcher with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .default_headers(headers)
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches one page image from `url` into the file at `dest`.
    ///
    /// The response body is streamed to `dest`; on any error the partial
    /// file is removed, so a returned error always means "no usable page
    /// on disk". The HTTP status code is returned on success and is also
    /// carried inside [`DownloadError::HttpStatus`] on non-2xx responses,
    /// so the caller can distinguish "server returned 404" from
    /// "connection failed".
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The request fails (network error, timeout)
    /// - The server returns an error status (4xx, 5xx)
    /// - Writing to disk fails
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn fetch_page(&self, url: &str, dest: &Path) -> Result<u16, DownloadError> {
        debug!("fetching page");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest.to_path_buf(), e))?;

        if let Err(e) = stream_to_file(&mut file, response, url, dest).await {
            debug!(path = %dest.display(), "removing partial page file after error");
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }

        debug!(status = status.as_u16(), "page fetched");
        Ok(status.as_u16())
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Streams the response body to `file`, returning bytes written.
///
/// Extracted so the caller can clean up the partial file on error.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    dest: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(dest.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(dest.to_path_buf(), e))?;

    Ok(bytes_written)
}
