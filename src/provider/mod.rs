//! Site adapters for manga-hosting websites.
//!
//! A [`Provider`] scrapes one specific site for title metadata, chapter
//! lists, and per-chapter page-image URLs. The download pipeline consumes
//! only its output; all site-specific HTML knowledge lives behind this
//! trait.
//!
//! The adapter is selected once at startup by name via [`provider_for`]
//! and held as a capability value — call sites never re-dispatch on a
//! provider-name string.
//!
//! # Object Safety
//!
//! This trait uses `async_trait` to support dynamic dispatch via
//! `Arc<dyn Provider>`. Rust 2024 native async traits are not
//! object-safe, so `async_trait` is required for the selection pattern.

mod mangareader;

pub use mangareader::MangaReader;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::library::MangaEntry;

/// Errors from site-adapter operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level error talking to the site.
    #[error("network error requesting {url}: {source}")]
    Http {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The site returned an error status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The page was fetched but the expected structure was not found.
    #[error("cannot parse response from {url}: {detail}")]
    Parse {
        /// The URL whose response could not be parsed.
        url: String,
        /// What was missing or malformed.
        detail: String,
    },

    /// No adapter is registered under the requested name.
    #[error("unknown provider `{name}` (known: mangareader)")]
    UnknownProvider {
        /// The requested provider name.
        name: String,
    },
}

impl ProviderError {
    /// Creates a network error from a reqwest error.
    pub fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a parse error.
    pub fn parse(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            detail: detail.into(),
        }
    }
}

/// Capability for scraping one manga-hosting site.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable adapter name (e.g. "mangareader"), recorded in history
    /// entries.
    fn name(&self) -> &'static str;

    /// The site's base URL.
    fn base_url(&self) -> &str;

    /// Fetches full metadata for a title and assembles its history entry.
    async fn find_details(
        &self,
        library_path: &Path,
        title_id: &str,
        last_chapter: f64,
    ) -> Result<MangaEntry, ProviderError>;

    /// Lists the page-image URLs for the title's tracked chapter, in
    /// reading order. An empty list is a legitimate outcome (chapter not
    /// found or removed upstream), not an error.
    async fn page_urls(&self, manga: &MangaEntry) -> Result<Vec<String>, ProviderError>;

    /// Searches the site for titles matching `query`, best match first.
    async fn search(
        &self,
        library_path: &Path,
        query: &str,
    ) -> Result<Vec<MangaEntry>, ProviderError>;

    /// Returns the newest chapter number published for a title, if the
    /// site lists any chapters.
    async fn latest_chapter(&self, manga: &MangaEntry) -> Result<Option<f64>, ProviderError>;

    /// Returns the full known chapter list for a title, ascending.
    /// Chapter numbering is neither contiguous nor necessarily integral.
    async fn chapter_list(&self, manga: &MangaEntry) -> Result<Vec<f64>, ProviderError>;
}

/// Selects a site adapter by name. Called once at startup; the returned
/// value is passed around as a capability.
///
/// # Errors
///
/// Returns [`ProviderError::UnknownProvider`] for unrecognized names.
pub fn provider_for(name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
    match name {
        "mangareader" => Ok(Arc::new(MangaReader::new())),
        other => Err(ProviderError::UnknownProvider {
            name: other.to_string(),
        }),
    }
}
