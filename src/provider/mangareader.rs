//! Site adapter for mangareader-style sites.
//!
//! Layout knowledge encoded here:
//! - detail page (`/manga/<title>`): cover inside `.imgdesc img`, display
//!   name in `.rm h1`, key/value properties as `key: value` lines inside
//!   `.listinfo`, synopsis in `#noidungm`, chapter links inside
//!   `.leftoff a` (newest first, chapter number is the trailing segment
//!   of the href);
//! - chapter page (`/chapter/<title>-chapter-<n>`): every page-image URL
//!   sits in a hidden `#arraydata` element as one comma-separated list;
//! - search (`/search?s=<query>&post_type=manga`): result cards are
//!   `.anipost` elements whose links point at title pages.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

use super::{Provider, ProviderError};
use crate::library::MangaEntry;
use crate::user_agent;

const DEFAULT_BASE_URL: &str = "https://mangareader.cc";

/// Request timeout for scrape requests (detail pages are small).
const SCRAPE_TIMEOUT_SECS: u64 = 30;

/// Trailing chapter number in a chapter-link href, e.g.
/// `/chapter/berserk-chapter-12.5`.
static CHAPTER_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(\d+(?:\.\d+)?)/?$"));

static COVER_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector(".imgdesc img"));
static NAME_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector(".rm h1"));
static PROPERTIES_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector(".listinfo"));
static DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector("#noidungm"));
static CHAPTER_LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector(".leftoff a"));
static PAGE_ARRAY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector("#arraydata"));
static SEARCH_RESULT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| static_selector(".anipost a"));

#[allow(clippy::expect_used)]
fn static_selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector must be valid")
}

#[allow(clippy::expect_used)]
fn compile_static_regex(pattern: &'static str) -> Regex {
    Regex::new(pattern).expect("static regex must be valid")
}

/// Adapter for mangareader-style sites.
#[derive(Debug, Clone)]
pub struct MangaReader {
    client: Client,
    base_url: String,
}

impl Default for MangaReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MangaReader {
    /// Creates the adapter against the production site.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates the adapter against an explicit base URL (used by tests).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(Duration::from_secs(SCRAPE_TIMEOUT_SECS))
            .gzip(true)
            .default_headers(headers)
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("failed to build HTTP client with static configuration");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// URL of a title's detail page.
    fn title_url(&self, title_id: &str) -> String {
        format!("{}/manga/{title_id}", self.base_url)
    }

    /// URL of one chapter's page list. Integral chapters omit the
    /// decimal point, matching the site's link format.
    fn chapter_url(&self, title_id: &str, chapter: f64) -> String {
        if chapter.fract() == 0.0 {
            format!("{}/chapter/{title_id}-chapter-{chapter:.0}", self.base_url)
        } else {
            format!("{}/chapter/{title_id}-chapter-{chapter:.1}", self.base_url)
        }
    }

    /// Fetches a page's HTML, surfacing non-2xx statuses as errors.
    async fn get_html(&self, url: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::http(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::http_status(url, status.as_u16()));
        }

        response.text().await.map_err(|e| ProviderError::http(url, e))
    }

    /// Fetches and parses a title's chapter numbers from its detail page.
    async fn fetch_chapter_numbers(&self, title_id: &str) -> Result<Vec<f64>, ProviderError> {
        let url = self.title_url(title_id);
        let html = self.get_html(&url).await?;
        Ok(parse_chapter_numbers(&html))
    }
}

#[async_trait]
impl Provider for MangaReader {
    fn name(&self) -> &'static str {
        "mangareader"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, library_path), fields(title = title_id))]
    async fn find_details(
        &self,
        library_path: &Path,
        title_id: &str,
        last_chapter: f64,
    ) -> Result<MangaEntry, ProviderError> {
        let url = self.title_url(title_id);
        let html = self.get_html(&url).await?;
        let details = parse_details(&html);

        if details.name.is_empty() {
            warn!(url = %url, "detail page has no title header");
        }

        Ok(MangaEntry {
            provider: self.name().to_string(),
            title: title_id.to_string(),
            last_chapter,
            chapters: parse_chapter_numbers(&html),
            path: library_path.join(title_id),
            cover_url: details.cover_url,
            cover_path: library_path
                .join(".metadata")
                .join(format!("{title_id}-cover.jpg")),
            name: details.name,
            alternate_name: details.alternate_name,
            year_of_release: details.year_of_release,
            status: details.status,
            author: details.author,
            artist: details.artist,
            description: details.description,
        })
    }

    #[instrument(skip(self, manga), fields(title = %manga.title, chapter = manga.last_chapter))]
    async fn page_urls(&self, manga: &MangaEntry) -> Result<Vec<String>, ProviderError> {
        let url = self.chapter_url(&manga.title, manga.last_chapter);
        match self.get_html(&url).await {
            Ok(html) => {
                let pages = parse_page_urls(&html);
                debug!(pages = pages.len(), "chapter page list parsed");
                Ok(pages)
            }
            // A missing chapter page means "no pages", not a failure: the
            // chapter may not be published yet or was removed upstream.
            Err(ProviderError::HttpStatus { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, library_path))]
    async fn search(
        &self,
        library_path: &Path,
        query: &str,
    ) -> Result<Vec<MangaEntry>, ProviderError> {
        let url = format!(
            "{}/search?s={}&post_type=manga",
            self.base_url,
            urlencoding::encode(query)
        );
        let html = self.get_html(&url).await?;

        let mut results = Vec::new();
        for title_id in parse_search_results(&html, query) {
            match self.find_details(library_path, &title_id, 0.0).await {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(title = %title_id, error = %e, "skipping unreadable search hit"),
            }
        }

        // Best match first: rank by name similarity to the query.
        let query_lower = query.to_lowercase();
        results.sort_by(|a, b| {
            let sim_a = strsim::jaro_winkler(&a.name.to_lowercase(), &query_lower);
            let sim_b = strsim::jaro_winkler(&b.name.to_lowercase(), &query_lower);
            sim_b.partial_cmp(&sim_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(results)
    }

    #[instrument(skip(self, manga), fields(title = %manga.title))]
    async fn latest_chapter(&self, manga: &MangaEntry) -> Result<Option<f64>, ProviderError> {
        let chapters = self.fetch_chapter_numbers(&manga.title).await?;
        Ok(chapters.into_iter().reduce(f64::max))
    }

    #[instrument(skip(self, manga), fields(title = %manga.title))]
    async fn chapter_list(&self, manga: &MangaEntry) -> Result<Vec<f64>, ProviderError> {
        self.fetch_chapter_numbers(&manga.title).await
    }
}

/// Metadata scraped from a title's detail page.
#[derive(Debug, Default)]
struct ParsedDetails {
    cover_url: String,
    name: String,
    alternate_name: String,
    year_of_release: String,
    status: String,
    author: String,
    artist: String,
    description: String,
}

/// Extracts page-image URLs from a chapter page: the hidden `#arraydata`
/// element holds them as one comma-separated list, already in reading
/// order.
fn parse_page_urls(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&PAGE_ARRAY_SELECTOR)
        .next()
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts chapter numbers from a detail page's chapter links,
/// ascending and deduplicated.
fn parse_chapter_numbers(html: &str) -> Vec<f64> {
    let document = Html::parse_document(html);
    let mut chapters: Vec<f64> = document
        .select(&CHAPTER_LINK_SELECTOR)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(chapter_number_from_href)
        .collect();
    chapters.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    chapters.dedup();
    chapters
}

/// Parses the trailing chapter number out of a chapter-link href.
fn chapter_number_from_href(href: &str) -> Option<f64> {
    CHAPTER_NUMBER_RE
        .captures(href)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse().ok())
}

/// Extracts title metadata from a detail page.
fn parse_details(html: &str) -> ParsedDetails {
    let document = Html::parse_document(html);
    let mut details = ParsedDetails::default();

    if let Some(img) = document.select(&COVER_SELECTOR).next()
        && let Some(src) = img.value().attr("src")
    {
        details.cover_url = if src.starts_with("http") {
            src.to_string()
        } else {
            format!("https:{src}")
        };
    }

    if let Some(h1) = document.select(&NAME_SELECTOR).next() {
        details.name = h1.text().collect::<String>().trim().to_string();
    }

    if let Some(info) = document.select(&PROPERTIES_SELECTOR).next() {
        let properties = info.text().collect::<String>();
        for line in properties.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();
            if key.starts_with("alternative") {
                details.alternate_name = value;
            } else if key.starts_with("author") {
                details.author = value;
            } else if key.starts_with("artist") {
                details.artist = value;
            } else if key.starts_with("status") {
                details.status = value;
            } else if key.starts_with("release") {
                details.year_of_release = value;
            }
        }
    }

    if let Some(synopsis) = document.select(&DESCRIPTION_SELECTOR).next() {
        details.description = synopsis.text().collect::<String>().trim().to_string();
    }

    details
}

/// Extracts candidate title ids from search-result links: links whose
/// text matches the query (and is not a chapter link), identified by the
/// last path segment of their href.
fn parse_search_results(html: &str, query: &str) -> Vec<String> {
    let query_lower = query.to_lowercase();
    let document = Html::parse_document(html);
    let mut ids = Vec::new();

    for link in document.select(&SEARCH_RESULT_SELECTOR) {
        let text = link.text().collect::<String>();
        let text_lower = text.to_lowercase();
        if text_lower.contains("chapter") || !text_lower.contains(&query_lower) {
            continue;
        }
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let id = href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(href)
            .to_string();
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }

    ids
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <div class="imgdesc"><img src="//cdn.example.com/berserk-cover.jpg"></div>
          <div class="rm"><h1>Berserk</h1></div>
          <div class="listinfo">
            Alternative: Kenpuu Denki Berserk
            Author: Kentarou Miura
            Artist: Kentarou Miura
            Status: Ongoing
            Released: 1989
          </div>
          <div id="noidungm">Guts, a former mercenary, hunts demons.</div>
          <div class="leftoff">
            <a href="/chapter/berserk-chapter-12.5">Chapter 12.5</a>
            <a href="/chapter/berserk-chapter-12">Chapter 12</a>
            <a href="/chapter/berserk-chapter-11">Chapter 11</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_page_urls_splits_arraydata() {
        let html = r#"<html><body>
            <p id="arraydata" style="display:none">https://img.example.com/1.jpg,https://img.example.com/2.jpg, https://img.example.com/3.jpg</p>
        </body></html>"#;

        let urls = parse_page_urls(html);
        assert_eq!(
            urls,
            [
                "https://img.example.com/1.jpg",
                "https://img.example.com/2.jpg",
                "https://img.example.com/3.jpg"
            ]
        );
    }

    #[test]
    fn test_parse_page_urls_missing_element_is_empty() {
        assert!(parse_page_urls("<html><body></body></html>").is_empty());
    }

    #[test]
    fn test_parse_chapter_numbers_sorted_and_fractional() {
        let chapters = parse_chapter_numbers(DETAIL_PAGE);
        assert_eq!(chapters, [11.0, 12.0, 12.5]);
    }

    #[test]
    fn test_chapter_number_from_href_variants() {
        assert_eq!(
            chapter_number_from_href("/chapter/berserk-chapter-12.5"),
            Some(12.5)
        );
        assert_eq!(
            chapter_number_from_href("https://example.com/chapter/berserk-chapter-7/"),
            Some(7.0)
        );
        assert_eq!(chapter_number_from_href("/manga/berserk"), None);
    }

    #[test]
    fn test_parse_details_extracts_metadata() {
        let details = parse_details(DETAIL_PAGE);
        assert_eq!(details.name, "Berserk");
        assert_eq!(details.cover_url, "https://cdn.example.com/berserk-cover.jpg");
        assert_eq!(details.alternate_name, "Kenpuu Denki Berserk");
        assert_eq!(details.author, "Kentarou Miura");
        assert_eq!(details.status, "Ongoing");
        assert_eq!(details.year_of_release, "1989");
        assert!(details.description.contains("Guts"));
    }

    #[test]
    fn test_parse_search_results_filters_chapter_links() {
        let html = r#"<html><body>
            <div class="anipost">
              <a href="/manga/berserk">Berserk</a>
              <a href="/chapter/berserk-chapter-3">Berserk Chapter 3</a>
            </div>
            <div class="anipost">
              <a href="/manga/berserk-gaiden">Berserk Gaiden</a>
            </div>
            <div class="anipost">
              <a href="/manga/vinland-saga">Vinland Saga</a>
            </div>
        </body></html>"#;

        let ids = parse_search_results(html, "berserk");
        assert_eq!(ids, ["berserk", "berserk-gaiden"]);
    }

    #[test]
    fn test_chapter_url_formats_integral_and_fractional() {
        let provider = MangaReader::with_base_url("https://example.com");
        assert_eq!(
            provider.chapter_url("berserk", 12.0),
            "https://example.com/chapter/berserk-chapter-12"
        );
        assert_eq!(
            provider.chapter_url("berserk", 12.5),
            "https://example.com/chapter/berserk-chapter-12.5"
        );
    }

    #[tokio::test]
    async fn test_page_urls_missing_chapter_is_empty_list() {
        let mock_server = wiremock::MockServer::start().await;
        // No mock mounted: every request returns 404.
        let provider = MangaReader::with_base_url(mock_server.uri());

        let manga = MangaEntry {
            title: "berserk".to_string(),
            last_chapter: 9.0,
            ..MangaEntry::default()
        };

        let pages = provider.page_urls(&manga).await.unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn test_find_details_builds_entry_from_detail_page() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga/berserk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
            .mount(&mock_server)
            .await;

        let provider = MangaReader::with_base_url(mock_server.uri());
        let entry = provider
            .find_details(Path::new("/library"), "berserk", 2.0)
            .await
            .unwrap();

        assert_eq!(entry.provider, "mangareader");
        assert_eq!(entry.title, "berserk");
        assert_eq!(entry.name, "Berserk");
        assert_eq!(entry.chapters, [11.0, 12.0, 12.5]);
        assert_eq!(entry.path, Path::new("/library/berserk"));
        assert_eq!(
            entry.cover_path,
            Path::new("/library/.metadata/berserk-cover.jpg")
        );
    }
}
