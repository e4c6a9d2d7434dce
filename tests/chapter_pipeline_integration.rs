//! Integration tests for the chapter-download pipeline.
//!
//! These tests drive ChapterDownloader against a mock HTTP server and a
//! real filesystem, covering page ordering under out-of-order completion,
//! exactly-once result accounting, the all-or-nothing archive policy, and
//! history advancement.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mangadl_core::{
    ChapterDownloadRequest, ChapterDownloader, ChapterError, LibraryStore, MangaEntry,
    PageFetcher, Provider, Settings,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::ZipArchive;

// ==================== Helper Functions ====================

/// Helper to create a downloader sharing one fetcher.
fn create_downloader(worker_count: usize) -> ChapterDownloader {
    ChapterDownloader::with_fetcher(Arc::new(PageFetcher::new()), worker_count)
        .expect("valid worker count")
}

/// Mounts one mock page per index; `delay_ms` lets tests force
/// out-of-order completion.
async fn mount_pages(server: &MockServer, count: usize, delay_ms: impl Fn(usize) -> u64) {
    for i in 0..count {
        Mock::given(method("GET"))
            .and(path(format!("/pages/{i}.jpg")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(page_body(i))
                    .set_delay(Duration::from_millis(delay_ms(i))),
            )
            .mount(server)
            .await;
    }
}

/// Distinct, recognizable body for page `i`.
fn page_body(i: usize) -> Vec<u8> {
    format!("image-bytes-for-page-{i}").into_bytes()
}

fn page_urls(server: &MockServer, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}/pages/{i}.jpg", server.uri()))
        .collect()
}

/// Reads entry names and bodies from a cbz archive, in archive order.
fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).expect("open archive")).expect("read zip");
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).expect("entry");
        let mut body = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut body).expect("entry body");
        entries.push((entry.name().to_string(), body));
    }
    entries
}

/// Scratch directories left in the system temp dir for a given title
/// prefix. The orchestrator must never leak these.
fn leftover_scratch_dirs(title: &str) -> Vec<PathBuf> {
    let prefix = format!("{title}-");
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ==================== Ordering (P1) ====================

#[tokio::test]
async fn test_archive_order_matches_page_order_despite_delays() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");

    // Early pages respond slowest, so completion order is roughly the
    // reverse of submission order within each batch.
    mount_pages(&server, 10, |i| ((10 - i) as u64 % 5) * 120).await;

    let downloader = create_downloader(5);
    let request = ChapterDownloadRequest::new(
        "ordering-title",
        1.0,
        page_urls(&server, 10),
        output.path(),
    );

    let archive_path = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect("download succeeds")
        .expect("archive produced");

    let entries = read_archive(&archive_path);
    assert_eq!(entries.len(), 10);
    for (i, (name, body)) in entries.iter().enumerate() {
        assert_eq!(name, &format!("page_{i:03}.jpg"), "entry {i} out of order");
        assert_eq!(body, &page_body(i), "entry {i} holds the wrong page");
    }
}

// ==================== Scenario A: empty page list ====================

#[tokio::test]
async fn test_empty_page_list_returns_none_without_side_effects() {
    let output = TempDir::new().expect("temp dir");
    let downloader = create_downloader(4);
    let request =
        ChapterDownloadRequest::new("empty-title", 2.0, Vec::new(), output.path());

    let mut progress_calls = 0usize;
    let result = downloader
        .download_chapter(&request, |_| progress_calls += 1)
        .await
        .expect("empty chapter is not an error");

    assert!(result.is_none(), "no archive for an empty chapter");
    assert_eq!(progress_calls, 0);
    let leftovers: Vec<_> = std::fs::read_dir(output.path())
        .expect("read output dir")
        .collect();
    assert!(leftovers.is_empty(), "output dir must stay empty");
}

// ==================== Scenario B: full success ====================

#[tokio::test]
async fn test_successful_chapter_produces_named_archive_and_advances_history() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");
    let settings_dir = TempDir::new().expect("settings dir");

    mount_pages(&server, 10, |_| 0).await;

    let store = LibraryStore::new(settings_dir.path().join("settings.json"));
    let mut settings = Settings::default();
    settings.history.upsert(MangaEntry {
        title: "berserk".to_string(),
        last_chapter: 2.0,
        chapters: vec![1.0, 2.0, 3.5, 4.0],
        ..MangaEntry::default()
    });
    store.save(&settings).expect("seed history");

    let downloader = create_downloader(4);
    let request =
        ChapterDownloadRequest::new("berserk", 2.0, page_urls(&server, 10), output.path());

    let archive_path = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect("download succeeds")
        .expect("archive produced");

    assert_eq!(archive_path, output.path().join("berserk-002.0.cbz"));
    assert_eq!(read_archive(&archive_path).len(), 10);

    // Progress is persisted only after the archive exists, driven by the
    // caller. The next chapter comes from the chapter list: 3.5, not 3.0.
    let advanced = store
        .advance(&mut settings, "berserk")
        .expect("advance persists");
    assert_eq!(advanced, Some(3.5));
    let reloaded = store.load().expect("reload");
    assert!((reloaded.history.last_chapter("berserk") - 3.5).abs() < f64::EPSILON);
}

// ==================== Scenario C / P3: all-or-nothing ====================

#[tokio::test]
async fn test_single_page_failure_aborts_chapter_without_archive() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");
    let settings_dir = TempDir::new().expect("settings dir");

    // Pages 0-9 exist except page 7, which 404s.
    for i in 0..10 {
        let template = if i == 7 {
            ResponseTemplate::new(404)
        } else {
            ResponseTemplate::new(200).set_body_bytes(page_body(i))
        };
        Mock::given(method("GET"))
            .and(path(format!("/pages/{i}.jpg")))
            .respond_with(template)
            .mount(&server)
            .await;
    }

    let store = LibraryStore::new(settings_dir.path().join("settings.json"));
    let mut settings = Settings::default();
    settings.history.upsert(MangaEntry {
        title: "scenario-c-title".to_string(),
        last_chapter: 2.0,
        chapters: vec![1.0, 2.0, 3.0],
        ..MangaEntry::default()
    });
    store.save(&settings).expect("seed history");
    let history_before = std::fs::read_to_string(store.path()).expect("history bytes");

    let downloader = create_downloader(4);
    let request = ChapterDownloadRequest::new(
        "scenario-c-title",
        2.0,
        page_urls(&server, 10),
        output.path(),
    );

    let error = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect_err("a failed page must fail the chapter");

    // The error names the exact page so the user can retry.
    match &error {
        ChapterError::Page {
            page_index,
            status,
            total,
            ..
        } => {
            assert_eq!(*page_index, 7);
            assert_eq!(*status, 404);
            assert_eq!(*total, 10);
        }
        other => panic!("Expected ChapterError::Page, got: {other:?}"),
    }
    let msg = error.to_string();
    assert!(msg.contains("page 7"), "expected page index in: {msg}");
    assert!(msg.contains("404"), "expected status in: {msg}");

    // No archive, not even a partial one.
    let leftovers: Vec<_> = std::fs::read_dir(output.path())
        .expect("read output dir")
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    assert!(
        leftovers.is_empty(),
        "no archive or partial file may exist: {leftovers:?}"
    );

    // Scratch directory cleaned up on failure.
    assert!(
        leftover_scratch_dirs("scenario-c-title").is_empty(),
        "scratch dir must be removed after a failed attempt"
    );

    // History is byte-for-byte unchanged.
    let history_after = std::fs::read_to_string(store.path()).expect("history bytes");
    assert_eq!(history_before, history_after);
}

// ==================== P4: progress monotonicity ====================

#[tokio::test]
async fn test_progress_fractions_are_monotonic_and_reach_one() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");

    mount_pages(&server, 9, |i| (i as u64 % 3) * 80).await;

    let downloader = create_downloader(4);
    let request = ChapterDownloadRequest::new(
        "progress-title",
        1.0,
        page_urls(&server, 9),
        output.path(),
    );

    let mut fractions = Vec::new();
    downloader
        .download_chapter(&request, |fraction| fractions.push(fraction))
        .await
        .expect("download succeeds");

    assert!(!fractions.is_empty());
    for pair in fractions.windows(2) {
        assert!(
            pair[1] >= pair[0],
            "progress went backwards: {:?} -> {:?}",
            pair[0],
            pair[1]
        );
    }
    assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
    assert!(
        (fractions.last().copied().unwrap_or_default() - 1.0).abs() < f64::EPSILON,
        "final fraction must be 1.0"
    );
}

// ==================== Scenario D: worker count is not a correctness knob ====

#[tokio::test]
async fn test_worker_count_does_not_change_final_output() {
    let server = MockServer::start().await;
    mount_pages(&server, 10, |i| (i as u64 % 4) * 60).await;

    let mut outputs = Vec::new();
    for worker_count in [1, 8] {
        let output = TempDir::new().expect("temp dir");
        let downloader = create_downloader(worker_count);
        let request = ChapterDownloadRequest::new(
            "workers-title",
            3.0,
            page_urls(&server, 10),
            output.path(),
        );

        let archive_path = downloader
            .download_chapter(&request, |_| {})
            .await
            .expect("download succeeds")
            .expect("archive produced");

        assert_eq!(
            archive_path.file_name().and_then(|n| n.to_str()),
            Some("workers-title-003.0.cbz")
        );
        outputs.push((read_archive(&archive_path), output));
    }

    assert_eq!(
        outputs[0].0, outputs[1].0,
        "1 worker and 8 workers must produce identical archives"
    );
}

// ==================== Fractional chapters ====================

#[tokio::test]
async fn test_fractional_chapter_number_in_archive_name() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");
    mount_pages(&server, 3, |_| 0).await;

    let downloader = create_downloader(2);
    let request = ChapterDownloadRequest::new(
        "special-title",
        12.5,
        page_urls(&server, 3),
        output.path(),
    );

    let archive_path = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect("download succeeds")
        .expect("archive produced");

    assert_eq!(
        archive_path.file_name().and_then(|n| n.to_str()),
        Some("special-title-012.5.cbz")
    );
}

// ==================== Repeat attempt after failure ====================

#[tokio::test]
async fn test_failed_attempt_can_be_retried_by_reinvocation() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");

    // First attempt: page 1 fails twice (two mock hits), then recovers.
    Mock::given(method("GET"))
        .and(path("/pages/0.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(page_body(0)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pages/1.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pages/1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(page_body(1)))
        .mount(&server)
        .await;

    let downloader = create_downloader(2);
    let request =
        ChapterDownloadRequest::new("retry-title", 4.0, page_urls(&server, 2), output.path());

    // The pipeline has no internal retries: the first attempt fails.
    let error = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect_err("503 must fail the attempt");
    assert!(matches!(error, ChapterError::Page { status: 503, .. }));

    // A fresh invocation of the same request succeeds.
    let archive_path = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect("second attempt succeeds")
        .expect("archive produced");
    assert_eq!(read_archive(&archive_path).len(), 2);
}

// ==================== Provider-fed end-to-end ====================

#[tokio::test]
async fn test_provider_page_list_feeds_pipeline_end_to_end() {
    let server = MockServer::start().await;
    let output = TempDir::new().expect("temp dir");

    // Chapter page advertising three page images, in reading order.
    let chapter_html = format!(
        r#"<html><body><p id="arraydata" style="display:none">{0}/pages/0.jpg,{0}/pages/1.jpg,{0}/pages/2.jpg</p></body></html>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/chapter/berserk-chapter-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chapter_html))
        .mount(&server)
        .await;
    mount_pages(&server, 3, |_| 0).await;

    let provider = mangadl_core::MangaReader::with_base_url(server.uri());
    let manga = MangaEntry {
        title: "berserk".to_string(),
        last_chapter: 2.0,
        ..MangaEntry::default()
    };

    let pages = provider.page_urls(&manga).await.expect("page list");
    assert_eq!(pages.len(), 3);

    let downloader = create_downloader(2);
    let request = ChapterDownloadRequest::new("berserk", 2.0, pages, output.path());
    let archive_path = downloader
        .download_chapter(&request, |_| {})
        .await
        .expect("download succeeds")
        .expect("archive produced");

    let entries = read_archive(&archive_path);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].1, page_body(0));
}
