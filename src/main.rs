//! CLI entry point for the mangadl tool.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mangadl_core::{
    ChapterDownloadRequest, ChapterDownloader, LibraryStore, MangaEntry, PageFetcher, Provider,
    Settings, extract_first_page, provider_for,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let store = LibraryStore::new(
        args.settings
            .clone()
            .unwrap_or_else(LibraryStore::default_path),
    );
    let mut settings = store.load()?;

    if let Some(library) = &args.library {
        settings.config.library_path = library.clone();
    }
    if let Some(concurrency) = args.concurrency {
        settings.config.worker_count = usize::from(concurrency);
    }
    settings.config.validate()?;

    // One adapter, selected once; everything downstream holds the
    // capability value.
    let provider = provider_for(&settings.config.provider)?;

    match &args.command {
        Command::Search { query } => search(provider.as_ref(), &settings, query).await,
        Command::Add { title } => add(provider.as_ref(), &store, &mut settings, title).await,
        Command::Update { title } => {
            update(provider.as_ref(), &store, &mut settings, title.as_deref()).await
        }
        Command::Status => {
            status(&settings);
            Ok(())
        }
    }
}

/// Searches the site and prints matches, best first.
async fn search(provider: &dyn Provider, settings: &Settings, query: &str) -> Result<()> {
    let results = provider
        .search(&settings.config.library_path, query)
        .await?;

    if results.is_empty() {
        println!("No titles found for \"{query}\".");
        return Ok(());
    }

    for entry in results {
        println!(
            "{:<24} {} [{} chapters, {}]",
            entry.title,
            display_name(&entry),
            entry.chapters.len(),
            if entry.status.is_empty() {
                "status unknown"
            } else {
                &entry.status
            }
        );
    }
    Ok(())
}

/// Subscribes to a title: fetches metadata plus chapter list and
/// persists the new history entry.
async fn add(
    provider: &dyn Provider,
    store: &LibraryStore,
    settings: &mut Settings,
    title: &str,
) -> Result<()> {
    let last_chapter = settings.history.last_chapter(title);
    let entry = provider
        .find_details(&settings.config.library_path, title, last_chapter)
        .await?;

    if entry.name.is_empty() && entry.chapters.is_empty() {
        bail!("title `{title}` was not found on {}", provider.name());
    }

    download_cover(&entry).await;

    println!(
        "Subscribed to {} ({} known chapters, tracking chapter {})",
        display_name(&entry),
        entry.chapters.len(),
        entry.last_chapter
    );

    settings.history.upsert(entry);
    store.save(settings)?;
    Ok(())
}

/// Downloads new chapters for one title or for every subscribed title.
async fn update(
    provider: &dyn Provider,
    store: &LibraryStore,
    settings: &mut Settings,
    only: Option<&str>,
) -> Result<()> {
    if let Some(title) = only
        && settings.history.find(title).is_none()
    {
        bail!("title `{title}` is not in the library; run `mangadl add {title}` first");
    }
    if settings.history.titles.is_empty() {
        println!("The library is empty; run `mangadl add <title>` first.");
        return Ok(());
    }

    let downloader = ChapterDownloader::new(&settings.config)?;
    let titles: Vec<String> = settings
        .history
        .titles
        .iter()
        .filter(|entry| only.is_none_or(|title| entry.title == title))
        .map(|entry| entry.title.clone())
        .collect();

    for title in titles {
        update_title(provider, store, settings, &downloader, &title)
            .await
            .with_context(|| format!("update failed for `{title}`"))?;
    }
    Ok(())
}

/// Downloads every not-yet-downloaded chapter of one title, advancing
/// history after each successful archive.
async fn update_title(
    provider: &dyn Provider,
    store: &LibraryStore,
    settings: &mut Settings,
    downloader: &ChapterDownloader,
    title: &str,
) -> Result<()> {
    let Some(mut entry) = settings.history.find(title).cloned() else {
        return Ok(());
    };

    // Refresh the known chapter list before deciding what is new.
    match provider.chapter_list(&entry).await {
        Ok(chapters) if !chapters.is_empty() => {
            entry.chapters = chapters;
            settings.history.upsert(entry.clone());
            store.save(settings)?;
        }
        Ok(_) => {}
        Err(e) => warn!(title, error = %e, "could not refresh chapter list"),
    }

    let Some(latest) = entry.chapters.iter().copied().reduce(f64::max) else {
        info!(title, "site lists no chapters yet");
        return Ok(());
    };

    while entry.last_chapter <= latest {
        let chapter = entry.last_chapter;
        let pages = provider.page_urls(&entry).await?;
        if pages.is_empty() {
            info!(title, chapter, "no pages published for chapter yet");
            break;
        }

        let request =
            ChapterDownloadRequest::new(entry.title.as_str(), chapter, pages, &entry.path);
        let bar = chapter_progress_bar(&entry, chapter);
        let outcome = downloader
            .download_chapter(&request, |fraction| {
                bar.set_position((fraction * 100.0).round() as u64);
            })
            .await;
        bar.finish_and_clear();

        // Any page failure aborts this title with history untouched, so
        // the next run retries the same chapter.
        let Some(archive_path) = outcome? else {
            break;
        };

        println!(
            "Downloaded {} chapter {chapter} -> {}",
            display_name(&entry),
            archive_path.display()
        );
        extract_thumbnail(settings, &entry, chapter, &archive_path);

        match store.advance(settings, &entry.title)? {
            Some(next) => entry.last_chapter = next,
            // Newest known chapter reached.
            None => break,
        }
    }
    Ok(())
}

/// Prints the library summary.
fn status(settings: &Settings) {
    if settings.history.titles.is_empty() {
        println!("The library is empty; run `mangadl add <title>` first.");
        return;
    }

    println!("Library: {}", settings.config.library_path.display());
    for entry in &settings.history.titles {
        match entry.chapters.iter().copied().reduce(f64::max) {
            Some(latest) => println!(
                "  {:<28} tracking {:>6.1} of {:>6.1} ({} chapters)",
                entry.title,
                entry.last_chapter,
                latest,
                entry.chapters.len()
            ),
            None => println!(
                "  {:<28} tracking {:>6.1} (chapter list unknown)",
                entry.title, entry.last_chapter
            ),
        }
    }
}

/// Fetches the title's cover image if it is not on disk yet.
/// Failures are logged, never fatal: covers are cosmetic.
async fn download_cover(entry: &MangaEntry) {
    if entry.cover_url.is_empty() || entry.cover_path.exists() {
        return;
    }
    if let Some(parent) = entry.cover_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), error = %e, "cannot create metadata directory");
        return;
    }

    match PageFetcher::new()
        .fetch_page(&entry.cover_url, &entry.cover_path)
        .await
    {
        Ok(_) => debug!(path = %entry.cover_path.display(), "cover downloaded"),
        Err(e) => warn!(url = %entry.cover_url, error = %e, "cover download failed"),
    }
}

/// Copies the chapter's first page next to the covers for use as a
/// thumbnail. Failures are logged, never fatal.
fn extract_thumbnail(settings: &Settings, entry: &MangaEntry, chapter: f64, archive_path: &Path) {
    let thumb = settings
        .config
        .library_path
        .join(".metadata")
        .join(format!("{}-{chapter:05.1}.jpg", entry.title));

    match extract_first_page(archive_path, &thumb) {
        Ok(Some(_)) => debug!(path = %thumb.display(), "thumbnail extracted"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "thumbnail extraction failed"),
    }
}

/// Display name for a title, falling back to its identifier.
fn display_name(entry: &MangaEntry) -> &str {
    if entry.name.is_empty() {
        &entry.title
    } else {
        &entry.name
    }
}

fn chapter_progress_bar(entry: &MangaEntry, chapter: f64) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg} {wide_bar} {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(format!("{} chapter {chapter}", display_name(entry)));
    bar
}
