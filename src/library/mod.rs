//! Library settings and download-history persistence.
//!
//! The whole application state lives in one JSON settings file
//! (`~/.mangadl.json` by default): the static configuration plus the
//! per-title download history. The store always rewrites the file as a
//! whole — serialized with titles sorted by name for determinism, written
//! to a temporary sibling and renamed into place so readers never observe
//! a partial file.
//!
//! [`LibraryStore::advance`] is the only code path that mutates persisted
//! history; every other component goes through it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::download::{
    CONNECT_TIMEOUT_SECS, DEFAULT_WORKER_COUNT, MAX_WORKER_COUNT, MIN_WORKER_COUNT,
    READ_TIMEOUT_SECS,
};

/// Default settings file name, placed in the user's home directory.
pub const SETTINGS_FILE_NAME: &str = ".mangadl.json";

/// Errors from loading or persisting the settings file.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// File system error reading or writing the store.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file exists but is not valid JSON.
    #[error("cannot parse settings file {path}: {source}")]
    Parse {
        /// The settings file path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The settings could not be serialized.
    #[error("cannot serialize settings for {path}: {source}")]
    Serialize {
        /// The settings file path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    InvalidConfig {
        /// The offending field name.
        field: &'static str,
        /// The offending value.
        value: u64,
        /// Human-readable expected range.
        expected: &'static str,
    },
}

impl LibraryError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Static application configuration.
///
/// Passed by reference into the downloader and CLI constructors — there
/// is no process-wide mutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the cbz library.
    pub library_path: PathBuf,
    /// Name of the site adapter to use (selected once at startup).
    pub provider: String,
    /// Number of parallel page-fetch workers per batch (1-100).
    pub worker_count: usize,
    /// HTTP connect timeout for page fetches, in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout for page fetches, in seconds.
    pub read_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_path: default_library_path(),
            provider: "mangareader".to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Validates config values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), LibraryError> {
        if !(MIN_WORKER_COUNT..=MAX_WORKER_COUNT).contains(&self.worker_count) {
            return Err(LibraryError::InvalidConfig {
                field: "worker_count",
                value: self.worker_count as u64,
                expected: "1..=100",
            });
        }
        for (field, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
        ] {
            if !(1..=3600).contains(&value) {
                return Err(LibraryError::InvalidConfig {
                    field,
                    value,
                    expected: "1..=3600",
                });
            }
        }
        Ok(())
    }
}

fn default_library_path() -> PathBuf {
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join("mangas")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Download history for one subscribed title.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MangaEntry {
    /// Site adapter this title was found on.
    pub provider: String,
    /// Stable identifier, used in URLs and file paths.
    pub title: String,
    /// Chapter currently tracked for download; may be fractional.
    pub last_chapter: f64,
    /// Known full chapter list, ascending. Chapter numbering is neither
    /// contiguous nor necessarily integral.
    pub chapters: Vec<f64>,
    /// Directory holding this title's archives.
    pub path: PathBuf,
    /// Cover image source URL.
    pub cover_url: String,
    /// Local cover image path.
    pub cover_path: PathBuf,
    /// Display name.
    pub name: String,
    /// Alternate display name.
    pub alternate_name: String,
    /// Year of first release.
    pub year_of_release: String,
    /// Publication status.
    pub status: String,
    /// Author credit.
    pub author: String,
    /// Artist credit.
    pub artist: String,
    /// Synopsis text.
    pub description: String,
}

/// The per-title download history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    /// All subscribed titles.
    pub titles: Vec<MangaEntry>,
}

impl History {
    /// Looks up a title by its identifier.
    #[must_use]
    pub fn find(&self, title_id: &str) -> Option<&MangaEntry> {
        self.titles.iter().find(|entry| entry.title == title_id)
    }

    /// Looks up a title by its identifier, mutably.
    pub fn find_mut(&mut self, title_id: &str) -> Option<&mut MangaEntry> {
        self.titles.iter_mut().find(|entry| entry.title == title_id)
    }

    /// Inserts or replaces the entry for `entry.title`.
    pub fn upsert(&mut self, entry: MangaEntry) {
        match self.find_mut(&entry.title) {
            Some(existing) => *existing = entry,
            None => self.titles.push(entry),
        }
    }

    /// Returns the tracked chapter for a title, or `1.0` when the title
    /// has no history yet.
    #[must_use]
    pub fn last_chapter(&self, title_id: &str) -> f64 {
        self.find(title_id).map_or(1.0, |entry| entry.last_chapter)
    }

    /// Advances `last_chapter` for a title to the next known chapter.
    ///
    /// The next chapter is the smallest entry of the title's chapter list
    /// strictly greater than the current `last_chapter` — not simply
    /// `+1`, because chapter numbering has gaps and fractional specials.
    /// When the chapter list is empty (never scraped), falls back to
    /// `last_chapter + 1.0`.
    ///
    /// Returns the new tracked chapter; `None` for an unknown title or
    /// when the list holds nothing newer (the entry is left untouched).
    pub fn advance(&mut self, title_id: &str) -> Option<f64> {
        let entry = self.find_mut(title_id)?;
        let next = if entry.chapters.is_empty() {
            Some(entry.last_chapter + 1.0)
        } else {
            next_chapter(&entry.chapters, entry.last_chapter)
        }?;
        entry.last_chapter = next;
        Some(next)
    }
}

/// Smallest chapter in `chapters` strictly greater than `last`, if any.
#[must_use]
pub fn next_chapter(chapters: &[f64], last: f64) -> Option<f64> {
    chapters
        .iter()
        .copied()
        .filter(|&chapter| chapter > last)
        .reduce(f64::min)
}

/// The persisted application state: configuration plus history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Static configuration.
    pub config: Config,
    /// Per-title download history.
    pub history: History,
}

/// Reads and writes the JSON settings file.
#[derive(Debug, Clone)]
pub struct LibraryStore {
    path: PathBuf,
}

impl LibraryStore {
    /// Creates a store backed by the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default store location: `<home>/.mangadl.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the settings, bootstrapping a default file on first run.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError`] if the file exists but cannot be read or
    /// parsed, or if the bootstrap write fails.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Settings, LibraryError> {
        if !self.path.exists() {
            info!("no settings file yet, writing defaults");
            let settings = Settings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let contents =
            fs::read_to_string(&self.path).map_err(|e| LibraryError::io(&self.path, e))?;
        let settings = serde_json::from_str(&contents).map_err(|e| LibraryError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        debug!("settings loaded");
        Ok(settings)
    }

    /// Persists the settings as a whole: titles sorted by name, written
    /// to a temporary sibling file and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError`] on serialization or file system failure.
    #[instrument(skip(self, settings), fields(path = %self.path.display()))]
    pub fn save(&self, settings: &Settings) -> Result<(), LibraryError> {
        let mut snapshot = settings.clone();
        snapshot
            .history
            .titles
            .sort_by(|a, b| a.title.cmp(&b.title));

        let json =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| LibraryError::Serialize {
                path: self.path.clone(),
                source: e,
            })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LibraryError::io(parent, e))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).map_err(|e| LibraryError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| LibraryError::io(&self.path, e))?;
        debug!("settings saved");
        Ok(())
    }

    /// Advances the tracked chapter for `title_id` and persists the
    /// updated history.
    ///
    /// This is the progress-update step of a chapter download and must
    /// only be called after the chapter's archive was built successfully:
    /// the persisted `last_chapter` must never point at a chapter whose
    /// archive does not exist.
    ///
    /// Returns the new tracked chapter, or `None` when there is nothing
    /// to advance to (unknown title, or the newest known chapter is
    /// already tracked) — in which case nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError`] if persisting fails.
    #[instrument(skip(self, settings))]
    pub fn advance(
        &self,
        settings: &mut Settings,
        title_id: &str,
    ) -> Result<Option<f64>, LibraryError> {
        let Some(next) = settings.history.advance(title_id) else {
            return Ok(None);
        };
        self.save(settings)?;
        info!(title = title_id, chapter = next, "history advanced");
        Ok(Some(next))
    }
}
