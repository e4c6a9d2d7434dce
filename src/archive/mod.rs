//! cbz archive assembly and first-page extraction.
//!
//! A chapter archive is a plain zip container whose entries are the page
//! image files, named with zero-padded sequential indices so that
//! archive-native alphabetical ordering reconstructs reading order. The
//! builder never renames entries; it relies on the names assigned before
//! the pages were fetched.
//!
//! The archive is written to a `.part` temporary name and renamed into
//! place only after it is fully written and closed, so a reader can never
//! observe a half-written file at the final path.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Errors that can occur while building or reading a chapter archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The output directory could not be created.
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The scratch directory could not be enumerated.
    #[error("cannot enumerate scratch directory {path}: {source}")]
    Scratch {
        /// The scratch directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A page file name is not valid UTF-8 and cannot become a zip entry.
    #[error("page file name is not valid UTF-8: {path}")]
    EntryName {
        /// The offending path.
        path: PathBuf,
    },

    /// File system error while reading pages or writing the archive.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The zip writer or reader reported an error.
    #[error("zip error on {path}: {source}")]
    Zip {
        /// The archive path.
        path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// The finished archive could not be renamed into place.
    #[error("cannot commit archive {from} to {to}: {source}")]
    Commit {
        /// The temporary archive path.
        from: PathBuf,
        /// The final archive path.
        to: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    fn scratch(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Scratch {
            path: path.into(),
            source,
        }
    }

    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}

/// File name of a chapter archive: `<title>-<chapter>.cbz` with the
/// chapter number formatted to one decimal place and zero-padded to
/// width 3 before the decimal (`003.0`, `012.5`).
#[must_use]
pub fn archive_file_name(title_id: &str, chapter_id: f64) -> String {
    format!("{title_id}-{chapter_id:05.1}.cbz")
}

/// Packages every page file in `scratch_dir` into a cbz archive under
/// `output_dir`, then removes the page files and the scratch directory.
///
/// Pages are enumerated non-recursively and sorted by file name; entry
/// names are the file names, unchanged. The archive is committed with a
/// write-to-`.part`-then-rename sequence, so a failure at any point
/// leaves nothing at the final path.
///
/// # Errors
///
/// Returns a distinct [`ArchiveError`] variant for directory creation,
/// scratch enumeration, page/archive IO, zip writing, and the final
/// rename.
#[instrument(skip_all, fields(output = %output_dir.display(), title = title_id, chapter = chapter_id))]
pub fn build(
    output_dir: &Path,
    scratch_dir: &Path,
    title_id: &str,
    chapter_id: f64,
) -> Result<PathBuf, ArchiveError> {
    fs::create_dir_all(output_dir).map_err(|e| ArchiveError::create_dir(output_dir, e))?;

    let pages = list_page_files(scratch_dir)?;
    let final_path = output_dir.join(archive_file_name(title_id, chapter_id));
    let part_path = final_path.with_extension("cbz.part");

    debug!(pages = pages.len(), part = %part_path.display(), "writing archive");
    write_archive(&part_path, &pages)?;

    fs::rename(&part_path, &final_path).map_err(|e| {
        let _ = fs::remove_file(&part_path);
        ArchiveError::Commit {
            from: part_path.clone(),
            to: final_path.clone(),
            source: e,
        }
    })?;

    // Scratch cleanup is mandatory: one directory is created per attempt
    // and they accumulate otherwise.
    for page in &pages {
        fs::remove_file(page).map_err(|e| ArchiveError::io(page.clone(), e))?;
    }
    fs::remove_dir(scratch_dir).map_err(|e| ArchiveError::io(scratch_dir, e))?;

    info!(path = %final_path.display(), "archive committed");
    Ok(final_path)
}

/// Copies the first entry of a chapter archive to `thumb_path`, for use
/// as a chapter thumbnail.
///
/// A zero-entry archive is a non-fatal skip: a warning is logged and
/// `Ok(None)` is returned.
///
/// # Errors
///
/// Returns [`ArchiveError`] if the archive cannot be opened or read, or
/// the thumbnail cannot be written.
#[instrument(skip_all, fields(archive = %archive_path.display()))]
pub fn extract_first_page(
    archive_path: &Path,
    thumb_path: &Path,
) -> Result<Option<PathBuf>, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| ArchiveError::zip(archive_path, e))?;

    if archive.len() == 0 {
        warn!("archive has no entries, skipping thumbnail");
        return Ok(None);
    }

    let mut entry = archive
        .by_index(0)
        .map_err(|e| ArchiveError::zip(archive_path, e))?;

    if let Some(parent) = thumb_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::create_dir(parent, e))?;
    }
    let mut out = File::create(thumb_path).map_err(|e| ArchiveError::io(thumb_path, e))?;
    io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::io(thumb_path, e))?;

    Ok(Some(thumb_path.to_path_buf()))
}

/// Enumerates regular files in the scratch directory, sorted by name.
fn list_page_files(scratch_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(scratch_dir).map_err(|e| ArchiveError::scratch(scratch_dir, e))? {
        let entry = entry.map_err(|e| ArchiveError::scratch(scratch_dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| ArchiveError::scratch(scratch_dir, e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Writes all pages into a zip at `part_path`, removing the partial file
/// on any error.
fn write_archive(part_path: &Path, pages: &[PathBuf]) -> Result<(), ArchiveError> {
    let result = write_entries(part_path, pages);
    if result.is_err() {
        let _ = fs::remove_file(part_path);
    }
    result
}

fn write_entries(part_path: &Path, pages: &[PathBuf]) -> Result<(), ArchiveError> {
    let file = File::create(part_path).map_err(|e| ArchiveError::io(part_path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for page in pages {
        let name = page
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::EntryName { path: page.clone() })?;
        writer
            .start_file(name, options)
            .map_err(|e| ArchiveError::zip(part_path, e))?;
        let mut source = File::open(page).map_err(|e| ArchiveError::io(page.clone(), e))?;
        io::copy(&mut source, &mut writer).map_err(|e| ArchiveError::io(part_path, e))?;
    }

    writer
        .finish()
        .map_err(|e| ArchiveError::zip(part_path, e))?;
    Ok(())
}
