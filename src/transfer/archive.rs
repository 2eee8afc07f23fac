//! Zip packaging and safe extraction of archive working directories.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use zip::result::ZipError;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// File extension for project archives, without the dot.
pub const ARCHIVE_EXTENSION: &str = "projpack";

/// Create a uniquely named scratch directory, removed when dropped.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn scratch_dir(prefix: &str) -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
}

/// Validate an archive entry name and turn it into a relative path.
///
/// Backslashes count as separators. Absolute names, drive prefixes, and any
/// `..` component are rejected.
///
/// # Errors
///
/// Returns [`Error::ArchiveSecurity`] for names that could escape the root.
pub fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let reject = || Error::ArchiveSecurity {
        entry: name.to_string(),
    };
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(reject());
    }

    let mut out = PathBuf::new();
    for (i, part) in normalized.split('/').enumerate() {
        match part {
            "" | "." => {}
            ".." => return Err(reject()),
            drive if i == 0 && drive.len() == 2 && drive.ends_with(':') => return Err(reject()),
            part => out.push(part),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(reject());
    }
    Ok(out)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
    }
    Ok(())
}

/// Render a relative path with forward slashes.
///
/// Returns `None` if the path is absolute or contains `..`.
#[must_use]
pub fn portable_relative(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn entry_name(rel: &Path) -> String {
    portable_relative(rel).unwrap_or_else(|| rel.to_string_lossy().replace('\\', "/"))
}

/// Zip every file under `source` into `destination`.
///
/// The archive is written to a temporary file next to `destination` and moved
/// into place only once complete, replacing any existing file.
///
/// # Errors
///
/// Returns an error if reading `source` or writing the archive fails.
pub fn pack_directory(source: &Path, destination: &Path) -> Result<usize> {
    let mut files = Vec::new();
    collect_files(source, source, &mut files)?;
    files.sort();

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let temp = tempfile::NamedTempFile::new_in(parent)?;

    {
        let mut zip = ZipWriter::new(temp.as_file());
        for rel in &files {
            let path = source.join(rel);
            let size = fs::metadata(&path)?.len();
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u64::from(u32::MAX));
            zip.start_file(entry_name(rel), options)?;
            io::copy(&mut File::open(&path)?, &mut zip)?;
        }
        zip.finish()?;
    }

    temp.persist(destination).map_err(|e| Error::Io(e.error))?;
    debug!(archive = %destination.display(), entries = files.len(), "Packed archive");
    Ok(files.len())
}

/// Extract `archive` into `destination`.
///
/// Every entry name is validated before anything is written, so an archive
/// with one bad entry leaves the destination untouched.
///
/// # Errors
///
/// Returns [`Error::ArchiveSecurity`] for unsafe entries, [`Error::Archive`]
/// for unreadable zip data, or an I/O error.
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<usize> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        entries.push((safe_relative_path(entry.name())?, entry.is_dir()));
    }

    let mut extracted = 0;
    for (i, (rel, is_dir)) in entries.into_iter().enumerate() {
        let target = destination.join(rel);
        if is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entry = zip.by_index(i)?;
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    debug!(archive = %archive.display(), files = extracted, "Extracted archive");
    Ok(extracted)
}

/// Read one entry of an archive into memory without extracting the rest.
///
/// Returns `None` if the archive has no such entry.
///
/// # Errors
///
/// Returns [`Error::Archive`] for unreadable zip data, or an I/O error.
pub fn read_entry(archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut entry = match zip.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    io::Read::read_to_end(&mut entry, &mut bytes)?;
    Ok(Some(bytes))
}

/// Entry count and total uncompressed size of an archive.
///
/// # Errors
///
/// Returns [`Error::Archive`] for unreadable zip data, or an I/O error.
pub fn archive_summary(archive: &Path) -> Result<(usize, u64)> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut total = 0;
    for i in 0..zip.len() {
        total += zip.by_index(i)?.size();
    }
    Ok((zip.len(), total))
}
