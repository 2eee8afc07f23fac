//! Content-addressed file store inside an archive working directory.
//!
//! Files live at `files/<first two hex chars>/<sha256>/<display name>`.
//! Restoring a file copies it out and re-hashes the copy; a mismatch aborts.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::FileRecord;
use crate::transfer::archive::safe_relative_path;
use crate::transfer::FILES_DIR;

const READ_BUFFER: usize = 64 * 1024;

/// Compute the SHA-256 of a byte stream as lowercase hex.
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 of a file's raw bytes as lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    hash_reader(File::open(path)?)
}

/// Reduce a stored display name to a single safe path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        "file".to_string()
    } else {
        last.to_string()
    }
}

/// A file placed into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Archive-relative location, forward slashes.
    pub path: String,
    pub sha256: String,
    pub size: u64,
    pub file_name: String,
}

/// Content store rooted at an archive working directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive-relative location for a hash and display name.
    #[must_use]
    pub fn entry_path(sha256: &str, file_name: &str) -> String {
        let prefix = sha256.get(..2).unwrap_or(sha256);
        format!("{FILES_DIR}/{prefix}/{sha256}/{file_name}")
    }

    /// Hash `source` and copy it into the store under `display_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the copy fails.
    pub fn store(&self, source: &Path, display_name: &str) -> Result<StoredFile> {
        let sha256 = hash_file(source)?;
        let file_name = sanitize_file_name(display_name);
        let path = Self::entry_path(&sha256, &file_name);
        let target = self.root.join(&path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let size = fs::copy(source, &target)?;
        debug!(source = %source.display(), %sha256, size, "Stored file");

        Ok(StoredFile {
            path,
            sha256,
            size,
            file_name,
        })
    }

    /// Locate a record's content inside the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArchiveSecurity`] for an unsafe path and
    /// [`Error::MissingEntry`] if the content is not present.
    pub fn locate(&self, record: &FileRecord) -> Result<PathBuf> {
        let path = self.root.join(safe_relative_path(&record.path)?);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::MissingEntry(record.path.clone()))
        }
    }

    /// Copy a record's content to `destination` and verify its hash.
    ///
    /// A copy that does not match is removed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] on a hash mismatch, or an I/O error.
    pub fn restore(&self, record: &FileRecord, destination: &Path) -> Result<()> {
        let source = self.locate(record)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, destination)?;

        let actual = hash_file(destination)?;
        if !actual.eq_ignore_ascii_case(&record.sha256) {
            warn!(path = %destination.display(), expected = %record.sha256, %actual, "Hash mismatch");
            if let Err(e) = fs::remove_file(destination) {
                debug!(path = %destination.display(), error = %e, "Failed to remove corrupt copy");
            }
            return Err(Error::Integrity {
                path: destination.to_path_buf(),
                expected: record.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }
}
