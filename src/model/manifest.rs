//! Archive manifest and file index records.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transfer::codec::TableFormat;

/// Format version written by this build.
pub const FORMAT_VERSION: &str = "1.0";

/// Format versions this build can import.
pub const SUPPORTED_FORMAT_VERSIONS: &[&str] = &["1.0"];

/// The only hash algorithm archives are produced with.
pub const HASH_ALGORITHM: &str = "SHA256";

/// Database provider recorded in manifests.
pub const DB_PROVIDER: &str = "SQLite";

/// Describes one archive. Written last on export, read and validated first on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub format_version: String,
    pub producer_version: String,
    pub created_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_id: Option<Uuid>,
    pub project_id: String,
    pub project_name: String,
    pub db_provider: String,
    pub db_version: String,
    /// Exported tables, in the order they were written.
    pub tables: Vec<String>,
    #[serde(default)]
    pub table_format: TableFormat,
    pub file_count: usize,
    #[serde(default)]
    pub hash_algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
}

impl Manifest {
    /// Read a manifest file. Any failure is a format error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the file is missing or not a manifest.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Format("manifest.json not found in archive".to_string()));
        }
        Self::parse(&std::fs::read(path)?)
    }

    /// Parse manifest JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the bytes are not a manifest.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Format(format!("manifest.json is not valid: {e}")))
    }

    /// Check that this build understands the archive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] for a missing/unsupported version or hash algorithm.
    pub fn validate(&self) -> Result<()> {
        if self.format_version.trim().is_empty() {
            return Err(Error::Format("archive format version is missing".to_string()));
        }
        if !SUPPORTED_FORMAT_VERSIONS.contains(&self.format_version.as_str()) {
            return Err(Error::Format(format!(
                "unsupported archive format version '{}'",
                self.format_version
            )));
        }
        if !self.hash_algorithm.eq_ignore_ascii_case(HASH_ALGORITHM) {
            return Err(Error::Format(format!(
                "unsupported hash algorithm '{}'",
                self.hash_algorithm
            )));
        }
        Ok(())
    }
}

/// One bundled file, as listed in `meta/files.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Location inside the archive, forward slashes, relative to the archive root.
    pub path: String,
    pub sha256: String,
    pub size: u64,
    /// Path relative to the evidence root at export time.
    pub original_rel: String,
    pub file_name: String,
}
