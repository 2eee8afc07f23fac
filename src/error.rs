//! Error types for projpack.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 4=format, 5=integrity, 6=archive, etc.)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for projpack operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    DatabaseError,

    // Not Found (exit 3)
    ProjectNotFound,

    // Validation (exit 4)
    FormatError,
    InvalidArgument,

    // Integrity (exit 5)
    IntegrityError,

    // Archive (exit 6)
    ArchiveError,
    ArchiveSecurity,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Cancellation (exit 9)
    Cancelled,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::FormatError => "FORMAT_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::IntegrityError => "INTEGRITY_ERROR",
            Self::ArchiveError => "ARCHIVE_ERROR",
            Self::ArchiveSecurity => "ARCHIVE_SECURITY",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError => 2,
            Self::ProjectNotFound => 3,
            Self::FormatError | Self::InvalidArgument => 4,
            Self::IntegrityError => 5,
            Self::ArchiveError | Self::ArchiveSecurity => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::Cancelled => 9,
        }
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur while exporting or importing a project archive.
#[derive(Error, Debug)]
pub enum Error {
    /// The context could not be resolved (no database, no active project).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest missing, unreadable, or declaring an unsupported version/hash.
    #[error("Format error: {0}")]
    Format(String),

    /// A restored file does not hash to the value recorded at export time.
    #[error("Integrity error: {path} has hash {actual}, expected {expected}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// An archive entry whose path would escape the extraction root.
    #[error("Archive entry escapes extraction root: {entry}")]
    ArchiveSecurity { entry: String },

    /// An entry referenced by the archive's own index is not in the archive.
    #[error("Archive entry missing: {0}")]
    MissingEntry(String),

    #[error("Project not found: {id}")]
    ProjectNotFound { id: i64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Format(_) => ErrorCode::FormatError,
            Self::Integrity { .. } => ErrorCode::IntegrityError,
            Self::ArchiveSecurity { .. } => ErrorCode::ArchiveSecurity,
            Self::Archive(_) => ErrorCode::ArchiveError,
            Self::MissingEntry(_) | Self::Io(_) => ErrorCode::IoError,
            Self::ProjectNotFound { .. } => ErrorCode::ProjectNotFound,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Config(_) => Some(
                "Pass --db <path> or set PROJPACK_DB, and --project <id> or PROJPACK_PROJECT"
                    .to_string(),
            ),
            Self::Format(_) => Some(
                "The file is not a projpack archive or was produced by an incompatible version. \
                 Use `projpack inspect <archive>` to see its manifest."
                    .to_string(),
            ),
            Self::Integrity { .. } => Some(
                "The archive is corrupted. Re-export the project; no files were trusted."
                    .to_string(),
            ),
            Self::ArchiveSecurity { .. } => {
                Some("Refusing to extract an archive with unsafe entry paths.".to_string())
            }
            Self::ProjectNotFound { id } => Some(format!(
                "No project with id {id}. Omit --target to create a new project on import."
            )),
            Self::Database(_)
            | Self::Archive(_)
            | Self::MissingEntry(_)
            | Self::Cancelled
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::Format("x".into()).exit_code(), 4);
        assert_eq!(Error::Cancelled.exit_code(), 9);
        assert_eq!(
            Error::ArchiveSecurity {
                entry: "../x".into()
            }
            .exit_code(),
            6
        );
    }

    #[test]
    fn test_structured_json_includes_hint() {
        let err = Error::Integrity {
            path: PathBuf::from("/tmp/report.pdf"),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "INTEGRITY_ERROR");
        assert_eq!(json["error"]["exit_code"], 5);
        assert!(json["error"]["hint"].is_string());
    }

    #[test]
    fn test_structured_json_without_hint() {
        let json = Error::Cancelled.to_structured_json();
        assert_eq!(json["error"]["code"], "CANCELLED");
        assert!(json["error"].get("hint").is_none());
    }
}
