//! Configuration management.
//!
//! This module resolves where the database lives, which project is active,
//! and which naming conventions the pipelines apply to the schema.
//!
//! # Resolution
//!
//! - **Database**: `--db`, then `PROJPACK_DB`, then `~/.projpack/data/projpack.db`
//! - **Project**: `--project`, then `PROJPACK_PROJECT`, then the latest project
//! - **Evidence root**: `--evidence-root`, then `PROJPACK_EVIDENCE_ROOT`, then
//!   the project's evidence folder, then the current directory
//! - **Conventions**: `--conventions <file.json>`, else built-in defaults

mod context;
pub mod conventions;

pub use context::{CliContext, ConnectionDescriptor, ProjectContext, StaticContext};
pub use conventions::{Conventions, NaturalKeyRule};

use crate::error::{Error, Result};

use std::path::{Path, PathBuf};

/// Get the global projpack directory location (`~/.projpack/`).
#[must_use]
pub fn global_projpack_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".projpack"))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `PROJPACK_DB` environment variable
/// 3. Global location: `~/.projpack/data/projpack.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Some(db_path) = env_value("PROJPACK_DB") {
        return Some(PathBuf::from(db_path));
    }

    global_projpack_dir().map(|dir| dir.join("data").join("projpack.db"))
}

/// Resolve an explicitly requested project id.
///
/// Returns `None` when neither the flag nor `PROJPACK_PROJECT` is set, which
/// means "latest project".
///
/// # Errors
///
/// Returns [`Error::Config`] if `PROJPACK_PROJECT` is not an integer.
pub fn resolve_project_id(explicit: Option<i64>) -> Result<Option<i64>> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    env_value("PROJPACK_PROJECT")
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| Error::Config(format!("PROJPACK_PROJECT is not a project id: {v}")))
        })
        .transpose()
}

/// Resolve an explicitly requested evidence root (flag, then `PROJPACK_EVIDENCE_ROOT`).
#[must_use]
pub fn resolve_evidence_root(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env_value("PROJPACK_EVIDENCE_ROOT").map(PathBuf::from))
}

/// Load conventions from a file, or the defaults when no file is given.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or parsed.
pub fn load_conventions(path: Option<&Path>) -> Result<Conventions> {
    path.map_or_else(|| Ok(Conventions::default()), Conventions::load)
}
