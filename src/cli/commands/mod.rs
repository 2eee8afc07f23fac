//! Command implementations.

pub mod completions;
pub mod export;
pub mod import;
pub mod inspect;
pub mod tables;
pub mod version;

use std::io::Write;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::config::{
    load_conventions, resolve_db_path, resolve_evidence_root, resolve_project_id, CliContext,
};
use crate::error::{Error, Result};
use crate::transfer::{PipelineHandle, Progress};

/// Build the project context from global flags and environment.
///
/// # Errors
///
/// Returns [`Error::Config`] if no database location can be determined or the
/// conventions file is invalid.
pub fn context(cli: &Cli) -> Result<CliContext> {
    let db_path = resolve_db_path(cli.db.as_deref())
        .ok_or_else(|| Error::Config("cannot determine database location".to_string()))?;
    Ok(CliContext::new(
        db_path,
        resolve_project_id(cli.project)?,
        resolve_evidence_root(cli.evidence_root.as_deref()),
        load_conventions(cli.conventions.as_deref())?,
    ))
}

fn print_progress(progress: &Progress) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r\x1b[2K[{:>3}%] {}", progress.percent, progress.message);
    let _ = stderr.flush();
}

/// Drain a pipeline's progress channel, optionally echoing it, then join.
///
/// # Errors
///
/// Returns the pipeline's error.
pub fn wait<T>(handle: PipelineHandle<T>, show_progress: bool) -> Result<T> {
    let mut shown = false;
    for progress in handle.progress() {
        if show_progress {
            print_progress(&progress);
            shown = true;
        }
    }
    if shown {
        eprintln!();
    }
    handle.join()
}

/// Default archive path for a project: `<name>.projpack` in the current directory.
#[must_use]
pub fn default_archive_name(project_name: &str) -> PathBuf {
    let stem: String = project_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.trim_matches('_').is_empty() {
        "project".to_string()
    } else {
        stem
    };
    PathBuf::from(format!("{stem}.{}", crate::transfer::ARCHIVE_EXTENSION))
}
