//! Background execution of the transfer pipelines.
//!
//! Each run gets its own thread, its own database connection (opened from
//! the context inside the pipeline), a progress channel, and a cancellation
//! token. The caller drains [`PipelineHandle::progress`] until it closes,
//! then calls [`PipelineHandle::join`] for the result.

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::config::{Conventions, ProjectContext};
use crate::error::{Error, Result};
use crate::transfer::export::Exporter;
use crate::transfer::import::Importer;
use crate::transfer::progress::{CancellationToken, Progress, ProgressReporter};
use crate::transfer::types::{ExportOptions, ExportStats, ImportOptions, ImportStats};

/// A pipeline running on a worker thread.
#[derive(Debug)]
pub struct PipelineHandle<T> {
    progress: Receiver<Progress>,
    cancel: CancellationToken,
    thread: JoinHandle<Result<T>>,
}

impl<T> PipelineHandle<T> {
    /// Progress updates. The channel closes when the pipeline finishes.
    #[must_use]
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    /// Ask the pipeline to stop at its next phase or table boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the pipeline and return its result.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's error, or [`Error::Other`] if the worker panicked.
    pub fn join(self) -> Result<T> {
        self.thread
            .join()
            .map_err(|_| Error::Other("pipeline worker panicked".to_string()))?
    }
}

fn spawn<T, F>(name: &str, job: F) -> Result<PipelineHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(ProgressReporter, CancellationToken) -> Result<T> + Send + 'static,
{
    let (reporter, progress) = ProgressReporter::channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || job(reporter, token))?;
    debug!(worker = name, "Spawned pipeline worker");

    Ok(PipelineHandle {
        progress,
        cancel,
        thread,
    })
}

/// Run an export on a background thread.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_export(
    context: Arc<dyn ProjectContext>,
    conventions: Conventions,
    options: ExportOptions,
    destination: PathBuf,
) -> Result<PipelineHandle<ExportStats>> {
    spawn("projpack-export", move |progress, cancel| {
        Exporter::new(context.as_ref(), &conventions, options)
            .with_progress(progress)
            .with_cancellation(cancel)
            .export(&destination)
    })
}

/// Run an import on a background thread.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_import(
    context: Arc<dyn ProjectContext>,
    conventions: Conventions,
    options: ImportOptions,
    archive: PathBuf,
) -> Result<PipelineHandle<ImportStats>> {
    spawn("projpack-import", move |progress, cancel| {
        Importer::new(context.as_ref(), &conventions, options)
            .with_progress(progress)
            .with_cancellation(cancel)
            .import(&archive)
    })
}
