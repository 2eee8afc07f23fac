//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};

/// One progress notification. `percent` is in `0..=100`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

type Sink = Box<dyn FnMut(Progress) + Send>;

/// Forwards progress to a sink, never letting the percentage go backwards.
pub struct ProgressReporter {
    sink: Option<Sink>,
    last: u8,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}

impl ProgressReporter {
    pub fn new(sink: impl FnMut(Progress) + Send + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
            last: 0,
        }
    }

    /// A reporter that drops everything.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            sink: None,
            last: 0,
        }
    }

    /// A reporter that forwards to a channel. The receiver sees the channel
    /// close once the reporter is dropped.
    #[must_use]
    pub fn channel() -> (Self, Receiver<Progress>) {
        let (tx, rx) = mpsc::channel();
        let reporter = Self::new(move |p| {
            // Receiver gone means nobody is listening
            let _ = tx.send(p);
        });
        (reporter, rx)
    }

    pub fn report(&mut self, percent: u32, message: impl Into<String>) {
        let clamped = u8::try_from(percent.min(100)).unwrap_or(100).max(self.last);
        self.last = clamped;
        if let Some(sink) = self.sink.as_mut() {
            sink(Progress {
                percent: clamped,
                message: message.into(),
            });
        }
    }

    /// Report a position inside a `[start, end]` band, `done` of `total` steps in.
    pub fn report_within(
        &mut self,
        start: u32,
        end: u32,
        done: usize,
        total: usize,
        message: impl Into<String>,
    ) {
        let span = u64::from(end.saturating_sub(start));
        let offset = if total == 0 {
            0
        } else {
            span * done.min(total) as u64 / total as u64
        };
        self.report(start + u32::try_from(offset).unwrap_or(0), message);
    }

    /// Last percentage reported.
    #[must_use]
    pub fn last(&self) -> u8 {
        self.last
    }
}

/// Shared cancellation flag, observed between phases and between tables.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
