//! The handler seam: how long-running store operations talk back to
//! whoever invoked them.
//!
//! Everything that can block (extraction, hashing, directory walks) takes a
//! handler so the caller can cancel it, answer questions, and receive
//! output, without this crate knowing whether it is driven by a CLI, a GUI
//! or a background service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{StoreError, StoreResult};

/// A cheaply clonable cancellation flag.
///
/// Long operations poll it between units of work: extractors between archive
/// entries, directory walkers between files, verification between manifest
/// lines.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Has cancellation been requested?
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Bail out with [`StoreError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Callbacks for long-running operations.
pub trait TaskHandler {
    /// The token operations should poll.
    fn cancellation(&self) -> &CancellationToken;

    /// Ask the user a yes/no question; implementations without a user
    /// return `default`.
    fn ask(&self, question: &str, default: bool) -> bool;

    /// Present a titled blob of output (e.g. a manifest diff) to the user.
    fn output(&self, title: &str, message: &str);

    /// Run a named unit of blocking work. The default implementation runs
    /// it inline; GUI hosts can override this to show progress.
    fn run(
        &self,
        name: &str,
        work: &mut dyn FnMut(&CancellationToken) -> StoreResult<()>,
    ) -> StoreResult<()> {
        tracing::debug!("task started: {name}");
        let result = work(self.cancellation());
        tracing::debug!("task finished: {name}");
        result
    }

    /// Whether a graphical frontend is attached.
    fn is_gui(&self) -> bool {
        false
    }

    /// Whether we run unattended; unattended handlers shouldn't prompt and
    /// should prefer skipping over failing for advisory problems.
    fn background(&self) -> bool {
        false
    }
}

/// A handler for batch use and tests: never prompts, logs output.
#[derive(Debug, Default)]
pub struct SilentHandler {
    token: CancellationToken,
}

impl SilentHandler {
    /// A new silent handler with its own token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A silent handler sharing an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        SilentHandler { token }
    }
}

impl TaskHandler for SilentHandler {
    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    fn ask(&self, question: &str, default: bool) -> bool {
        tracing::debug!("auto-answering {default} to: {question}");
        default
    }

    fn output(&self, title: &str, message: &str) {
        tracing::info!("{title}: {message}");
    }

    fn background(&self) -> bool {
        true
    }
}
