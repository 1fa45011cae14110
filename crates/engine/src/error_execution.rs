//! Error execution — the handler run started when a chain call fails.

use crate::execution::{SharedArguments, lock};
use skein_core::{Arguments, ProcessError};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// An error handler registered on a chain.
pub type ErrorCall = Arc<dyn Fn(&mut ErrorExecution, &Arguments) -> Result<(), ProcessError> + Send + Sync>;

/// Runs the error handlers in scope of a failed chain over its argument bag.
///
/// The failed chain's own handlers go first, most recently registered
/// first, then those of each enclosing chain from the innermost out.
pub struct ErrorExecution {
    chain_id: Uuid,
    error: ProcessError,
    handlers: VecDeque<ErrorCall>,
    arg: SharedArguments,
    suppressed: bool,
    retrying: bool,
}

impl ErrorExecution {
    pub(crate) fn new(
        chain_id: Uuid,
        error: ProcessError,
        handlers: impl IntoIterator<Item = ErrorCall>,
        arg: SharedArguments,
    ) -> Self {
        Self {
            chain_id,
            error,
            handlers: handlers.into_iter().collect(),
            arg,
            suppressed: false,
            retrying: false,
        }
    }

    /// The error that started this execution.
    pub fn error(&self) -> &ProcessError {
        &self.error
    }

    /// Id of the chain the error happened in.
    pub fn chain_id(&self) -> Uuid {
        self.chain_id
    }

    /// Do not propagate the error. The failed chain stays in exception and
    /// only runs its finalizers; an enclosing chain carries on.
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// Suppress the error and resume the failed chain with the call after the one that failed.
    ///
    /// Whatever the failed call changed before failing is kept.
    pub fn retry(&mut self) {
        if !self.retrying {
            self.suppressed = true;
            self.retrying = true;
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    /// Snapshot of the chain's argument bag.
    pub fn arguments(&self) -> Arguments {
        lock(&self.arg).clone()
    }

    /// Add (or overwrite) entries of the chain's argument bag.
    pub fn process(&mut self, arguments: Arguments) -> &mut Self {
        lock(&self.arg).extend(&arguments);
        self
    }

    pub(crate) fn execute(&mut self) -> Result<(), ProcessError> {
        while let Some(handler) = self.handlers.pop_front() {
            let arguments = self.arguments();
            handler(self, &arguments)?;
        }
        debug!(
            chain_id = %self.chain_id,
            suppressed = self.suppressed,
            retrying = self.retrying,
            "Error chain finished"
        );
        Ok(())
    }

    pub(crate) fn into_error(self) -> ProcessError {
        self.error
    }
}

impl fmt::Debug for ErrorExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorExecution")
            .field("chain_id", &self.chain_id)
            .field("error", &self.error)
            .field("suppressed", &self.suppressed)
            .field("retrying", &self.retrying)
            .finish()
    }
}
