//! Processing — the frozen result of an assembly.

use crate::execution::{Call, Chain, Status};
use skein_config::ExecutionConfig;
use skein_core::{Arguments, ContextClass, Fill, ProcessError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Immutable call list plus the resolved class of every slot.
///
/// Cloning shares the frozen data, so one processing can back any number
/// of chains, on any number of threads.
#[derive(Clone)]
pub struct Processing {
    calls: Arc<[Call]>,
    contexts: Arc<BTreeMap<String, Arc<ContextClass>>>,
}

impl Processing {
    pub fn new(calls: Vec<Call>, contexts: BTreeMap<String, Arc<ContextClass>>) -> Self {
        Self {
            calls: calls.into(),
            contexts: Arc::new(contexts),
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn contexts(&self) -> impl Iterator<Item = (&str, &Arc<ContextClass>)> {
        self.contexts.iter().map(|(name, class)| (name.as_str(), class))
    }

    /// The resolved class of a slot.
    pub fn ctx(&self, name: &str) -> Option<&Arc<ContextClass>> {
        self.contexts.get(name)
    }

    /// A processing with the same calls and `name` bound to `class`.
    pub fn update(&self, name: impl Into<String>, class: Arc<ContextClass>) -> Processing {
        let mut contexts = (*self.contexts).clone();
        contexts.insert(name.into(), class);
        Self {
            calls: Arc::clone(&self.calls),
            contexts: Arc::new(contexts),
        }
    }

    pub fn chain(&self, fill: Fill, arguments: Arguments) -> Chain {
        Chain::with_fill(self, fill, arguments)
    }

    /// A chain using the configured fill mode and call tracing.
    pub fn chain_with(&self, config: &ExecutionConfig, arguments: Arguments) -> Chain {
        Chain::with_fill(self, config.fill, arguments).trace_calls(config.trace_calls)
    }

    /// Run a fresh chain to completion and return its arguments.
    pub fn execute(&self, fill: Fill, arguments: Arguments) -> Result<Arguments, ProcessError> {
        self.execute_status(fill, arguments).map(|(_, arguments)| arguments)
    }

    /// Like [`Processing::execute`], also returning how the chain ended.
    pub fn execute_status(&self, fill: Fill, arguments: Arguments) -> Result<(Status, Arguments), ProcessError> {
        let mut chain = self.chain(fill, arguments);
        let status = chain.execute()?;
        Ok((status, chain.arguments()))
    }

    /// Wing a chain over this processing into `chain`.
    ///
    /// With `reuse` the winged chain starts from a copy of `chain`'s arguments,
    /// overridden by `arguments`.
    pub fn wing_in<'c>(&self, chain: &'c mut Chain, reuse: bool, arguments: Arguments) -> &'c mut Chain {
        let arguments = if reuse {
            let mut reused = chain.arguments();
            reused.extend(&arguments);
            reused
        } else {
            arguments
        };
        chain.wing(Chain::with_fill(self, Fill::None, arguments))
    }
}

impl fmt::Debug for Processing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processing")
            .field("calls", &self.calls.len())
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}
