//! Processors — units of work that declare what they need from a chain.
//!
//! Registration folds each processor's declarations into the assembly's
//! resolver picture and appends its calls. Any problem with a processor's
//! own declared shape surfaces here or at construction, never while a
//! chain executes.

mod adapter;
mod contextual;

pub use adapter::{Renamer, Structure, Using};
pub use contextual::{Brancher, BranchingHandler, Contextual, Handler, Parameter, Signature};

use crate::execution::{Call, Chain, call};
use skein_core::{Arguments, AssemblyError, ContextSpec, Location, ProcessError, Report, Resolvers, SlotKind};

/// The registration contract every processor implements.
pub trait Processor: Send + Sync {
    /// Merge declarations into `resolvers`/`extensions` and append calls.
    fn register(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        report: &mut Report,
    ) -> Result<(), AssemblyError>;

    /// Called once every processor of the assembly has registered.
    fn finalized(
        &self,
        _sources: &mut Resolvers,
        _resolvers: &mut Resolvers,
        _extensions: &mut Resolvers,
        _report: &mut Report,
    ) -> Result<(), AssemblyError> {
        Ok(())
    }
}

/// A call with explicitly declared slots.
pub struct Plain {
    location: Location,
    declarations: Vec<(String, SlotKind, ContextSpec)>,
    call: Call,
}

impl Plain {
    #[track_caller]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Chain, &Arguments) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        Self {
            location: Location::caller(),
            declarations: Vec::new(),
            call: call(f),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.location = self.location.named(name);
        self
    }

    /// Declare a slot filled with a context instance.
    pub fn value(mut self, slot: impl Into<String>, spec: ContextSpec) -> Self {
        self.declarations.push((slot.into(), SlotKind::Value, spec));
        self
    }

    /// Declare a slot filled with the resolved context class.
    pub fn class(mut self, slot: impl Into<String>, spec: ContextSpec) -> Self {
        self.declarations.push((slot.into(), SlotKind::Class, spec));
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl Processor for Plain {
    fn register(
        &self,
        _sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        _extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        _report: &mut Report,
    ) -> Result<(), AssemblyError> {
        let mut contexts = Resolvers::new();
        for (slot, kind, spec) in &self.declarations {
            contexts
                .declare(slot, *kind, spec, Some(&self.location))
                .map_err(|e| e.at(&self.location))?;
        }
        resolvers.merge(&contexts).map_err(|e| e.at(&self.location))?;
        calls.push(self.call.clone());
        Ok(())
    }
}

/// Several processors registered in sequence as one.
#[derive(Default)]
pub struct Composite {
    processors: Vec<Box<dyn Processor>>,
}

impl Composite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Processor for Composite {
    fn register(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        for processor in &self.processors {
            processor.register(sources, resolvers, extensions, calls, report)?;
        }
        Ok(())
    }

    fn finalized(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        for processor in &self.processors {
            processor.finalized(sources, resolvers, extensions, report)?;
        }
        Ok(())
    }
}
