//! Error types for the Skein engine.
//!
//! Uses `thiserror` for ergonomic error definitions. Build-time failures are
//! [`AssemblyError`]s and always carry a source [`Location`]; run-time
//! failures are [`ProcessError`]s and go through the chain's error handlers.

use crate::arguments::Arg;
use crate::context::SlotKind;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where a processor (or adapter) was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Optional human-readable name of the declaring processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub file: &'static str,
    pub line: u32,
}

impl Location {
    /// Capture the location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self {
            name: None,
            file: location.file(),
            line: location.line(),
        }
    }

    /// Attach a name to this location.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({}:{})", self.file, self.line),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// A requirement left unsatisfied once registration has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub slot: String,
    pub attribute: String,
    /// Locations of every processor that required the attribute.
    pub required_by: Vec<Location>,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.attribute)?;
        if !self.required_by.is_empty() {
            let at: Vec<String> = self.required_by.iter().map(|l| l.to_string()).collect();
            write!(f, " required at {}", at.join(", "))?;
        }
        Ok(())
    }
}

fn list_unresolved(missing: &[Unresolved]) -> String {
    missing
        .iter()
        .map(|m| format!("\n  {m}"))
        .collect::<String>()
}

/// Errors raised while assembling processors. Never raised at run time.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("unresolved requirements in assembly '{assembly}':{}", list_unresolved(.missing))]
    Unresolved {
        assembly: String,
        missing: Vec<Unresolved>,
    },

    #[error("attribute '{slot}.{attribute}' is already defined as {existing}, cannot redefine it as {incoming}")]
    DefinitionConflict {
        slot: String,
        attribute: String,
        existing: String,
        incoming: String,
    },

    #[error("attribute '{slot}.{attribute}' is declared as {existing}, cannot declare it as {incoming}")]
    TypeConflict {
        slot: String,
        attribute: String,
        existing: String,
        incoming: String,
    },

    #[error("slot '{slot}' is declared as {existing:?}, cannot declare it as {incoming:?}")]
    KindConflict {
        slot: String,
        existing: SlotKind,
        incoming: SlotKind,
    },

    #[error("invalid processor at {location}: {reason}")]
    InvalidProcessor { location: Location, reason: String },

    #[error("the names '{}' are already present in the current assembly", .names.join(", "))]
    NameCollision { names: Vec<String> },

    #[error("using has unavailable attributes:{}", list_unresolved(.missing))]
    UsingUnavailable { missing: Vec<Unresolved> },

    #[error("cannot merge contexts at {location}: {source}")]
    Merge {
        location: Location,
        source: Box<AssemblyError>,
    },

    #[error("cannot create branch processing at {location}: {source}")]
    Branch {
        location: Location,
        source: Box<AssemblyError>,
    },

    #[error("assembly '{0}' has no calls to execute")]
    Empty(String),
}

impl AssemblyError {
    /// Wrap a resolver failure with the location of the processor that caused it.
    pub fn at(self, location: &Location) -> Self {
        AssemblyError::Merge {
            location: location.clone(),
            source: Box::new(self),
        }
    }

    /// The unresolved requirements carried by this error, looking through wrappers.
    pub fn unresolved(&self) -> &[Unresolved] {
        match self {
            AssemblyError::Unresolved { missing, .. } | AssemblyError::UsingUnavailable { missing } => missing,
            AssemblyError::Merge { source, .. } | AssemblyError::Branch { source, .. } => source.unresolved(),
            _ => &[],
        }
    }
}

/// A controlled failure carrying every offending item from one pass.
///
/// Processors handling several independent items collect the failing ones
/// and raise a single `Abort` once every item was attempted.
#[derive(Debug, Clone, Default, Error)]
#[error("aborted with {} reason(s)", .reasons.len())]
pub struct Abort {
    reasons: Vec<Arg>,
}

impl Abort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an abort with a single reason.
    pub fn with(reason: impl Into<Arg>) -> Self {
        Self {
            reasons: vec![reason.into()],
        }
    }

    /// Add a reason, returning the same abort for re-raising.
    pub fn add(mut self, reason: impl Into<Arg>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn push(&mut self, reason: impl Into<Arg>) {
        self.reasons.push(reason.into());
    }

    pub fn extend(&mut self, other: Abort) {
        self.reasons.extend(other.reasons);
    }

    pub fn reasons(&self) -> &[Arg] {
        &self.reasons
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }
}

/// Errors raised by calls while a chain executes.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Abort(#[from] Abort),

    #[error("missing argument '{name}', available: {}", .available.join(", "))]
    MissingArgument { name: String, available: Vec<String> },

    #[error("argument '{name}' is not {expected}")]
    ArgumentType { name: String, expected: &'static str },

    #[error("context '{context}' has no attribute '{attribute}'")]
    UndeclaredAttribute { context: String, attribute: String },

    #[error("attribute '{context}.{attribute}' holds {expected}, not {found}")]
    AttributeType {
        context: String,
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProcessError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessError::Failed(message.into())
    }

    pub fn as_abort(&self) -> Option<&Abort> {
        match self {
            ProcessError::Abort(abort) => Some(abort),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_error_lists_every_requirement() {
        let err = AssemblyError::Unresolved {
            assembly: "decode".into(),
            missing: vec![
                Unresolved {
                    slot: "request".into(),
                    attribute: "x".into(),
                    required_by: vec![Location::caller().named("reader")],
                },
                Unresolved {
                    slot: "node".into(),
                    attribute: "child".into(),
                    required_by: vec![],
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("request.x"));
        assert!(text.contains("reader"));
        assert!(text.contains("error.rs"));
        assert!(text.contains("node.child"));
        assert_eq!(err.unresolved().len(), 2);
    }

    #[test]
    fn merge_wrapper_keeps_location_and_cause() {
        let location = Location::caller().named("encoder");
        let err = AssemblyError::DefinitionConflict {
            slot: "req".into(),
            attribute: "y".into(),
            existing: "String".into(),
            incoming: "u32".into(),
        }
        .at(&location);
        let text = err.to_string();
        assert!(text.contains("encoder"));
        assert!(text.contains("req.y"));
    }

    #[test]
    fn abort_collects_reasons() {
        let mut abort = Abort::with(Arg::value(1u32)).add(Arg::value(2u32));
        abort.push(Arg::value(3u32));
        assert_eq!(abort.len(), 3);
        assert!(abort.to_string().contains('3'));

        let err: ProcessError = abort.into();
        assert!(err.as_abort().is_some());
    }

    #[test]
    fn missing_argument_displays_available_names() {
        let err = ProcessError::MissingArgument {
            name: "request".into(),
            available: vec!["node".into(), "response".into()],
        };
        assert!(err.to_string().contains("node, response"));
    }
}
