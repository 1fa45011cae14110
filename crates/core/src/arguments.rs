//! The argument bag a chain hands to every call.

use crate::context::{Context, ContextClass};
use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One named value in the bag.
#[derive(Clone)]
pub enum Arg {
    Context(Context),
    Class(Arc<ContextClass>),
    Value(Arc<dyn Any + Send + Sync>),
}

impl Arg {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Arg::Value(Arc::new(value))
    }

    pub fn as_context(&self) -> Option<&Context> {
        match self {
            Arg::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Arc<ContextClass>> {
        match self {
            Arg::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Arg::Value(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<Context> for Arg {
    fn from(ctx: Context) -> Self {
        Arg::Context(ctx)
    }
}

impl From<Arc<ContextClass>> for Arg {
    fn from(class: Arc<ContextClass>) -> Self {
        Arg::Class(class)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Context(ctx) => ctx.fmt(f),
            Arg::Class(class) => write!(f, "Class({})", class.slot()),
            Arg::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// Named values passed to calls. Cloning copies handles, not contents.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    entries: BTreeMap<String, Arg>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Arguments::insert`].
    pub fn with(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.insert(name, arg);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Option<Arg> {
        self.entries.insert(name.into(), arg.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Arg> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arg)> {
        self.entries.iter().map(|(name, arg)| (name.as_str(), arg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite with every entry of `other`.
    pub fn extend(&mut self, other: &Arguments) {
        for (name, arg) in &other.entries {
            self.entries.insert(name.clone(), arg.clone());
        }
    }

    fn require(&self, name: &str) -> Result<&Arg, ProcessError> {
        self.entries
            .get(name)
            .ok_or_else(|| ProcessError::MissingArgument {
                name: name.to_string(),
                available: self.entries.keys().cloned().collect(),
            })
    }

    pub fn context(&self, name: &str) -> Result<Context, ProcessError> {
        self.require(name)?
            .as_context()
            .cloned()
            .ok_or_else(|| ProcessError::ArgumentType {
                name: name.to_string(),
                expected: "a context",
            })
    }

    pub fn class(&self, name: &str) -> Result<Arc<ContextClass>, ProcessError> {
        self.require(name)?
            .as_class()
            .cloned()
            .ok_or_else(|| ProcessError::ArgumentType {
                name: name.to_string(),
                expected: "a context class",
            })
    }

    pub fn value<T: Any + Clone>(&self, name: &str) -> Result<T, ProcessError> {
        self.require(name)?
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ProcessError::ArgumentType {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn opt_context(&self, name: &str) -> Option<Context> {
        self.entries.get(name).and_then(Arg::as_context).cloned()
    }

    /// Arguments seen across a renaming boundary.
    ///
    /// `mapping` holds `(inner, outer)` pairs; when several outer names feed
    /// one inner name the first one present wins.
    pub fn restructure(&self, mapping: &[(String, String)]) -> Arguments {
        let mut restructured = Arguments::new();
        for (inner, outer) in mapping {
            if restructured.contains(inner) {
                continue;
            }
            if let Some(arg) = self.entries.get(outer) {
                restructured.entries.insert(inner.clone(), arg.clone());
            }
        }
        restructured
    }
}

/// Which absent slots a chain fills in when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fill {
    #[default]
    None,
    /// Class slots receive their resolved class.
    Classes,
    /// Value slots receive a blank instance.
    Values,
    All,
}

impl Fill {
    pub fn classes(self) -> bool {
        matches!(self, Fill::Classes | Fill::All)
    }

    pub fn values(self) -> bool {
        matches!(self, Fill::Values | Fill::All)
    }
}

impl FromStr for Fill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Fill::None),
            "classes" => Ok(Fill::Classes),
            "values" => Ok(Fill::Values),
            "all" => Ok(Fill::All),
            other => Err(format!("unknown fill mode '{other}', expected none, classes, values or all")),
        }
    }
}

impl fmt::Display for Fill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Fill::None => "none",
            Fill::Classes => "classes",
            Fill::Values => "values",
            Fill::All => "all",
        };
        f.write_str(name)
    }
}
