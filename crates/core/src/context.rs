//! Capability records — the contract a context slot is validated against.
//!
//! A [`ContextSpec`] is what a processor declares: which attributes of a slot
//! it requires and which it defines. Assembly reconciles every declaration
//! for a slot into one [`ContextClass`], and a [`Context`] is a live instance
//! of that class carrying the attribute values during one run.

use crate::error::ProcessError;
use serde::{Deserialize, Serialize, Serializer};
use std::any::{Any, TypeId, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Runtime identity of an attribute type.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

/// How a processor relates to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Must be provided by an earlier processor or an external source.
    Requires,
    /// Used when present, never demanded.
    Optional,
    /// Guaranteed to be provided by the declaring processor.
    Defines,
}

/// Whether a slot is filled with its resolved class or with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Available before any instance exists; filled with the [`ContextClass`].
    Class,
    /// Materialized per run; filled with a blank [`Context`].
    Value,
}

/// One declared attribute of a capability record.
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub name: String,
    pub type_tag: TypeTag,
    pub presence: Presence,
    pub doc: Option<String>,
}

/// A capability record: the attributes one participant requires or defines.
#[derive(Debug, Clone)]
pub struct ContextSpec {
    name: String,
    attributes: Vec<AttributeSpec>,
    generic: bool,
}

impl ContextSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            generic: false,
        }
    }

    /// The generic "any context" marker. Declares nothing.
    pub fn any() -> Self {
        Self {
            name: "Context".into(),
            attributes: Vec::new(),
            generic: true,
        }
    }

    pub fn requires<T: Any + Send + Sync>(self, name: impl Into<String>) -> Self {
        self.attribute::<T>(name, Presence::Requires)
    }

    pub fn optional<T: Any + Send + Sync>(self, name: impl Into<String>) -> Self {
        self.attribute::<T>(name, Presence::Optional)
    }

    pub fn defines<T: Any + Send + Sync>(self, name: impl Into<String>) -> Self {
        self.attribute::<T>(name, Presence::Defines)
    }

    /// Document the most recently declared attribute.
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.doc = Some(doc.into());
        }
        self
    }

    fn attribute<T: Any + Send + Sync>(mut self, name: impl Into<String>, presence: Presence) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            type_tag: TypeTag::of::<T>(),
            presence,
            doc: None,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    pub fn is_generic(&self) -> bool {
        self.generic
    }
}

/// The resolved shape of one slot, produced by assembly.
#[derive(Debug)]
pub struct ContextClass {
    slot: String,
    kind: SlotKind,
    attributes: BTreeMap<String, AttributeSpec>,
}

impl ContextClass {
    pub fn new(
        slot: impl Into<String>,
        kind: SlotKind,
        attributes: impl IntoIterator<Item = AttributeSpec>,
    ) -> Self {
        Self {
            slot: slot.into(),
            kind,
            attributes: attributes
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
        }
    }

    /// Build a class straight from a single capability record.
    pub fn from_spec(slot: impl Into<String>, kind: SlotKind, spec: &ContextSpec) -> Self {
        Self::new(slot, kind, spec.attributes().iter().cloned())
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.values()
    }

    pub fn declares(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Create a blank instance of this class.
    pub fn create(self: &Arc<Self>) -> Context {
        Context {
            class: Arc::clone(self),
            values: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

type Values = HashMap<String, Box<dyn Any + Send + Sync>>;

/// A live context instance. Cloning shares the same attribute values.
#[derive(Clone)]
pub struct Context {
    class: Arc<ContextClass>,
    values: Arc<RwLock<Values>>,
}

impl Context {
    pub fn class(&self) -> &Arc<ContextClass> {
        &self.class
    }

    /// True when both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }

    fn check<T: Any>(&self, attribute: &str) -> Result<(), ProcessError> {
        let spec = self
            .class
            .attribute(attribute)
            .ok_or_else(|| ProcessError::UndeclaredAttribute {
                context: self.class.slot.clone(),
                attribute: attribute.to_string(),
            })?;
        if !spec.type_tag.is::<T>() {
            return Err(ProcessError::AttributeType {
                context: self.class.slot.clone(),
                attribute: attribute.to_string(),
                expected: spec.type_tag.name(),
                found: type_name::<T>(),
            });
        }
        Ok(())
    }

    /// Read a copy of the attribute value, `None` when it was never set.
    pub fn get<T: Any + Clone>(&self, attribute: &str) -> Result<Option<T>, ProcessError> {
        self.check::<T>(attribute)?;
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values
            .get(attribute)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned())
    }

    pub fn set<T: Any + Send + Sync>(&self, attribute: &str, value: T) -> Result<(), ProcessError> {
        self.check::<T>(attribute)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(attribute.to_string(), Box::new(value));
        Ok(())
    }

    /// Builder form of [`Context::set`].
    pub fn with<T: Any + Send + Sync>(self, attribute: &str, value: T) -> Result<Self, ProcessError> {
        self.set(attribute, value)?;
        Ok(self)
    }

    /// Remove and return the attribute value.
    pub fn take<T: Any + Send + Sync>(&self, attribute: &str) -> Result<Option<T>, ProcessError> {
        self.check::<T>(attribute)?;
        let taken = self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(attribute);
        Ok(taken.and_then(|v| v.downcast::<T>().ok()).map(|v| *v))
    }

    /// Mutate the attribute in place; `None` in the slot means unset.
    pub fn update<T, R>(&self, attribute: &str, f: impl FnOnce(&mut Option<T>) -> R) -> Result<R, ProcessError>
    where
        T: Any + Send + Sync,
    {
        self.check::<T>(attribute)?;
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let mut current = values
            .remove(attribute)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v);
        let result = f(&mut current);
        if let Some(value) = current {
            values.insert(attribute.to_string(), Box::new(value));
        }
        Ok(result)
    }

    pub fn is_set(&self, attribute: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(attribute)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut set: Vec<&str> = values.keys().map(String::as_str).collect();
        set.sort_unstable();
        f.debug_struct("Context")
            .field("slot", &self.class.slot)
            .field("set", &set)
            .finish()
    }
}
