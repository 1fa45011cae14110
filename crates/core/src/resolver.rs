//! Capability resolvers — the accumulated requirement/definition picture.
//!
//! During assembly every processor folds its declarations into three
//! parallel [`Resolvers`] maps (sources, resolvers, extensions). Merging is
//! append-only: a requirement, once recorded, is never dropped.

use crate::context::{AttributeSpec, ContextClass, ContextSpec, Presence, SlotKind, TypeTag};
use crate::error::{AssemblyError, Location, Unresolved};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// What is known about one attribute of a slot.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeResolver {
    pub type_tag: TypeTag,
    pub required: bool,
    pub optional: bool,
    pub defined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<Location>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defined_by: Vec<Location>,
}

impl AttributeResolver {
    pub fn from_spec(spec: &AttributeSpec, location: Option<&Location>) -> Self {
        let (required, optional, defined) = match spec.presence {
            Presence::Requires => (true, false, false),
            Presence::Optional => (false, true, false),
            Presence::Defines => (false, false, true),
        };
        let at: Vec<Location> = location.into_iter().cloned().collect();
        Self {
            type_tag: spec.type_tag,
            required,
            optional,
            defined,
            doc: spec.doc.clone(),
            required_by: if required { at.clone() } else { Vec::new() },
            defined_by: if defined { at } else { Vec::new() },
        }
    }

    /// The presence this attribute exposes on the resolved class.
    pub fn presence(&self) -> Presence {
        if self.defined {
            Presence::Defines
        } else if self.required {
            Presence::Requires
        } else {
            Presence::Optional
        }
    }

    fn combine(&mut self, slot: &str, name: &str, other: &Self, strict: bool) -> Result<(), AssemblyError> {
        if self.type_tag != other.type_tag {
            if self.defined && other.defined {
                return Err(AssemblyError::DefinitionConflict {
                    slot: slot.to_string(),
                    attribute: name.to_string(),
                    existing: self.type_tag.to_string(),
                    incoming: other.type_tag.to_string(),
                });
            }
            if strict {
                return Err(AssemblyError::TypeConflict {
                    slot: slot.to_string(),
                    attribute: name.to_string(),
                    existing: self.type_tag.to_string(),
                    incoming: other.type_tag.to_string(),
                });
            }
            if other.defined {
                self.type_tag = other.type_tag;
            }
        }
        self.required |= other.required;
        self.optional |= other.optional;
        self.defined |= other.defined;
        if self.doc.is_none() {
            self.doc.clone_from(&other.doc);
        }
        for location in &other.required_by {
            if !self.required_by.contains(location) {
                self.required_by.push(location.clone());
            }
        }
        for location in &other.defined_by {
            if !self.defined_by.contains(location) {
                self.defined_by.push(location.clone());
            }
        }
        Ok(())
    }
}

/// The accumulated picture of one slot.
#[derive(Debug, Clone, Serialize)]
pub struct Resolver {
    kind: SlotKind,
    /// False while the kind is only carried over from a renamed slot.
    #[serde(skip)]
    declared: bool,
    attributes: BTreeMap<String, AttributeResolver>,
}

impl Resolver {
    pub fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            declared: true,
            attributes: BTreeMap::new(),
        }
    }

    /// The resolver for a single capability record.
    pub fn for_spec(kind: SlotKind, spec: &ContextSpec, location: Option<&Location>) -> Self {
        let mut resolver = Self::new(kind);
        for attribute in spec.attributes() {
            let incoming = AttributeResolver::from_spec(attribute, location);
            match resolver.attributes.get_mut(&attribute.name) {
                // A record repeating an attribute keeps the first declaration's type.
                Some(existing) => {
                    existing.required |= incoming.required;
                    existing.optional |= incoming.optional;
                    existing.defined |= incoming.defined;
                }
                None => {
                    resolver.attributes.insert(attribute.name.clone(), incoming);
                }
            }
        }
        resolver
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// Re-declare the slot under `kind`.
    pub fn with_kind(mut self, kind: SlotKind) -> Self {
        self.kind = kind;
        self.declared = true;
        self
    }

    /// The same picture with its kind open to the next declaration.
    pub fn renamed(&self) -> Resolver {
        Resolver {
            declared: false,
            ..self.clone()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeResolver> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeResolver)> {
        self.attributes.iter().map(|(name, a)| (name.as_str(), a))
    }

    /// Names of every attribute known for this slot.
    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// A resolver restricted to the named attributes.
    pub fn copy<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Resolver {
        let names: BTreeSet<&str> = names.into_iter().collect();
        Resolver {
            kind: self.kind,
            declared: self.declared,
            attributes: self
                .attributes
                .iter()
                .filter(|(name, _)| names.contains(name.as_str()))
                .map(|(name, a)| (name.clone(), a.clone()))
                .collect(),
        }
    }

    /// Strict union: incompatible types are conflicts.
    pub fn merge(&mut self, slot: &str, other: &Resolver) -> Result<(), AssemblyError> {
        self.combine(slot, other, true)
    }

    /// Tolerant union: only two incompatible definitions are conflicts.
    pub fn solve(&mut self, slot: &str, other: &Resolver) -> Result<(), AssemblyError> {
        self.combine(slot, other, false)
    }

    fn combine(&mut self, slot: &str, other: &Resolver, strict: bool) -> Result<(), AssemblyError> {
        if other.declared && self.kind != other.kind {
            if self.declared {
                return Err(AssemblyError::KindConflict {
                    slot: slot.to_string(),
                    existing: self.kind,
                    incoming: other.kind,
                });
            }
            self.kind = other.kind;
        }
        self.declared |= other.declared;
        for (name, incoming) in &other.attributes {
            match self.attributes.get_mut(name) {
                Some(existing) => existing.combine(slot, name, incoming, strict)?,
                None => {
                    self.attributes.insert(name.clone(), incoming.clone());
                }
            }
        }
        Ok(())
    }

    /// Attributes required but neither defined here nor in `source`.
    pub fn unavailable(&self, source: Option<&Resolver>) -> Vec<(&str, &AttributeResolver)> {
        self.attributes
            .iter()
            .filter(|(_, a)| a.required && !a.defined)
            .filter(|(name, _)| {
                !source
                    .and_then(|s| s.attributes.get(name.as_str()))
                    .is_some_and(|s| s.defined)
            })
            .map(|(name, a)| (name.as_str(), a))
            .collect()
    }

    fn to_class(&self, slot: &str) -> ContextClass {
        ContextClass::new(
            slot,
            self.kind,
            self.attributes.iter().map(|(name, a)| AttributeSpec {
                name: name.clone(),
                type_tag: a.type_tag,
                presence: a.presence(),
                doc: a.doc.clone(),
            }),
        )
    }
}

/// Slot name to resolver map.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Resolvers(BTreeMap<String, Resolver>);

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a capability record into `slot`, tolerantly.
    pub fn declare(
        &mut self,
        slot: &str,
        kind: SlotKind,
        spec: &ContextSpec,
        location: Option<&Location>,
    ) -> Result<&mut Self, AssemblyError> {
        let resolver = Resolver::for_spec(kind, spec, location);
        self.solve_slot(slot, &resolver)?;
        Ok(self)
    }

    pub fn get(&self, slot: &str) -> Option<&Resolver> {
        self.0.get(slot)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.0.contains_key(slot)
    }

    pub fn insert(&mut self, slot: impl Into<String>, resolver: Resolver) -> Option<Resolver> {
        self.0.insert(slot.into(), resolver)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resolver)> {
        self.0.iter().map(|(slot, r)| (slot.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge_slot(&mut self, slot: &str, resolver: &Resolver) -> Result<(), AssemblyError> {
        match self.0.get_mut(slot) {
            Some(existing) => existing.merge(slot, resolver),
            None => {
                self.0.insert(slot.to_string(), resolver.clone());
                Ok(())
            }
        }
    }

    pub fn solve_slot(&mut self, slot: &str, resolver: &Resolver) -> Result<(), AssemblyError> {
        match self.0.get_mut(slot) {
            Some(existing) => existing.solve(slot, resolver),
            None => {
                self.0.insert(slot.to_string(), resolver.clone());
                Ok(())
            }
        }
    }

    /// Strict union of every slot of `other` into this map.
    pub fn merge(&mut self, other: &Resolvers) -> Result<(), AssemblyError> {
        for (slot, resolver) in &other.0 {
            self.merge_slot(slot, resolver)?;
        }
        Ok(())
    }

    /// Tolerant union of every slot of `other` into this map.
    pub fn solve(&mut self, other: &Resolvers) -> Result<(), AssemblyError> {
        for (slot, resolver) in &other.0 {
            self.solve_slot(slot, resolver)?;
        }
        Ok(())
    }

    /// Remove and return the named slots.
    pub fn extract<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> Resolvers {
        let mut extracted = Resolvers::new();
        for name in names {
            if let Some(resolver) = self.0.remove(name) {
                extracted.0.insert(name.to_string(), resolver);
            }
        }
        extracted
    }

    /// Rename slots across a boundary.
    ///
    /// `mapping` holds `(inner, outer)` pairs. Forward builds the inner
    /// picture from outer slots, reverse builds the outer picture back from
    /// inner slots. Slots not named by the mapping do not cross.
    pub fn restructure(&self, mapping: &[(String, String)], reverse: bool) -> Result<Resolvers, AssemblyError> {
        let mut restructured = Resolvers::new();
        for (inner, outer) in mapping {
            let (from, to) = if reverse { (inner, outer) } else { (outer, inner) };
            if let Some(resolver) = self.0.get(from) {
                restructured.solve_slot(to, &resolver.renamed())?;
            }
        }
        Ok(restructured)
    }

    /// Every requirement neither defined nor provided by `sources`.
    pub fn unavailable(&self, sources: &Resolvers) -> Vec<Unresolved> {
        self.0
            .iter()
            .flat_map(|(slot, resolver)| {
                resolver
                    .unavailable(sources.get(slot))
                    .into_iter()
                    .map(move |(attribute, a)| Unresolved {
                        slot: slot.clone(),
                        attribute: attribute.to_string(),
                        required_by: a.required_by.clone(),
                    })
            })
            .collect()
    }

    /// Resolved classes, with extension attributes folded into their slots.
    pub fn create(&self, extensions: &Resolvers) -> Result<BTreeMap<String, Arc<ContextClass>>, AssemblyError> {
        let mut combined = self.clone();
        combined.solve(extensions)?;
        Ok(combined
            .0
            .iter()
            .map(|(slot, resolver)| (slot.clone(), Arc::new(resolver.to_class(slot))))
            .collect())
    }
}

impl fmt::Display for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (slot, resolver) in &self.0 {
            writeln!(f, "{slot} ({:?}):", resolver.kind)?;
            for (name, a) in &resolver.attributes {
                let mut flags = Vec::new();
                if a.required {
                    flags.push("required");
                }
                if a.optional {
                    flags.push("optional");
                }
                if a.defined {
                    flags.push("defined");
                }
                writeln!(f, "  {name}: {} [{}]", a.type_tag, flags.join(", "))?;
            }
        }
        Ok(())
    }
}
