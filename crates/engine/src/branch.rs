//! Branches — sub-assemblies driven by a branching processor.

use crate::assembly::Assembly;
use crate::processing::Processing;
use skein_core::{AssemblyError, ContextSpec, Location, Report, Resolvers, SlotKind, Unresolved};
use std::collections::BTreeSet;
use std::sync::Arc;

/// How a sub-assembly connects to the assembly of its branching processor.
///
/// Included slots are shared with the parent: whatever the branch requires
/// or defines on them flows back into the parent picture and is resolved
/// there. Every other slot is private and must be resolved inside the
/// branch, either by its own processors or by a [`Branch::using`] slot that
/// the branching handler provides at run time.
#[derive(Clone)]
pub struct Branch {
    location: Location,
    assembly: Arc<Assembly>,
    included: Vec<(String, String)>,
    include_all: bool,
    using: Vec<(String, SlotKind, ContextSpec)>,
}

impl Branch {
    #[track_caller]
    pub fn new(assembly: Arc<Assembly>) -> Self {
        Self {
            location: Location::caller(),
            assembly,
            included: Vec::new(),
            include_all: false,
            using: Vec::new(),
        }
    }

    /// Share parent slots, as `(branch_name, parent_name)` pairs.
    pub fn included(mut self, pairs: &[(&str, &str)]) -> Self {
        self.included
            .extend(pairs.iter().map(|(inner, outer)| (inner.to_string(), outer.to_string())));
        self
    }

    /// Share every parent slot under its own name.
    pub fn include_all(mut self) -> Self {
        self.include_all = true;
        self
    }

    /// A branch-private slot the branching handler provides at run time.
    pub fn using(mut self, name: impl Into<String>, spec: ContextSpec) -> Self {
        self.using.push((name.into(), SlotKind::Value, spec));
        self
    }

    /// Like [`Branch::using`], for a slot the handler fills with its class.
    pub fn using_class(mut self, name: impl Into<String>, spec: ContextSpec) -> Self {
        self.using.push((name.into(), SlotKind::Class, spec));
        self
    }

    pub fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    fn mapping(&self, sources: &Resolvers, resolvers: &Resolvers, extensions: &Resolvers) -> Vec<(String, String)> {
        let mut mapping = self.included.clone();
        if self.include_all {
            let explicit: BTreeSet<String> = mapping.iter().map(|(inner, _)| inner.clone()).collect();
            let parent: BTreeSet<&str> = sources
                .names()
                .chain(resolvers.names())
                .chain(extensions.names())
                .collect();
            mapping.extend(
                parent
                    .into_iter()
                    .filter(|name| !explicit.contains(*name))
                    .map(|name| (name.to_string(), name.to_string())),
            );
        }
        mapping
    }

    /// Register the branch assembly against the parent picture.
    ///
    /// Returns `None` when the branch compiled to no calls.
    pub fn process(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        report: &mut Report,
    ) -> Result<Option<Processing>, AssemblyError> {
        let mapping = self.mapping(sources, resolvers, extensions);
        let mut bsources = sources.restructure(&mapping, false)?;
        let mut bresolvers = resolvers.restructure(&mapping, false)?;
        let mut bextensions = extensions.restructure(&mapping, false)?;
        for (name, kind, spec) in &self.using {
            bsources
                .declare(name, *kind, spec, Some(&self.location))
                .map_err(|e| e.at(&self.location))?;
            bresolvers
                .declare(name, *kind, spec, Some(&self.location))
                .map_err(|e| e.at(&self.location))?;
        }

        let section = report.open(format!("Branch '{}'", self.assembly.name()));
        let calls = self
            .assembly
            .register_all(&mut bsources, &mut bresolvers, &mut bextensions, section)?;

        let included: BTreeSet<&str> = mapping.iter().map(|(inner, _)| inner.as_str()).collect();
        let missing: Vec<Unresolved> = bresolvers
            .unavailable(&bsources)
            .into_iter()
            .filter(|unresolved| !included.contains(unresolved.slot.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(AssemblyError::Unresolved {
                assembly: self.assembly.name().to_string(),
                missing,
            });
        }

        resolvers.merge(&bresolvers.restructure(&mapping, true)?)?;
        extensions.merge(&bextensions.restructure(&mapping, true)?)?;

        if calls.is_empty() {
            section.line("no calls");
            return Ok(None);
        }
        let mut shape = bresolvers;
        shape.solve(&bsources)?;
        let contexts = shape.create(&bextensions)?;
        section.line(format!("{} call(s), {} context(s)", calls.len(), contexts.len()));
        Ok(Some(Processing::new(calls, contexts)))
    }
}
