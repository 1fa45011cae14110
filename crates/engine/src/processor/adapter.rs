//! Adapters that change how a wrapped processor sees the assembly.

use super::Processor;
use crate::execution::{Call, call};
use skein_core::{AssemblyError, ContextSpec, Location, Report, Resolvers, SlotKind};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Renames slots at the boundary of a wrapped processor.
///
/// Each pair is `(inner, outer)`: the wrapped processor sees the outer slot
/// under the inner name. Several outer names may feed one inner name and one
/// outer name may feed several inner names. Slots not named by a pair are
/// invisible to the wrapped processor; use [`Renamer::keep`] to pass them
/// through unchanged.
pub struct Renamer {
    location: Location,
    processor: Box<dyn Processor>,
    mapping: Vec<(String, String)>,
}

impl Renamer {
    #[track_caller]
    pub fn new(processor: impl Processor + 'static, mapping: &[(&str, &str)]) -> Self {
        Self {
            location: Location::caller(),
            processor: Box::new(processor),
            mapping: mapping
                .iter()
                .map(|(inner, outer)| (inner.to_string(), outer.to_string()))
                .collect(),
        }
    }

    /// Pass a slot through under its own name.
    pub fn keep(mut self, name: &str) -> Self {
        self.mapping.push((name.to_string(), name.to_string()));
        self
    }

    fn inward(
        &self,
        sources: &Resolvers,
        resolvers: &Resolvers,
        extensions: &Resolvers,
    ) -> Result<(Resolvers, Resolvers, Resolvers), AssemblyError> {
        let at = |e: AssemblyError| e.at(&self.location);
        Ok((
            sources.restructure(&self.mapping, false).map_err(at)?,
            resolvers.restructure(&self.mapping, false).map_err(at)?,
            extensions.restructure(&self.mapping, false).map_err(at)?,
        ))
    }

    fn outward(
        &self,
        wresolvers: &Resolvers,
        wextensions: &Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
    ) -> Result<(), AssemblyError> {
        let at = |e: AssemblyError| e.at(&self.location);
        resolvers
            .merge(&wresolvers.restructure(&self.mapping, true).map_err(at)?)
            .map_err(at)?;
        extensions
            .merge(&wextensions.restructure(&self.mapping, true).map_err(at)?)
            .map_err(at)
    }
}

impl Processor for Renamer {
    fn register(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        let (mut wsources, mut wresolvers, mut wextensions) = self.inward(sources, resolvers, extensions)?;
        let mut wcalls = Vec::new();
        self.processor
            .register(&mut wsources, &mut wresolvers, &mut wextensions, &mut wcalls, report)?;
        self.outward(&wresolvers, &wextensions, resolvers, extensions)?;

        if wcalls.is_empty() {
            return Ok(());
        }
        let mapping = self.mapping.clone();
        calls.push(call(move |chain, arguments| {
            let inner = arguments.restructure(&mapping);
            for wcall in &wcalls {
                wcall(chain, &inner)?;
            }
            Ok(())
        }));
        Ok(())
    }

    fn finalized(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        let (mut wsources, mut wresolvers, mut wextensions) = self.inward(sources, resolvers, extensions)?;
        self.processor
            .finalized(&mut wsources, &mut wresolvers, &mut wextensions, report)?;
        self.outward(&wresolvers, &wextensions, resolvers, extensions)
    }
}

/// Provides fixed class slots to a wrapped processor.
///
/// The slots are private: whatever the wrapped processor declares on them
/// is taken out of the outer picture, must be self sufficient, and is
/// injected as a resolved class on every call.
pub struct Using {
    location: Location,
    processor: Box<dyn Processor>,
    contexts: Vec<(String, ContextSpec)>,
}

impl Using {
    #[track_caller]
    pub fn new(processor: impl Processor + 'static) -> Self {
        Self {
            location: Location::caller(),
            processor: Box::new(processor),
            contexts: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, spec: ContextSpec) -> Self {
        self.contexts.push((name.into(), spec));
        self
    }
}

impl Processor for Using {
    fn register(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        let names: BTreeSet<&str> = self.contexts.iter().map(|(name, _)| name.as_str()).collect();
        let colliding: Vec<String> = names
            .iter()
            .filter(|name| sources.contains(name) || resolvers.contains(name) || extensions.contains(name))
            .map(|name| name.to_string())
            .collect();
        if !colliding.is_empty() {
            return Err(AssemblyError::NameCollision { names: colliding });
        }

        let at = |e: AssemblyError| e.at(&self.location);
        let mut injected = Resolvers::new();
        for (name, spec) in &self.contexts {
            injected
                .declare(name, SlotKind::Class, spec, Some(&self.location))
                .map_err(at)?;
        }
        resolvers.solve(&injected).map_err(at)?;

        let mut wcalls = Vec::new();
        self.processor
            .register(sources, resolvers, extensions, &mut wcalls, report)?;

        let mut using = sources.extract(names.iter().copied());
        using.solve(&resolvers.extract(names.iter().copied())).map_err(at)?;
        using.solve(&extensions.extract(names.iter().copied())).map_err(at)?;
        let missing = using.unavailable(&Resolvers::new());
        if !missing.is_empty() {
            return Err(AssemblyError::UsingUnavailable { missing });
        }

        report.open(format!("Using at {}", self.location)).add(&using);

        let classes = using.create(&Resolvers::new()).map_err(at)?;
        calls.push(call(move |chain, arguments| {
            let mut arguments = arguments.clone();
            for (name, class) in &classes {
                arguments.insert(name.clone(), Arc::clone(class));
            }
            for wcall in &wcalls {
                wcall(chain, &arguments)?;
            }
            Ok(())
        }));
        Ok(())
    }

    fn finalized(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        self.processor.finalized(sources, resolvers, extensions, report)
    }
}

/// Joins the attributes of source slots into a target slot.
///
/// For every target the named sources are visited in order; an attribute
/// is taken from the first source that has it. The target's view of each
/// joined attribute is recorded as an extension on its source so both
/// resolved classes declare it. Registers no call.
pub struct Structure {
    location: Location,
    mapping: Vec<(String, Vec<String>)>,
}

impl Structure {
    #[track_caller]
    pub fn new() -> Self {
        Self {
            location: Location::caller(),
            mapping: Vec::new(),
        }
    }

    pub fn join(mut self, target: impl Into<String>, names: &[&str]) -> Self {
        self.mapping
            .push((target.into(), names.iter().map(|name| name.to_string()).collect()));
        self
    }

    fn validate(&self) -> Result<(), AssemblyError> {
        for (target, names) in &self.mapping {
            let reason = if names.is_empty() {
                format!("no slots to join into '{target}'")
            } else if names.contains(target) {
                format!("'{target}' cannot be joined into itself")
            } else {
                continue;
            };
            return Err(AssemblyError::InvalidProcessor {
                location: self.location.clone(),
                reason,
            });
        }
        Ok(())
    }

    fn join_into(
        &self,
        target: &str,
        names: &[String],
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
    ) -> Result<(), AssemblyError> {
        let Some(tresolver) = resolvers.get(target).cloned() else {
            return Ok(());
        };
        let mut unjoined: BTreeSet<String> = tresolver.list().map(str::to_string).collect();
        for name in names {
            let Some(resolver) = resolvers.get(name) else {
                continue;
            };
            let common: Vec<String> = resolver
                .list()
                .filter(|attribute| unjoined.contains(*attribute))
                .map(str::to_string)
                .collect();
            if common.is_empty() {
                continue;
            }
            let kind = resolver.kind();
            let joined = resolver
                .copy(common.iter().map(String::as_str))
                .with_kind(tresolver.kind());
            for attribute in &common {
                unjoined.remove(attribute);
            }

            resolvers.merge_slot(target, &joined)?;
            extensions.solve_slot(name, &tresolver.copy(common.iter().map(String::as_str)).with_kind(kind))?;
            if unjoined.is_empty() {
                break;
            }
        }
        Ok(())
    }
}

impl Default for Structure {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Structure {
    fn register(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        _calls: &mut Vec<Call>,
        _report: &mut Report,
    ) -> Result<(), AssemblyError> {
        self.validate()?;
        let at = |e: AssemblyError| e.at(&self.location);
        let mut joined = Resolvers::new();
        for (target, names) in &self.mapping {
            self.join_into(target, names, sources, &mut joined).map_err(at)?;
            self.join_into(target, names, resolvers, &mut joined).map_err(at)?;
            self.join_into(target, names, extensions, &mut joined).map_err(at)?;
        }
        extensions.solve(&joined).map_err(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Assembly;
    use crate::processor::Plain;
    use skein_core::{Arg, Arguments, Fill, Presence};
    use std::sync::Mutex;

    struct Picture {
        sources: Resolvers,
        resolvers: Resolvers,
        extensions: Resolvers,
        calls: Vec<Call>,
        report: Report,
    }

    impl Picture {
        fn new() -> Self {
            Self {
                sources: Resolvers::new(),
                resolvers: Resolvers::new(),
                extensions: Resolvers::new(),
                calls: Vec::new(),
                report: Report::new("test"),
            }
        }

        fn register(&mut self, processor: &dyn Processor) -> Result<(), AssemblyError> {
            processor.register(
                &mut self.sources,
                &mut self.resolvers,
                &mut self.extensions,
                &mut self.calls,
                &mut self.report,
            )
        }
    }

    #[test]
    fn renamer_maps_slots_both_ways() {
        let inner = Plain::new(|_, arguments| {
            let request = arguments.context("request")?;
            request.set("seen", true)?;
            Ok(())
        })
        .value("request", ContextSpec::new("Request").defines::<bool>("seen"));
        let renamer = Renamer::new(inner, &[("request", "solicitation")]);

        let mut picture = Picture::new();
        picture.register(&renamer).unwrap();
        assert!(picture.resolvers.contains("solicitation"));
        assert!(!picture.resolvers.contains("request"));
        assert_eq!(picture.calls.len(), 1);
    }

    #[test]
    fn renamer_restructures_arguments_at_run_time() {
        let inner = Plain::new(|_, arguments| {
            assert!(!arguments.contains("solicitation"));
            arguments.context("request")?.set("seen", true)?;
            Ok(())
        })
        .value("request", ContextSpec::new("Request").defines::<bool>("seen"));
        let processing = Assembly::new("renamed")
            .add(Renamer::new(inner, &[("request", "solicitation")]))
            .create()
            .unwrap();

        let arguments = processing.execute(Fill::Values, Arguments::new()).unwrap();
        let solicitation = arguments.context("solicitation").unwrap();
        assert_eq!(solicitation.get::<bool>("seen").unwrap(), Some(true));
    }

    #[test]
    fn renamer_supports_fan_in() {
        let inner = Plain::new(|_, _| Ok(())).value("request", ContextSpec::new("Request").requires::<String>("path"));
        let renamer = Renamer::new(inner, &[("request", "solicitation"), ("request", "response")]).keep("node");

        let mut picture = Picture::new();
        picture
            .resolvers
            .declare("solicitation", SlotKind::Value, &ContextSpec::new("S").defines::<String>("path"), None)
            .unwrap();
        picture.register(&renamer).unwrap();
        assert!(picture.resolvers.get("response").unwrap().attribute("path").unwrap().required);
        assert!(picture.resolvers.get("solicitation").unwrap().attribute("path").unwrap().defined);
    }

    #[test]
    fn renamer_fan_in_sees_the_first_outer_slot_present() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let inner = Plain::new(move |_, arguments| {
            let path = arguments.context("request")?.get::<String>("path")?;
            record.lock().unwrap().push(path.unwrap_or_default());
            Ok(())
        })
        .value("request", ContextSpec::new("Request").optional::<String>("path"));
        let processing = Assembly::new("fan-in")
            .add(Renamer::new(inner, &[("request", "solicitation"), ("request", "response")]))
            .create()
            .unwrap();

        let solicitation = processing
            .ctx("solicitation")
            .unwrap()
            .create()
            .with("path", "/solicited".to_string())
            .unwrap();
        let response = processing
            .ctx("response")
            .unwrap()
            .create()
            .with("path", "/responded".to_string())
            .unwrap();
        let both = Arguments::new()
            .with("response", response.clone())
            .with("solicitation", solicitation);
        processing.execute(Fill::None, both).unwrap();
        processing
            .execute(Fill::None, Arguments::new().with("response", response))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["/solicited", "/responded"]);
    }

    #[test]
    fn renamer_fan_out_shares_one_outer_context() {
        let inner = Plain::new(|_, arguments| {
            let source = arguments.context("source")?;
            let target = arguments.context("target")?;
            assert!(source.ptr_eq(&target));
            target.set("seen", true)?;
            Ok(())
        })
        .value("source", ContextSpec::new("Request").optional::<bool>("seen"))
        .value("target", ContextSpec::new("Request").defines::<bool>("seen"));
        let processing = Assembly::new("fan-out")
            .add(Renamer::new(inner, &[("source", "request"), ("target", "request")]))
            .create()
            .unwrap();
        assert_eq!(processing.contexts().count(), 1);

        let arguments = processing.execute(Fill::Values, Arguments::new()).unwrap();
        let request = arguments.context("request").unwrap();
        assert_eq!(request.get::<bool>("seen").unwrap(), Some(true));
    }

    #[test]
    fn using_rejects_colliding_names() {
        let using = Using::new(Plain::new(|_, _| Ok(()))).with("Create", ContextSpec::new("Create").defines::<u8>("n"));
        let mut picture = Picture::new();
        picture
            .resolvers
            .declare("Create", SlotKind::Class, &ContextSpec::new("Other").requires::<u8>("n"), None)
            .unwrap();
        match picture.register(&using) {
            Err(AssemblyError::NameCollision { names }) => assert_eq!(names, vec!["Create".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn using_requires_self_sufficient_slots() {
        let inner = Plain::new(|_, _| Ok(())).class("Create", ContextSpec::new("Create").requires::<String>("name"));
        let using = Using::new(inner).with("Create", ContextSpec::new("Create").defines::<u8>("n"));
        let mut picture = Picture::new();
        let err = picture.register(&using).unwrap_err();
        assert!(matches!(err, AssemblyError::UsingUnavailable { .. }));
        assert_eq!(err.unresolved()[0].attribute, "name");
    }

    #[test]
    fn using_injects_classes_and_hides_slots() {
        let inner = Plain::new(|chain, arguments| {
            let class = arguments.class("Create")?;
            let created = class.create().with("n", 7u8)?;
            chain.process(Arguments::new().with("made", created));
            Ok(())
        })
        .class("Create", ContextSpec::new("Create").requires::<u8>("n"));
        let using = Using::new(inner).with("Create", ContextSpec::new("Create").defines::<u8>("n"));

        let mut picture = Picture::new();
        picture.register(&using).unwrap();
        assert!(!picture.resolvers.contains("Create"));
        assert_eq!(picture.report.sections().len(), 1);

        let processing = crate::processing::Processing::new(picture.calls, Default::default());
        let arguments = processing.execute(Fill::None, Arguments::new()).unwrap();
        let made = arguments.context("made").unwrap();
        assert_eq!(made.get::<u8>("n").unwrap(), Some(7));
        assert!(!arguments.contains("Create"));
    }

    #[test]
    fn structure_joins_overlapping_attributes() {
        let mut picture = Picture::new();
        picture
            .resolvers
            .declare(
                "request",
                SlotKind::Value,
                &ContextSpec::new("Request").requires::<String>("path").requires::<u32>("size"),
                None,
            )
            .unwrap();
        picture
            .resolvers
            .declare("solicitation", SlotKind::Value, &ContextSpec::new("S").defines::<String>("path"), None)
            .unwrap();

        let structure = Structure::new().join("request", &["solicitation"]);
        picture.register(&structure).unwrap();

        let path = picture.resolvers.get("request").unwrap().attribute("path").unwrap();
        assert!(path.defined && path.required);
        let extension = picture.extensions.get("solicitation").unwrap().attribute("path").unwrap();
        assert!(extension.required);
        assert!(picture.calls.is_empty());

        let classes = picture.resolvers.create(&picture.extensions).unwrap();
        assert_eq!(classes["request"].attribute("path").unwrap().presence, Presence::Defines);
        assert!(classes["solicitation"].declares("path"));
        assert!(!classes["request"].declares("missing"));
    }

    #[test]
    fn structure_rejects_self_join() {
        let structure = Structure::new().join("request", &["request"]);
        let mut picture = Picture::new();
        assert!(matches!(
            picture.register(&structure),
            Err(AssemblyError::InvalidProcessor { .. })
        ));
    }

    #[test]
    fn using_keeps_outer_arguments() {
        let inner = Plain::new(|_, arguments| {
            assert_eq!(arguments.value::<u8>("limit")?, 3);
            Ok(())
        });
        let using = Using::new(inner).with("Marker", ContextSpec::new("Marker").defines::<bool>("on"));
        let processing = Assembly::new("limits").add(using).create().unwrap();
        processing
            .execute(Fill::None, Arguments::new().with("limit", Arg::value(3u8)))
            .unwrap();
    }
}
