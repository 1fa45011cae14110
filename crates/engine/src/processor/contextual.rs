//! Signature-derived processors.

use super::Processor;
use crate::branch::Branch;
use crate::execution::{Call, Chain, call};
use crate::processing::Processing;
use skein_core::{Arguments, AssemblyError, ContextSpec, Location, ProcessError, Report, Resolvers, SlotKind};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One context parameter of a handler.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: SlotKind,
    pub specs: Vec<ContextSpec>,
}

/// The parameter list of a handler, after the implicit receiver and chain.
#[derive(Debug, Clone)]
pub struct Signature {
    name: String,
    processings: usize,
    parameters: Vec<Parameter>,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processings: 0,
            parameters: Vec::new(),
        }
    }

    /// Number of leading processing parameters (branching handlers only).
    pub fn processing(mut self, count: usize) -> Self {
        self.processings = count;
        self
    }

    /// A parameter receiving a context instance, annotated with `specs`.
    pub fn value(self, name: impl Into<String>, specs: impl IntoIterator<Item = ContextSpec>) -> Self {
        self.parameter(name, SlotKind::Value, specs)
    }

    /// A parameter receiving a resolved context class, annotated with `specs`.
    pub fn class(self, name: impl Into<String>, specs: impl IntoIterator<Item = ContextSpec>) -> Self {
        self.parameter(name, SlotKind::Class, specs)
    }

    fn parameter(mut self, name: impl Into<String>, kind: SlotKind, specs: impl IntoIterator<Item = ContextSpec>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            kind,
            specs: specs.into_iter().collect(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processings(&self) -> usize {
        self.processings
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Combine every parameter's annotations into resolvers.
    fn resolve(&self, location: &Location) -> Result<Resolvers, AssemblyError> {
        let mut seen = BTreeSet::new();
        let mut contexts = Resolvers::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.name.as_str()) {
                return Err(AssemblyError::InvalidProcessor {
                    location: location.clone(),
                    reason: format!("parameter '{}' is declared more than once", parameter.name),
                });
            }
            if parameter.specs.is_empty() {
                return Err(AssemblyError::InvalidProcessor {
                    location: location.clone(),
                    reason: format!("a context record is required for parameter '{}'", parameter.name),
                });
            }
            for spec in parameter.specs.iter().filter(|spec| !spec.is_generic()) {
                contexts
                    .declare(&parameter.name, parameter.kind, spec, Some(location))
                    .map_err(|e| e.at(location))?;
            }
        }
        Ok(contexts)
    }
}

/// A unit of work whose slots come from its [`Signature`].
pub trait Handler: Send + Sync + 'static {
    fn signature(&self) -> Signature;

    fn process(&self, chain: &mut Chain, arguments: &Arguments) -> Result<(), ProcessError>;
}

/// A unit of work that drives one compiled sub-pipeline per branch.
///
/// `processings` holds one entry per branch, in declaration order, `None`
/// for branches that compiled to no calls.
pub trait BranchingHandler: Send + Sync + 'static {
    fn signature(&self) -> Signature;

    fn process(
        &self,
        chain: &mut Chain,
        processings: &[Option<Processing>],
        arguments: &Arguments,
    ) -> Result<(), ProcessError>;
}

pub struct Contextual {
    location: Location,
    contexts: Resolvers,
    handler: Arc<dyn Handler>,
}

impl Contextual {
    #[track_caller]
    pub fn new(handler: impl Handler) -> Result<Self, AssemblyError> {
        let signature = handler.signature();
        let location = Location::caller().named(signature.name());
        if signature.processings() > 0 {
            return Err(AssemblyError::InvalidProcessor {
                location,
                reason: "processing parameters are only allowed for branching handlers".into(),
            });
        }
        let contexts = signature.resolve(&location)?;
        Ok(Self {
            location,
            contexts,
            handler: Arc::new(handler),
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl Processor for Contextual {
    fn register(
        &self,
        _sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        _extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        _report: &mut Report,
    ) -> Result<(), AssemblyError> {
        resolvers.merge(&self.contexts).map_err(|e| e.at(&self.location))?;
        let handler = Arc::clone(&self.handler);
        calls.push(call(move |chain, arguments| handler.process(chain, arguments)));
        Ok(())
    }
}

pub struct Brancher {
    location: Location,
    contexts: Resolvers,
    branches: Vec<Branch>,
    handler: Arc<dyn BranchingHandler>,
}

impl Brancher {
    #[track_caller]
    pub fn new(handler: impl BranchingHandler, branches: Vec<Branch>) -> Result<Self, AssemblyError> {
        let signature = handler.signature();
        let location = Location::caller().named(signature.name());
        if branches.is_empty() {
            return Err(AssemblyError::InvalidProcessor {
                location,
                reason: "at least one branch is required".into(),
            });
        }
        if signature.processings() != branches.len() {
            return Err(AssemblyError::InvalidProcessor {
                location,
                reason: format!(
                    "{} branch(es) need as many processing parameters, the signature declares {}",
                    branches.len(),
                    signature.processings()
                ),
            });
        }
        let contexts = signature.resolve(&location)?;
        Ok(Self {
            location,
            contexts,
            branches,
            handler: Arc::new(handler),
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    fn process_branches(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        report: &mut Report,
    ) -> Result<Vec<Option<Processing>>, AssemblyError> {
        self.branches
            .iter()
            .map(|branch| {
                branch
                    .process(sources, resolvers, extensions, report)
                    .map_err(|source| AssemblyError::Branch {
                        location: self.location.clone(),
                        source: Box::new(source),
                    })
            })
            .collect()
    }
}

impl Processor for Brancher {
    fn register(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        calls: &mut Vec<Call>,
        report: &mut Report,
    ) -> Result<(), AssemblyError> {
        resolvers.merge(&self.contexts).map_err(|e| e.at(&self.location))?;

        let section = report.open(format!("Branching processor at {}", self.location));
        let processings = self.process_branches(sources, resolvers, extensions, section)?;
        for (index, processing) in processings.iter().enumerate() {
            match processing {
                Some(processing) => section.line(format!("branch {}: {} call(s)", index + 1, processing.calls().len())),
                None => section.line(format!("branch {}: empty", index + 1)),
            }
        }

        let processings: Arc<[Option<Processing>]> = processings.into();
        let handler = Arc::clone(&self.handler);
        calls.push(call(move |chain, arguments| handler.process(chain, &processings, arguments)));
        Ok(())
    }

    /// Resolve every branch again against the complete parent picture.
    ///
    /// Only checks: the parent picture is left as registration built it.
    fn finalized(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        _report: &mut Report,
    ) -> Result<(), AssemblyError> {
        let mut scratch = Report::new("finalized");
        self.process_branches(
            &mut sources.clone(),
            &mut resolvers.clone(),
            &mut extensions.clone(),
            &mut scratch,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Assembly;
    use crate::processor::Plain;

    struct Reader;

    impl Handler for Reader {
        fn signature(&self) -> Signature {
            Signature::new("Reader")
                .value(
                    "request",
                    [
                        ContextSpec::new("Request").requires::<String>("path"),
                        ContextSpec::any(),
                        ContextSpec::new("Headers").optional::<Vec<String>>("headers"),
                    ],
                )
                .class("Response", [ContextSpec::new("Response").defines::<u16>("code")])
        }

        fn process(&self, _chain: &mut Chain, arguments: &Arguments) -> Result<(), ProcessError> {
            arguments.context("request")?;
            Ok(())
        }
    }

    struct Unannotated;

    impl Handler for Unannotated {
        fn signature(&self) -> Signature {
            Signature::new("Unannotated").value("request", [])
        }

        fn process(&self, _chain: &mut Chain, _arguments: &Arguments) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    struct Fork {
        branches: usize,
    }

    impl BranchingHandler for Fork {
        fn signature(&self) -> Signature {
            Signature::new("Fork")
                .processing(self.branches)
                .value("req", [ContextSpec::new("Req").defines::<String>("x")])
        }

        fn process(
            &self,
            chain: &mut Chain,
            processings: &[Option<Processing>],
            _arguments: &Arguments,
        ) -> Result<(), ProcessError> {
            for processing in processings.iter().flatten() {
                chain.branch(processing);
            }
            Ok(())
        }
    }

    fn picture() -> (Resolvers, Resolvers, Resolvers, Vec<Call>, Report) {
        (Resolvers::new(), Resolvers::new(), Resolvers::new(), Vec::new(), Report::new("test"))
    }

    #[test]
    fn signature_annotations_are_combined() {
        let processor = Contextual::new(Reader).unwrap();
        let (mut s, mut r, mut e, mut calls, mut report) = picture();
        processor.register(&mut s, &mut r, &mut e, &mut calls, &mut report).unwrap();

        let request = r.get("request").unwrap();
        assert!(request.attribute("path").unwrap().required);
        assert!(request.attribute("headers").unwrap().optional);
        assert_eq!(r.get("Response").unwrap().kind(), SlotKind::Class);
        assert_eq!(calls.len(), 1);
        assert_eq!(processor.location().name.as_deref(), Some("Reader"));
    }

    #[test]
    fn unannotated_parameter_is_rejected_at_construction() {
        let err = Contextual::new(Unannotated).err().unwrap();
        match err {
            AssemblyError::InvalidProcessor { location, reason } => {
                assert!(reason.contains("request"));
                assert!(location.file.ends_with("contextual.rs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        struct Twice;
        impl Handler for Twice {
            fn signature(&self) -> Signature {
                Signature::new("Twice")
                    .value("a", [ContextSpec::new("A").requires::<u8>("v")])
                    .value("a", [ContextSpec::new("A").requires::<u8>("v")])
            }
            fn process(&self, _chain: &mut Chain, _arguments: &Arguments) -> Result<(), ProcessError> {
                Ok(())
            }
        }
        assert!(matches!(Contextual::new(Twice), Err(AssemblyError::InvalidProcessor { .. })));
    }

    #[test]
    fn brancher_requires_matching_processing_parameters() {
        let branch = || Branch::new(Arc::new(Assembly::new("empty")));
        assert!(matches!(
            Brancher::new(Fork { branches: 1 }, vec![branch(), branch()]),
            Err(AssemblyError::InvalidProcessor { .. })
        ));
        assert!(matches!(
            Brancher::new(Fork { branches: 0 }, vec![]),
            Err(AssemblyError::InvalidProcessor { .. })
        ));
        assert!(Brancher::new(Fork { branches: 2 }, vec![branch(), branch()]).is_ok());
    }

    #[test]
    fn brancher_reports_each_branch() {
        let full = Assembly::new("full").add(
            Plain::new(|_, _| Ok(())).value("req", ContextSpec::new("Req").requires::<String>("x")),
        );
        let brancher = Brancher::new(
            Fork { branches: 2 },
            vec![
                Branch::new(Arc::new(full)).included(&[("req", "req")]),
                Branch::new(Arc::new(Assembly::new("empty"))),
            ],
        )
        .unwrap();
        let (mut s, mut r, mut e, mut calls, mut report) = picture();
        brancher.register(&mut s, &mut r, &mut e, &mut calls, &mut report).unwrap();
        brancher.finalized(&mut s, &mut r, &mut e, &mut report).unwrap();

        assert_eq!(calls.len(), 1);
        let section = &report.sections()[0];
        assert!(section.title().starts_with("Branching processor at Fork"));
        assert!(section.lines().iter().any(|line| line == "branch 1: 1 call(s)"));
        assert!(section.lines().iter().any(|line| line == "branch 2: empty"));
    }

    #[test]
    fn brancher_finalized_leaves_the_parent_picture_alone() {
        let full = Assembly::new("full").add(
            Plain::new(|_, _| Ok(())).value("req", ContextSpec::new("Req").requires::<String>("x")),
        );
        let brancher = Brancher::new(
            Fork { branches: 1 },
            vec![Branch::new(Arc::new(full)).included(&[("req", "req")])],
        )
        .unwrap();
        let definer = Plain::new(|_, _| Ok(())).value("req", ContextSpec::new("Req").defines::<String>("x"));
        let (mut s, mut r, mut e, mut calls, mut report) = picture();
        brancher.register(&mut s, &mut r, &mut e, &mut calls, &mut report).unwrap();
        definer.register(&mut s, &mut r, &mut e, &mut calls, &mut report).unwrap();

        let before = (s.to_string(), r.to_string(), e.to_string());
        brancher.finalized(&mut s, &mut r, &mut e, &mut report).unwrap();
        assert_eq!((s.to_string(), r.to_string(), e.to_string()), before);
        assert_eq!(r.get("req").unwrap().attribute("x").unwrap().required_by.len(), 1);
    }
}
