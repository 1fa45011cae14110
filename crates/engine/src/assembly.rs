//! Assembly — turns an ordered processor list into a [`Processing`].
//!
//! Registration order decides call order only. Whether the assembly
//! resolves is decided once every processor has registered, so any
//! processor may define what an earlier one requires.

use crate::execution::Call;
use crate::processing::Processing;
use crate::processor::Processor;
use skein_config::{AssemblyConfig, ReportLevel};
use skein_core::{AssemblyError, Report, Resolvers};
use std::fmt;
use tracing::{debug, info};

pub struct Assembly {
    name: String,
    processors: Vec<Box<dyn Processor>>,
    report: ReportLevel,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processors: Vec::new(),
            report: ReportLevel::default(),
        }
    }

    /// An empty assembly named and reporting as configured.
    pub fn configured(config: &AssemblyConfig) -> Self {
        Self::new(config.name.clone()).report_level(config.report)
    }

    pub fn report_level(mut self, level: ReportLevel) -> Self {
        self.report = level;
        self
    }

    pub fn add(mut self, processor: impl Processor + 'static) -> Self {
        self.push(processor);
        self
    }

    pub fn add_all(mut self, processors: impl IntoIterator<Item = Box<dyn Processor>>) -> Self {
        self.processors.extend(processors);
        self
    }

    pub fn push(&mut self, processor: impl Processor + 'static) {
        self.processors.push(Box::new(processor));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Register every processor, then run the finalized pass, returning the calls.
    pub fn register_all(
        &self,
        sources: &mut Resolvers,
        resolvers: &mut Resolvers,
        extensions: &mut Resolvers,
        report: &mut Report,
    ) -> Result<Vec<Call>, AssemblyError> {
        let mut calls = Vec::new();
        for processor in &self.processors {
            processor.register(sources, resolvers, extensions, &mut calls, report)?;
        }
        for processor in &self.processors {
            processor.finalized(sources, resolvers, extensions, report)?;
        }
        Ok(calls)
    }

    pub fn create(&self) -> Result<Processing, AssemblyError> {
        self.create_from(Resolvers::new())
    }

    /// Create with slots the caller provides at run time.
    pub fn create_from(&self, sources: Resolvers) -> Result<Processing, AssemblyError> {
        self.build(sources).map(|(processing, _)| processing)
    }

    /// Create and also return the build report.
    pub fn build(&self, sources: Resolvers) -> Result<(Processing, Report), AssemblyError> {
        let mut sources = sources;
        let mut resolvers = Resolvers::new();
        let mut extensions = Resolvers::new();
        let mut report = Report::new(format!("Assembly '{}'", self.name));

        let calls = self.register_all(&mut sources, &mut resolvers, &mut extensions, &mut report)?;

        let missing = resolvers.unavailable(&sources);
        if !missing.is_empty() {
            return Err(AssemblyError::Unresolved {
                assembly: self.name.clone(),
                missing,
            });
        }
        if calls.is_empty() {
            return Err(AssemblyError::Empty(self.name.clone()));
        }

        let mut shape = resolvers;
        shape.solve(&sources)?;
        let contexts = shape.create(&extensions)?;

        report.line(format!(
            "{} processor(s), {} call(s), {} context(s)",
            self.processors.len(),
            calls.len(),
            contexts.len()
        ));
        report.open("Resolved").add(&shape);
        if !extensions.is_empty() {
            report.open("Extensions").add(&extensions);
        }
        match self.report {
            ReportLevel::Off => {}
            ReportLevel::Debug => debug!(assembly = %self.name, "Build report:\n{report}"),
            ReportLevel::Info => info!(assembly = %self.name, "Build report:\n{report}"),
        }
        info!(
            assembly = %self.name,
            processors = self.processors.len(),
            calls = calls.len(),
            contexts = contexts.len(),
            "Assembly created"
        );

        Ok((Processing::new(calls, contexts), report))
    }
}

impl fmt::Debug for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembly")
            .field("name", &self.name)
            .field("processors", &self.processors.len())
            .field("report", &self.report)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Plain;
    use skein_core::{ContextSpec, SlotKind};

    #[test]
    fn empty_assembly_cannot_be_created() {
        let err = Assembly::new("nothing").create().unwrap_err();
        assert!(matches!(err, AssemblyError::Empty(ref name) if name == "nothing"));
    }

    #[test]
    fn sources_satisfy_requirements() {
        let assembly = Assembly::new("reader")
            .add(Plain::new(|_, _| Ok(())).value("request", ContextSpec::new("Request").requires::<String>("path")));
        assert!(matches!(assembly.create(), Err(AssemblyError::Unresolved { .. })));

        let mut sources = Resolvers::new();
        sources
            .declare("request", SlotKind::Value, &ContextSpec::new("Request").defines::<String>("path"), None)
            .unwrap();
        let processing = assembly.create_from(sources).unwrap();
        assert!(processing.ctx("request").unwrap().declares("path"));
    }

    #[test]
    fn build_returns_report() {
        let assembly = Assembly::configured(&AssemblyConfig {
            name: "configured".into(),
            report: ReportLevel::Off,
        })
        .add(Plain::new(|_, _| Ok(())).value("req", ContextSpec::new("Req").defines::<String>("x")));
        let (processing, report) = assembly.build(Resolvers::new()).unwrap();
        assert_eq!(processing.calls().len(), 1);
        assert_eq!(report.title(), "Assembly 'configured'");
        assert_eq!(report.lines()[0], "1 processor(s), 1 call(s), 1 context(s)");
        assert_eq!(report.sections()[0].title(), "Resolved");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sections"][0]["title"], "Resolved");
        assert!(json["sections"][0]["resolvers"][0]["req"].is_object());
    }

    #[test]
    fn assembly_can_be_created_repeatedly() {
        let assembly = Assembly::new("twice")
            .add(Plain::new(|_, _| Ok(())).value("req", ContextSpec::new("Req").defines::<String>("x")));
        let first = assembly.create().unwrap();
        let second = assembly.create().unwrap();
        assert_eq!(first.calls().len(), second.calls().len());
        assert_eq!(assembly.len(), 1);
    }
}
