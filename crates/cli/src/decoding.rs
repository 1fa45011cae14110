//! Invoker decoding — the pipeline behind `skein demo` and `skein report`.
//!
//! A catalog handler registers service invokers. A branching decoding
//! handler then runs the decode branch once per invoker, with one decoding
//! per unsolved input. Invokers whose inputs cannot all be decoded are
//! collected and raised together as a single abort.
//!
//! ```text
//! invokers: Catalog ──▶ Decoding ──┐
//!                                  │ per invoker
//!                      decode: PrimitiveDecoder ──▶ SolvedCheck
//! ```

use serde::Serialize;
use skein_config::EngineConfig;
use skein_core::{Abort, Arguments, AssemblyError, Context, ContextSpec, Fill, ProcessError, Report, Resolvers};
use skein_engine::{Assembly, Branch, Brancher, BranchingHandler, Chain, Contextual, Handler, Processing, Signature};
use std::sync::Arc;
use tracing::{debug, warn};

/// A typed parameter of an invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Input {
    pub name: String,
    pub type_name: String,
}

impl Input {
    fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

struct Entry {
    name: &'static str,
    location: &'static str,
    inputs: &'static [(&'static str, &'static str)],
    solved: &'static [&'static str],
}

const CATALOG: &[Entry] = &[
    Entry {
        name: "user.get",
        location: "api/user.rs:14",
        inputs: &[("id", "int")],
        solved: &[],
    },
    Entry {
        name: "user.rename",
        location: "api/user.rs:31",
        inputs: &[("id", "int"), ("name", "str")],
        solved: &[],
    },
    Entry {
        name: "user.delete",
        location: "api/user.rs:52",
        inputs: &[("id", "int"), ("session", "Session")],
        solved: &["session"],
    },
    Entry {
        name: "report.export",
        location: "api/report.rs:9",
        inputs: &[("format", "Format"), ("compress", "bool")],
        solved: &[],
    },
    Entry {
        name: "audit.search",
        location: "api/audit.rs:22",
        inputs: &[("since", "Timestamp"), ("limit", "int")],
        solved: &[],
    },
];

// ── Capability records ───────────────────────────────────────────────────

fn register_spec() -> ContextSpec {
    ContextSpec::new("Register")
}

fn invoker_spec() -> ContextSpec {
    ContextSpec::new("Invoker")
}

fn decoding_spec() -> ContextSpec {
    ContextSpec::new("Decoding")
}

// ── Parent handlers ──────────────────────────────────────────────────────

/// Registers one invoker per catalog entry.
pub struct CatalogHandler;

impl Handler for CatalogHandler {
    fn signature(&self) -> Signature {
        Signature::new("Catalog")
            .value(
                "register",
                [register_spec()
                    .defines::<Vec<Context>>("invokers")
                    .doc("The invokers to decode, in catalog order")],
            )
            .class(
                "Invoker",
                [invoker_spec()
                    .defines::<String>("name")
                    .defines::<String>("location")
                    .defines::<Vec<Input>>("inputs")
                    .defines::<Vec<String>>("solved")],
            )
    }

    fn process(&self, _chain: &mut Chain, arguments: &Arguments) -> Result<(), ProcessError> {
        let register = arguments.context("register")?;
        let class = arguments.class("Invoker")?;
        let mut invokers = Vec::with_capacity(CATALOG.len());
        for entry in CATALOG {
            let inputs: Vec<Input> = entry.inputs.iter().map(|(name, ty)| Input::new(name, ty)).collect();
            let solved: Vec<String> = entry.solved.iter().map(|name| name.to_string()).collect();
            invokers.push(
                class
                    .create()
                    .with("name", entry.name.to_string())?
                    .with("location", entry.location.to_string())?
                    .with("inputs", inputs)?
                    .with("solved", solved)?,
            );
        }
        debug!(invokers = invokers.len(), "Catalog registered");
        register.set("invokers", invokers)
    }
}

/// Runs the decode branch for every invoker with unsolved inputs.
pub struct DecodingHandler;

impl BranchingHandler for DecodingHandler {
    fn signature(&self) -> Signature {
        Signature::new("Decoding")
            .processing(1)
            .value("register", [register_spec().requires::<Vec<Context>>("invokers")])
            .class(
                "Invoker",
                [invoker_spec()
                    .requires::<String>("name")
                    .requires::<String>("location")
                    .requires::<Vec<Input>>("inputs")
                    .optional::<Vec<String>>("solved")],
            )
    }

    fn process(
        &self,
        _chain: &mut Chain,
        processings: &[Option<Processing>],
        arguments: &Arguments,
    ) -> Result<(), ProcessError> {
        let Some(Some(decode)) = processings.first() else {
            return Ok(());
        };
        let invokers = arguments
            .context("register")?
            .get::<Vec<Context>>("invokers")?
            .unwrap_or_default();
        let decoding = decode
            .ctx("Decoding")
            .ok_or_else(|| ProcessError::failed("decode branch has no Decoding slot"))?;
        let create = decode
            .ctx("create")
            .ok_or_else(|| ProcessError::failed("decode branch has no create slot"))?;

        let mut aborted = Abort::new();
        for invoker in invokers {
            let solved = invoker.get::<Vec<String>>("solved")?.unwrap_or_default();
            let mut decodings = Vec::new();
            for input in invoker.get::<Vec<Input>>("inputs")?.unwrap_or_default() {
                if solved.contains(&input.name) {
                    continue;
                }
                decodings.push(
                    decoding
                        .create()
                        .with("input", input.name)?
                        .with("type_name", input.type_name)?,
                );
            }
            if decodings.is_empty() {
                continue;
            }

            let branch_arguments = arguments
                .clone()
                .with("create", create.create().with("decodings", decodings)?)
                .with("invoker", invoker.clone());
            match decode.execute(Fill::All, branch_arguments) {
                Ok(_) => {}
                Err(ProcessError::Abort(abort)) => {
                    let name = invoker.get::<String>("name")?.unwrap_or_default();
                    let location = invoker.get::<String>("location")?.unwrap_or_default();
                    warn!(invoker = %name, %location, undecoded = abort.len(), "No valid decoder for invoker");
                    aborted.push(invoker);
                }
                Err(error) => return Err(error),
            }
        }

        if aborted.is_empty() {
            Ok(())
        } else {
            Err(aborted.into())
        }
    }
}

// ── Decode branch ────────────────────────────────────────────────────────

/// Claims decodings of primitive types.
pub struct PrimitiveDecoder;

impl PrimitiveDecoder {
    fn decoder(type_name: &str) -> Option<&'static str> {
        match type_name {
            "int" => Some("integer"),
            "float" => Some("number"),
            "str" => Some("text"),
            "bool" => Some("boolean"),
            _ => None,
        }
    }
}

impl Handler for PrimitiveDecoder {
    fn signature(&self) -> Signature {
        Signature::new("PrimitiveDecoder")
            .value("create", [ContextSpec::new("Create").requires::<Vec<Context>>("decodings")])
            .class(
                "Decoding",
                [decoding_spec()
                    .requires::<String>("type_name")
                    .defines::<String>("decoder")
                    .doc("The name of the decoder that claimed the decoding")],
            )
    }

    fn process(&self, _chain: &mut Chain, arguments: &Arguments) -> Result<(), ProcessError> {
        let decodings = arguments
            .context("create")?
            .get::<Vec<Context>>("decodings")?
            .unwrap_or_default();
        for decoding in decodings {
            if decoding.is_set("decoder") {
                continue;
            }
            let type_name = decoding.get::<String>("type_name")?.unwrap_or_default();
            if let Some(decoder) = Self::decoder(&type_name) {
                decoding.set("decoder", decoder.to_string())?;
            }
        }
        Ok(())
    }
}

/// Marks the invoker inputs solved once every decoding was claimed.
pub struct SolvedCheck;

impl Handler for SolvedCheck {
    fn signature(&self) -> Signature {
        Signature::new("SolvedCheck")
            .value("create", [ContextSpec::new("Create").requires::<Vec<Context>>("decodings")])
            .class(
                "Decoding",
                [decoding_spec().requires::<String>("input").optional::<String>("decoder")],
            )
            .value("invoker", [invoker_spec().defines::<Vec<String>>("solved")])
    }

    fn process(&self, _chain: &mut Chain, arguments: &Arguments) -> Result<(), ProcessError> {
        let decodings = arguments
            .context("create")?
            .get::<Vec<Context>>("decodings")?
            .unwrap_or_default();
        let (claimed, unclaimed): (Vec<Context>, Vec<Context>) =
            decodings.into_iter().partition(|decoding| decoding.is_set("decoder"));
        if !unclaimed.is_empty() {
            let mut abort = Abort::new();
            for decoding in unclaimed {
                abort.push(decoding);
            }
            return Err(abort.into());
        }

        let mut names = Vec::with_capacity(claimed.len());
        for decoding in &claimed {
            if let Some(input) = decoding.get::<String>("input")? {
                names.push(input);
            }
        }
        arguments
            .context("invoker")?
            .update::<Vec<String>, _>("solved", |solved| solved.get_or_insert_with(Vec::new).extend(names))
    }
}

// ── Assembly ─────────────────────────────────────────────────────────────

/// The decode sub-assembly run once per invoker.
pub fn decode_assembly() -> Result<Assembly, AssemblyError> {
    Ok(Assembly::new("decode")
        .add(Contextual::new(PrimitiveDecoder)?)
        .add(Contextual::new(SolvedCheck)?))
}

/// The invoker assembly, reporting as configured.
pub fn invoker_assembly(config: &EngineConfig) -> Result<Assembly, AssemblyError> {
    let branch = Branch::new(Arc::new(decode_assembly()?))
        .included(&[("invoker", "Invoker")])
        .using(
            "create",
            ContextSpec::new("Create")
                .defines::<Vec<Context>>("decodings")
                .doc("The decodings to be processed"),
        )
        .using_class(
            "Decoding",
            decoding_spec()
                .defines::<String>("input")
                .defines::<String>("type_name"),
        );
    Ok(Assembly::new("invokers")
        .report_level(config.assembly.report)
        .add(Contextual::new(CatalogHandler)?)
        .add(Brancher::new(DecodingHandler, vec![branch])?))
}

/// Build the invoker processing and its build report.
pub fn build(config: &EngineConfig) -> Result<(Processing, Report), AssemblyError> {
    invoker_assembly(config)?.build(Resolvers::new())
}

// ── Running ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct InvokerOutcome {
    pub name: String,
    pub location: String,
    pub inputs: Vec<Input>,
    pub solved: Vec<String>,
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub fill: String,
    pub invokers: Vec<InvokerOutcome>,
}

impl Outcome {
    pub fn aborted(&self) -> impl Iterator<Item = &InvokerOutcome> {
        self.invokers.iter().filter(|invoker| invoker.aborted)
    }
}

/// Run the invoker processing once and describe every registered invoker.
///
/// An abort from the decoding handler is part of the outcome; any other
/// error is returned.
pub fn run(processing: &Processing, config: &EngineConfig) -> Result<Outcome, ProcessError> {
    let register = processing
        .ctx("register")
        .ok_or_else(|| ProcessError::failed("processing has no register slot"))?
        .create();
    let invoker_class = processing
        .ctx("Invoker")
        .ok_or_else(|| ProcessError::failed("processing has no Invoker slot"))?;
    let arguments = Arguments::new()
        .with("register", register.clone())
        .with("Invoker", Arc::clone(invoker_class));

    let mut chain = processing.chain_with(&config.execution, arguments);
    let aborted: Vec<Context> = match chain.execute() {
        Ok(_) => Vec::new(),
        Err(ProcessError::Abort(abort)) => abort.reasons().iter().filter_map(|r| r.as_context().cloned()).collect(),
        Err(error) => return Err(error),
    };

    let mut invokers = Vec::new();
    for invoker in register.get::<Vec<Context>>("invokers")?.unwrap_or_default() {
        invokers.push(InvokerOutcome {
            name: invoker.get::<String>("name")?.unwrap_or_default(),
            location: invoker.get::<String>("location")?.unwrap_or_default(),
            inputs: invoker.get::<Vec<Input>>("inputs")?.unwrap_or_default(),
            solved: invoker.get::<Vec<String>>("solved")?.unwrap_or_default(),
            aborted: aborted.iter().any(|a| a.ptr_eq(&invoker)),
        });
    }
    Ok(Outcome {
        fill: config.execution.fill.to_string(),
        invokers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_config::ReportLevel;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.assembly.report = ReportLevel::Off;
        config
    }

    #[test]
    fn invoker_assembly_resolves() {
        let (processing, report) = build(&config()).unwrap();
        assert_eq!(processing.calls().len(), 2);
        assert!(processing.ctx("Invoker").unwrap().declares("solved"));
        assert!(processing.ctx("register").unwrap().declares("invokers"));
        let branching = report
            .sections()
            .iter()
            .find(|section| section.title().starts_with("Branching processor"))
            .unwrap();
        assert_eq!(branching.sections()[0].title(), "Branch 'decode'");
    }

    #[test]
    fn decode_assembly_needs_its_using_slots() {
        let err = decode_assembly().unwrap().create().unwrap_err();
        let slots: Vec<&str> = err.unresolved().iter().map(|u| u.slot.as_str()).collect();
        assert!(slots.contains(&"create"));
        assert!(slots.contains(&"Decoding"));
    }

    #[test]
    fn unknown_types_abort_their_invokers_only() {
        let config = config();
        let (processing, _) = build(&config).unwrap();
        let outcome = run(&processing, &config).unwrap();

        let aborted: Vec<&str> = outcome.aborted().map(|i| i.name.as_str()).collect();
        assert_eq!(aborted, vec!["report.export", "audit.search"]);

        let rename = outcome.invokers.iter().find(|i| i.name == "user.rename").unwrap();
        assert_eq!(rename.solved, vec!["id", "name"]);
        let delete = outcome.invokers.iter().find(|i| i.name == "user.delete").unwrap();
        assert_eq!(delete.solved, vec!["session", "id"]);
        let export = outcome.invokers.iter().find(|i| i.name == "report.export").unwrap();
        assert!(export.solved.is_empty());
    }

    #[test]
    fn run_is_repeatable_and_independent_of_fill() {
        let mut config = config();
        let (processing, _) = build(&config).unwrap();
        for fill in [Fill::None, Fill::Classes, Fill::Values, Fill::All] {
            config.execution.fill = fill;
            let outcome = run(&processing, &config).unwrap();
            assert_eq!(outcome.invokers.len(), CATALOG.len());
            assert_eq!(outcome.aborted().count(), 2);
            assert_eq!(outcome.fill, fill.to_string());
        }
    }

    #[test]
    fn primitive_decoder_knows_primitives_only() {
        assert_eq!(PrimitiveDecoder::decoder("int"), Some("integer"));
        assert_eq!(PrimitiveDecoder::decoder("Format"), None);
    }
}
