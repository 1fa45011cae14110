//! # Skein Engine
//!
//! Assembles processors into an immutable [`Processing`] and runs it in
//! steppable [`Chain`]s.
//!
//! ```text
//! processors ──register──▶ resolvers ──check──▶ Processing
//!                                                   │
//!                                     chain(fill, arguments)
//!                                                   ▼
//!                          Chain ── step / branch / wing / route / cancel
//!                                                   │ error
//!                                                   ▼
//!                                  ErrorExecution ── suppress / retry
//! ```

pub mod assembly;
pub mod branch;
pub mod error_execution;
pub mod execution;
pub mod processing;
pub mod processor;

pub use assembly::Assembly;
pub use branch::Branch;
pub use error_execution::{ErrorCall, ErrorExecution};
pub use execution::{Call, Chain, Status, call};
pub use processing::Processing;
pub use processor::{
    Brancher, BranchingHandler, Composite, Contextual, Handler, Parameter, Plain, Processor, Renamer, Signature,
    Structure, Using,
};
