//! # Skein Core
//!
//! Capability records, resolvers, argument bags, and error definitions for
//! the Skein pipeline engine. This crate has no notion of execution; it
//! describes what processors declare and what a run carries.
//!
//! ## Design Philosophy
//!
//! Every context slot is an explicit contract: a [`ContextSpec`] lists the
//! attributes a processor requires and the ones it defines. Satisfiability
//! is decided once, when processors are assembled, by merging those
//! contracts into [`Resolvers`] and checking for unresolved requirements.

pub mod arguments;
pub mod context;
pub mod error;
pub mod report;
pub mod resolver;

// Re-export key types at crate root for ergonomics
pub use arguments::{Arg, Arguments, Fill};
pub use context::{AttributeSpec, Context, ContextClass, ContextSpec, Presence, SlotKind, TypeTag};
pub use error::{Abort, AssemblyError, Location, ProcessError, Unresolved};
pub use report::Report;
pub use resolver::{AttributeResolver, Resolver, Resolvers};
