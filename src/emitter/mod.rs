//! Code generation: lowers analyzed `RuleIR[]` into emitted source files
//! plus a coordinator, layered per [`crate::analyzer::Analysis`].

pub mod render;

pub use render::{emit, RenderedFile, RenderedUnit, RulePlacement};
