//! The rules DSL: YAML wire format, the `RuleIR` domain model it lowers
//! into, and the loader that performs that lowering.

pub mod ir;
pub mod loader;

pub use ir::{
    Action, ComparisonOp, Condition, ConditionGroup, RuleIR, Source, ThresholdDirection,
    ThresholdMode,
};
pub use loader::DslLoader;
