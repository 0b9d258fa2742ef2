//! Error types for the Pulsar compilation pipeline.
//!
//! Every stage (load, rewrite, analyze, emit) fails fast with a typed,
//! `thiserror`-derived variant. Errors carry a [`SourceLocation`] whenever
//! the failure can be traced back to a specific place in a rules document.

use std::fmt;
use std::path::PathBuf;

/// A location within a source document: file plus line, optionally a column.
///
/// Column tracking is best-effort: `serde_yaml` gives exact spans for
/// malformed documents but not for successfully-parsed nodes, so locations
/// attached to semantic errors (unknown sensor, duplicate name, ...) are
/// rule/condition granularity rather than byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: Option<u32>,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        SourceLocation { file: file.into(), line, column: None }
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(col) => write!(f, "{}:{}:{}", self.file.display(), self.line, col),
            None => write!(f, "{}:{}", self.file.display(), self.line),
        }
    }
}

/// The top-level error type surfaced by every public entry point in this crate.
#[derive(Debug, thiserror::Error)]
pub enum PulsarError {
    /// A sensor name or `set_value` key is not a member of the sensor catalog.
    #[error("{location}: unknown sensor(s): {}", .names.join(", "))]
    Catalog { names: Vec<String>, location: Option<SourceLocation> },

    /// Malformed YAML, or a discriminant (condition `type`, action key) the
    /// loader does not recognize.
    #[error("{location}: {message}", location = .location.as_ref().map(ToString::to_string).unwrap_or_else(|| "<unknown location>".into()))]
    Parse { message: String, location: Option<SourceLocation> },

    /// An `Expression` condition or `value_expression` action is lexically
    /// unrecognizable (rare: the rewriter accepts almost everything).
    #[error("{location}: cannot lex expression `{expr}`: {message}", location = .location.as_ref().map(ToString::to_string).unwrap_or_else(|| "<unknown location>".into()))]
    Expression { expr: String, message: String, location: Option<SourceLocation> },

    /// The dependency relation between rules contains a cycle.
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Two rules claim the same output key (same `SetValue.key`).
    #[error("rules `{first}` and `{second}` both produce output `{key}`")]
    Conflict { key: String, first: String, second: String },

    /// Rule names are not unique within a compilation unit.
    #[error("duplicate rule name `{0}`")]
    DuplicateRule(String),

    /// Reading a source document or writing an emitted artifact failed.
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

pub type PulsarResult<T> = Result<T, PulsarError>;

impl PulsarError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PulsarError::Io { path: path.into(), source }
    }

    /// The [`SourceLocation`] associated with this error, if any.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            PulsarError::Catalog { location, .. }
            | PulsarError::Parse { location, .. }
            | PulsarError::Expression { location, .. } => location.as_ref(),
            _ => None,
        }
    }
}
