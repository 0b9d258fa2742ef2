//! Domain model produced by the [`super::loader::DslLoader`]: `RuleIR` and
//! the tagged unions it is built from.
//!
//! These types are immutable once constructed — nothing downstream (the
//! rewriter, the analyzer, the emitter) mutates a `RuleIR` after load. The
//! set of `Condition`/`Action` variants is closed; every consumer is
//! expected to match exhaustively rather than add a catch-all arm.

use serde::{Deserialize, Serialize};

/// Where a `RuleIR` (or a piece of it) came from in the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub raw_text: String,
}

/// A comparison operator over a sensor value and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl ComparisonOp {
    /// Parse the DSL's operator spelling (`<`, `>`, `<=`, `>=`, `==`, `!=`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(ComparisonOp::Lt),
            ">" => Some(ComparisonOp::Gt),
            "<=" => Some(ComparisonOp::Le),
            ">=" => Some(ComparisonOp::Ge),
            "==" => Some(ComparisonOp::Eq),
            "!=" => Some(ComparisonOp::Ne),
            _ => None,
        }
    }

    /// The operator's spelling in generated source text.
    pub fn as_source_str(self) -> &'static str {
        match self {
            ComparisonOp::Lt => "<",
            ComparisonOp::Gt => ">",
            ComparisonOp::Le => "<=",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
        }
    }
}

/// Direction of a threshold-over-time predicate. The original DSL only ever
/// produced "above"; this field makes "below" reachable too (see Decision
/// D4 in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    Above,
    Below,
}

impl Default for ThresholdDirection {
    fn default() -> Self {
        ThresholdDirection::Above
    }
}

/// Strict vs. extend-last-known semantics for [`Condition::ThresholdOverTime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    Strict,
    ExtendLastKnown,
}

/// A single condition. `Group` introduces recursion; the arena-free
/// representation here (a plain `Box`) is fine because nothing needs a
/// parent pointer — the emitter recomputes nesting depth from the recursive
/// descent itself rather than storing a parent link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Comparison { sensor: String, op: ComparisonOp, value: f64 },
    Expression { expr: String },
    ThresholdOverTime {
        sensor: String,
        threshold: f64,
        duration_ms: u32,
        mode: ThresholdMode,
        #[serde(default)]
        direction: ThresholdDirection,
    },
    Group(Box<ConditionGroup>),
}

/// `all` AND'd together, `any` OR'd together. An empty `all` is vacuously
/// true; an empty `any` does not constrain the group (treated as absent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub all: Vec<Condition>,
    #[serde(default)]
    pub any: Vec<Condition>,
}

impl ConditionGroup {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }
}

/// An action executed when a rule's conditions (if any) hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Action {
    SetValue {
        key: String,
        /// Exactly one of `value`/`expr` is populated after loader
        /// validation; `value` wins if the raw document somehow supplied
        /// both (the loader itself rejects that document).
        value: Option<f64>,
        expr: Option<String>,
    },
    /// Not part of the dataflow graph: `SendMessage` never appears in a
    /// `deps()` computation and never produces an output sensor.
    SendMessage { channel: String, message: String },
}

/// An immutable, load-time record of a single DSL rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleIR {
    pub name: String,
    pub description: Option<String>,
    pub source: Source,
    pub conditions: Option<ConditionGroup>,
    pub actions: Vec<Action>,
}

impl RuleIR {
    /// Output sensor keys this rule's `SetValue` actions write.
    pub fn produced_keys(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(|a| match a {
            Action::SetValue { key, .. } => Some(key.as_str()),
            Action::SendMessage { .. } => None,
        })
    }

    /// Whether any condition, at any nesting depth, is a `ThresholdOverTime`.
    pub fn uses_temporal(&self) -> bool {
        self.conditions.as_ref().is_some_and(group_uses_temporal)
    }
}

fn group_uses_temporal(group: &ConditionGroup) -> bool {
    group.all.iter().chain(group.any.iter()).any(condition_uses_temporal)
}

fn condition_uses_temporal(condition: &Condition) -> bool {
    match condition {
        Condition::ThresholdOverTime { .. } => true,
        Condition::Group(g) => group_uses_temporal(g),
        Condition::Comparison { .. } | Condition::Expression { .. } => false,
    }
}

/// Visit every sensor name referenced by a `Comparison` or `ThresholdOverTime`
/// condition anywhere inside `group`, including nested groups. Used by the
/// dependency analyzer and, best-effort, by the rewriter's producer lookup
/// for `Expression` conditions.
pub fn visit_referenced_sensors<'a>(group: &'a ConditionGroup, mut visit: impl FnMut(&'a str)) {
    fn walk<'a>(condition: &'a Condition, visit: &mut impl FnMut(&'a str)) {
        match condition {
            Condition::Comparison { sensor, .. } | Condition::ThresholdOverTime { sensor, .. } => {
                visit(sensor);
            }
            Condition::Expression { .. } => {
                // Expression dependencies are handled separately by the
                // analyzer via identifier scanning, since an Expression's
                // sensor references are not a structured field.
            }
            Condition::Group(g) => walk_group(g, visit),
        }
    }
    fn walk_group<'a>(group: &'a ConditionGroup, visit: &mut impl FnMut(&'a str)) {
        for c in group.all.iter().chain(group.any.iter()) {
            walk(c, visit);
        }
    }
    walk_group(group, &mut visit);
}

/// Every free identifier appearing in `Expression` conditions or `value_expr`
/// actions anywhere inside `group`. Best-effort: this is a lexical scan, not
/// a parse, matching the rewriter's own "best-effort" treatment of
/// expression dependencies.
pub fn visit_expression_identifiers<'a>(group: &'a ConditionGroup, mut visit: impl FnMut(&'a str)) {
    fn walk<'a>(condition: &'a Condition, visit: &mut impl FnMut(&'a str)) {
        match condition {
            Condition::Expression { expr } => {
                for ident in crate::rewriter::lex_identifiers(expr) {
                    visit(ident);
                }
            }
            Condition::Group(g) => walk_group(g, visit),
            Condition::Comparison { .. } | Condition::ThresholdOverTime { .. } => {}
        }
    }
    fn walk_group<'a>(group: &'a ConditionGroup, visit: &mut impl FnMut(&'a str)) {
        for c in group.all.iter().chain(group.any.iter()) {
            walk(c, visit);
        }
    }
    walk_group(group, &mut visit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, conditions: Option<ConditionGroup>, actions: Vec<Action>) -> RuleIR {
        RuleIR {
            name: name.to_string(),
            description: None,
            source: Source { file: "test.yaml".into(), line: 1, column: 1, raw_text: String::new() },
            conditions,
            actions,
        }
    }

    #[test]
    fn produced_keys_ignore_send_message() {
        let r = rule(
            "r",
            None,
            vec![
                Action::SetValue { key: "alert".into(), value: Some(1.0), expr: None },
                Action::SendMessage { channel: "c".into(), message: "m".into() },
            ],
        );
        let produced: Vec<_> = r.produced_keys().collect();
        assert_eq!(produced, vec!["alert"]);
    }

    #[test]
    fn uses_temporal_detects_nested_group() {
        let inner = ConditionGroup {
            all: vec![Condition::ThresholdOverTime {
                sensor: "t".into(),
                threshold: 1.0,
                duration_ms: 100,
                mode: ThresholdMode::Strict,
                direction: ThresholdDirection::Above,
            }],
            any: vec![],
        };
        let outer = ConditionGroup { all: vec![Condition::Group(Box::new(inner))], any: vec![] };
        let r = rule("r", Some(outer), vec![]);
        assert!(r.uses_temporal());
    }
}
