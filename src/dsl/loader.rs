//! # DSL Loader
//!
//! Parses a rules YAML document into `RuleIR[]`, validating every sensor
//! reference against the [`SensorCatalog`] whitelist and every structural
//! structural constraint the loader is responsible for. Nothing here
//! interprets expressions semantically —
//! that is the rewriter's job, invoked downstream by the emitter.

use std::collections::HashSet;

use serde::Deserialize;

use crate::dsl::ir::{
    Action, ComparisonOp, Condition, ConditionGroup, RuleIR, Source, ThresholdDirection,
    ThresholdMode,
};
use crate::error::{PulsarError, PulsarResult, SourceLocation};
use crate::sensor_catalog::SensorCatalog;

// ---------------------------------------------------------------------------
// Wire shapes (shadow tree): stringly-typed, mirroring the YAML schema
// exactly. The loader lowers these into the immutable `dsl::ir` domain
// types after validation, keeping serde's stringly-typed concerns out of
// the types the rest of the crate operates on.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDocument {
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    conditions: Option<RawConditionGroup>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConditionGroup {
    #[serde(default)]
    all: Vec<RawConditionEntry>,
    #[serde(default)]
    any: Vec<RawConditionEntry>,
}

#[derive(Debug, Deserialize)]
struct RawConditionEntry {
    condition: RawCondition,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawCondition {
    Comparison { sensor: String, op: String, value: f64 },
    Expression { expr: String },
    ThresholdOverTime {
        sensor: String,
        threshold: f64,
        duration_ms: i64,
        mode: String,
        #[serde(default)]
        direction: Option<String>,
    },
    Group(Box<RawConditionGroup>),
}

#[derive(Debug, Deserialize)]
struct RawAction {
    set_value: Option<RawSetValue>,
    send_message: Option<RawSendMessage>,
}

#[derive(Debug, Deserialize)]
struct RawSetValue {
    key: String,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    value_expression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSendMessage {
    channel: String,
    message: String,
}

/// Parses and validates rule documents against the sensor whitelist.
pub struct DslLoader<'a> {
    catalog: &'a SensorCatalog,
    source_name: String,
}

impl<'a> DslLoader<'a> {
    pub fn new(catalog: &'a SensorCatalog, source_name: impl Into<String>) -> Self {
        DslLoader { catalog, source_name: source_name.into() }
    }

    /// Parse and validate `text`, producing one `RuleIR` per document rule.
    pub fn load(&self, text: &str) -> PulsarResult<Vec<RuleIR>> {
        let doc: RawDocument = serde_yaml::from_str(text).map_err(|e| PulsarError::Parse {
            message: format!("malformed rules document: {e}"),
            location: self.location_from_yaml_error(&e),
        })?;

        let rule_lines = scan_rule_start_lines(text, doc.rules.len());

        let mut rules = Vec::with_capacity(doc.rules.len());
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut invalid_sensors: Vec<String> = Vec::new();

        for (idx, raw) in doc.rules.into_iter().enumerate() {
            let line = rule_lines.get(idx).copied().unwrap_or(0);
            let location = SourceLocation::new(self.source_name.clone(), line);

            if !seen_names.insert(raw.name.clone()) {
                return Err(PulsarError::DuplicateRule(raw.name));
            }

            let conditions = raw
                .conditions
                .map(|c| self.lower_condition_group(c, &location, &mut invalid_sensors))
                .transpose()?
                .filter(|g: &ConditionGroup| !g.is_empty());

            let mut actions = Vec::with_capacity(raw.actions.len());
            for raw_action in raw.actions {
                actions.push(self.lower_action(raw_action, &location, &mut invalid_sensors)?);
            }

            rules.push(RuleIR {
                name: raw.name,
                description: raw.description,
                source: Source {
                    file: self.source_name.clone(),
                    line,
                    column: 1,
                    raw_text: String::new(),
                },
                conditions,
                actions,
            });
        }

        if !invalid_sensors.is_empty() {
            invalid_sensors.sort();
            invalid_sensors.dedup();
            return Err(PulsarError::Catalog { names: invalid_sensors, location: None });
        }

        Ok(rules)
    }

    fn check_sensor(&self, name: &str, invalid: &mut Vec<String>) {
        if !self.catalog.contains(name) {
            invalid.push(name.to_string());
        }
    }

    fn lower_condition_group(
        &self,
        raw: RawConditionGroup,
        location: &SourceLocation,
        invalid: &mut Vec<String>,
    ) -> PulsarResult<ConditionGroup> {
        let all = raw
            .all
            .into_iter()
            .map(|e| self.lower_condition(e.condition, location, invalid))
            .collect::<PulsarResult<Vec<_>>>()?;
        let any = raw
            .any
            .into_iter()
            .map(|e| self.lower_condition(e.condition, location, invalid))
            .collect::<PulsarResult<Vec<_>>>()?;
        Ok(ConditionGroup { all, any })
    }

    fn lower_condition(
        &self,
        raw: RawCondition,
        location: &SourceLocation,
        invalid: &mut Vec<String>,
    ) -> PulsarResult<Condition> {
        match raw {
            RawCondition::Comparison { sensor, op, value } => {
                self.check_sensor(&sensor, invalid);
                let op = ComparisonOp::parse(&op).ok_or_else(|| PulsarError::Parse {
                    message: format!("unknown comparison operator `{op}`"),
                    location: Some(location.clone()),
                })?;
                Ok(Condition::Comparison { sensor, op, value })
            }
            RawCondition::Expression { expr } => Ok(Condition::Expression { expr }),
            RawCondition::ThresholdOverTime { sensor, threshold, duration_ms, mode, direction } => {
                self.check_sensor(&sensor, invalid);
                if duration_ms < 0 {
                    return Err(PulsarError::Parse {
                        message: format!("duration_ms must be non-negative, got {duration_ms}"),
                        location: Some(location.clone()),
                    });
                }
                let mode = match mode.as_str() {
                    "strict" => ThresholdMode::Strict,
                    "extend_last_known" => ThresholdMode::ExtendLastKnown,
                    other => {
                        return Err(PulsarError::Parse {
                            message: format!("unknown threshold mode `{other}`"),
                            location: Some(location.clone()),
                        })
                    }
                };
                let direction = match direction.as_deref() {
                    None => ThresholdDirection::Above,
                    Some("above") => ThresholdDirection::Above,
                    Some("below") => ThresholdDirection::Below,
                    Some(other) => {
                        return Err(PulsarError::Parse {
                            message: format!("unknown threshold direction `{other}`"),
                            location: Some(location.clone()),
                        })
                    }
                };
                Ok(Condition::ThresholdOverTime {
                    sensor,
                    threshold,
                    duration_ms: duration_ms as u32,
                    mode,
                    direction,
                })
            }
            RawCondition::Group(g) => {
                Ok(Condition::Group(Box::new(self.lower_condition_group(*g, location, invalid)?)))
            }
        }
    }

    fn lower_action(
        &self,
        raw: RawAction,
        location: &SourceLocation,
        invalid: &mut Vec<String>,
    ) -> PulsarResult<Action> {
        match (raw.set_value, raw.send_message) {
            (Some(_), Some(_)) => Err(PulsarError::Parse {
                message: "an action item may not have both `set_value` and `send_message`".into(),
                location: Some(location.clone()),
            }),
            (Some(sv), None) => {
                self.check_sensor(&sv.key, invalid);
                match (sv.value, sv.value_expression) {
                    (None, None) => Err(PulsarError::Parse {
                        message: format!(
                            "set_value for `{}` needs one of `value`/`value_expression`",
                            sv.key
                        ),
                        location: Some(location.clone()),
                    }),
                    // `value` wins if both are present.
                    (value, expr) => {
                        Ok(Action::SetValue { key: sv.key, value, expr: if value.is_some() { None } else { expr } })
                    }
                }
            }
            (None, Some(sm)) => {
                Ok(Action::SendMessage { channel: sm.channel, message: sm.message })
            }
            (None, None) => Err(PulsarError::Parse {
                message: "an action item must have `set_value` or `send_message`".into(),
                location: Some(location.clone()),
            }),
        }
    }

    fn location_from_yaml_error(&self, e: &serde_yaml::Error) -> Option<SourceLocation> {
        e.location().map(|loc| {
            SourceLocation::new(self.source_name.clone(), loc.line() as u32)
                .with_column(loc.column() as u32)
        })
    }
}

/// Best-effort line numbers for each top-level rule entry, found by scanning
/// for `- name:` (or `-name:`/`  name:` directly under a list item) at the
/// indentation level of the `rules:` sequence. This gives rule-granularity
/// source locations without requiring a full YAML-span-aware parser
/// (Decision D2 in DESIGN.md).
fn scan_rule_start_lines(text: &str, expected: usize) -> Vec<u32> {
    let mut lines_out = Vec::with_capacity(expected);
    let mut in_rules = false;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if !in_rules {
            if trimmed.starts_with("rules:") {
                in_rules = true;
            }
            continue;
        }
        if trimmed.starts_with("- name:") || trimmed.starts_with("-name:") {
            lines_out.push((idx + 1) as u32);
        }
    }
    lines_out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SensorCatalog {
        SensorCatalog::new(["temperature", "alert", "humidity", "pressure", "wind"].map(String::from))
    }

    #[test]
    fn loads_simple_comparison_rule() {
        let yaml = r#"
rules:
  - name: A
    conditions:
      all:
        - condition:
            type: comparison
            sensor: temperature
            op: ">"
            value: 100
    actions:
      - set_value:
          key: alert
          value: 1
"#;
        let loader = DslLoader::new(&catalog(), "rules.yaml");
        let rules = loader.load(yaml).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "A");
    }

    #[test]
    fn rejects_unknown_sensor() {
        let yaml = r#"
rules:
  - name: A
    conditions:
      all:
        - condition:
            type: comparison
            sensor: not_a_sensor
            op: ">"
            value: 1
    actions: []
"#;
        let err = DslLoader::new(&catalog(), "rules.yaml").load(yaml).unwrap_err();
        assert!(matches!(err, PulsarError::Catalog { .. }));
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let yaml = r#"
rules:
  - name: A
    actions: []
  - name: A
    actions: []
"#;
        let err = DslLoader::new(&catalog(), "rules.yaml").load(yaml).unwrap_err();
        assert!(matches!(err, PulsarError::DuplicateRule(_)));
    }

    #[test]
    fn rejects_both_value_and_expression_present_by_preferring_value() {
        let yaml = r#"
rules:
  - name: A
    actions:
      - set_value:
          key: alert
          value: 1
          value_expression: "temperature + 1"
"#;
        let rules = DslLoader::new(&catalog(), "rules.yaml").load(yaml).unwrap();
        match &rules[0].actions[0] {
            Action::SetValue { value, expr, .. } => {
                assert_eq!(*value, Some(1.0));
                assert!(expr.is_none());
            }
            _ => panic!("expected SetValue"),
        }
    }

    #[test]
    fn rejects_both_set_value_and_send_message() {
        let yaml = r#"
rules:
  - name: A
    actions:
      - set_value:
          key: alert
          value: 1
        send_message:
          channel: c
          message: m
"#;
        let err = DslLoader::new(&catalog(), "rules.yaml").load(yaml).unwrap_err();
        assert!(matches!(err, PulsarError::Parse { .. }));
    }

    #[test]
    fn rejects_negative_duration() {
        let yaml = r#"
rules:
  - name: A
    conditions:
      all:
        - condition:
            type: threshold_over_time
            sensor: temperature
            threshold: 30
            duration_ms: -1
            mode: strict
    actions: []
"#;
        let err = DslLoader::new(&catalog(), "rules.yaml").load(yaml).unwrap_err();
        assert!(matches!(err, PulsarError::Parse { .. }));
    }

    #[test]
    fn nested_group_combines_all_and_any_conditions() {
        let yaml = r#"
rules:
  - name: Alarm
    conditions:
      all:
        - condition: { type: comparison, sensor: temperature, op: ">", value: 100 }
        - condition: { type: comparison, sensor: humidity, op: "<", value: 50 }
      any:
        - condition: { type: comparison, sensor: pressure, op: "<", value: 950 }
        - condition: { type: comparison, sensor: wind, op: ">", value: 30 }
    actions:
      - set_value: { key: alert, value: 1 }
"#;
        let rules = DslLoader::new(&catalog(), "rules.yaml").load(yaml).unwrap();
        let group = rules[0].conditions.as_ref().unwrap();
        assert_eq!(group.all.len(), 2);
        assert_eq!(group.any.len(), 2);
    }
}
