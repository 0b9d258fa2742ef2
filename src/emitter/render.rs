//! Rendering: turns `RuleIR[]` plus a completed [`Analysis`] into emitted
//! source files and a coordinator, and tracks where each rule landed so the
//! manifest builder doesn't have to re-derive it.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analyzer::Analysis;
use crate::dsl::ir::{Action, Condition, ConditionGroup, RuleIR, ThresholdDirection, ThresholdMode};
use crate::error::PulsarResult;
use crate::rewriter;

/// One generated source file.
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub name: String,
    pub text: String,
}

/// Where a rule's block ended up: which file, and its line range within it
/// (1-indexed, inclusive), for the manifest.
#[derive(Debug, Clone, Copy)]
pub struct RulePlacement {
    pub start_line: u32,
    pub end_line: u32,
}

pub struct RenderedUnit {
    pub files: Vec<RenderedFile>,
    pub placements: HashMap<String, (String, RulePlacement)>,
}

const COORDINATOR_FILE: &str = "coordinator.rs";

/// Render `rules` (already analyzed) into the emitted artifact. `group_size`
/// bounds how many rule blocks may share one file.
pub fn emit(
    rules: &[RuleIR],
    analysis: &Analysis,
    producer_index: &HashSet<String>,
    group_size: usize,
) -> PulsarResult<RenderedUnit> {
    let group_size = group_size.max(1);
    let layers = group_rules_by_layer(rules, &analysis.layer_of);
    let chunks = split_into_chunks(&layers, group_size);
    let files_of_chunks = pack_chunks_into_files(&chunks, group_size);

    let mut files = Vec::new();
    let mut placements = HashMap::new();

    for (file_index, chunk_indices) in files_of_chunks.iter().enumerate() {
        let name = format!("layer_rules_{file_index:02}.rs");
        let mut text = String::new();
        text.push_str("// Generated by the Pulsar rule compiler. Do not edit by hand.\n\n");
        let mut line = 3u32;

        for &chunk_idx in chunk_indices {
            let chunk = &chunks[chunk_idx];
            let fn_name = chunk.fn_name();
            text.push_str(&format!(
                "pub(crate) fn {fn_name}(inputs: &std::collections::HashMap<String, f64>, outputs: &mut std::collections::HashMap<String, f64>, buffers: &crate::buffer::BufferManager) {{\n",
            ));
            line += 1;

            for rule in &chunk.rules {
                let start_line = line + 1; // +1 for the blank separator line below
                text.push('\n');
                line += 1;
                let block = render_rule_block(rule, producer_index)?;
                let block_lines = block.matches('\n').count() as u32;
                text.push_str(&block);
                line += block_lines;
                let end_line = line;
                placements.insert(
                    rule.name.clone(),
                    (name.clone(), RulePlacement { start_line, end_line }),
                );
            }

            text.push_str("}\n\n");
            line += 2;
        }

        files.push(RenderedFile { name, text });
    }

    files.push(RenderedFile { name: COORDINATOR_FILE.to_string(), text: render_coordinator(&layers, &chunks) });

    Ok(RenderedUnit { files, placements })
}

/// One contiguous slice of a layer's rules, sized to fit within `group_size`.
/// A layer that fits entirely within `group_size` is a single chunk; a
/// larger layer is split into several, each named `part_N`.
struct Chunk<'a> {
    layer: u32,
    part: usize,
    parts_in_layer: usize,
    rules: Vec<&'a RuleIR>,
}

impl Chunk<'_> {
    fn fn_name(&self) -> String {
        if self.parts_in_layer == 1 {
            format!("evaluate_layer_{}", self.layer)
        } else {
            format!("evaluate_layer_{}_part_{}", self.layer, self.part)
        }
    }
}

fn group_rules_by_layer<'a>(rules: &'a [RuleIR], layer_of: &HashMap<String, u32>) -> Vec<(u32, Vec<&'a RuleIR>)> {
    let mut map: BTreeMap<u32, Vec<&RuleIR>> = BTreeMap::new();
    for rule in rules {
        map.entry(layer_of[&rule.name]).or_default().push(rule);
    }
    map.into_iter().collect()
}

fn split_into_chunks<'a>(layers: &[(u32, Vec<&'a RuleIR>)], group_size: usize) -> Vec<Chunk<'a>> {
    let mut chunks = Vec::new();
    for (layer, rules) in layers {
        let parts_in_layer = ((rules.len() + group_size - 1) / group_size).max(1);
        for (part, slice) in rules.chunks(group_size).enumerate() {
            chunks.push(Chunk { layer: *layer, part, parts_in_layer, rules: slice.to_vec() });
        }
    }
    chunks
}

/// Greedily bin-pack chunks (each already `<= group_size` rules) into files,
/// never splitting a chunk, keeping small layers in one file when they fit.
fn pack_chunks_into_files(chunks: &[Chunk], group_size: usize) -> Vec<Vec<usize>> {
    let mut files: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_len = 0usize;

    for (idx, chunk) in chunks.iter().enumerate() {
        if !current.is_empty() && current_len + chunk.rules.len() > group_size {
            files.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(idx);
        current_len += chunk.rules.len();
    }
    if !current.is_empty() {
        files.push(current);
    }
    files
}

fn render_coordinator(layers: &[(u32, Vec<&RuleIR>)], chunks: &[Chunk]) -> String {
    let mut text = String::new();
    text.push_str("// Generated by the Pulsar rule compiler. Do not edit by hand.\n");
    text.push_str("//\n// Aggregates the per-layer evaluation routines defined across the sibling\n// `layer_rules_*.rs` files into one entry point.\n\n");
    text.push_str(
        "pub fn evaluate(inputs: &std::collections::HashMap<String, f64>, outputs: &mut std::collections::HashMap<String, f64>, buffers: &crate::buffer::BufferManager) {\n",
    );
    for (layer, _) in layers {
        let layer_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.layer == *layer).collect();
        for chunk in layer_chunks {
            text.push_str(&format!("    {}(inputs, outputs, buffers);\n", chunk.fn_name()));
        }
    }
    text.push_str("}\n");
    text
}

fn render_rule_block(rule: &RuleIR, producer_index: &HashSet<String>) -> PulsarResult<String> {
    let mut text = String::new();
    text.push_str(&format!("    // {} ({}:{})\n", rule.name, rule.source.file, rule.source.line));
    if let Some(desc) = &rule.description {
        text.push_str(&format!("    // {desc}\n"));
    }

    let actions = render_actions(rule, producer_index)?;

    match &rule.conditions {
        Some(group) if !group.is_empty() => {
            let guard = render_group(group, producer_index, false)?;
            text.push_str(&format!("    if {guard} {{\n"));
            for line in actions.lines() {
                text.push_str(&format!("    {line}\n"));
            }
            text.push_str("    }\n");
        }
        _ => {
            text.push_str(&actions);
        }
    }

    Ok(text)
}

fn render_actions(rule: &RuleIR, producer_index: &HashSet<String>) -> PulsarResult<String> {
    let mut text = String::new();
    for action in &rule.actions {
        match action {
            Action::SetValue { key, value, expr } => {
                let rendered_value = match (value, expr) {
                    (Some(v), _) => format_literal(*v),
                    (None, Some(e)) => rewriter::rewrite(e, producer_index)?,
                    (None, None) => "0.0".to_string(),
                };
                text.push_str(&format!("    outputs.insert(\"{key}\".to_string(), {rendered_value});\n"));
            }
            Action::SendMessage { channel, message } => {
                text.push_str(&format!("    message_bus.publish(\"{channel}\", \"{message}\");\n"));
            }
        }
    }
    Ok(text)
}

fn source_for(sensor: &str, producer_index: &HashSet<String>) -> &'static str {
    if producer_index.contains(sensor) {
        "outputs"
    } else {
        "inputs"
    }
}

fn render_condition(condition: &Condition, producer_index: &HashSet<String>) -> PulsarResult<String> {
    match condition {
        Condition::Comparison { sensor, op, value } => {
            let source = source_for(sensor, producer_index);
            Ok(format!("{source}[\"{sensor}\"] {} {}", op.as_source_str(), format_literal(*value)))
        }
        Condition::Expression { expr } => rewriter::rewrite(expr, producer_index),
        Condition::ThresholdOverTime { sensor, threshold, duration_ms, mode, direction } => {
            let func = match direction {
                ThresholdDirection::Above => "above_for",
                ThresholdDirection::Below => "below_for",
            };
            let mode_text = match mode {
                ThresholdMode::Strict => "crate::buffer::ThresholdMode::Strict",
                ThresholdMode::ExtendLastKnown => "crate::buffer::ThresholdMode::ExtendLastKnown",
            };
            Ok(format!("buffers.{func}(\"{sensor}\", {}, {duration_ms}, {mode_text})", format_literal(*threshold)))
        }
        Condition::Group(group) => Ok(format!("({})", render_group(group, producer_index, true)?)),
    }
}

/// `nested` is true iff this group is itself a `Condition::Group` embedded
/// in a parent — a rule's own top-level condition group is never "nested".
fn render_group(group: &ConditionGroup, producer_index: &HashSet<String>, nested: bool) -> PulsarResult<String> {
    let all_rendered: Vec<String> =
        group.all.iter().map(|c| render_condition(c, producer_index)).collect::<PulsarResult<_>>()?;
    let any_rendered: Vec<String> =
        group.any.iter().map(|c| render_condition(c, producer_index)).collect::<PulsarResult<_>>()?;

    let all_joined = all_rendered.join(" && ");
    let any_joined = any_rendered.join(" || ");

    let all_part =
        if nested && all_rendered.len() > 1 { format!("({all_joined})") } else { all_joined };

    Ok(match (all_rendered.is_empty(), any_rendered.is_empty()) {
        (false, false) => format!("{all_part} && ({any_joined})"),
        // No `any` half to combine with, so no join happens here for the
        // caller to need grouped — `Condition::Group` already wraps the
        // whole result in parens when this group is nested.
        (false, true) => all_joined,
        (true, false) => any_joined,
        (true, true) => String::new(),
    })
}

/// Full round-trip precision, culture-invariant decimal point. Rust's `f64`
/// `Debug` formatting already produces the shortest string that parses back
/// to the same bit pattern, with a `.` regardless of locale.
fn format_literal(value: f64) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DependencyAnalyzer;
    use crate::dsl::ir::{ComparisonOp, Source};

    fn source() -> Source {
        Source { file: "t.yaml".into(), line: 1, column: 1, raw_text: String::new() }
    }

    #[test]
    fn simple_comparison_scenario_renders_guarded_assignment() {
        let rule = RuleIR {
            name: "A".into(),
            description: None,
            source: source(),
            conditions: Some(ConditionGroup {
                all: vec![Condition::Comparison {
                    sensor: "temperature".into(),
                    op: ComparisonOp::Gt,
                    value: 100.0,
                }],
                any: vec![],
            }),
            actions: vec![Action::SetValue { key: "alert".into(), value: Some(1.0), expr: None }],
        };
        let analysis = DependencyAnalyzer::analyze(std::slice::from_ref(&rule)).unwrap();
        let producer_index: HashSet<String> = HashSet::new();
        let unit = emit(std::slice::from_ref(&rule), &analysis, &producer_index, 50).unwrap();

        let body = &unit.files[0].text;
        assert!(body.contains("if inputs[\"temperature\"] > 100.0 {"));
        assert!(body.contains("outputs.insert(\"alert\".to_string(), 1.0);"));
        assert!(unit.placements.contains_key("A"));
    }

    #[test]
    fn two_layer_chain_second_rule_reads_output() {
        let temp_conv = RuleIR {
            name: "TempConv".into(),
            description: None,
            source: source(),
            conditions: None,
            actions: vec![Action::SetValue {
                key: "temp_c".into(),
                value: None,
                expr: Some("(temp_f - 32) * 5/9".into()),
            }],
        };
        let high_alert = RuleIR {
            name: "HighAlert".into(),
            description: None,
            source: source(),
            conditions: Some(ConditionGroup {
                all: vec![Condition::Comparison { sensor: "temp_c".into(), op: ComparisonOp::Gt, value: 37.0 }],
                any: vec![],
            }),
            actions: vec![Action::SetValue { key: "high".into(), value: Some(1.0), expr: None }],
        };
        let rules = vec![temp_conv, high_alert];
        let analysis = DependencyAnalyzer::analyze(&rules).unwrap();
        let producer_index: HashSet<String> = ["temp_c".to_string()].into_iter().collect();
        let unit = emit(&rules, &analysis, &producer_index, 50).unwrap();

        let all_text: String = unit.files.iter().map(|f| f.text.clone()).collect::<Vec<_>>().join("\n");
        assert!(all_text.contains("outputs[\"temp_c\"] > 37.0"));
        assert!(all_text.contains("((inputs[\"temp_f\"] - 32) * 5 / 9)"));
    }

    #[test]
    fn mixed_all_any_renders_all_joined_with_and_any_grouped_with_or() {
        let rule = RuleIR {
            name: "Alarm".into(),
            description: None,
            source: source(),
            conditions: Some(ConditionGroup {
                all: vec![
                    Condition::Comparison { sensor: "temp".into(), op: ComparisonOp::Gt, value: 100.0 },
                    Condition::Comparison { sensor: "humidity".into(), op: ComparisonOp::Lt, value: 50.0 },
                ],
                any: vec![
                    Condition::Comparison { sensor: "pressure".into(), op: ComparisonOp::Lt, value: 950.0 },
                    Condition::Comparison { sensor: "wind".into(), op: ComparisonOp::Gt, value: 30.0 },
                ],
            }),
            actions: vec![Action::SetValue { key: "alarm".into(), value: Some(1.0), expr: None }],
        };
        let producer_index: HashSet<String> = HashSet::new();
        let guard = render_group(rule.conditions.as_ref().unwrap(), &producer_index, false).unwrap();
        assert_eq!(
            guard,
            "inputs[\"temp\"] > 100.0 && inputs[\"humidity\"] < 50.0 && (inputs[\"pressure\"] < 950.0 || inputs[\"wind\"] > 30.0)"
        );
    }

    #[test]
    fn nested_group_with_only_an_all_half_is_not_double_parenthesized() {
        let nested = ConditionGroup {
            all: vec![
                Condition::Comparison { sensor: "temp".into(), op: ComparisonOp::Gt, value: 100.0 },
                Condition::Comparison { sensor: "humidity".into(), op: ComparisonOp::Lt, value: 50.0 },
            ],
            any: vec![],
        };
        let group = ConditionGroup { all: vec![Condition::Group(Box::new(nested))], any: vec![] };
        let producer_index: HashSet<String> = HashSet::new();
        let rendered = render_group(&group, &producer_index, false).unwrap();
        assert_eq!(rendered, "(inputs[\"temp\"] > 100.0 && inputs[\"humidity\"] < 50.0)");
    }

    #[test]
    fn oversized_layer_splits_across_files() {
        let rules: Vec<RuleIR> = (0..5)
            .map(|i| RuleIR {
                name: format!("R{i}"),
                description: None,
                source: source(),
                conditions: None,
                actions: vec![Action::SetValue { key: format!("k{i}"), value: Some(i as f64), expr: None }],
            })
            .collect();
        let analysis = DependencyAnalyzer::analyze(&rules).unwrap();
        let producer_index: HashSet<String> = HashSet::new();
        let unit = emit(&rules, &analysis, &producer_index, 2).unwrap();

        // 5 rules at group_size 2 -> at least 3 rule files plus the coordinator.
        assert!(unit.files.len() >= 4);
        assert!(unit.files.last().unwrap().name == COORDINATOR_FILE);
    }
}
