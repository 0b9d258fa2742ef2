//! Dependency analysis: builds the producer index, computes `deps(R)` for
//! every rule, detects cycles, and assigns layers.

use std::collections::{HashMap, HashSet};

use crate::dsl::ir::{self, RuleIR};
use crate::error::{PulsarError, PulsarResult};

/// Result of a successful analysis.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub layer_of: HashMap<String, u32>,
    /// Rule names this rule depends on (deduplicated, discovery order).
    pub deps_of: HashMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unseen,
    InProgress,
    Done,
}

pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// Run the full analysis over `rules`, in their given order.
    pub fn analyze(rules: &[RuleIR]) -> PulsarResult<Analysis> {
        let producer = Self::build_producer_index(rules)?;
        let by_name: HashMap<&str, &RuleIR> = rules.iter().map(|r| (r.name.as_str(), r)).collect();
        let deps_of = Self::compute_deps(rules, &producer);

        let mut colors: HashMap<&str, Color> =
            rules.iter().map(|r| (r.name.as_str(), Color::Unseen)).collect();
        let mut layer_of: HashMap<String, u32> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        for rule in rules {
            Self::visit(&rule.name, &by_name, &deps_of, &mut colors, &mut layer_of, &mut stack)?;
        }

        Ok(Analysis { layer_of, deps_of })
    }

    /// `sensor -> producing rule name`, built from every `SetValue.key`.
    /// Two rules claiming the same key is a hard `ConflictError`.
    fn build_producer_index(rules: &[RuleIR]) -> PulsarResult<HashMap<String, String>> {
        let mut producer: HashMap<String, String> = HashMap::new();
        for rule in rules {
            for key in rule.produced_keys() {
                if let Some(existing) = producer.get(key) {
                    return Err(PulsarError::Conflict {
                        key: key.to_string(),
                        first: existing.clone(),
                        second: rule.name.clone(),
                    });
                }
                producer.insert(key.to_string(), rule.name.clone());
            }
        }
        Ok(producer)
    }

    /// For each rule, the rule names producing every sensor it references
    /// directly (`Comparison`/`ThresholdOverTime`) or, best-effort, through
    /// an `Expression` identifier.
    fn compute_deps(
        rules: &[RuleIR],
        producer: &HashMap<String, String>,
    ) -> HashMap<String, Vec<String>> {
        let mut deps_of = HashMap::with_capacity(rules.len());
        for rule in rules {
            let mut deps: Vec<String> = Vec::new();
            let mut seen: HashSet<String> = HashSet::new();
            let mut record = |sensor: &str| {
                if let Some(producer_name) = producer.get(sensor) {
                    if *producer_name != rule.name && seen.insert(producer_name.clone()) {
                        deps.push(producer_name.clone());
                    }
                }
            };
            if let Some(group) = &rule.conditions {
                ir::visit_referenced_sensors(group, &mut record);
                ir::visit_expression_identifiers(group, &mut record);
            }
            deps_of.insert(rule.name.clone(), deps);
        }
        deps_of
    }

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a RuleIR>,
        deps_of: &HashMap<String, Vec<String>>,
        colors: &mut HashMap<&'a str, Color>,
        layer_of: &mut HashMap<String, u32>,
        stack: &mut Vec<String>,
    ) -> PulsarResult<u32> {
        if let Some(layer) = layer_of.get(name) {
            return Ok(*layer);
        }
        if colors.get(name) == Some(&Color::InProgress) {
            let idx = stack.iter().position(|n| n == name).expect("in-progress node must be on stack");
            let mut path = stack[idx..].to_vec();
            path.push(name.to_string());
            return Err(PulsarError::Cycle { path });
        }

        colors.insert(name, Color::InProgress);
        stack.push(name.to_string());

        let empty = Vec::new();
        let deps = deps_of.get(name).unwrap_or(&empty);
        let mut max_dep_layer: Option<u32> = None;
        for dep in deps {
            let dep_name = by_name.get(dep.as_str()).map(|r| r.name.as_str()).unwrap_or(dep.as_str());
            let layer = Self::visit(dep_name, by_name, deps_of, colors, layer_of, stack)?;
            max_dep_layer = Some(max_dep_layer.map_or(layer, |m| m.max(layer)));
        }

        stack.pop();
        colors.insert(name, Color::Done);
        let layer = max_dep_layer.map_or(0, |m| m + 1);
        layer_of.insert(name.to_string(), layer);
        Ok(layer)
    }
}
