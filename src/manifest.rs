//! Sidecar JSON manifest describing an emitted artifact: per-file content
//! hashes and per-rule placement/dependency metadata.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::analyzer::Analysis;
use crate::dsl::ir::{self, Action, RuleIR};
use crate::emitter::{RenderedUnit, RulePlacement};
use crate::error::{PulsarError, PulsarResult};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub sha256_base64: String,
}

#[derive(Debug, Serialize)]
pub struct ManifestRule {
    pub source_file: String,
    pub source_line: u32,
    pub emitted_file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub dependencies: Vec<String>,
    pub layer: u32,
    pub input_sensors: Vec<String>,
    pub output_sensors: Vec<String>,
    pub uses_temporal: bool,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub generated_at: String,
    pub files: Vec<ManifestFile>,
    pub rules: HashMap<String, ManifestRule>,
}

impl Manifest {
    pub fn to_json_pretty(&self) -> PulsarResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PulsarError::Parse {
            message: format!("failed to serialize manifest: {e}"),
            location: None,
        })
    }

    pub fn write(&self, path: impl AsRef<Path>) -> PulsarResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json_pretty()?).map_err(|e| PulsarError::io(path, e))
    }
}

/// Builds a [`Manifest`] from an analyzed rule set and its rendered output.
/// `generated_at` is an RFC 3339 timestamp supplied by the caller rather
/// than read from the wall clock here, keeping this builder a pure function
/// of its inputs (manifest determinism, same as emission itself).
pub struct ManifestBuilder;

impl ManifestBuilder {
    pub fn build(
        rules: &[RuleIR],
        analysis: &Analysis,
        rendered: &RenderedUnit,
        generated_at: impl Into<String>,
    ) -> Manifest {
        let files = rendered
            .files
            .iter()
            .map(|f| ManifestFile { name: f.name.clone(), sha256_base64: hash_content(&f.text) })
            .collect();

        let mut manifest_rules = HashMap::with_capacity(rules.len());
        for rule in rules {
            let (emitted_file, placement) = rendered
                .placements
                .get(&rule.name)
                .cloned()
                .unwrap_or_else(|| (String::new(), RulePlacement { start_line: 0, end_line: 0 }));

            let mut input_sensors: HashSet<String> = HashSet::new();
            if let Some(group) = &rule.conditions {
                ir::visit_referenced_sensors(group, |s| {
                    input_sensors.insert(s.to_string());
                });
                ir::visit_expression_identifiers(group, |s| {
                    input_sensors.insert(s.to_string());
                });
            }
            for action in &rule.actions {
                if let Action::SetValue { expr: Some(e), .. } = action {
                    for ident in crate::rewriter::lex_identifiers(e) {
                        input_sensors.insert(ident.to_string());
                    }
                }
            }
            let mut input_sensors: Vec<String> = input_sensors.into_iter().collect();
            input_sensors.sort();

            let mut output_sensors: Vec<String> = rule.produced_keys().map(str::to_string).collect();
            output_sensors.sort();

            manifest_rules.insert(
                rule.name.clone(),
                ManifestRule {
                    source_file: rule.source.file.clone(),
                    source_line: rule.source.line,
                    emitted_file,
                    start_line: placement.start_line,
                    end_line: placement.end_line,
                    dependencies: analysis.deps_of.get(&rule.name).cloned().unwrap_or_default(),
                    layer: analysis.layer_of.get(&rule.name).copied().unwrap_or(0),
                    input_sensors,
                    output_sensors,
                    uses_temporal: rule.uses_temporal(),
                },
            );
        }

        Manifest { schema_version: SCHEMA_VERSION, generated_at: generated_at.into(), files, rules: manifest_rules }
    }
}

fn hash_content(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    BASE64.encode(digest)
}
