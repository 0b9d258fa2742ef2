//! # Pulsar
//!
//! Rule-compilation core for a polling sensor-telemetry rules engine: a
//! YAML DSL loader, a dependency/layer analyzer, a layered code generator
//! with a sidecar manifest, and the temporal ring-buffer subsystem that
//! backs `threshold_over_time` conditions at runtime.
//!
//! ## Pipeline
//!
//! ```text
//! rules.yaml + system_config.yaml
//!     |
//!     v
//! [DslLoader]            -> RuleIR[]            (dsl::loader)
//!     |
//!     v
//! [DependencyAnalyzer]   -> layer_of, deps_of    (analyzer)
//!     |
//!     v
//! [CodeEmitter]          -> emitted files        (emitter)
//!     |
//!     v
//! [ManifestBuilder]      -> sidecar JSON         (manifest)
//! ```
//!
//! At runtime, a driver (see [`runtime`]) pushes sensor samples into a
//! [`buffer::BufferManager`], invokes the compiled coordinator's
//! `evaluate(inputs, outputs, buffers)`, and publishes the resulting
//! outputs. This crate does not invoke the native-code toolchain that
//! consumes the emitted source — it only produces it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pulsar::{compile, CompileOptions, SensorCatalog};
//!
//! let catalog = SensorCatalog::load("system_config.yaml")?;
//! let rules_text = std::fs::read_to_string("rules.yaml")?;
//! let outcome = compile(&rules_text, &catalog, "rules.yaml", CompileOptions::default())?;
//! outcome.write_to_dir("target/pulsar-out")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analyzer;
pub mod buffer;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dsl;
pub mod emitter;
pub mod error;
pub mod manifest;
pub mod rewriter;
pub mod runtime;
pub mod sensor_catalog;

pub use analyzer::{Analysis, DependencyAnalyzer};
pub use buffer::{BufferManager, RingBuffer, DEFAULT_CAPACITY};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use dsl::{
    Action, ComparisonOp, Condition, ConditionGroup, DslLoader, RuleIR, Source, ThresholdDirection,
    ThresholdMode,
};
pub use emitter::{RenderedFile, RenderedUnit};
pub use error::{PulsarError, PulsarResult, SourceLocation};
pub use manifest::{Manifest, ManifestBuilder};
pub use sensor_catalog::SensorCatalog;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Tunables for a single [`compile`] invocation, distinct from the tool-level
/// [`Config`] the CLI loads from `pulsar.toml` — callers embedding this crate
/// as a library pass these directly rather than through a config file.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub group_size: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { group_size: 50 }
    }
}

impl From<&config::EmitConfig> for CompileOptions {
    fn from(emit: &config::EmitConfig) -> Self {
        CompileOptions { group_size: emit.group_size }
    }
}

/// Everything one [`compile`] call produced: the emitted files and the
/// manifest describing them. Kept in memory so callers can inspect or hash
/// the result before deciding to write anything — writing is a separate,
/// explicit step ([`Self::write_to_dir`]).
#[derive(Debug)]
pub struct CompileOutcome {
    pub rendered: RenderedUnit,
    pub manifest: Manifest,
}

impl CompileOutcome {
    /// Writes every emitted file plus `manifest.json` into `output_dir`.
    ///
    /// No partial artifact is ever written: files are first written into a
    /// sibling staging directory and the whole directory is renamed into
    /// place atomically on success; a failure partway through leaves
    /// `output_dir` untouched (Decision D5).
    pub fn write_to_dir(&self, output_dir: impl AsRef<Path>) -> PulsarResult<()> {
        let output_dir = output_dir.as_ref();
        let staging = staging_dir_for(output_dir);

        std::fs::create_dir_all(&staging).map_err(|e| PulsarError::io(&staging, e))?;
        for file in &self.rendered.files {
            let path = staging.join(&file.name);
            std::fs::write(&path, &file.text).map_err(|e| PulsarError::io(&path, e))?;
        }
        let manifest_path = staging.join("manifest.json");
        std::fs::write(&manifest_path, self.manifest.to_json_pretty()?)
            .map_err(|e| PulsarError::io(&manifest_path, e))?;

        if output_dir.exists() {
            std::fs::remove_dir_all(output_dir).map_err(|e| PulsarError::io(output_dir, e))?;
        }
        std::fs::rename(&staging, output_dir).map_err(|e| PulsarError::io(output_dir, e))?;
        Ok(())
    }
}

fn staging_dir_for(output_dir: &Path) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = output_dir.file_name().and_then(|n| n.to_str()).unwrap_or("pulsar-out");
    let parent = output_dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{file_name}.staging-{nanos}"))
}

/// Runs the full compilation pipeline — load, analyze, emit, build manifest
/// — over one compilation unit. `generated_at` in the returned manifest is
/// stamped with the current UTC time via `chrono`.
pub fn compile(
    rules_text: &str,
    catalog: &SensorCatalog,
    source_name: impl Into<String>,
    options: CompileOptions,
) -> PulsarResult<CompileOutcome> {
    let source_name = source_name.into();
    let loader = DslLoader::new(catalog, source_name);
    let rules = loader.load(rules_text)?;

    let analysis = DependencyAnalyzer::analyze(&rules)?;
    let producer_index: HashSet<String> = rules.iter().flat_map(RuleIR::produced_keys).map(str::to_string).collect();

    let rendered = emitter::emit(&rules, &analysis, &producer_index, options.group_size)?;
    let generated_at = chrono::Utc::now().to_rfc3339();
    let manifest = ManifestBuilder::build(&rules, &analysis, &rendered, generated_at);

    Ok(CompileOutcome { rendered, manifest })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SensorCatalog {
        SensorCatalog::new(["temperature", "alert"].map(String::from))
    }

    const RULES_YAML: &str = r#"
rules:
  - name: A
    conditions:
      all:
        - condition: { type: comparison, sensor: temperature, op: ">", value: 100 }
    actions:
      - set_value: { key: alert, value: 1 }
"#;

    #[test]
    fn compile_produces_a_coordinator_and_a_manifest_entry() {
        let outcome = compile(RULES_YAML, &catalog(), "rules.yaml", CompileOptions::default()).unwrap();
        assert!(outcome.rendered.files.iter().any(|f| f.name == "coordinator.rs"));
        assert!(outcome.manifest.rules.contains_key("A"));
    }

    #[test]
    fn compile_is_deterministic_across_runs() {
        let a = compile(RULES_YAML, &catalog(), "rules.yaml", CompileOptions::default()).unwrap();
        let b = compile(RULES_YAML, &catalog(), "rules.yaml", CompileOptions::default()).unwrap();
        let a_text: Vec<_> = a.rendered.files.iter().map(|f| f.text.clone()).collect();
        let b_text: Vec<_> = b.rendered.files.iter().map(|f| f.text.clone()).collect();
        assert_eq!(a_text, b_text);
    }

    #[test]
    fn write_to_dir_round_trips_files_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let outcome = compile(RULES_YAML, &catalog(), "rules.yaml", CompileOptions::default()).unwrap();
        outcome.write_to_dir(&output).unwrap();

        assert!(output.join("coordinator.rs").exists());
        assert!(output.join("manifest.json").exists());
    }

    #[test]
    fn unknown_sensor_fails_before_any_emission() {
        let yaml = r#"
rules:
  - name: A
    conditions:
      all:
        - condition: { type: comparison, sensor: unknown_sensor, op: ">", value: 1 }
    actions: []
"#;
        let err = compile(yaml, &catalog(), "rules.yaml", CompileOptions::default()).unwrap_err();
        assert!(matches!(err, PulsarError::Catalog { .. }));
    }
}
