//! Tool-level configuration for the `pulsar` binary.
//!
//! Distinct from the domain YAML documents (system config, rules) the
//! compiler reads as *input* — this is the compiler's own settings, loaded
//! from:
//! - `pulsar.toml` (base configuration)
//! - `pulsar.local.toml` (git-ignored local overrides)
//! - Environment variables (`PULSAR_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # pulsar.toml
//! [emit]
//! group_size = 50
//!
//! [runtime]
//! cycle_time_ms = 100
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! PULSAR_EMIT__GROUP_SIZE=100
//! PULSAR_RUNTIME__CYCLE_TIME_MS=50
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub emit: EmitConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Code generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitConfig {
    /// Maximum rule blocks packed into one emitted file.
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Ring buffer capacity for every sensor's history, unless a rule
    /// overrides it.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

/// Runtime driver settings (reference harness, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How often the driver ticks, in milliseconds.
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// How often an overrun warning may be logged, in milliseconds.
    #[serde(default = "default_overrun_warning_floor_ms")]
    pub overrun_warning_floor_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_group_size() -> usize {
    50
}
fn default_buffer_capacity() -> usize {
    crate::buffer::DEFAULT_CAPACITY
}
fn default_cycle_time_ms() -> u64 {
    100
}
fn default_overrun_warning_floor_ms() -> u64 {
    60_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Merges, in order: `pulsar.toml`, `pulsar.local.toml`, then
    /// `PULSAR_*` environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("pulsar.toml"))
            .merge(Toml::file("pulsar.local.toml"))
            .merge(Env::prefixed("PULSAR_").split("__"))
            .extract()
    }

    /// Load from a specific file path, still honoring environment overrides.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::file(path)).merge(Env::prefixed("PULSAR_").split("__")).extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { emit: EmitConfig::default(), runtime: RuntimeConfig::default(), logging: LoggingConfig::default() }
    }
}

impl Default for EmitConfig {
    fn default() -> Self {
        EmitConfig { group_size: default_group_size(), buffer_capacity: default_buffer_capacity() }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            cycle_time_ms: default_cycle_time_ms(),
            overrun_warning_floor_ms: default_overrun_warning_floor_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}
