//! `clap`-derived CLI surface for the `pulsar` compiler driver.
//!
//! Argument parsing and flag definitions live here; `main.rs` owns process
//! setup (logging init, exit codes) and calls into [`crate::compile`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pulsar", version, about = "Rule-compilation core for a polling sensor-telemetry rules engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a `pulsar.toml` configuration file. Still overridable by
    /// `PULSAR_`-prefixed environment variables.
    #[arg(long, global = true)]
    pub tool_config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile a rules document into a layered evaluation artifact.
    Compile {
        /// Path to the rules YAML document.
        #[arg(long)]
        rules: PathBuf,

        /// Path to the system config YAML (sensor whitelist).
        #[arg(long)]
        config: PathBuf,

        /// Output directory for emitted source files and the manifest.
        #[arg(long)]
        output: PathBuf,

        /// Maximum rule blocks packed into one emitted file. Defaults to the
        /// tool configuration's `emit.group_size`.
        #[arg(long)]
        group_size: Option<usize>,

        /// Log output format, overriding the tool configuration.
        #[arg(long, value_enum)]
        log_format: Option<LogFormat>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
