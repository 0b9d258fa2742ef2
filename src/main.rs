//! `pulsar` CLI binary: the rule-compilation driver.
//!
//! ```bash
//! pulsar compile --rules rules.yaml --config system_config.yaml --output target/pulsar-out
//! ```

use std::process::ExitCode;

use clap::Parser;
use pulsar::cli::{Cli, Command, LogFormat};
use pulsar::{compile, CompileOptions, SensorCatalog};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.tool_config {
        Some(path) => pulsar::Config::from_file(&path.display().to_string()).unwrap_or_default(),
        None => pulsar::Config::load().unwrap_or_default(),
    };

    init_logging(&config, &cli);

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: &pulsar::Config) -> Result<(), String> {
    match cli.command {
        Command::Compile { rules, config: config_path, output, group_size, log_format: _ } => {
            let catalog = SensorCatalog::load(&config_path)
                .map_err(|e| format!("loading system config {}: {e}", config_path.display()))?;
            let rules_text = std::fs::read_to_string(&rules)
                .map_err(|e| format!("reading rules file {}: {e}", rules.display()))?;

            let options = CompileOptions { group_size: group_size.unwrap_or(config.emit.group_size) };
            let source_name = rules.display().to_string();

            let outcome = compile(&rules_text, &catalog, source_name, options)
                .map_err(|e| e.to_string())?;

            outcome.write_to_dir(&output).map_err(|e| e.to_string())?;

            tracing::info!(
                output = %output.display(),
                rules = outcome.manifest.rules.len(),
                files = outcome.manifest.files.len(),
                "compilation succeeded",
            );
            Ok(())
        }
    }
}

fn init_logging(config: &pulsar::Config, cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let format = match &cli.command {
        Command::Compile { log_format: Some(LogFormat::Json), .. } => "json",
        Command::Compile { log_format: Some(LogFormat::Text), .. } => "text",
        _ => config.logging.format.as_str(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    let subscriber = fmt().with_env_filter(filter);
    if format == "json" {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
