use anyhow::{anyhow, Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod maketest;
mod rules;
mod template;

use config::AppConfig;
use maketest::ScriptGenerator;
use rules::{Rules, Temporal};
use template::FileRenderer;

/// Generate the shell script for a timed ROS test run
#[derive(Debug, Parser)]
#[command(name = "ros_autotest", version)]
struct Cli {
    /// Name of the test, also the script file name
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    name: String,
    /// Directory to write `<name>.sh` into
    #[arg(long)]
    output: Option<PathBuf>,
    /// JSON rules document for the application under test
    #[arg(long)]
    rules: PathBuf,
    /// JSON array of timing overrides; enables custom timing
    #[arg(long)]
    timing: Option<PathBuf>,
    /// TOML configuration file (defaults to the built-in configuration)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Script template, overriding the configured one
    #[arg(long)]
    template: Option<PathBuf>,
    /// Print the rendered script instead of writing it
    #[arg(long)]
    dry_run: bool,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::load_default()?,
    };

    let rules: Rules = read_json(&cli.rules)?;
    let timing: Vec<Temporal> = match &cli.timing {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let is_custom_timing = cli.timing.is_some();

    let template_path = cli.template.unwrap_or(config.generator.template_path);
    let generator = ScriptGenerator::new(template_path, FileRenderer);

    if cli.dry_run {
        let record = maketest::build_record(
            &cli.name,
            &rules,
            is_custom_timing,
            &timing,
            &config.environment,
        )?;
        let script = FileRenderer.render_to_string(&record, generator.template_path())?;
        print!("{}", script);
        return Ok(());
    }

    let output = cli
        .output
        .or(config.generator.output_directory)
        .ok_or_else(|| {
            anyhow!("no output directory: pass --output or set generator.output_directory")
        })?;

    let script = generator
        .generate(&cli.name, &output, &rules, is_custom_timing, &timing, &config.environment)
        .map_err(|e| {
            error!("test {} failed at the {} stage", cli.name, e.stage());
            e
        })?;
    info!("generated test script {} for {}", script.display(), rules.name);

    Ok(())
}
