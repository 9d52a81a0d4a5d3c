//! Pulse command-line interface.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use pulse_core::{Orchestrator, Profile, PulseConfig};
use pulse_proto::AgentRequest;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "pulse.yml";

/// Pulse - resilient invocation layer for news sentiment agents
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ./pulse.yml when present)
    #[arg(short, long, global = true, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Configuration profile (development, testing, staging, production)
    #[arg(long, global = true, env = "PULSE_PROFILE")]
    profile: Option<Profile>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one analysis through the agent and print the validated result as JSON
    Analyze(AnalyzeArgs),

    /// Print the effective configuration and any validation warnings
    Config,
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("prompt_source").required(true).args(["prompt", "prompt_file"])))]
struct AnalyzeArgs {
    /// Inline prompt text
    #[arg(short, long)]
    prompt: Option<String>,

    /// Read the prompt from a file
    #[arg(short = 'P', long)]
    prompt_file: Option<PathBuf>,

    /// Where the raw agent output is written
    #[arg(short, long)]
    output: PathBuf,

    /// File piped to the agent's stdin (small prompts only)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Print Prometheus metrics and the health report to stderr afterwards
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref(), cli.profile)?;

    match cli.command {
        Commands::Analyze(args) => analyze_command(&config, args).await,
        Commands::Config => config_command(&config),
    }
}

fn load_config(path: Option<&Path>, profile: Option<Profile>) -> Result<PulseConfig> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let config = match &path {
        Some(path) => PulseConfig::from_file(path, profile)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => profile.map_or_else(PulseConfig::default, Profile::config),
    };

    debug!(
        config = ?path,
        profile = ?config.profile,
        agent = %config.agent.command,
        "Configuration loaded"
    );
    Ok(config)
}

async fn analyze_command(config: &PulseConfig, args: AnalyzeArgs) -> Result<()> {
    let prompt = match (args.prompt, &args.prompt_file) {
        (Some(prompt), _) => prompt,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?,
        (None, None) => anyhow::bail!("Either --prompt or --prompt-file is required"),
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    let mut request = AgentRequest::new(prompt, args.output);
    if let Some(input) = args.input {
        request = request.with_input_file(input);
    }

    let orchestrator = Orchestrator::from_config(config).context("Invalid configuration")?;
    info!(
        agent = %config.agent.command,
        output = %request.output_file().display(),
        "Starting analysis"
    );

    let outcome = orchestrator.invoke(&request).await;

    if args.metrics {
        eprintln!("{}", orchestrator.prometheus());
        let health = orchestrator.health();
        eprintln!("health: {} (score {})", health.status, health.score);
        for issue in &health.issues {
            eprintln!("  issue: {issue}");
        }
        for recommendation in &health.recommendations {
            eprintln!("  recommendation: {recommendation}");
        }
        for alert in orchestrator.alerts() {
            eprintln!("alert [{}] {}: {}", alert.severity, alert.rule, alert.message);
        }
    }

    let result = outcome.context("Analysis failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn config_command(config: &PulseConfig) -> Result<()> {
    print!("{}", config.to_yaml()?);

    let warnings = config.validate().context("Configuration is invalid")?;
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analyze_requires_a_prompt_source() {
        let err = Cli::try_parse_from(["pulse", "analyze", "--output", "out.json"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let conflict = Cli::try_parse_from([
            "pulse",
            "analyze",
            "--prompt",
            "x",
            "--prompt-file",
            "p.txt",
            "--output",
            "out.json",
        ]);
        assert!(conflict.is_err());
    }

    #[test]
    fn test_profile_flag_parses() {
        let cli = Cli::try_parse_from(["pulse", "--profile", "prod", "config"]).unwrap();
        assert_eq!(cli.profile, Some(Profile::Production));
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_load_config_without_file_uses_profile() {
        let config = load_config(None, Some(Profile::Testing)).unwrap();
        assert_eq!(config.timeout_ms, 5_000);
    }
}
