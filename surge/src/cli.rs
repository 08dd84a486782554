use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

fn parse_header(input: &str) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{input}' (expected NAME:VALUE)"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid header '{input}' (empty NAME)"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary line to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Scenario-driven HTTP load generator",
    long_about = "surge runs HTTP load scenarios described in a YAML document.\n\nEach scenario picks an executor (constant-vus, ramping-vus or ramping-arrival-rate) and a named workload. Metrics are collected per scenario and judged against thresholds at the end of the run.",
    after_help = "Examples:\n  surge run demos/event_gateway.yaml\n  surge run demos/event_gateway.yaml --base-url http://localhost:9080 --api-key secret\n  surge run demos/sustained_load.yaml --output json --summary-out results/summary.json\n  surge validate demos/event_gateway.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a scenario document
    #[command(
        long_about = "Run every scenario of a YAML document at its start offset, then report metrics and threshold verdicts.\n\nExit codes: 0 pass, 11 thresholds failed, 12 thresholds undetermined, 13 scenario failed, 30 invalid input, 40 runtime error."
    )]
    Run(RunArgs),

    /// Parse and validate a scenario document without sending any request
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the scenario document (.yaml)
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario document (.yaml)
    pub file: PathBuf,

    /// Base URL that workload paths are resolved against
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// API key sent as `X-API-Key` with every request
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Extra header for every request (repeatable, NAME:VALUE)
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON summary to this file
    #[arg(long, value_name = "PATH")]
    pub summary_out: Option<PathBuf>,

    /// Log filter (e.g. info, surge_core=debug). Defaults to RUST_LOG, then warn.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}
