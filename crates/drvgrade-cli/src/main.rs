//! drvgrade - automated evaluation of kernel driver submissions
//!
//! ## Commands
//!
//! - `evaluate`: compile, load, probe and score one driver source file
//! - `config`: print the effective configuration as JSON
//! - `report`: re-render a saved results file as text

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use drvgrade_core::{init_tracing, EvaluationRecord, EvaluatorConfig, ScoreLog};
use drvgrade_pipeline::EvaluationPipeline;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "drvgrade")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate and score kernel driver submissions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Also append JSON log lines, tagged with the run id, to this file
    #[arg(long, global = true, env = "DRVGRADE_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one driver source file
    Evaluate(EvaluateArgs),

    /// Print the effective configuration as JSON
    Config {
        /// Configuration file to merge over the defaults
        #[arg(short, long, env = "DRVGRADE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Render a saved `<stem>_results.json` as a text report
    Report {
        /// Results file written by `evaluate`
        path: PathBuf,
    },
}

#[derive(Args)]
struct EvaluateArgs {
    /// Driver source file (.c)
    source: PathBuf,

    /// Configuration file (JSON); missing fields take defaults
    #[arg(short, long, env = "DRVGRADE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the results JSON
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// CSV score log to append to
    #[arg(long)]
    score_log: Option<PathBuf>,

    /// Kernel build directory used for privileged builds
    #[arg(long)]
    kernel_build_dir: Option<PathBuf>,

    /// Skip the build/load/unload stage and dynamic probes
    #[arg(long)]
    skip_runtime: bool,

    /// Concurrency probe worker count
    #[arg(long)]
    threads: Option<usize>,

    /// Writes per concurrency worker
    #[arg(long)]
    iterations: Option<usize>,

    /// Control code to issue (decimal or 0x-prefixed hex); repeatable
    #[arg(long = "control-code", value_parser = parse_control_code)]
    control_codes: Vec<u64>,

    /// Parameter name expected under the module's parameter directory; repeatable
    #[arg(long = "expect-param")]
    expected_params: Vec<String>,

    /// Do not write the results JSON or append to the score log
    #[arg(long)]
    no_record: bool,

    /// Print the full record as JSON instead of the text report
    #[arg(long)]
    json_report: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level, cli.log_file.as_deref()).context("Failed to open log file")?;

    match cli.command {
        Commands::Evaluate(args) => cmd_evaluate(args).await,
        Commands::Config { config } => cmd_config(config.as_deref()),
        Commands::Report { path } => cmd_report(&path),
    }
}

fn load_config(path: Option<&Path>) -> Result<EvaluatorConfig> {
    match path {
        Some(path) => EvaluatorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(EvaluatorConfig::default()),
    }
}

async fn cmd_evaluate(args: EvaluateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        config.output.output_dir = dir;
    }
    if let Some(path) = args.score_log {
        config.output.score_log = path;
    }
    if let Some(dir) = args.kernel_build_dir {
        config.toolchain.kernel_build_dir = dir;
    }
    if args.skip_runtime {
        config.runtime.enabled = false;
    }
    if let Some(threads) = args.threads {
        config.harness.threads = threads;
    }
    if let Some(iterations) = args.iterations {
        config.harness.iterations = iterations;
    }
    if !args.control_codes.is_empty() {
        config.harness.control_codes = args.control_codes;
    }
    if !args.expected_params.is_empty() {
        config.harness.expected_params = args.expected_params;
    }

    let pipeline =
        EvaluationPipeline::kernel(config.clone()).context("Invalid evaluator configuration")?;
    let record = pipeline
        .evaluate(&args.source)
        .await
        .with_context(|| format!("Failed to evaluate {}", args.source.display()))?;

    if !args.no_record {
        let path = record
            .write_to_dir(&config.output.output_dir)
            .context("Failed to write results")?;
        ScoreLog::new(&config.output.score_log)
            .append(&record)
            .context("Failed to append to score log")?;
        info!(results = %path.display(), score_log = %config.output.score_log.display(), "results recorded");
    }

    if args.json_report {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print!("{}", record.render_text());
    }
    Ok(())
}

fn cmd_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_report(path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record: EvaluationRecord =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a results file", path.display()))?;
    print!("{}", record.render_text());
    Ok(())
}

fn parse_control_code(raw: &str) -> std::result::Result<u64, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid control code `{raw}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_code() {
        assert_eq!(parse_control_code("42"), Ok(42));
        assert_eq!(parse_control_code("0x8004"), Ok(0x8004));
        assert_eq!(parse_control_code("0XFF"), Ok(255));
        assert!(parse_control_code("0xZZ").is_err());
        assert!(parse_control_code("-1").is_err());
    }

    #[test]
    fn test_cli_parses_evaluate_flags() {
        let cli = Cli::try_parse_from([
            "drvgrade",
            "evaluate",
            "hello.c",
            "--skip-runtime",
            "--control-code",
            "0x10",
            "--control-code",
            "3",
            "--expect-param",
            "debug",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(args.source, PathBuf::from("hello.c"));
        assert!(args.skip_runtime);
        assert_eq!(args.control_codes, vec![16, 3]);
        assert_eq!(args.expected_params, vec!["debug".to_string()]);
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
