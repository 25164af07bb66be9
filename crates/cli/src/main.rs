//! Testdeck CLI - Main Entry Point
//!
//! Runs the harness server, multi-suite batches, the recorder and the
//! report tooling from one binary.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use testdeck_common::HarnessConfig;

mod commands;
mod output;

use commands::{batch, dashboard, record, report, serve, status};

/// Testdeck - end-to-end test orchestration and live reporting
#[derive(Parser)]
#[command(name = "testdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, default_value = "testdeck.toml", env = "TESTDECK_CONFIG", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control surface and live push channel
    Serve(serve::ServeArgs),

    /// Run all configured suites in sequence
    Batch(batch::BatchArgs),

    /// Regenerate the dashboard page from the last summary
    Dashboard(dashboard::DashboardArgs),

    /// Print counts from the latest HTML report
    Report(report::ReportArgs),

    /// Launch the interactive test recorder
    Record(record::RecordArgs),

    /// Query a running server
    Status(status::StatusArgs),

    /// Show version information
    Version,
}

fn load_config(path: &std::path::Path) -> anyhow::Result<HarnessConfig> {
    let config = HarnessConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?
        .apply_env()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve(args) => serve::execute(args, load_config(&cli.config)?).await?,
        Commands::Batch(args) => {
            let code = batch::execute(args, load_config(&cli.config)?, cli.format).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Dashboard(args) => dashboard::execute(args, load_config(&cli.config)?).await?,
        Commands::Report(args) => {
            report::execute(args, load_config(&cli.config)?, cli.format).await?
        }
        Commands::Record(args) => {
            record::execute(args, load_config(&cli.config)?, cli.format).await?
        }
        Commands::Status(args) => status::execute(args, cli.format).await?,
        Commands::Version => {
            println!("Testdeck v{}", testdeck_common::VERSION);
        }
    }

    Ok(())
}
