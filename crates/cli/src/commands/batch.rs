//! Batch Command
//!
//! Runs every configured suite in sequence, prints the combined result and
//! persists `summary.json` plus the dashboard page.

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use testdeck_common::{BatchSummary, HarnessConfig, SuiteConfig};
use testdeck_harness::{archive, dashboard, interpreter_for, Aggregator, EngineInvoker};
use tracing::info;

use crate::output::{print_summary, OutputFormat};

#[derive(Args)]
pub struct BatchArgs {
    /// YAML file listing suites (defaults to `suites` in the config file)
    #[arg(long)]
    pub suites: Option<PathBuf>,

    /// Only run the named suites
    #[arg(long = "only", value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip writing the dashboard page
    #[arg(long)]
    pub no_dashboard: bool,
}

fn select_suites(all: Vec<SuiteConfig>, only: &[String]) -> Vec<SuiteConfig> {
    if only.is_empty() {
        return all;
    }
    all.into_iter().filter(|s| only.contains(&s.name)).collect()
}

/// Run the batch and return the process exit code.
pub async fn execute(args: BatchArgs, config: HarnessConfig, format: OutputFormat) -> Result<i32> {
    let suites = match &args.suites {
        Some(path) => SuiteConfig::load_all(path)?,
        None => config.suites.clone(),
    };
    let suites = select_suites(suites, &args.only);
    if suites.is_empty() {
        bail!("no suites configured; add [[suites]] to the config file or pass --suites");
    }

    info!("Running {} suite(s)", suites.len());
    let aggregator = Aggregator::new(
        EngineInvoker::new(config.engine.clone()),
        interpreter_for(&config.engine.interpreter),
    );
    let summary = aggregator.run(&suites).await;

    print_summary(&summary, format);
    persist(&summary, &config, !args.no_dashboard)?;

    Ok(summary.exit_code())
}

fn persist(summary: &BatchSummary, config: &HarnessConfig, with_dashboard: bool) -> Result<()> {
    archive::write_summary(&config.paths.summary_file, summary)?;
    if with_dashboard {
        let ws_url = format!("ws://{}/ws", config.listen);
        let html = dashboard::render_dashboard(Some(summary), &ws_url)?;
        let path = &config.paths.dashboard_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, html)?;
        info!("Dashboard written to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite(name: &str) -> SuiteConfig {
        SuiteConfig {
            name: name.to_string(),
            display_name: String::new(),
            config: PathBuf::from(format!("{}.config.ts", name)),
            report_dir: PathBuf::from(name),
            results_file: None,
        }
    }

    #[test]
    fn test_select_suites() {
        let all = vec![suite("admin"), suite("public"), suite("api")];
        assert_eq!(select_suites(all.clone(), &[]).len(), 3);

        let picked = select_suites(all, &["api".to_string(), "admin".to_string()]);
        let names: Vec<_> = picked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["admin", "api"]);
    }

    #[test]
    fn test_persist_writes_summary_and_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::default();
        config.paths.summary_file = dir.path().join("out/summary.json");
        config.paths.dashboard_file = dir.path().join("out/index.html");

        let summary = BatchSummary::new(vec![]);
        persist(&summary, &config, true).unwrap();

        assert!(config.paths.summary_file.exists());
        let html = std::fs::read_to_string(&config.paths.dashboard_file).unwrap();
        assert!(html.contains("ws://127.0.0.1:3001/ws"));
    }
}
