//! Status Command
//!
//! Queries a running server over HTTP.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use testdeck_common::RunState;

use crate::output::{print_item, run_status_label, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct StatusArgs {
    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:3001", env = "TESTDECK_ADDR")]
    pub addr: String,
}

#[derive(Serialize, Deserialize)]
struct StatusView {
    #[serde(flatten)]
    state: RunState,
    #[serde(default)]
    observers: usize,
}

impl TableDisplay for StatusView {
    fn headers() -> Vec<&'static str> {
        vec!["Run", "Status", "Trigger", "Total", "Passed", "Failed", "Skipped", "Observers"]
    }

    fn row(&self) -> Vec<String> {
        let summary = &self.state.summary;
        vec![
            self.state.id.clone().unwrap_or_else(|| "-".to_string()),
            run_status_label(self.state.status),
            self.state.trigger.clone().unwrap_or_else(|| "-".to_string()),
            summary.total().to_string(),
            summary.passed().to_string(),
            summary.failed().to_string(),
            summary.skipped().to_string(),
            self.observers.to_string(),
        ]
    }
}

pub async fn execute(args: StatusArgs, format: OutputFormat) -> Result<()> {
    let url = format!("{}/status", args.addr.trim_end_matches('/'));
    let view: StatusView = reqwest::get(&url)
        .await
        .with_context(|| format!("cannot reach {}", url))?
        .error_for_status()?
        .json()
        .await?;

    print_item(&view, format);
    if !matches!(format, OutputFormat::Table) {
        return Ok(());
    }
    if let Some(last) = view.state.logs.last() {
        println!("  last log [{}] {}", last.level, last.message);
    }
    Ok(())
}
