//! Dashboard Command

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use testdeck_common::{Error, HarnessConfig};
use testdeck_harness::{archive, dashboard};

use crate::output::{print_success, print_warning};

#[derive(Args)]
pub struct DashboardArgs {
    /// Summary file to render (defaults to `paths.summary_file`)
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Output HTML file (defaults to `paths.dashboard_file`)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Push channel URL embedded in the page
    #[arg(long)]
    pub ws_url: Option<String>,
}

pub async fn execute(args: DashboardArgs, config: HarnessConfig) -> Result<()> {
    let summary_path = args.summary.unwrap_or_else(|| config.paths.summary_file.clone());
    let output = args.output.unwrap_or_else(|| config.paths.dashboard_file.clone());
    let ws_url = args
        .ws_url
        .unwrap_or_else(|| format!("ws://{}/ws", config.listen));

    let summary = match archive::read_summary(&summary_path) {
        Ok(summary) => Some(summary),
        Err(Error::NotFound { .. }) => {
            print_warning(&format!(
                "No summary at {}; rendering live output only",
                summary_path.display()
            ));
            None
        }
        Err(e) => return Err(e.into()),
    };

    let html = dashboard::render_dashboard(summary.as_ref(), &ws_url)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, html)?;
    print_success(&format!("Dashboard written to {}", output.display()));
    Ok(())
}
