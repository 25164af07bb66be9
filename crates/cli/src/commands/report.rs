//! Report Command
//!
//! Re-reads the latest static HTML report and prints its counts.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use testdeck_common::HarnessConfig;
use testdeck_harness::{archive, interpreter_for, parser};

use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ReportArgs {
    /// HTML report to parse (defaults to the newest index.html under the reports directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Serialize)]
struct ReportCounts {
    report: String,
    total: u32,
    passed: u32,
    failed: u32,
    skipped: u32,
}

impl TableDisplay for ReportCounts {
    fn headers() -> Vec<&'static str> {
        vec!["Report", "Total", "Passed", "Failed", "Skipped"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.report.clone(),
            self.total.to_string(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.skipped.to_string(),
        ]
    }
}

pub async fn execute(args: ReportArgs, config: HarnessConfig, format: OutputFormat) -> Result<()> {
    let path = match args.path {
        Some(path) => path,
        None => archive::latest_html_report(&config.paths.reports_dir).with_context(|| {
            format!(
                "no index.html found under {}",
                config.paths.reports_dir.display()
            )
        })?,
    };

    let interpreter = interpreter_for(&config.engine.interpreter);
    let summary = parser::parse_html_report(&path, interpreter.as_ref())?;

    print_item(
        &ReportCounts {
            report: path.display().to_string(),
            total: summary.total(),
            passed: summary.passed(),
            failed: summary.failed(),
            skipped: summary.skipped(),
        },
        format,
    );
    Ok(())
}
