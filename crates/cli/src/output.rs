//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use testdeck_common::{BatchSummary, RunStatus, SuiteResult, SuiteStatus};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> bool {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
            true
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value).unwrap_or_default());
            true
        }
        OutputFormat::Table => false,
    }
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    if print_serialized(item, format) {
        return;
    }
    let mut table = new_table();
    table.set_header(T::headers());
    table.add_row(item.row());
    println!("{table}");
}

fn suite_color(status: SuiteStatus) -> Color {
    match status {
        SuiteStatus::Passed => Color::Green,
        SuiteStatus::Failed => Color::Red,
        SuiteStatus::Error => Color::Yellow,
    }
}

pub fn run_status_label(status: RunStatus) -> String {
    let label = status.to_string();
    match status {
        RunStatus::Passed | RunStatus::Completed => label.green().to_string(),
        RunStatus::Failed => label.red().to_string(),
        RunStatus::Running => label.cyan().to_string(),
        RunStatus::Skipped => label.yellow().to_string(),
        RunStatus::Idle => label.dimmed().to_string(),
    }
}

fn seconds(ms: u64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

fn suite_row(result: &SuiteResult) -> Vec<Cell> {
    vec![
        Cell::new(&result.display_name),
        Cell::new(result.status).fg(suite_color(result.status)),
        Cell::new(result.passed),
        Cell::new(result.failed),
        Cell::new(result.skipped),
        Cell::new(seconds(result.duration_ms)),
    ]
}

/// Render the batch table with a totals row
pub fn summary_table(summary: &BatchSummary) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Suite", "Status", "Passed", "Failed", "Skipped", "Duration"]);
    for result in &summary.results {
        table.add_row(suite_row(result));
    }
    let totals = &summary.totals;
    table.add_row(vec![
        Cell::new("Total"),
        Cell::new(""),
        Cell::new(totals.passed),
        Cell::new(totals.failed),
        Cell::new(totals.skipped),
        Cell::new(seconds(totals.duration)),
    ]);
    table
}

/// Print the outcome of a batch
pub fn print_summary(summary: &BatchSummary, format: OutputFormat) {
    if print_serialized(summary, format) {
        return;
    }

    println!("{}", summary_table(summary));
    for result in &summary.results {
        if let Some(error) = &result.error {
            print_error(&format!("{}: {}", result.display_name, error));
        }
        for failure in &result.failures {
            println!("  {} {}", "✘".red(), failure.title.bold());
            for line in failure.message.lines().take(5) {
                println!("      {}", line.dimmed());
            }
        }
    }

    if summary.all_passed() {
        print_success("All suites passed");
    } else {
        let failing = summary
            .results
            .iter()
            .filter(|r| r.status != SuiteStatus::Passed)
            .count();
        print_error(&format!("{} of {} suite(s) did not pass", failing, summary.results.len()));
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}
