//! Result parsing
//!
//! Turns engine output into pass/fail/skip counts. Free-text output is
//! matched heuristically through an [`OutputInterpreter`], so a different
//! engine or output format only needs a new interpreter. A structured JSON
//! result file, when present, gives exact per-test counts instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use testdeck_common::{Result, RunBanner, RunStatus, RunSummary, TestEvent, TestFailure};
use tracing::debug;

static PASSED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+passed\b").expect("invalid passed regex"));
static FAILED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+failed\b").expect("invalid failed regex"));
static SKIPPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+skipped\b").expect("invalid skipped regex"));
static NO_TESTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)no tests found").expect("invalid no-tests regex"));
static BANNER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)running\s+(\d+)\s+tests?\s+using\s+(\d+)\s+workers?")
        .expect("invalid banner regex")
});
// List reporter: "  ✓  3 [chromium] › login.spec.ts:12:5 › logs in (1.4s)"
static TEST_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(✓|✔|✘|×|✗|-)\s+(?:\d+\s+)?(.+›.+?)(?:\s+\((\d+(?:\.\d+)?)(ms|s|m)\))?\s*$")
        .expect("invalid test line regex")
});
static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("invalid ansi regex"));
static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|template)\b[^>]*>.*?</(script|style|template)>")
        .expect("invalid script regex")
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("invalid tag regex"));

/// Interprets free-text engine output
pub trait OutputInterpreter: Send + Sync {
    fn name(&self) -> &str;

    /// Pass/fail/skip counts; a category with no matching phrase counts zero.
    fn counts(&self, output: &str) -> RunSummary;

    /// Whether the engine reported that it found nothing to run.
    fn no_tests_found(&self, output: &str) -> bool;

    /// Per-test completion carried by a single output line.
    fn test_event(&self, _line: &str) -> Option<TestEvent> {
        None
    }

    /// Start-of-run banner carried by a single output line.
    fn run_banner(&self, _line: &str) -> Option<RunBanner> {
        None
    }
}

/// Matches "<N> passed", "<N> failed" and "<N> skipped" anywhere in the text
#[derive(Debug, Default, Clone, Copy)]
pub struct PhraseInterpreter;

impl OutputInterpreter for PhraseInterpreter {
    fn name(&self) -> &str {
        "phrase"
    }

    fn counts(&self, output: &str) -> RunSummary {
        let output = strip_ansi(output);
        RunSummary::from_counts(
            first_count(&PASSED_RE, &output),
            first_count(&FAILED_RE, &output),
            first_count(&SKIPPED_RE, &output),
        )
    }

    fn no_tests_found(&self, output: &str) -> bool {
        NO_TESTS_RE.is_match(output)
    }
}

/// Phrase matching plus Playwright list-reporter progress lines
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaywrightInterpreter;

impl OutputInterpreter for PlaywrightInterpreter {
    fn name(&self) -> &str {
        "playwright"
    }

    fn counts(&self, output: &str) -> RunSummary {
        PhraseInterpreter.counts(output)
    }

    fn no_tests_found(&self, output: &str) -> bool {
        PhraseInterpreter.no_tests_found(output)
    }

    fn test_event(&self, line: &str) -> Option<TestEvent> {
        let line = strip_ansi(line);
        let caps = TEST_LINE_RE.captures(&line)?;
        let status = match &caps[1] {
            "✓" | "✔" => RunStatus::Passed,
            "-" => RunStatus::Skipped,
            _ => RunStatus::Failed,
        };
        let duration_ms = match (caps.get(3), caps.get(4)) {
            (Some(value), Some(unit)) => parse_duration_ms(value.as_str(), unit.as_str()),
            _ => None,
        };
        Some(TestEvent {
            title: caps[2].trim().to_string(),
            status,
            duration_ms,
        })
    }

    fn run_banner(&self, line: &str) -> Option<RunBanner> {
        let caps = BANNER_RE.captures(line)?;
        Some(RunBanner {
            expected: caps[1].parse().ok()?,
            workers: caps[2].parse().ok()?,
        })
    }
}

/// Look up an interpreter by name; unknown names get the Playwright one.
pub fn interpreter_for(name: &str) -> Arc<dyn OutputInterpreter> {
    match name.to_ascii_lowercase().as_str() {
        "phrase" | "generic" => Arc::new(PhraseInterpreter),
        "playwright" => Arc::new(PlaywrightInterpreter),
        other => {
            debug!("Unknown interpreter '{}', using playwright", other);
            Arc::new(PlaywrightInterpreter)
        }
    }
}

/// Count results from a previously generated static HTML report.
pub fn parse_html_report(path: &Path, interpreter: &dyn OutputInterpreter) -> Result<RunSummary> {
    let html = std::fs::read_to_string(path)?;
    Ok(interpreter.counts(&html_to_text(&html)))
}

/// Reduce an HTML document to its visible text.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&without_scripts, " ");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

fn first_count(re: &Regex, text: &str) -> u32 {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn parse_duration_ms(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let ms = match unit {
        "ms" => value,
        "s" => value * 1000.0,
        "m" => value * 60_000.0,
        _ => return None,
    };
    Some(ms.round() as u64)
}

// ============================================================================
// Structured JSON result file
// ============================================================================

/// Exact counts and failure details from a JSON result file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonReport {
    pub summary: RunSummary,
    pub failures: Vec<TestFailure>,
}

#[derive(Debug, Deserialize)]
struct ReportFile {
    #[serde(default)]
    suites: Vec<ReportSuite>,
}

#[derive(Debug, Deserialize)]
struct ReportSuite {
    #[serde(default)]
    title: String,
    #[serde(default)]
    specs: Vec<ReportSpec>,
    #[serde(default)]
    suites: Vec<ReportSuite>,
}

#[derive(Debug, Deserialize)]
struct ReportSpec {
    #[serde(default)]
    title: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    tests: Vec<ReportTest>,
}

#[derive(Debug, Deserialize)]
struct ReportTest {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "projectName")]
    project_name: Option<String>,
    #[serde(default)]
    results: Vec<ReportResult>,
}

#[derive(Debug, Deserialize)]
struct ReportResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<ReportError>,
    #[serde(default)]
    errors: Vec<ReportError>,
}

#[derive(Debug, Deserialize)]
struct ReportError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Default)]
struct Tally {
    passed: u32,
    failed: u32,
    skipped: u32,
    failures: Vec<TestFailure>,
}

/// Parse a JSON result file written by the engine's JSON reporter.
pub fn parse_json_report(path: &Path) -> Result<JsonReport> {
    let content = std::fs::read_to_string(path)?;
    parse_json_report_str(&content)
}

pub fn parse_json_report_str(content: &str) -> Result<JsonReport> {
    let report: ReportFile = serde_json::from_str(content)?;
    let mut tally = Tally::default();
    let mut path = Vec::new();
    for suite in &report.suites {
        walk_suite(suite, &mut path, &mut tally);
    }
    Ok(JsonReport {
        summary: RunSummary::from_counts(tally.passed, tally.failed, tally.skipped),
        failures: tally.failures,
    })
}

fn walk_suite<'a>(suite: &'a ReportSuite, path: &mut Vec<&'a str>, tally: &mut Tally) {
    if !suite.title.is_empty() {
        path.push(&suite.title);
    }
    for spec in &suite.specs {
        for test in &spec.tests {
            match test_outcome(test) {
                RunStatus::Passed => tally.passed += 1,
                RunStatus::Skipped => tally.skipped += 1,
                _ => {
                    tally.failed += 1;
                    tally.failures.push(failure_detail(path, spec, test));
                }
            }
        }
    }
    for child in &suite.suites {
        walk_suite(child, path, tally);
    }
    if !suite.title.is_empty() {
        path.pop();
    }
}

fn test_outcome(test: &ReportTest) -> RunStatus {
    let status = test
        .status
        .as_deref()
        .or_else(|| test.results.last().and_then(|r| r.status.as_deref()))
        .unwrap_or("skipped");
    match status {
        "expected" | "passed" | "flaky" => RunStatus::Passed,
        "skipped" => RunStatus::Skipped,
        _ => RunStatus::Failed,
    }
}

fn failure_detail(path: &[&str], spec: &ReportSpec, test: &ReportTest) -> TestFailure {
    let mut title: Vec<&str> = path.to_vec();
    if let Some(project) = test.project_name.as_deref().filter(|p| !p.is_empty()) {
        title.insert(0, project);
    }
    title.push(&spec.title);

    let message = test
        .results
        .iter()
        .rev()
        .find_map(|r| {
            r.error
                .as_ref()
                .and_then(|e| e.message.clone())
                .or_else(|| r.errors.iter().find_map(|e| e.message.clone()))
        })
        .map(|m| strip_ansi(&m))
        .unwrap_or_else(|| "test failed".to_string());

    TestFailure {
        title: title.join(" › "),
        file: spec.file.clone(),
        line: spec.line,
        message,
    }
}
