//! Multi-suite aggregator
//!
//! Runs each configured suite in turn and folds the outcomes into one
//! [`BatchSummary`]. A suite that cannot be run is recorded as `error` and
//! the batch moves on.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use testdeck_common::{
    BatchSummary, EngineConfig, Result, RunSummary, SuiteConfig, SuiteResult, SuiteStatus,
    TestFailure,
};
use tracing::{info, warn};

use crate::engine::EngineCommand;
use crate::parser::{parse_json_report, OutputInterpreter};

/// Output of one suite invocation
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Where the structured result file was written, if one was requested
    pub results_file: Option<PathBuf>,
}

/// Runs a single suite to completion
#[async_trait]
pub trait SuiteInvoker: Send + Sync {
    async fn invoke(&self, suite: &SuiteConfig) -> Result<Invocation>;
}

/// Invokes the configured engine with the suite's config file
pub struct EngineInvoker {
    engine: EngineConfig,
}

impl EngineInvoker {
    pub fn new(engine: EngineConfig) -> Self {
        Self { engine }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.engine.working_dir.join(path)
        }
    }

    pub fn command(&self, suite: &SuiteConfig) -> EngineCommand {
        let mut args = vec![
            "--config".to_string(),
            suite.config.display().to_string(),
        ];
        let report_dir = suite.report_dir.display().to_string();
        let mut env = vec![
            ("PLAYWRIGHT_HTML_REPORT".to_string(), report_dir.clone()),
            ("PLAYWRIGHT_HTML_OUTPUT_DIR".to_string(), report_dir),
            ("PLAYWRIGHT_HTML_OPEN".to_string(), "never".to_string()),
        ];
        if let Some(results) = &suite.results_file {
            args.push("--reporter=list,json,html".to_string());
            env.push((
                "PLAYWRIGHT_JSON_OUTPUT_NAME".to_string(),
                results.display().to_string(),
            ));
        }
        EngineCommand::run(&self.engine, &args, &env)
    }
}

#[async_trait]
impl SuiteInvoker for EngineInvoker {
    async fn invoke(&self, suite: &SuiteConfig) -> Result<Invocation> {
        let results_file = suite.results_file.as_deref().map(|p| self.resolve(p));
        if let Some(stale) = results_file.as_deref().filter(|p| p.exists()) {
            std::fs::remove_file(stale)?;
        }

        let output = self.command(suite).output().await?;
        Ok(Invocation {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            results_file,
        })
    }
}

const STDERR_TAIL_LINES: usize = 5;

fn abnormal_exit_message(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        "Test engine terminated by signal".to_string()
    } else {
        format!("Test engine terminated by signal: {}", tail)
    }
}

/// Sequential batch runner
pub struct Aggregator<I> {
    invoker: I,
    interpreter: Arc<dyn OutputInterpreter>,
}

impl<I: SuiteInvoker> Aggregator<I> {
    pub fn new(invoker: I, interpreter: Arc<dyn OutputInterpreter>) -> Self {
        Self {
            invoker,
            interpreter,
        }
    }

    /// Run every suite, one at a time, in the given order.
    pub async fn run(&self, suites: &[SuiteConfig]) -> BatchSummary {
        let mut results = Vec::with_capacity(suites.len());
        for (index, suite) in suites.iter().enumerate() {
            info!(
                "[{}/{}] Running suite {}",
                index + 1,
                suites.len(),
                suite.display_name()
            );
            let result = self.run_suite(suite).await;
            info!(
                "Suite {} {}: {} passed, {} failed, {} skipped ({} ms)",
                result.suite,
                result.status,
                result.passed,
                result.failed,
                result.skipped,
                result.duration_ms
            );
            results.push(result);
        }
        BatchSummary::new(results)
    }

    async fn run_suite(&self, suite: &SuiteConfig) -> SuiteResult {
        let started = Instant::now();
        let invocation = self.invoker.invoke(suite).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let invocation = match invocation {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!("Suite {} could not be run: {}", suite.name, e);
                return SuiteResult::errored(
                    &suite.name,
                    suite.display_name(),
                    duration_ms,
                    e.to_string(),
                );
            }
        };

        if invocation.exit_code.is_none() {
            warn!("Suite {} engine was killed by a signal", suite.name);
            return SuiteResult::errored(
                &suite.name,
                suite.display_name(),
                duration_ms,
                abnormal_exit_message(&invocation.stderr),
            );
        }

        let no_tests = self.interpreter.no_tests_found(&invocation.stdout)
            || self.interpreter.no_tests_found(&invocation.stderr);
        let (summary, failures) = self.collect(suite, &invocation);

        let failed = summary.failed() > 0 || (invocation.exit_code != Some(0) && !no_tests);
        let status = if failed {
            SuiteStatus::Failed
        } else {
            SuiteStatus::Passed
        };

        SuiteResult {
            failures,
            ..SuiteResult::from_summary(
                &suite.name,
                suite.display_name(),
                status,
                summary,
                duration_ms,
            )
        }
    }

    /// Counts from the JSON result file when present, else from stdout.
    fn collect(&self, suite: &SuiteConfig, invocation: &Invocation) -> (RunSummary, Vec<TestFailure>) {
        if let Some(path) = invocation.results_file.as_deref().filter(|p| p.exists()) {
            match parse_json_report(path) {
                Ok(report) => return (report.summary, report.failures),
                Err(e) => warn!(
                    "Suite {}: unreadable result file {}: {}",
                    suite.name,
                    path.display(),
                    e
                ),
            }
        }
        (self.interpreter.counts(&invocation.stdout), Vec::new())
    }
}
