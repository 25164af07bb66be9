//! Core types for Testdeck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Passed,
    Failed,
    Skipped,
    Completed,
}

impl RunStatus {
    /// Terminal statuses stay put until the next run starts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Skipped | RunStatus::Completed
        )
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Passed => write!(f, "passed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Skipped => write!(f, "skipped"),
            RunStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Warning,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Success => write!(f, "success"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warning => write!(f, "warning"),
        }
    }
}

/// A single captured log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Aggregate pass/fail/skip counts.
///
/// `total` is never stored independently: it is derived from the three
/// components on construction and again on deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSummary")]
pub struct RunSummary {
    total: u32,
    passed: u32,
    failed: u32,
    skipped: u32,
}

#[derive(Deserialize)]
struct RawSummary {
    #[serde(default)]
    passed: u32,
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    skipped: u32,
}

impl From<RawSummary> for RunSummary {
    fn from(raw: RawSummary) -> Self {
        RunSummary::from_counts(raw.passed, raw.failed, raw.skipped)
    }
}

impl RunSummary {
    pub fn from_counts(passed: u32, failed: u32, skipped: u32) -> Self {
        Self {
            total: passed + failed + skipped,
            passed,
            failed,
            skipped,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }
}

/// A test file discovered under the tests root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteDescriptor {
    pub id: String,
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub status: Option<RunStatus>,
}

/// The single process-wide record of the current or most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub id: Option<String>,
    pub trigger: Option<String>,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: RunSummary,
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub suites: Vec<SuiteDescriptor>,
}

impl RunState {
    /// Empty idle state, as created at process start
    pub fn idle() -> Self {
        Self {
            id: None,
            trigger: None,
            status: RunStatus::Idle,
            start_time: None,
            end_time: None,
            summary: RunSummary::default(),
            logs: Vec::new(),
            suites: Vec::new(),
        }
    }

    /// Fresh state for a newly started run
    pub fn running(trigger: impl Into<String>, suites: Vec<SuiteDescriptor>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            trigger: Some(trigger.into()),
            status: RunStatus::Running,
            start_time: Some(Utc::now()),
            end_time: None,
            summary: RunSummary::default(),
            logs: Vec::new(),
            suites,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Snapshot of a finished run kept in the history list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub archived_at: DateTime<Utc>,
    #[serde(flatten)]
    pub run: RunState,
}

/// Outcome of one suite in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Passed,
    Failed,
    Error,
}

impl std::fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteStatus::Passed => write!(f, "passed"),
            SuiteStatus::Failed => write!(f, "failed"),
            SuiteStatus::Error => write!(f, "error"),
        }
    }
}

/// Structured detail for one failing test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
}

/// Result of running a single configured suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub suite: String,
    pub display_name: String,
    pub status: SuiteStatus,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TestFailure>,
}

impl SuiteResult {
    pub fn from_summary(
        suite: impl Into<String>,
        display_name: impl Into<String>,
        status: SuiteStatus,
        summary: RunSummary,
        duration_ms: u64,
    ) -> Self {
        Self {
            suite: suite.into(),
            display_name: display_name.into(),
            status,
            passed: summary.passed(),
            failed: summary.failed(),
            skipped: summary.skipped(),
            total: summary.total(),
            duration_ms,
            error: None,
            failures: Vec::new(),
        }
    }

    /// A suite whose invocation itself broke
    pub fn errored(
        suite: impl Into<String>,
        display_name: impl Into<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::from_summary(
                suite,
                display_name,
                SuiteStatus::Error,
                RunSummary::default(),
                duration_ms,
            )
        }
    }
}

/// Grand totals across a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Milliseconds
    pub duration: u64,
}

/// The `summary.json` artifact written after a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<SuiteResult>,
    pub totals: BatchTotals,
}

impl BatchSummary {
    pub fn new(results: Vec<SuiteResult>) -> Self {
        let totals = results.iter().fold(BatchTotals::default(), |mut acc, r| {
            acc.passed += r.passed;
            acc.failed += r.failed;
            acc.skipped += r.skipped;
            acc.duration += r.duration_ms;
            acc
        });
        Self {
            timestamp: Utc::now(),
            results,
            totals,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.status == SuiteStatus::Passed)
    }

    /// Process exit code a CI caller observes
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }
}

/// One finished test case as reported by the engine's line output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEvent {
    pub title: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Banner the engine prints before the first test starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunBanner {
    pub expected: u32,
    pub workers: u32,
}

/// Server-to-observer push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PushMessage {
    State(RunState),
    Log(LogEntry),
    TestBegin(RunBanner),
    TestEnd(TestEvent),
    End(RunState),
}

impl PushMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::State(_) => "state",
            PushMessage::Log(_) => "log",
            PushMessage::TestBegin(_) => "testBegin",
            PushMessage::TestEnd(_) => "testEnd",
            PushMessage::End(_) => "end",
        }
    }
}
