//! Process supervisor
//!
//! Launches the engine for a run, streams its output into the run store,
//! and owns the lifecycle of the child process: completion, stop requests
//! and the run time limit.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use testdeck_common::{EngineConfig, Error, LimitsConfig, LogLevel, Result, RunStatus, RunSummary};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::archive::discover_suites;
use crate::engine::{self, EngineCommand};
use crate::parser::OutputInterpreter;
use crate::recorder::{self, RecorderHandle, RecorderOptions};
use crate::store::RunStore;

/// Returned by [`Supervisor::start`] as soon as the run is launched
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAck {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

/// Carries the stop request; the run task answers once the process is gone.
type StopRequest = oneshot::Sender<()>;

struct ActiveRun {
    run_id: String,
    stop_tx: oneshot::Sender<StopRequest>,
}

/// Map an engine exit to the run's terminal status.
pub fn classify_exit(code: Option<i32>, no_tests: bool) -> RunStatus {
    if no_tests {
        RunStatus::Skipped
    } else if code == Some(0) {
        RunStatus::Passed
    } else {
        RunStatus::Failed
    }
}

/// Supervises at most one engine run at a time
pub struct Supervisor {
    store: Arc<RunStore>,
    engine: EngineConfig,
    interpreter: Arc<dyn OutputInterpreter>,
    limits: LimitsConfig,
    tests_dir: PathBuf,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<RunStore>,
        engine: EngineConfig,
        interpreter: Arc<dyn OutputInterpreter>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            engine,
            interpreter,
            limits,
            tests_dir: PathBuf::from("tests"),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Directory scanned for suite descriptors when a run starts
    pub fn with_tests_dir(mut self, tests_dir: impl Into<PathBuf>) -> Self {
        self.tests_dir = tests_dir.into();
        self
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Start a run and return as soon as the engine is launched.
    ///
    /// Fails with [`Error::Conflict`] while another run is active, leaving
    /// the current state untouched.
    pub async fn start(&self, trigger: impl Into<String>) -> Result<RunAck> {
        let trigger = trigger.into();
        if self.store.status() == RunStatus::Running {
            return Err(Error::Conflict("a run is already in progress".to_string()));
        }

        let tests_dir = self.tests_dir.clone();
        let suites = tokio::task::spawn_blocking(move || discover_suites(&tests_dir))
            .await
            .map_err(|e| Error::Internal(format!("suite discovery failed: {}", e)))?;

        let mut active = self.active.lock();
        let state = self.store.try_begin(trigger, suites)?;
        let run_id = state
            .id
            .clone()
            .ok_or_else(|| Error::Internal("running state has no id".to_string()))?;
        let started_at = state.start_time.unwrap_or_else(Utc::now);

        let (stop_tx, stop_rx) = oneshot::channel();
        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            stop_tx,
        });
        drop(active);

        let task = RunTask {
            run_id: run_id.clone(),
            store: self.store.clone(),
            interpreter: self.interpreter.clone(),
            command: EngineCommand::run(&self.engine, &[], &[]),
            max_run: (self.limits.max_run_secs > 0)
                .then(|| Duration::from_secs(self.limits.max_run_secs)),
            stop_grace: Duration::from_millis(self.limits.stop_grace_ms),
            active: self.active.clone(),
        };
        tokio::spawn(task.run(stop_rx));

        Ok(RunAck { run_id, started_at })
    }

    /// Stop the active run. Returns only after the engine process has exited
    /// and the state is back to `idle`.
    pub async fn stop(&self) -> Result<()> {
        let not_running = |status: RunStatus| Error::InvalidState {
            from: status.to_string(),
            to: RunStatus::Idle.to_string(),
        };

        let status = self.store.status();
        if status != RunStatus::Running {
            return Err(not_running(status));
        }
        let active = self.active.lock().take();
        let Some(active) = active else {
            return Err(not_running(status));
        };

        info!("Stopping run {}", active.run_id);
        let (done_tx, done_rx) = oneshot::channel();
        if active.stop_tx.send(done_tx).is_err() {
            // The run ended between the status check and the request.
            return Err(not_running(self.store.status()));
        }
        done_rx
            .await
            .map_err(|_| not_running(self.store.status()))
    }

    /// Stop any active run, then replace the state with a fresh idle one.
    pub async fn reset(&self) {
        if self.store.status() == RunStatus::Running {
            if let Err(e) = self.stop().await {
                debug!("Nothing to stop before reset: {}", e);
            }
        }
        self.store.reset();
        info!("Run state reset");
    }

    pub fn start_recorder(&self, options: &RecorderOptions) -> Result<RecorderHandle> {
        recorder::start_recorder(&self.engine, options)
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Stopped(StopRequest),
    TimedOut(Duration),
}

/// How long to keep reading output once the engine has exited. Processes it
/// left behind may hold the pipes open indefinitely.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type LineReader<R> = Split<BufReader<R>>;

async fn next_line<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    let reader = reader.as_mut()?;
    match reader.next_segment().await {
        Ok(Some(bytes)) => Some(
            String::from_utf8_lossy(&bytes)
                .trim_end_matches('\r')
                .to_string(),
        ),
        Ok(None) => None,
        Err(e) => {
            debug!("Output stream closed with error: {}", e);
            None
        }
    }
}

/// Both output pipes of the engine plus everything read from them so far
struct EngineOutput {
    stdout: Option<LineReader<ChildStdout>>,
    stderr: Option<LineReader<ChildStderr>>,
    stdout_text: String,
    stderr_text: String,
}

impl EngineOutput {
    fn new(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(|s| BufReader::new(s).split(b'\n')),
            stderr: child.stderr.take().map(|s| BufReader::new(s).split(b'\n')),
            stdout_text: String::new(),
            stderr_text: String::new(),
        }
    }

    fn is_open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Next line from either pipe, or `None` once both are closed.
    async fn next(&mut self) -> Option<(Stream, String)> {
        loop {
            tokio::select! {
                line = next_line(&mut self.stdout), if self.stdout.is_some() => match line {
                    Some(line) => {
                        self.stdout_text.push_str(&line);
                        self.stdout_text.push('\n');
                        return Some((Stream::Stdout, line));
                    }
                    None => self.stdout = None,
                },
                line = next_line(&mut self.stderr), if self.stderr.is_some() => match line {
                    Some(line) => {
                        self.stderr_text.push_str(&line);
                        self.stderr_text.push('\n');
                        return Some((Stream::Stderr, line));
                    }
                    None => self.stderr = None,
                },
                else => return None,
            }
        }
    }
}

struct RunTask {
    run_id: String,
    store: Arc<RunStore>,
    interpreter: Arc<dyn OutputInterpreter>,
    command: EngineCommand,
    max_run: Option<Duration>,
    stop_grace: Duration,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl RunTask {
    async fn run(self, stop_rx: oneshot::Receiver<StopRequest>) {
        self.store
            .append_log(LogLevel::Info, format!("$ {}", self.command.display()));

        match self.command.spawn_piped() {
            Ok(child) => self.supervise(child, stop_rx).await,
            Err(e) => {
                error!("Run {} failed to launch: {}", self.run_id, e);
                self.store.abort_to_idle(
                    &self.run_id,
                    LogLevel::Error,
                    format!("Failed to start test engine: {}", e),
                );
            }
        }

        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.run_id.as_str()) == Some(self.run_id.as_str()) {
            *active = None;
        }
    }

    async fn supervise(&self, mut child: Child, mut stop_rx: oneshot::Receiver<StopRequest>) {
        // The pid is gone from the handle once the child is reaped.
        let pid = child.id();
        let mut output = EngineOutput::new(&mut child);
        let mut stop_closed = false;

        let limit = self.max_run;
        let deadline = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                request = &mut stop_rx, if !stop_closed => match request {
                    Ok(done) => break Outcome::Stopped(done),
                    Err(_) => stop_closed = true,
                },
                _ = &mut deadline => {
                    break Outcome::TimedOut(limit.unwrap_or_default());
                }
                line = output.next(), if output.is_open() => {
                    if let Some((stream, line)) = line {
                        self.on_line(line, stream);
                    }
                }
                status = child.wait() => {
                    break Outcome::Exited(status);
                }
            }
        };

        match outcome {
            Outcome::Exited(status) => {
                self.drain(&mut output).await;
                engine::kill_group(pid);
                match status {
                    Ok(status) => self.complete(status, &output.stdout_text, &output.stderr_text),
                    Err(e) => {
                        error!("Run {}: waiting for the engine failed: {}", self.run_id, e);
                        self.store.append_log(
                            LogLevel::Error,
                            format!("Lost track of the test engine: {}", e),
                        );
                        self.store.finish(
                            &self.run_id,
                            RunStatus::Failed,
                            self.interpreter.counts(&output.stdout_text),
                        );
                    }
                }
            }
            Outcome::Stopped(done) => {
                if let Err(e) = engine::terminate(&mut child, self.stop_grace).await {
                    warn!("Run {}: terminating the engine failed: {}", self.run_id, e);
                }
                self.store
                    .abort_to_idle(&self.run_id, LogLevel::Warning, "Run stopped by user");
                info!("Run {} stopped", self.run_id);
                let _ = done.send(());
            }
            Outcome::TimedOut(limit) => {
                if let Err(e) = engine::terminate(&mut child, self.stop_grace).await {
                    warn!("Run {}: terminating the engine failed: {}", self.run_id, e);
                }
                let timeout = Error::Timeout {
                    seconds: limit.as_secs(),
                };
                warn!("Run {}: {}", self.run_id, timeout);
                self.store.append_log(
                    LogLevel::Error,
                    format!("{}; the test engine was terminated", timeout),
                );
                self.store.finish(
                    &self.run_id,
                    RunStatus::Failed,
                    self.interpreter.counts(&output.stdout_text),
                );
            }
        }
    }

    /// Read what the engine wrote before exiting, for at most [`DRAIN_WINDOW`].
    async fn drain(&self, output: &mut EngineOutput) {
        let window = tokio::time::sleep(DRAIN_WINDOW);
        tokio::pin!(window);
        while output.is_open() {
            tokio::select! {
                line = output.next() => match line {
                    Some((stream, line)) => self.on_line(line, stream),
                    None => break,
                },
                _ = &mut window => {
                    debug!("Run {}: output still open after the engine exited", self.run_id);
                    break;
                }
            }
        }
    }

    fn on_line(&self, line: String, stream: Stream) {
        if line.trim().is_empty() {
            return;
        }

        if let Some(banner) = self.interpreter.run_banner(&line) {
            self.store.publish_test_begin(banner);
        }
        if let Some(event) = self.interpreter.test_event(&line) {
            self.store.publish_test_event(event);
        }

        let level = match stream {
            Stream::Stdout => LogLevel::Info,
            Stream::Stderr => LogLevel::Error,
        };
        self.store.append_log(level, line);
    }

    fn complete(&self, exit: ExitStatus, stdout: &str, stderr: &str) {
        let summary: RunSummary = self.interpreter.counts(stdout);
        let no_tests =
            self.interpreter.no_tests_found(stdout) || self.interpreter.no_tests_found(stderr);
        let status = classify_exit(exit.code(), no_tests);

        let (level, message) = match status {
            RunStatus::Passed => (
                LogLevel::Success,
                format!("All tests passed ({} total)", summary.total()),
            ),
            RunStatus::Skipped => (LogLevel::Warning, "No tests found".to_string()),
            _ => (
                LogLevel::Error,
                match exit.code() {
                    Some(code) => format!(
                        "Tests failed with exit code {} ({} failed)",
                        code,
                        summary.failed()
                    ),
                    None => format!("Test engine terminated by signal ({})", exit),
                },
            ),
        };
        self.store.append_log(level, message);
        self.store.finish(&self.run_id, status, summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Some(0), false => RunStatus::Passed; "clean exit")]
    #[test_case(Some(1), false => RunStatus::Failed; "failing tests")]
    #[test_case(None, false => RunStatus::Failed; "killed by signal")]
    #[test_case(Some(1), true => RunStatus::Skipped; "no tests with nonzero exit")]
    #[test_case(Some(0), true => RunStatus::Skipped; "no tests with clean exit")]
    fn test_classify_exit(code: Option<i32>, no_tests: bool) -> RunStatus {
        classify_exit(code, no_tests)
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_invalid_state() {
        let store = Arc::new(RunStore::with_caps(10, 10, 16));
        let supervisor = Supervisor::new(
            store,
            EngineConfig::default(),
            crate::parser::interpreter_for("playwright"),
            LimitsConfig::default(),
        );
        let err = supervisor.stop().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}
