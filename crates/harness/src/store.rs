//! Run state store
//!
//! Owns the single [`RunState`], the bounded run history and the broadcast
//! [`Hub`]. Every mutation publishes its push message while still holding the
//! state lock, so observers receive messages in exactly the order the
//! mutations happened.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use testdeck_common::{
    Error, HistoryEntry, LimitsConfig, LogEntry, LogLevel, PushMessage, Result, RunBanner,
    RunState, RunStatus, RunSummary, SuiteDescriptor, TestEvent,
};
use tracing::{debug, info};

use crate::hub::{Hub, Subscription};

struct Inner {
    state: RunState,
    history: VecDeque<HistoryEntry>,
}

/// Process-wide run state, history and push channel
pub struct RunStore {
    inner: Mutex<Inner>,
    hub: Hub,
    log_cap: usize,
    history_cap: usize,
}

impl RunStore {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self::with_caps(limits.log_cap, limits.history_cap, limits.broadcast_capacity)
    }

    pub fn with_caps(log_cap: usize, history_cap: usize, broadcast_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::idle(),
                history: VecDeque::new(),
            }),
            hub: Hub::new(broadcast_capacity),
            log_cap: log_cap.max(1),
            history_cap: history_cap.max(1),
        }
    }

    pub fn snapshot(&self) -> RunState {
        self.inner.lock().state.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.inner.lock().state.status
    }

    /// Newest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn observer_count(&self) -> usize {
        self.hub.observer_count()
    }

    /// Join the push channel. The snapshot is captured under the state lock,
    /// so nothing published afterwards can precede it.
    pub fn subscribe(&self) -> Subscription {
        let inner = self.inner.lock();
        self.hub.subscribe(inner.state.clone())
    }

    /// Bring a lagging subscription back in step: its next delivery is the
    /// current state, followed only by messages published after it.
    pub fn resync(&self, subscription: &mut Subscription) {
        let inner = self.inner.lock();
        self.hub.resync(subscription, inner.state.clone());
    }

    /// Replace the state with a fresh running one, unless a run is active.
    pub fn try_begin(
        &self,
        trigger: impl Into<String>,
        suites: Vec<SuiteDescriptor>,
    ) -> Result<RunState> {
        let mut inner = self.inner.lock();
        if inner.state.status == RunStatus::Running {
            return Err(Error::Conflict(format!(
                "run {} is already in progress",
                inner.state.id.as_deref().unwrap_or("unknown")
            )));
        }

        inner.state = RunState::running(trigger, suites);
        info!(
            "Run {} started",
            inner.state.id.as_deref().unwrap_or_default()
        );
        self.hub.publish(PushMessage::State(inner.state.clone()));
        Ok(inner.state.clone())
    }

    /// Append one log line, evicting the oldest entries beyond the cap.
    pub fn append_log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        let mut inner = self.inner.lock();
        let logs = &mut inner.state.logs;
        logs.push(entry.clone());
        if logs.len() > self.log_cap {
            let excess = logs.len() - self.log_cap;
            logs.drain(..excess);
        }
        self.hub.publish(PushMessage::Log(entry));
    }

    pub fn publish_test_begin(&self, banner: RunBanner) {
        let _inner = self.inner.lock();
        self.hub.publish(PushMessage::TestBegin(banner));
    }

    pub fn publish_test_event(&self, event: TestEvent) {
        let _inner = self.inner.lock();
        self.hub.publish(PushMessage::TestEnd(event));
    }

    /// Move the run identified by `run_id` to a terminal status and archive
    /// it. Returns `None` if that run is no longer the active one.
    pub fn finish(&self, run_id: &str, status: RunStatus, summary: RunSummary) -> Option<RunState> {
        let mut inner = self.inner.lock();
        if !Self::is_active(&inner.state, run_id) {
            debug!("Ignoring completion of inactive run {}", run_id);
            return None;
        }

        inner.state.status = status;
        inner.state.summary = summary;
        inner.state.end_time = Some(Utc::now());
        let finished = inner.state.clone();

        inner.history.push_front(HistoryEntry {
            archived_at: Utc::now(),
            run: finished.clone(),
        });
        inner.history.truncate(self.history_cap);

        self.hub.publish(PushMessage::State(finished.clone()));
        self.hub.publish(PushMessage::End(finished.clone()));
        info!(
            "Run {} finished: {} ({} passed, {} failed, {} skipped)",
            run_id,
            status,
            summary.passed(),
            summary.failed(),
            summary.skipped()
        );
        Some(finished)
    }

    /// Return the active run to `idle` with a final log line. Used when the
    /// engine never started or the run was stopped; neither is a test outcome.
    pub fn abort_to_idle(&self, run_id: &str, level: LogLevel, message: impl Into<String>) -> bool {
        let entry = LogEntry::new(level, message);
        let mut inner = self.inner.lock();
        if !Self::is_active(&inner.state, run_id) {
            return false;
        }

        inner.state.logs.push(entry.clone());
        if inner.state.logs.len() > self.log_cap {
            let excess = inner.state.logs.len() - self.log_cap;
            inner.state.logs.drain(..excess);
        }
        inner.state.status = RunStatus::Idle;
        inner.state.end_time = Some(Utc::now());

        self.hub.publish(PushMessage::Log(entry));
        self.hub.publish(PushMessage::State(inner.state.clone()));
        true
    }

    /// Unconditionally replace the state with a fresh idle one.
    pub fn reset(&self) -> RunState {
        let mut inner = self.inner.lock();
        inner.state = RunState::idle();
        self.hub.publish(PushMessage::State(inner.state.clone()));
        inner.state.clone()
    }

    fn is_active(state: &RunState, run_id: &str) -> bool {
        state.status == RunStatus::Running && state.id.as_deref() == Some(run_id)
    }
}
