//! Supervisor tests driving small shell scripts in place of the engine.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use testdeck_common::{EngineConfig, Error, LimitsConfig, LogLevel, PushMessage, RunState, RunStatus};
use testdeck_harness::{interpreter_for, Delivery, RunStore, Supervisor};

fn script_engine(script: &str) -> EngineConfig {
    EngineConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "engine".to_string()],
        ..Default::default()
    }
}

fn limits() -> LimitsConfig {
    LimitsConfig {
        stop_grace_ms: 500,
        ..Default::default()
    }
}

fn supervisor_with(engine: EngineConfig, limits: LimitsConfig) -> Supervisor {
    let store = Arc::new(RunStore::new(&limits));
    Supervisor::new(store, engine, interpreter_for("playwright"), limits)
        .with_tests_dir("/nonexistent/testdeck-tests")
}

fn supervisor(script: &str) -> Supervisor {
    supervisor_with(script_engine(script), limits())
}

async fn settled(supervisor: &Supervisor) -> RunState {
    let store = supervisor.store();
    tokio::time::timeout(Duration::from_secs(15), async {
        while store.status() == RunStatus::Running {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("run did not settle");
    store.snapshot()
}

#[tokio::test]
async fn test_passing_run_end_to_end() {
    let supervisor = supervisor(
        "echo 'Running 12 tests using 2 workers'; echo '  12 passed, 0 failed, 0 skipped'; exit 0",
    );
    let ack = supervisor.start("api").await.unwrap();
    let state = settled(&supervisor).await;

    assert_eq!(state.id.as_deref(), Some(ack.run_id.as_str()));
    assert_eq!(state.status, RunStatus::Passed);
    assert_eq!(state.summary.total(), 12);
    assert_eq!(state.summary.passed(), 12);
    assert!(state.end_time.is_some());
    assert_eq!(state.logs.last().unwrap().level, LogLevel::Success);

    let history = supervisor.store().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run.id, state.id);
}

#[tokio::test]
async fn test_failing_run() {
    let supervisor = supervisor("echo '  3 passed'; echo '  2 failed'; exit 1");
    supervisor.start("api").await.unwrap();
    let state = settled(&supervisor).await;

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.summary.total(), 5);
    assert_eq!(state.logs.last().unwrap().level, LogLevel::Error);
}

#[tokio::test]
async fn test_no_tests_found_overrides_exit_code() {
    let supervisor = supervisor("echo 'Error: No tests found' >&2; exit 1");
    supervisor.start("api").await.unwrap();
    let state = settled(&supervisor).await;

    assert_eq!(state.status, RunStatus::Skipped);
    assert_eq!(state.summary.total(), 0);
    assert!(state
        .logs
        .iter()
        .any(|l| l.level == LogLevel::Error && l.message.contains("No tests found")));
}

#[tokio::test]
async fn test_run_completes_when_background_process_keeps_pipes_open() {
    let supervisor = supervisor("sleep 30 & echo '  3 passed'; exit 0");
    let started = std::time::Instant::now();
    supervisor.start("api").await.unwrap();
    let state = settled(&supervisor).await;

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "run settled only after {:?}",
        started.elapsed()
    );
    assert_eq!(state.status, RunStatus::Passed);
    assert_eq!(state.summary.passed(), 3);
    assert!(state.end_time.is_some());
    assert_eq!(supervisor.store().history().len(), 1);
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let supervisor = supervisor("sleep 10");
    supervisor.start("first").await.unwrap();
    let before = supervisor.store().snapshot();

    let err = supervisor.start("second").await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(supervisor.store().snapshot().id, before.id);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_kills_engine_before_returning() {
    let supervisor = supervisor("echo \"pid=$$\"; sleep 30");
    supervisor.start("api").await.unwrap();

    let pid = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let found = supervisor
                .store()
                .snapshot()
                .logs
                .iter()
                .find_map(|l| l.message.strip_prefix("pid=").and_then(|p| p.parse::<i32>().ok()));
            if let Some(pid) = found {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("engine never reported its pid");

    supervisor.stop().await.unwrap();

    let state = supervisor.store().snapshot();
    assert_eq!(state.status, RunStatus::Idle);
    assert!(state.end_time.is_some());
    assert_eq!(state.logs.last().unwrap().level, LogLevel::Warning);
    assert!(supervisor.store().history().is_empty());

    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
    assert!(!alive, "engine process {} survived stop", pid);

    let err = supervisor.stop().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn test_timeout_fails_run() {
    let limits = LimitsConfig {
        max_run_secs: 1,
        stop_grace_ms: 200,
        ..Default::default()
    };
    let supervisor = supervisor_with(script_engine("sleep 30"), limits);
    supervisor.start("api").await.unwrap();
    let state = settled(&supervisor).await;

    assert_eq!(state.status, RunStatus::Failed);
    let last = state.logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.message.contains("timeout after 1s"));
}

#[tokio::test]
async fn test_launch_failure_returns_to_idle() {
    let engine = EngineConfig {
        program: "/nonexistent/testdeck-engine".to_string(),
        ..Default::default()
    };
    let supervisor = supervisor_with(engine, limits());
    supervisor.start("api").await.unwrap();
    let state = settled(&supervisor).await;

    assert_eq!(state.status, RunStatus::Idle);
    assert!(state.end_time.is_some());
    assert_eq!(state.logs.last().unwrap().level, LogLevel::Error);

    // The lock is released, so a new run can start.
    supervisor.start("again").await.unwrap();
}

#[tokio::test]
async fn test_reset_stops_active_run() {
    let supervisor = supervisor("sleep 30");
    supervisor.start("api").await.unwrap();
    supervisor.reset().await;

    let state = supervisor.store().snapshot();
    assert_eq!(state, RunState::idle());
}

#[tokio::test]
async fn test_observer_sees_lines_in_order() {
    let supervisor = supervisor("for i in $(seq 1 50); do echo \"line $i\"; done; echo '  50 passed'");
    let mut sub = supervisor.store().subscribe();
    supervisor.start("api").await.unwrap();

    let mut lines = Vec::new();
    let end = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            match sub.next().await {
                Delivery::Message(PushMessage::Log(entry)) => lines.push(entry.message),
                Delivery::Message(PushMessage::End(state)) => return state,
                Delivery::Message(_) => {}
                other => panic!("unexpected delivery {:?}", other),
            }
        }
    })
    .await
    .expect("no end message");

    assert_eq!(end.status, RunStatus::Passed);
    let numbered: Vec<String> = lines
        .iter()
        .filter(|l| l.starts_with("line "))
        .cloned()
        .collect();
    let expected: Vec<String> = (1..=50).map(|i| format!("line {}", i)).collect();
    assert_eq!(numbered, expected);
}
