//! Engine command construction and process control
//!
//! Builds the command line for the end-to-end engine, either run directly or
//! wrapped in a container runtime, and terminates running engines by process
//! group so browsers spawned underneath go with them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use testdeck_common::{EngineConfig, Error, Result};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A fully resolved engine invocation
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

impl EngineCommand {
    /// Command for a test run; `extra_args` follow the configured run args.
    pub fn run(engine: &EngineConfig, extra_args: &[String], extra_env: &[(String, String)]) -> Self {
        Self::build(engine, &engine.args, extra_args, extra_env)
    }

    /// Command for the interactive recorder.
    pub fn recorder(engine: &EngineConfig, extra_args: &[String]) -> Self {
        Self::build(engine, &engine.recorder_args, extra_args, &[])
    }

    fn build(
        engine: &EngineConfig,
        mode_args: &[String],
        extra_args: &[String],
        extra_env: &[(String, String)],
    ) -> Self {
        let mut env = engine.env.clone();
        for (key, value) in extra_env {
            env.insert(key.clone(), value.clone());
        }

        let mut engine_args: Vec<String> = mode_args.to_vec();
        engine_args.extend(extra_args.iter().cloned());

        match &engine.container {
            None => Self {
                program: engine.program.clone(),
                args: engine_args,
                env,
                working_dir: engine.working_dir.clone(),
            },
            Some(container) => {
                let host_dir = absolute(&engine.working_dir);
                let mut args = vec!["run".to_string(), "--rm".to_string()];
                args.extend(container.extra_args.iter().cloned());
                args.push("-v".to_string());
                args.push(format!("{}:{}", host_dir.display(), container.workdir));
                args.push("-w".to_string());
                args.push(container.workdir.clone());
                // The runtime does not forward its own environment.
                for (key, value) in &env {
                    args.push("-e".to_string());
                    args.push(format!("{}={}", key, value));
                }
                args.push(container.image.clone());
                args.push(engine.program.clone());
                args.extend(engine_args);

                Self {
                    program: container.runtime.clone(),
                    args,
                    env: BTreeMap::new(),
                    working_dir: host_dir,
                }
            }
        }
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null());
        cmd
    }

    /// Spawn with stdout/stderr piped, in its own process group, killed if the
    /// handle is dropped.
    pub fn spawn_piped(&self) -> Result<Child> {
        let mut cmd = self.command();
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.display(), e)))?;
        info!("Spawned `{}` (pid: {:?})", self.display(), child.id());
        Ok(child)
    }

    /// Spawn a long-lived process that outlives the request that started it.
    pub fn spawn_detached(&self) -> Result<Child> {
        let mut cmd = self.command();
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.display(), e)))?;
        info!("Spawned detached `{}` (pid: {:?})", self.display(), child.id());
        Ok(child)
    }

    /// Run to completion and capture output.
    pub async fn output(&self) -> Result<std::process::Output> {
        let mut cmd = self.command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!("Running `{}`", self.display());
        cmd.output()
            .await
            .map_err(|e| Error::Launch(format!("{}: {}", self.display(), e)))
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Terminate a child and wait until it is gone.
///
/// Sends SIGTERM to the child's process group, waits up to `grace`, then
/// force kills.
pub async fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Ok(status);
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let pgid = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                debug!("SIGTERM to process group {} failed: {}", pid, e);
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return Ok(status?),
                Err(_) => {
                    warn!("Process {} ignored SIGTERM for {:?}, killing", pid, grace);
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    Ok(child.wait().await?)
}

/// Kill whatever is left in the process group of an engine that has already
/// exited. `pid` is the former group leader.
pub fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => debug!("Killed processes left in group {}", pid),
                Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::ContainerConfig;

    #[test]
    fn test_direct_command() {
        let engine = EngineConfig::default();
        let cmd = EngineCommand::run(
            &engine,
            &["--config".to_string(), "admin.config.ts".to_string()],
            &[("CI".to_string(), "1".to_string())],
        );
        assert_eq!(cmd.program, "npx");
        assert_eq!(cmd.args, ["playwright", "test", "--config", "admin.config.ts"]);
        assert_eq!(cmd.env.get("CI").map(String::as_str), Some("1"));
        assert_eq!(cmd.display(), "npx playwright test --config admin.config.ts");
    }

    #[test]
    fn test_containerized_command() {
        let engine = EngineConfig {
            working_dir: PathBuf::from("/srv/app"),
            container: Some(ContainerConfig {
                runtime: "podman".to_string(),
                image: "engine:latest".to_string(),
                workdir: "/work".to_string(),
                extra_args: vec!["--ipc=host".to_string()],
            }),
            ..Default::default()
        };
        let cmd = EngineCommand::run(&engine, &[], &[("CI".to_string(), "1".to_string())]);

        assert_eq!(cmd.program, "podman");
        assert_eq!(
            cmd.args,
            [
                "run", "--rm", "--ipc=host", "-v", "/srv/app:/work", "-w", "/work", "-e", "CI=1",
                "engine:latest", "npx", "playwright", "test"
            ]
        );
        assert!(cmd.env.is_empty());
    }

    #[test]
    fn test_recorder_command_uses_recorder_args() {
        let engine = EngineConfig::default();
        let cmd = EngineCommand::recorder(&engine, &["https://example.test".to_string()]);
        assert_eq!(cmd.args, ["playwright", "codegen", "https://example.test"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let engine = EngineConfig {
            program: "/nonexistent/testdeck-engine".to_string(),
            ..Default::default()
        };
        let err = EngineCommand::run(&engine, &[], &[]).spawn_piped().unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_waits_for_exit() {
        let engine = EngineConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            ..Default::default()
        };
        let mut child = EngineCommand::run(&engine, &[], &[]).spawn_piped().unwrap();
        let status = terminate(&mut child, Duration::from_millis(500)).await.unwrap();
        assert!(!status.success());
        assert!(child.try_wait().unwrap().is_some());
    }
}
