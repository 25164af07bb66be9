//! Interactive recorder launcher
//!
//! Starts the engine's browser recorder for authoring new tests. Recorders
//! are detached: they never touch the run state and outlive the request.

use serde::{Deserialize, Serialize};
use testdeck_common::{EngineConfig, Error, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::EngineCommand;

/// Recorder request as posted by the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderOptions {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub output_file: Option<String>,
    /// Alias of `target` used by older dashboards
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

impl RecorderOptions {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Validated URL
    pub fn url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Validation("url is required".to_string()))
    }

    /// Recorder arguments, URL last
    pub fn to_args(&self) -> Result<Vec<String>> {
        let url = self.url()?;
        let mut args = Vec::new();
        if let Some(output) = non_empty(&self.output_file) {
            args.push("--output".to_string());
            args.push(output.to_string());
        }
        if let Some(target) = non_empty(&self.target).or_else(|| non_empty(&self.language)) {
            args.push("--target".to_string());
            args.push(target.to_string());
        }
        if let Some(device) = non_empty(&self.device) {
            args.push("--device".to_string());
            args.push(device.to_string());
        }
        args.push(url.to_string());
        Ok(args)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Identifies a launched recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderHandle {
    pub id: String,
    pub pid: Option<u32>,
    pub command: String,
}

/// Launch the recorder and return immediately.
///
/// Must be called from within a Tokio runtime; a background task reaps the
/// process when the user closes the recorder.
pub fn start_recorder(engine: &EngineConfig, options: &RecorderOptions) -> Result<RecorderHandle> {
    let args = options.to_args()?;
    let command = EngineCommand::recorder(engine, &args);
    let mut child = command.spawn_detached()?;

    let handle = RecorderHandle {
        id: Uuid::new_v4().to_string(),
        pid: child.id(),
        command: command.display(),
    };

    let id = handle.id.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!("Recorder {} exited with {}", id, status),
            Err(e) => warn!("Recorder {} could not be awaited: {}", id, e),
        }
    });

    info!("Recorder {} started: {}", handle.id, handle.command);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_url_is_validation_error() {
        let err = RecorderOptions::default().to_args().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = RecorderOptions::for_url("   ").to_args().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_args_order_and_language_alias() {
        let options: RecorderOptions = serde_json::from_str(
            r#"{"url": "https://store.test", "outputFile": "tests/new.spec.ts", "language": "javascript", "device": "iPhone 13"}"#,
        )
        .unwrap();
        assert_eq!(
            options.to_args().unwrap(),
            [
                "--output",
                "tests/new.spec.ts",
                "--target",
                "javascript",
                "--device",
                "iPhone 13",
                "https://store.test"
            ]
        );
    }

    #[test]
    fn test_target_wins_over_language() {
        let options = RecorderOptions {
            url: Some("https://store.test".to_string()),
            language: Some("python".to_string()),
            target: Some("playwright-test".to_string()),
            ..Default::default()
        };
        let args = options.to_args().unwrap();
        assert_eq!(args[1], "playwright-test");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_returns_immediately() {
        let engine = EngineConfig {
            program: "sh".to_string(),
            recorder_args: vec!["-c".to_string(), "sleep 0.2".to_string(), "recorder".to_string()],
            ..Default::default()
        };
        let handle = start_recorder(&engine, &RecorderOptions::for_url("https://store.test")).unwrap();
        assert!(handle.pid.is_some());
        assert!(handle.command.ends_with("https://store.test"));
    }
}
