//! Harness configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// HTTP listen address
    pub listen: String,

    /// Test engine invocation
    pub engine: EngineConfig,

    /// Filesystem locations
    pub paths: PathsConfig,

    /// Caps and timeouts
    pub limits: LimitsConfig,

    /// Suites run by the batch aggregator, in order
    pub suites: Vec<SuiteConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3001".to_string(),
            engine: EngineConfig::default(),
            paths: PathsConfig::default(),
            limits: LimitsConfig::default(),
            suites: Vec::new(),
        }
    }
}

/// How the end-to-end engine is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable to run
    pub program: String,

    /// Arguments that select the "run tests" mode
    pub args: Vec<String>,

    /// Arguments that select the interactive recorder
    pub recorder_args: Vec<String>,

    /// Working directory for the engine
    pub working_dir: PathBuf,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,

    /// Output interpreter name (see the parser registry)
    pub interpreter: String,

    /// Run the engine inside a container instead of directly
    pub container: Option<ContainerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["playwright".to_string(), "test".to_string()],
            recorder_args: vec!["playwright".to_string(), "codegen".to_string()],
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            interpreter: "playwright".to_string(),
            container: None,
        }
    }
}

/// Containerized engine invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container runtime binary (docker, podman)
    pub runtime: String,

    /// Image that carries the engine and browsers
    pub image: String,

    /// Mount point of the working directory inside the container
    pub workdir: String,

    /// Extra runtime arguments placed before the image name
    pub extra_args: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "mcr.microsoft.com/playwright:v1.48.0-jammy".to_string(),
            workdir: "/work".to_string(),
            extra_args: vec!["--ipc=host".to_string()],
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of generated reports, served read-only over HTTP
    pub reports_dir: PathBuf,

    /// Root scanned for test files
    pub tests_dir: PathBuf,

    /// Batch summary artifact
    pub summary_file: PathBuf,

    /// Generated dashboard page
    pub dashboard_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("playwright-report"),
            tests_dir: PathBuf::from("tests"),
            summary_file: PathBuf::from("playwright-report/summary.json"),
            dashboard_file: PathBuf::from("playwright-report/index.html"),
        }
    }
}

/// Caps and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum log entries kept in the run state
    pub log_cap: usize,

    /// Maximum finished runs kept in history
    pub history_cap: usize,

    /// A run still going after this many seconds is terminated and failed (0 disables)
    pub max_run_secs: u64,

    /// Time between SIGTERM and SIGKILL when stopping a run
    pub stop_grace_ms: u64,

    /// Per-observer buffer of undelivered push messages
    pub broadcast_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            log_cap: 1000,
            history_cap: 50,
            max_run_secs: 30 * 60,
            stop_grace_ms: 2000,
            broadcast_capacity: 1024,
        }
    }
}

/// One independently configured suite for the batch aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Stable identifier (used in summary.json)
    pub name: String,

    /// Human-readable name
    #[serde(default)]
    pub display_name: String,

    /// Engine config file for this suite
    pub config: PathBuf,

    /// Where this suite's HTML report is written
    pub report_dir: PathBuf,

    /// Structured JSON result file, if the engine writes one
    #[serde(default)]
    pub results_file: Option<PathBuf>,
}

impl SuiteConfig {
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    /// Parse a list of suites from YAML
    pub fn from_yaml(yaml: &str) -> Result<Vec<Self>> {
        #[derive(Deserialize)]
        struct SuiteFile {
            suites: Vec<SuiteConfig>,
        }

        let file: SuiteFile = serde_yaml::from_str(yaml)?;
        Ok(file.suites)
    }

    /// Load suites from a YAML file
    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults if it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            debug!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TESTDECK_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("TESTDECK_LISTEN") {
            self.listen = listen;
        }
        if let Some(dir) = lookup("TESTDECK_REPORTS_DIR") {
            self.paths.reports_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("TESTDECK_TESTS_DIR") {
            self.paths.tests_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("TESTDECK_MAX_RUN_SECS") {
            self.limits.max_run_secs = secs.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("TESTDECK_MAX_RUN_SECS is not a number: {}", secs))
            })?;
        }
        if let Some(program) = lookup("TESTDECK_ENGINE_PROGRAM") {
            self.engine.program = program;
        }
        if let Some(image) = lookup("TESTDECK_CONTAINER_IMAGE") {
            let container = self.engine.container.get_or_insert_with(ContainerConfig::default);
            container.image = image;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.program.trim().is_empty() {
            return Err(Error::InvalidConfig("engine.program is empty".to_string()));
        }
        if self.limits.log_cap == 0 || self.limits.history_cap == 0 {
            return Err(Error::InvalidConfig(
                "limits.log_cap and limits.history_cap must be positive".to_string(),
            ));
        }
        if self.limits.broadcast_capacity == 0 {
            return Err(Error::InvalidConfig(
                "limits.broadcast_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.limits.history_cap, 50);
        assert_eq!(config.engine.program, "npx");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testdeck.toml");
        std::fs::write(
            &path,
            r#"
listen = "0.0.0.0:9000"

[limits]
log_cap = 500

[[suites]]
name = "admin"
config = "playwright.admin.config.ts"
report_dir = "playwright-report/admin"
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.limits.log_cap, 500);
        assert_eq!(config.limits.stop_grace_ms, 2000);
        assert_eq!(config.suites.len(), 1);
        assert_eq!(config.suites[0].display_name(), "admin");
    }

    #[test]
    fn test_save_round_trip_preserves_suites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/testdeck.toml");
        let mut config = HarnessConfig::default();
        config.suites.push(SuiteConfig {
            name: "user".to_string(),
            display_name: "User area".to_string(),
            config: PathBuf::from("user.config.ts"),
            report_dir: PathBuf::from("reports/user"),
            results_file: Some(PathBuf::from("reports/user/results.json")),
        });
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.suites, config.suites);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TESTDECK_LISTEN", "127.0.0.1:4000"),
            ("TESTDECK_MAX_RUN_SECS", "60"),
            ("TESTDECK_CONTAINER_IMAGE", "example/engine:1"),
        ]
        .into_iter()
        .collect();

        let mut config = HarnessConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.listen, "127.0.0.1:4000");
        assert_eq!(config.limits.max_run_secs, 60);
        assert_eq!(config.engine.container.unwrap().image, "example/engine:1");
    }

    #[test]
    fn test_bad_timeout_override_is_rejected() {
        let mut config = HarnessConfig::default();
        let err = config
            .apply_overrides(|k| (k == "TESTDECK_MAX_RUN_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_suites_from_yaml() {
        let yaml = r#"
suites:
  - name: admin
    display_name: Admin dashboard
    config: playwright.admin.config.ts
    report_dir: playwright-report/admin
    results_file: playwright-report/admin/results.json
  - name: user
    config: playwright.user.config.ts
    report_dir: playwright-report/user
"#;
        let suites = SuiteConfig::from_yaml(yaml).unwrap();
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[0].display_name(), "Admin dashboard");
        assert!(suites[1].results_file.is_none());
    }
}
