//! Testdeck Common Library
//!
//! Shared data model, error taxonomy and configuration for the test
//! orchestration harness, its web surface and its CLI.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{ContainerConfig, EngineConfig, HarnessConfig, LimitsConfig, PathsConfig, SuiteConfig};
pub use error::{Error, Result};
pub use types::*;

/// Testdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("testdeck.toml")
}
