//! Error types for Testdeck

use thiserror::Error;

/// Result type alias using Testdeck Error
pub type Result<T> = std::result::Result<T, Error>;

/// Testdeck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to launch process: {0}")]
    Launch(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl Error {
    /// Errors that reject a request without anything having gone wrong
    /// inside the harness itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_)
                | Error::InvalidState { .. }
                | Error::Validation(_)
                | Error::Forbidden(_)
                | Error::NotFound { .. }
        )
    }
}
