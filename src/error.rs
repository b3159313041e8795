use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required directory missing: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Unknown user or group: {0}")]
    UnknownIdentity(String),

    #[error("Marker error: {0}")]
    Marker(String),

    #[error("Ownership change failed: {0}")]
    Ownership(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
