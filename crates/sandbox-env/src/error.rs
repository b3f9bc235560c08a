//! Error types for sandbox environments.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while operating an environment
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Security(#[from] sandbox_security::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment is not initialized; call initialize() first")]
    Uninitialized,

    #[error("Container unavailable: {0}")]
    ContainerUnavailable(String),

    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Container driver error during {operation}: {message}")]
    Driver { operation: String, message: String },

    #[error("Working directory does not exist or is not a directory: {0}")]
    InvalidWorkingDir(String),

    #[error("Refusing to read binary file: {0}")]
    BinaryFile(String),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Command failed: {command} (exit code: {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
}

impl Error {
    /// The container backing the environment no longer exists.
    pub fn is_container_gone(&self) -> bool {
        matches!(self, Self::ContainerUnavailable(_))
    }

    /// Path traversal or symlink escape.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Security(e) if e.is_violation())
    }
}
