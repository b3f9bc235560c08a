//! Error types for sandbox lifecycle management.

use thiserror::Error;

/// Errors raised by the sandbox manager and managed sandboxes
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A session id is required for session-scoped sandboxes")]
    MissingSessionId,

    #[error("Invalid duration '{0}': expected <number><m|h|d>, e.g. 30m, 1.5h or 3d")]
    InvalidDuration(String),

    #[error("Unsupported environment kind: {0}")]
    UnsupportedEnvironment(String),

    #[error("Sandbox {0} has been destroyed")]
    Destroyed(String),

    #[error(transparent)]
    Environment(#[from] sandbox_env::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Errors caused by the caller's configuration rather than the runtime.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingSessionId
                | Self::InvalidDuration(_)
                | Self::UnsupportedEnvironment(_)
        )
    }
}
