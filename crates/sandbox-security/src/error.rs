//! Error types for sandbox security checks.

use thiserror::Error;

/// Errors raised when a path or command violates the sandbox boundary
#[derive(Error, Debug)]
pub enum Error {
    #[error("Path traversal detected: '{path}' resolves outside of '{root}'")]
    Traversal { path: String, root: String },

    #[error("Symlink escape detected: '{path}' points to '{target}' outside of '{root}'")]
    SymlinkEscape {
        path: String,
        target: String,
        root: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a boundary violation, as opposed to an I/O failure
    /// while inspecting the filesystem.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Traversal { .. } | Self::SymlinkEscape { .. })
    }
}
