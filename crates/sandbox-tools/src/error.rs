//! Error types for sandbox tools.

use thiserror::Error;

/// Errors reported back to the agent when a tool call fails
#[derive(Error, Debug)]
pub enum Error {
    #[error("{tool} was rejected{}", feedback_suffix(.feedback))]
    Rejected {
        tool: String,
        feedback: Option<String>,
    },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {0} is not enabled for this sandbox")]
    ToolDisabled(String),

    #[error("Edit failed: {0}")]
    Edit(String),

    #[error(transparent)]
    Manager(#[from] sandbox_manager::Error),

    #[error(transparent)]
    Environment(#[from] sandbox_env::Error),

    #[error("Approval failed: {0}")]
    Approval(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn feedback_suffix(feedback: &Option<String>) -> String {
    match feedback {
        Some(feedback) if !feedback.is_empty() => format!(": {feedback}"),
        _ => String::new(),
    }
}

impl Error {
    pub fn approval<S: Into<String>>(message: S) -> Self {
        Self::Approval(message.into())
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
