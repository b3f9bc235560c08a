//! Human approval of tool calls.
//!
//! When a policy requires approval, the tool suspends through a
//! [`Suspender`], which presents the request to a person (or any other
//! authority) and resumes with their decision.

use crate::Result;
use async_trait::async_trait;
use sandbox_manager::ToolName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What is being approved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRequest {
    pub tool: ToolName,
    /// One-line description, e.g. the command to run.
    pub summary: String,
    /// Full tool arguments.
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
}

/// The decision for an [`ApprovalRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalResponse {
    pub approved: bool,
    /// Reason given with a rejection, passed back to the agent.
    pub feedback: Option<String>,
    /// Skip approval for this exact command from now on.
    pub allow_always: bool,
}

impl ApprovalResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Self::default()
        }
    }

    pub fn approve_always() -> Self {
        Self {
            approved: true,
            feedback: None,
            allow_always: true,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.into()),
            allow_always: false,
        }
    }
}

/// Suspends a tool call until a decision is available.
#[async_trait]
pub trait Suspender: Send + Sync {
    /// `step_key` identifies the suspension point uniquely within a tool set
    /// (`<tool>_approval_<n>`). `timeout` bounds the wait when set.
    async fn suspend(
        &self,
        step_key: &str,
        request: ApprovalRequest,
        timeout: Option<Duration>,
    ) -> Result<ApprovalResponse>;
}

/// Approves everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Suspender for AutoApprove {
    async fn suspend(
        &self,
        _step_key: &str,
        _request: ApprovalRequest,
        _timeout: Option<Duration>,
    ) -> Result<ApprovalResponse> {
        Ok(ApprovalResponse::approve())
    }
}

/// Rejects everything, for non-interactive runs.
#[derive(Debug, Clone, Default)]
pub struct AutoReject {
    pub feedback: Option<String>,
}

#[async_trait]
impl Suspender for AutoReject {
    async fn suspend(
        &self,
        _step_key: &str,
        _request: ApprovalRequest,
        _timeout: Option<Duration>,
    ) -> Result<ApprovalResponse> {
        Ok(ApprovalResponse {
            approved: false,
            feedback: self.feedback.clone(),
            allow_always: false,
        })
    }
}
