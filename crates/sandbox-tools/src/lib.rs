//! Agent tools backed by managed sandboxes.
//!
//! [`create_sandbox_tools`] turns a [`SandboxToolsConfig`] into up to six
//! tools (`exec`, `read`, `write`, `edit`, `glob`, `grep`) with JSON Schema
//! definitions for function calling. Calls are routed to the sandbox of the
//! calling execution and gated by the configured approval policies.

pub mod approval;
pub mod definition;
pub mod edit;
pub mod error;
pub mod factory;
pub mod params;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use approval::{ApprovalRequest, ApprovalResponse, AutoApprove, AutoReject, Suspender};
pub use definition::{FunctionDefinition, ToolDefinition, ToolType};
pub use error::Error;
pub use factory::{
    create_sandbox_tools, EditOutput, GlobOutput, GrepOutput, ReadOutput, SandboxTools,
    ToolContext, WriteOutput,
};
pub use params::{EditParams, ExecParams, GlobParams, GrepParams, ReadParams, WriteParams};
pub use sandbox_manager::{SandboxToolsConfig, ToolName};
