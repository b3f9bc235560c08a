//! Sandbox lifecycle management.
//!
//! A [`SandboxManager`] hands out [`ManagedSandbox`]es to executions, shares
//! session-scoped sandboxes between executions of the same session, and
//! reclaims sandboxes when their execution completes or they sit idle.

pub mod config;
pub mod duration;
pub mod error;
pub mod managed;
pub mod manager;
pub mod workspace;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use config::{
    ExecPolicyMode, ExecSecurity, FileApprovalMode, SandboxScope, SandboxToolsConfig, ToolName,
};
pub use duration::parse_duration;
pub use error::Error;
pub use managed::{ManagedSandbox, SandboxState, SandboxSummary};
pub use manager::{generate_sandbox_id, SandboxManager};
pub use workspace::{default_workspaces_dir, resolve_workspaces_dir, WORKSPACES_DIR_ENV};

pub use sandbox_env::{DockerConfig, EnvironmentKind, LocalConfig};
