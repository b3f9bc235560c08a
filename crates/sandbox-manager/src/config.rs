//! Sandbox tool configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a valid
//! configuration.

use crate::duration::parse_duration;
use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub use sandbox_env::{DockerConfig, EnvironmentKind, LocalConfig};

/// Idle time after which a sandbox is reclaimed unless configured otherwise.
pub const DEFAULT_IDLE_DESTROY_TIMEOUT: &str = "1h";

/// [`DEFAULT_IDLE_DESTROY_TIMEOUT`] as a duration.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default per-command timeout in seconds.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;

/// Lifetime of a sandbox relative to the executions using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxScope {
    /// Destroyed as soon as its execution completes.
    #[default]
    Execution,
    /// Shared by every execution of one session.
    Session,
}

impl fmt::Display for SandboxScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution => f.write_str("execution"),
            Self::Session => f.write_str("session"),
        }
    }
}

/// When shell commands need approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecPolicyMode {
    /// Run everything without asking.
    None,
    /// Run commands matching the allowlist, ask for the rest.
    Allowlist,
    /// Ask before every command.
    ApprovalAlways,
    /// Never ask.
    AllowAlways,
}

/// When file writes and edits need approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileApprovalMode {
    ApprovalAlways,
    AllowAlways,
}

/// Security policy for the exec tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecSecurity {
    /// Unset means the environment's default, see [`SandboxToolsConfig::exec_mode`].
    pub mode: Option<ExecPolicyMode>,
    /// Command patterns where `*` matches anything.
    pub allowlist: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_chars: usize,
}

impl Default for ExecSecurity {
    fn default() -> Self {
        Self {
            mode: None,
            allowlist: Vec::new(),
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            max_output_chars: sandbox_output::DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

impl ExecSecurity {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Names of the tools a factory can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    Exec,
    Read,
    Write,
    Edit,
    Glob,
    Grep,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::Exec,
        ToolName::Read,
        ToolName::Write,
        ToolName::Edit,
        ToolName::Glob,
        ToolName::Grep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Read => "read",
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Glob => "glob",
            Self::Grep => "grep",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full configuration of a set of sandbox tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxToolsConfig {
    pub env: EnvironmentKind,
    pub scope: SandboxScope,
    /// Explicit sandbox id; generated when unset.
    pub id: Option<String>,
    pub local: LocalConfig,
    pub docker: DockerConfig,
    pub exec: ExecSecurity,
    pub file_approval: Option<FileApprovalMode>,
    pub idle_destroy_timeout: String,
    /// Subset of tools to expose; all of them when unset.
    pub tools: Option<Vec<ToolName>>,
}

impl Default for SandboxToolsConfig {
    fn default() -> Self {
        Self {
            env: EnvironmentKind::default(),
            scope: SandboxScope::default(),
            id: None,
            local: LocalConfig::default(),
            docker: DockerConfig::default(),
            exec: ExecSecurity::default(),
            file_approval: None,
            idle_destroy_timeout: DEFAULT_IDLE_DESTROY_TIMEOUT.to_string(),
            tools: None,
        }
    }
}

impl SandboxToolsConfig {
    /// Configuration for a Docker sandbox with default settings.
    pub fn docker(config: DockerConfig) -> Self {
        Self {
            env: EnvironmentKind::Docker,
            docker: config,
            ..Self::default()
        }
    }

    /// Configuration for a local sandbox.
    pub fn local(config: LocalConfig) -> Self {
        Self {
            env: EnvironmentKind::Local,
            local: config,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: SandboxScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_exec_mode(mut self, mode: ExecPolicyMode) -> Self {
        self.exec.mode = Some(mode);
        self
    }

    pub fn with_allowlist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec.allowlist = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file_approval(mut self, mode: FileApprovalMode) -> Self {
        self.file_approval = Some(mode);
        self
    }

    pub fn with_idle_destroy_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.idle_destroy_timeout = timeout.into();
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolName>) -> Self {
        self.tools = Some(tools.into_iter().collect());
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Reject configurations that can never produce a working sandbox.
    pub fn validate(&self) -> Result<()> {
        if self.env == EnvironmentKind::E2b {
            return Err(Error::UnsupportedEnvironment(self.env.to_string()));
        }
        self.idle_timeout()?;
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(Error::config("sandbox id must not be empty"));
            }
        }
        if self.exec.timeout_secs == 0 {
            return Err(Error::config("exec.timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Result<Duration> {
        parse_duration(&self.idle_destroy_timeout)
    }

    /// Effective exec policy: local sandboxes ask by default, containers don't.
    pub fn exec_mode(&self) -> ExecPolicyMode {
        self.exec.mode.unwrap_or(match self.env {
            EnvironmentKind::Local => ExecPolicyMode::ApprovalAlways,
            _ => ExecPolicyMode::AllowAlways,
        })
    }

    /// Effective file approval policy, with the same per-environment defaults.
    pub fn file_approval_mode(&self) -> FileApprovalMode {
        self.file_approval.unwrap_or(match self.env {
            EnvironmentKind::Local => FileApprovalMode::ApprovalAlways,
            _ => FileApprovalMode::AllowAlways,
        })
    }

    /// Whether `tool` is exposed by this configuration.
    pub fn tool_enabled(&self, tool: ToolName) -> bool {
        self.tools
            .as_ref()
            .map_or(true, |tools| tools.contains(&tool))
    }
}
