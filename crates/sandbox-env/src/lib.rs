//! Execution environments for agent sandboxes.
//!
//! An [`Environment`] is where agent-issued shell commands and file
//! operations actually happen: either host processes confined to a working
//! directory ([`LocalEnvironment`]) or a long-running Docker container with the
//! workspace bind-mounted into it ([`DockerEnvironment`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod config;
pub mod docker;
pub mod driver;
pub mod error;
pub mod local;
pub mod process;
mod search;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use config::{DockerConfig, EnvironmentKind, LocalConfig};
pub use docker::DockerEnvironment;
pub use driver::{ContainerDriver, DockerCli, DriverError};
pub use error::Error;
pub use local::LocalEnvironment;
pub use sandbox_output::GrepMatch;

/// Timeout applied to commands that do not specify one.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-call options for [`Environment::exec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Working directory, relative to the environment's cwd when not absolute.
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Cap on characters kept from each output stream.
    pub max_output_chars: Option<usize>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = Some(max);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT)
    }

    pub fn max_output_chars(&self) -> usize {
        self.max_output_chars
            .unwrap_or(sandbox_output::DEFAULT_MAX_OUTPUT_CHARS)
    }
}

/// Outcome of a command. A non-zero exit code is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Whether either stream was truncated.
    pub truncated: bool,
}

impl ExecResult {
    pub(crate) fn from_output(
        output: process::ProcessOutput,
        elapsed: Duration,
        max_output_chars: usize,
    ) -> Self {
        let stdout = sandbox_output::truncate_output(&output.stdout_lossy(), max_output_chars);
        let stderr = sandbox_output::truncate_output(&output.stderr_lossy(), max_output_chars);
        Self {
            exit_code: output.exit_code,
            stdout: stdout.text,
            stderr: stderr.text,
            duration_ms: elapsed.as_millis() as u64,
            truncated: stdout.truncated || stderr.truncated,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options for [`Environment::glob`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobOptions {
    /// Directory to search from; defaults to the environment's cwd.
    pub cwd: Option<String>,
}

/// Options for [`Environment::grep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrepOptions {
    /// File or directory to search; defaults to the environment's cwd.
    pub path: Option<String>,
    /// Only search files whose name matches this glob, e.g. `*.rs`.
    pub include: Option<String>,
    pub ignore_case: bool,
    pub max_results: Option<usize>,
}

/// Static description of an environment, available before initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub kind: EnvironmentKind,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

/// A place where sandboxed commands and file operations run.
///
/// Paths are strings as seen from inside the environment: host paths for local
/// environments, container paths for Docker.
#[async_trait]
pub trait Environment: Send + Sync {
    fn kind(&self) -> EnvironmentKind;

    /// Prepare the environment. Calling it again is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// Run `command` through `sh -c`.
    async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Write `content` to `path`, creating missing parent directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// List files matching `pattern`, relative to the search directory.
    async fn glob(&self, pattern: &str, options: GlobOptions) -> Result<Vec<String>>;

    /// Search file contents for the extended regular expression `pattern`.
    async fn grep(&self, pattern: &str, options: GrepOptions) -> Result<Vec<GrepMatch>>;

    /// Release the environment's resources. Calling it again is a no-op.
    async fn destroy(&self) -> Result<()>;

    fn get_cwd(&self) -> String;

    fn get_info(&self) -> EnvironmentInfo;
}
