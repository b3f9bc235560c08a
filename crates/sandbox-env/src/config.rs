//! Per-environment configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Default image for Docker sandboxes.
pub const DEFAULT_DOCKER_IMAGE: &str = "ubuntu:24.04";

/// Default mount point of the workspace inside the container.
pub const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";

/// Default Docker network; `none` disables networking entirely.
pub const DEFAULT_DOCKER_NETWORK: &str = "none";

/// Kind of environment a sandbox runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// Commands run as host processes.
    Local,
    /// Commands run inside a Docker container.
    #[default]
    Docker,
    /// Remote E2B sandboxes. Accepted in configuration but not provided here.
    E2b,
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Docker => "docker",
            Self::E2b => "e2b",
        };
        f.write_str(name)
    }
}

/// Configuration for host-process environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Working directory for commands and relative paths.
    pub cwd: Option<PathBuf>,
    /// When set, file operations may not leave this directory.
    pub path_restriction: Option<PathBuf>,
}

/// Configuration for Docker environments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub image: String,
    /// Host directory bind-mounted into the container.
    pub workspace_dir: Option<PathBuf>,
    pub container_workdir: String,
    pub network: String,
    /// Memory limit in Docker syntax, e.g. `512m`.
    pub memory: Option<String>,
    /// Shell command run once after the container starts.
    pub setup_command: Option<String>,
    /// Extra environment variables for the container.
    pub env: BTreeMap<String, String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_DOCKER_IMAGE.to_string(),
            workspace_dir: None,
            container_workdir: DEFAULT_CONTAINER_WORKDIR.to_string(),
            network: DEFAULT_DOCKER_NETWORK.to_string(),
            memory: None,
            setup_command: None,
            env: BTreeMap::new(),
        }
    }
}

impl DockerConfig {
    /// Set the image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the host workspace directory
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    /// Set the memory limit
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    /// Set the setup command
    pub fn with_setup_command(mut self, command: impl Into<String>) -> Self {
        self.setup_command = Some(command.into());
        self
    }
}
