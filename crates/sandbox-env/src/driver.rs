//! Container driver abstraction and the Docker CLI implementation.
//!
//! Drivers report a missing container as [`DriverError::NotFound`] so that
//! callers can tell a dead sandbox apart from other failures without looking
//! at error messages.

use crate::error::Error;
use crate::process::{run_with_timeout, ProcessOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Timeout for container management commands (create/start/stop/remove).
const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Result type for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors reported by a container driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No such container: {0}")]
    NotFound(String),

    #[error("Container operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{operation} failed: {message}")]
    Failed {
        operation: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotFound(message) => Error::ContainerUnavailable(message),
            DriverError::Timeout(timeout) => Error::Timeout(timeout),
            DriverError::Failed { operation, message } => Error::Driver {
                operation: operation.to_string(),
                message,
            },
            DriverError::Io(e) => Error::Io(e),
        }
    }
}

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: String,
}

/// Everything needed to create a long-running sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub workdir: String,
    pub mounts: Vec<BindMount>,
    pub network: String,
    pub memory: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Keep-alive command for the container's main process.
    pub command: Vec<String>,
}

/// A command to run inside an existing container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExec {
    pub command: Vec<String>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Operations a container runtime must provide.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create a container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<String>;

    async fn start(&self, container: &str) -> DriverResult<()>;

    /// Run a command in the container; a non-zero exit is not an error.
    async fn exec(&self, container: &str, request: &ContainerExec) -> DriverResult<ProcessOutput>;

    async fn stop(&self, container: &str) -> DriverResult<()>;

    async fn remove(&self, container: &str) -> DriverResult<()>;
}

/// Driver that shells out to the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use a different CLI binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(
        &self,
        operation: &'static str,
        args: Vec<String>,
        timeout: Duration,
    ) -> DriverResult<ProcessOutput> {
        debug!("{} {}", self.binary, args.join(" "));
        let mut command = Command::new(&self.binary);
        command.args(&args);
        run_with_timeout(command, timeout).await.map_err(|e| match e {
            Error::Timeout(timeout) => DriverError::Timeout(timeout),
            Error::Io(e) => DriverError::Io(e),
            other => DriverError::Failed {
                operation,
                message: other.to_string(),
            },
        })
    }

    async fn run_checked(
        &self,
        operation: &'static str,
        args: Vec<String>,
    ) -> DriverResult<ProcessOutput> {
        let output = self.run(operation, args, MANAGEMENT_TIMEOUT).await?;
        if output.exit_code != 0 {
            return Err(classify_failure(operation, &output.stderr_lossy()));
        }
        Ok(output)
    }
}

/// Map a failed CLI invocation to a driver error.
///
/// The CLI only exposes the daemon's message, so this is the one place where
/// "container is gone" is recognized by text.
pub fn classify_failure(operation: &'static str, stderr: &str) -> DriverError {
    let message = stderr.trim().to_string();
    if is_missing_container_message(&message) {
        DriverError::NotFound(message)
    } else {
        DriverError::Failed { operation, message }
    }
}

fn is_missing_container_message(message: &str) -> bool {
    const MARKERS: [&str; 3] = ["No such container", "is not running", "No such object"];
    (message.starts_with("Error response from daemon")
        && MARKERS.iter().any(|marker| message.contains(marker)))
        || message.starts_with("Error: No such container")
}

fn env_args(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter()
        .flat_map(|(key, value)| ["-e".to_string(), format!("{key}={value}")])
        .collect()
}

#[async_trait]
impl ContainerDriver for DockerCli {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "-w".to_string(),
            spec.workdir.clone(),
            "--network".to_string(),
            spec.network.clone(),
        ];
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.host.display(), mount.container));
        }
        if let Some(memory) = &spec.memory {
            args.extend(["--memory".to_string(), memory.clone()]);
        }
        args.extend(env_args(&spec.env));
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let output = self.run_checked("docker create", args).await?;
        Ok(output.stdout_lossy().trim().to_string())
    }

    async fn start(&self, container: &str) -> DriverResult<()> {
        self.run_checked("docker start", vec!["start".to_string(), container.to_string()])
            .await
            .map(|_| ())
    }

    async fn exec(&self, container: &str, request: &ContainerExec) -> DriverResult<ProcessOutput> {
        let mut args = vec!["exec".to_string()];
        if let Some(workdir) = &request.workdir {
            args.extend(["-w".to_string(), workdir.clone()]);
        }
        args.extend(env_args(&request.env));
        args.push(container.to_string());
        args.extend(request.command.iter().cloned());

        let output = self.run("docker exec", args, request.timeout).await?;
        if output.exit_code != 0 && is_missing_container_message(output.stderr_lossy().trim()) {
            return Err(DriverError::NotFound(output.stderr_lossy().trim().to_string()));
        }
        Ok(output)
    }

    async fn stop(&self, container: &str) -> DriverResult<()> {
        self.run_checked(
            "docker stop",
            vec![
                "stop".to_string(),
                "-t".to_string(),
                "1".to_string(),
                container.to_string(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn remove(&self, container: &str) -> DriverResult<()> {
        self.run_checked(
            "docker rm",
            vec!["rm".to_string(), "-f".to_string(), container.to_string()],
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_container() {
        let err = classify_failure(
            "docker exec",
            "Error response from daemon: No such container: polos-sandbox-1234abcd\n",
        );
        assert!(matches!(err, DriverError::NotFound(_)));

        let err = classify_failure(
            "docker exec",
            "Error response from daemon: container 4f1c is not running",
        );
        assert!(matches!(err, DriverError::NotFound(_)));
    }

    #[test]
    fn test_classify_other_failures() {
        let err = classify_failure(
            "docker create",
            "Unable to find image 'nope:latest' locally",
        );
        assert!(matches!(err, DriverError::Failed { .. }));

        // Command output that merely mentions the phrase is not a daemon error.
        let err = classify_failure("docker exec", "grep: No such container here");
        assert!(matches!(err, DriverError::Failed { .. }));
    }

    #[test]
    fn test_not_found_maps_to_container_unavailable() {
        let err: Error = DriverError::NotFound("gone".into()).into();
        assert!(err.is_container_gone());

        let err: Error = DriverError::Failed {
            operation: "docker start",
            message: "boom".into(),
        }
        .into();
        assert!(!err.is_container_gone());
    }
}
