//! Docker container environment.
//!
//! The host workspace directory is bind-mounted at the container workdir.
//! Commands run through the container driver; file operations translate
//! container paths to host paths and act on the mount directly.

use crate::config::DockerConfig;
use crate::driver::{BindMount, ContainerDriver, ContainerExec, ContainerSpec, DriverError};
use crate::error::Error;
use crate::search;
use crate::{
    Environment, EnvironmentInfo, EnvironmentKind, ExecOptions, ExecResult, GlobOptions,
    GrepMatch, GrepOptions, Result,
};
use async_trait::async_trait;
use sandbox_security::{assert_no_symlink_escape, assert_within, normalize, translate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Timeout for the one-off setup command.
const SETUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs commands inside a dedicated, long-running container.
pub struct DockerEnvironment {
    name: String,
    config: DockerConfig,
    workspace_dir: PathBuf,
    driver: Arc<dyn ContainerDriver>,
    sandbox_id: Option<String>,
    container_id: RwLock<Option<String>>,
}

impl DockerEnvironment {
    /// Create an environment for container `name`, mounting `workspace_dir`.
    ///
    /// Nothing is started until [`Environment::initialize`] is called.
    pub fn new(
        name: impl Into<String>,
        config: DockerConfig,
        workspace_dir: impl Into<PathBuf>,
        driver: Arc<dyn ContainerDriver>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            workspace_dir: normalize(workspace_dir.into()),
            driver,
            sandbox_id: None,
            container_id: RwLock::new(None),
        }
    }

    pub fn with_sandbox_id(mut self, id: impl Into<String>) -> Self {
        self.sandbox_id = Some(id.into());
        self
    }

    pub fn container_name(&self) -> &str {
        &self.name
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Id of the running container, if initialized.
    pub async fn container_id(&self) -> Option<String> {
        self.container_id.read().await.clone()
    }

    /// Map a container path (absolute, or relative to the workdir) to the
    /// host path behind the bind mount. Paths outside the workdir are refused.
    pub fn to_host_path(&self, container_path: &str) -> Result<PathBuf> {
        Ok(translate(
            container_path,
            &self.config.container_workdir,
            &self.workspace_dir,
        )?)
    }

    /// Map a host path inside the workspace to its container path.
    pub fn to_container_path(&self, host_path: impl AsRef<Path>) -> Result<String> {
        let path = translate(
            host_path,
            &self.workspace_dir,
            &self.config.container_workdir,
        )?;
        Ok(path.display().to_string())
    }

    /// Host path for a file operation, with symlinks checked on the host side.
    fn host_path_checked(&self, container_path: &str) -> Result<PathBuf> {
        let host = self.to_host_path(container_path)?;
        assert_no_symlink_escape(&host, &self.workspace_dir)?;
        Ok(host)
    }

    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.name.clone(),
            image: self.config.image.clone(),
            workdir: self.config.container_workdir.clone(),
            mounts: vec![BindMount {
                host: self.workspace_dir.clone(),
                container: self.config.container_workdir.clone(),
            }],
            network: self.config.network.clone(),
            memory: self.config.memory.clone(),
            env: self.config.env.clone(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }

    async fn running_container(&self) -> Result<String> {
        self.container_id
            .read()
            .await
            .clone()
            .ok_or(Error::Uninitialized)
    }

    async fn discard_container(&self, container: &str) {
        if let Err(e) = self.driver.remove(container).await {
            warn!("Failed to remove container {}: {}", container, e);
        }
    }

    async fn run_setup(&self, container: &str, setup: &str) -> Result<()> {
        info!("Running setup command in {}", self.name);
        let request = ContainerExec {
            command: vec!["sh".to_string(), "-c".to_string(), setup.to_string()],
            workdir: Some(self.config.container_workdir.clone()),
            env: Default::default(),
            timeout: SETUP_TIMEOUT,
        };
        let output = self.driver.exec(container, &request).await?;
        if output.exit_code != 0 {
            return Err(Error::CommandFailed {
                command: setup.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr_lossy().trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Docker
    }

    async fn initialize(&self) -> Result<()> {
        let mut slot = self.container_id.write().await;
        if slot.is_some() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.workspace_dir).await?;

        info!(
            "Creating container {} from {} (network: {})",
            self.name, self.config.image, self.config.network
        );
        let container = self.driver.create(&self.container_spec()).await?;

        if let Err(e) = self.driver.start(&container).await {
            self.discard_container(&container).await;
            return Err(e.into());
        }

        if let Some(setup) = &self.config.setup_command {
            if let Err(e) = self.run_setup(&container, setup).await {
                self.discard_container(&container).await;
                return Err(e);
            }
        }

        *slot = Some(container);
        Ok(())
    }

    async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult> {
        let container = self.running_container().await?;

        let workdir = match &options.cwd {
            Some(cwd) => assert_within(cwd, &self.config.container_workdir)?,
            None => PathBuf::from(&self.config.container_workdir),
        };
        debug!(command, container = %container, "docker exec");

        let request = ContainerExec {
            command: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
            workdir: Some(workdir.display().to_string()),
            env: options.env.clone(),
            timeout: options.timeout(),
        };

        let started = Instant::now();
        let output = self.driver.exec(&container, &request).await?;
        Ok(ExecResult::from_output(
            output,
            started.elapsed(),
            options.max_output_chars(),
        ))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let host = self.host_path_checked(path)?;
        let bytes = tokio::fs::read(&host).await?;
        if sandbox_output::is_binary(&bytes) {
            return Err(Error::BinaryFile(path.to_string()));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let host = self.host_path_checked(path)?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host, content).await?;
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let host = self.host_path_checked(path)?;
        Ok(tokio::fs::try_exists(&host).await?)
    }

    async fn glob(&self, pattern: &str, options: GlobOptions) -> Result<Vec<String>> {
        let root = match &options.cwd {
            Some(cwd) => assert_within(cwd, &self.config.container_workdir)?,
            None => PathBuf::from(&self.config.container_workdir),
        };
        let root = root.display().to_string();
        let listing = self
            .exec(
                &search::find_command(&root),
                ExecOptions::new().with_max_output_chars(usize::MAX),
            )
            .await?;
        search::collect_glob_matches(&listing.stdout, &root, pattern)
    }

    async fn grep(&self, pattern: &str, options: GrepOptions) -> Result<Vec<GrepMatch>> {
        let target = match &options.path {
            Some(path) => {
                assert_within(path, &self.config.container_workdir)?;
                path.clone()
            }
            None => ".".to_string(),
        };
        let command = search::grep_command(pattern, &target, &options);
        let result = self
            .exec(&command, ExecOptions::new().with_max_output_chars(usize::MAX))
            .await?;
        search::collect_grep_matches(&command, &result, &options)
    }

    async fn destroy(&self) -> Result<()> {
        let Some(container) = self.container_id.write().await.take() else {
            return Ok(());
        };

        info!("Destroying container {}", self.name);
        match self.driver.stop(&container).await {
            Ok(()) | Err(DriverError::NotFound(_)) => {}
            Err(e) => debug!("Stopping {} failed, removing anyway: {}", container, e),
        }
        match self.driver.remove(&container).await {
            Ok(()) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn get_cwd(&self) -> String {
        self.config.container_workdir.clone()
    }

    fn get_info(&self) -> EnvironmentInfo {
        EnvironmentInfo {
            kind: EnvironmentKind::Docker,
            cwd: self.get_cwd(),
            sandbox_id: self.sandbox_id.clone(),
            container_name: Some(self.name.clone()),
            image: Some(self.config.image.clone()),
            workspace_dir: Some(self.workspace_dir.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DockerCli;

    fn environment(workspace_dir: &str) -> DockerEnvironment {
        DockerEnvironment::new(
            "polos-sandbox-test",
            DockerConfig::default(),
            workspace_dir,
            Arc::new(DockerCli::new()),
        )
    }

    #[test]
    fn test_to_host_path() {
        let env = environment("/host/ws");
        assert_eq!(
            env.to_host_path("/workspace/x.txt").unwrap(),
            PathBuf::from("/host/ws/x.txt")
        );
        assert_eq!(
            env.to_host_path("dir/y.txt").unwrap(),
            PathBuf::from("/host/ws/dir/y.txt")
        );
        assert!(env
            .to_host_path("/workspace/../../etc/passwd")
            .unwrap_err()
            .is_security_violation());
        assert!(env.to_host_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_to_container_path() {
        let env = environment("/host/ws");
        assert_eq!(
            env.to_container_path("/host/ws/a/b.txt").unwrap(),
            "/workspace/a/b.txt"
        );
        assert!(env.to_container_path("/host/other/b.txt").is_err());
    }

    #[tokio::test]
    async fn test_exec_before_initialize_fails() {
        let env = environment("/host/ws");
        let err = env.exec("true", ExecOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::Uninitialized));
    }

    #[tokio::test]
    async fn test_destroy_without_container_is_noop() {
        let env = environment("/host/ws");
        env.destroy().await.unwrap();
        env.destroy().await.unwrap();
    }

    #[test]
    fn test_info_without_initialize() {
        let env = environment("/host/ws").with_sandbox_id("sandbox-0badc0de");
        let info = env.get_info();
        assert_eq!(info.kind, EnvironmentKind::Docker);
        assert_eq!(info.cwd, "/workspace");
        assert_eq!(info.container_name.as_deref(), Some("polos-sandbox-test"));
        assert_eq!(info.image.as_deref(), Some("ubuntu:24.04"));
        assert_eq!(info.workspace_dir, Some(PathBuf::from("/host/ws")));
    }
}
