//! A single sandbox and the lazily created environment it owns.

use crate::config::{SandboxScope, SandboxToolsConfig};
use crate::error::Error;
use crate::workspace::default_workspaces_dir;
use crate::Result;
use sandbox_env::{
    ContainerDriver, DockerCli, DockerEnvironment, Environment, EnvironmentKind, ExecOptions,
    LocalEnvironment,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Minimum time between two container health probes.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Uninitialized,
    Initializing,
    Ready,
    /// The container was found missing and is about to be recreated.
    Degraded,
    Recreating,
    Destroyed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Recreating => "recreating",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Point-in-time description of a sandbox, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxSummary {
    pub id: String,
    pub scope: SandboxScope,
    pub env: EnvironmentKind,
    pub state: SandboxState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub active_executions: usize,
    pub idle_secs: u64,
}

/// One sandbox: identity, ownership bookkeeping and an environment that is
/// only created on first use.
pub struct ManagedSandbox {
    id: String,
    scope: SandboxScope,
    worker_id: String,
    project_id: String,
    session_id: Option<String>,
    config: SandboxToolsConfig,
    workspaces_dir: PathBuf,
    driver: Arc<dyn ContainerDriver>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    state: RwLock<SandboxState>,
    active_execution_ids: RwLock<HashSet<String>>,
    last_activity_at: RwLock<Instant>,
    last_health_check_at: RwLock<Option<Instant>>,
    environment: Mutex<Option<Arc<dyn Environment>>>,
}

impl ManagedSandbox {
    pub fn new(
        id: impl Into<String>,
        config: SandboxToolsConfig,
        worker_id: impl Into<String>,
        project_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope: config.scope,
            worker_id: worker_id.into(),
            project_id: project_id.into(),
            session_id,
            config,
            workspaces_dir: default_workspaces_dir(),
            driver: Arc::new(DockerCli::new()),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            state: RwLock::new(SandboxState::Uninitialized),
            active_execution_ids: RwLock::new(HashSet::new()),
            last_activity_at: RwLock::new(Instant::now()),
            last_health_check_at: RwLock::new(None),
            environment: Mutex::new(None),
        }
    }

    /// Root under which per-sandbox workspace directories are created.
    pub fn with_workspaces_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspaces_dir = dir.into();
        self
    }

    /// Driver used for Docker sandboxes.
    pub fn with_container_driver(mut self, driver: Arc<dyn ContainerDriver>) -> Self {
        self.driver = driver;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> SandboxScope {
        self.scope
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn config(&self) -> &SandboxToolsConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SandboxState {
        *self.state.read().await
    }

    /// Name of the backing container for Docker sandboxes.
    pub fn container_name(&self) -> String {
        format!("polos-{}", self.id)
    }

    /// Host directory holding this sandbox's files:
    /// `{workspaces_dir}/{project_id}/{session_id or sandbox_id}`.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspaces_dir
            .join(&self.project_id)
            .join(self.session_id.as_deref().unwrap_or(&self.id))
    }

    pub async fn attach_execution(&self, execution_id: &str) {
        self.active_execution_ids
            .write()
            .await
            .insert(execution_id.to_string());
    }

    /// Returns whether the execution was attached.
    pub async fn detach_execution(&self, execution_id: &str) -> bool {
        self.active_execution_ids.write().await.remove(execution_id)
    }

    pub async fn has_execution(&self, execution_id: &str) -> bool {
        self.active_execution_ids.read().await.contains(execution_id)
    }

    pub async fn active_execution_ids(&self) -> HashSet<String> {
        self.active_execution_ids.read().await.clone()
    }

    pub async fn last_activity_at(&self) -> Instant {
        *self.last_activity_at.read().await
    }

    pub async fn touch(&self) {
        *self.last_activity_at.write().await = Instant::now();
    }

    pub async fn summary(&self) -> SandboxSummary {
        SandboxSummary {
            id: self.id.clone(),
            scope: self.scope,
            env: self.config.env,
            state: self.state().await,
            session_id: self.session_id.clone(),
            active_executions: self.active_execution_ids.read().await.len(),
            idle_secs: self.last_activity_at().await.elapsed().as_secs(),
        }
    }

    /// The sandbox's environment, created and initialized on first use.
    ///
    /// Docker environments are health-checked first; a vanished container
    /// is replaced transparently.
    pub async fn get_environment(&self) -> Result<Arc<dyn Environment>> {
        self.ensure_live()?;
        let mut slot = self.environment.lock().await;
        // A destroy may have completed while we waited for the slot.
        self.ensure_live()?;

        self.health_check_locked(&mut slot).await;

        let environment = match slot.as_ref() {
            Some(environment) => environment.clone(),
            None => {
                let environment = self.start_environment().await?;
                *slot = Some(environment.clone());
                environment
            }
        };

        self.touch().await;
        Ok(environment)
    }

    /// Probe a Docker container and recreate the environment if it is gone.
    pub async fn health_check(&self) {
        let mut slot = self.environment.lock().await;
        self.health_check_locked(&mut slot).await;
    }

    /// Drop the current environment so the next use builds a fresh one.
    pub async fn recreate(&self) {
        let mut slot = self.environment.lock().await;
        self.recreate_locked(&mut slot).await;
    }

    /// Tear down the environment. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let mut slot = self.environment.lock().await;
        if let Some(environment) = slot.take() {
            if let Err(e) = environment.destroy().await {
                warn!("Error destroying environment of sandbox {}: {}", self.id, e);
            }
        }
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            info!("Destroyed sandbox {}", self.id);
        }
        self.initialized.store(false, Ordering::SeqCst);
        self.set_state(SandboxState::Destroyed).await;
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(Error::Destroyed(self.id.clone()))
        } else {
            Ok(())
        }
    }

    async fn set_state(&self, state: SandboxState) {
        *self.state.write().await = state;
    }

    async fn start_environment(&self) -> Result<Arc<dyn Environment>> {
        self.set_state(SandboxState::Initializing).await;
        let started = async {
            let environment = self.build_environment().await?;
            environment.initialize().await?;
            Ok::<_, Error>(environment)
        }
        .await;

        match started {
            Ok(environment) => {
                self.initialized.store(true, Ordering::SeqCst);
                self.set_state(SandboxState::Ready).await;
                info!(
                    "Sandbox {} ready ({}, scope {})",
                    self.id, self.config.env, self.scope
                );
                Ok(environment)
            }
            Err(e) => {
                self.set_state(SandboxState::Uninitialized).await;
                Err(e)
            }
        }
    }

    async fn build_environment(&self) -> Result<Arc<dyn Environment>> {
        match self.config.env {
            EnvironmentKind::Local => {
                let local = &self.config.local;
                let environment = match &local.cwd {
                    Some(cwd) => {
                        let environment = LocalEnvironment::new(cwd);
                        match &local.path_restriction {
                            Some(root) => environment.with_path_restriction(root),
                            None => environment,
                        }
                    }
                    None => {
                        let workspace = self.workspace_dir();
                        tokio::fs::create_dir_all(&workspace).await?;
                        let root = local
                            .path_restriction
                            .clone()
                            .unwrap_or_else(|| workspace.clone());
                        LocalEnvironment::new(workspace).with_path_restriction(root)
                    }
                };
                Ok(Arc::new(environment.with_sandbox_id(&self.id)))
            }
            EnvironmentKind::Docker => {
                let docker = self.config.docker.clone();
                let workspace = docker
                    .workspace_dir
                    .clone()
                    .unwrap_or_else(|| self.workspace_dir());
                let environment =
                    DockerEnvironment::new(self.container_name(), docker, workspace, self.driver.clone())
                        .with_sandbox_id(&self.id);
                Ok(Arc::new(environment))
            }
            kind => Err(Error::UnsupportedEnvironment(kind.to_string())),
        }
    }

    async fn health_check_locked(&self, slot: &mut Option<Arc<dyn Environment>>) {
        let Some(environment) = slot.as_ref() else {
            return;
        };
        if environment.kind() != EnvironmentKind::Docker {
            return;
        }
        if let Some(last) = *self.last_health_check_at.read().await {
            if last.elapsed() < HEALTH_CHECK_INTERVAL {
                return;
            }
        }

        let probe = environment
            .exec("true", ExecOptions::new().with_timeout(HEALTH_PROBE_TIMEOUT))
            .await;
        match probe {
            Ok(_) => {
                *self.last_health_check_at.write().await = Some(Instant::now());
            }
            Err(e) if e.is_container_gone() => {
                warn!("Container for sandbox {} is gone, recreating: {}", self.id, e);
                self.set_state(SandboxState::Degraded).await;
                self.recreate_locked(slot).await;
            }
            Err(e) => debug!("Transient health check failure for {}: {}", self.id, e),
        }
    }

    async fn recreate_locked(&self, slot: &mut Option<Arc<dyn Environment>>) {
        self.set_state(SandboxState::Recreating).await;
        if let Some(environment) = slot.take() {
            if let Err(e) = environment.destroy().await {
                debug!("Ignoring teardown error while recreating {}: {}", self.id, e);
            }
        }
        *self.last_health_check_at.write().await = None;
        self.initialized.store(false, Ordering::SeqCst);
        self.destroyed.store(false, Ordering::SeqCst);
        self.set_state(SandboxState::Uninitialized).await;
        info!("Sandbox {} reset, environment will be recreated", self.id);
    }
}

impl fmt::Debug for ManagedSandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSandbox")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("worker_id", &self.worker_id)
            .field("project_id", &self.project_id)
            .field("session_id", &self.session_id)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
