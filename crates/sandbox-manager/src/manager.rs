//! Worker-wide registry of sandboxes.

use crate::config::{
    SandboxScope, SandboxToolsConfig, DEFAULT_IDLE_DESTROY_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
};
use crate::duration::parse_duration;
use crate::error::Error;
use crate::managed::{ManagedSandbox, SandboxSummary};
use crate::workspace::default_workspaces_dir;
use crate::Result;
use sandbox_env::{ContainerDriver, DockerCli};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generate a sandbox id of the form `sandbox-<8 hex>`.
pub fn generate_sandbox_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("sandbox-{}", &uuid[..8])
}

/// Creates, shares and reclaims the sandboxes of one worker.
///
/// Execution-scoped sandboxes live exactly as long as their execution.
/// Session-scoped sandboxes are shared by every execution of a session and
/// outlive them until destroyed explicitly or reclaimed by the idle sweep.
pub struct SandboxManager {
    worker_id: String,
    project_id: String,
    workspaces_dir: PathBuf,
    driver: Arc<dyn ContainerDriver>,
    sandboxes: RwLock<HashMap<String, Arc<ManagedSandbox>>>,
    session_sandboxes: RwLock<HashMap<String, String>>,
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl SandboxManager {
    pub fn new(worker_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            project_id: project_id.into(),
            workspaces_dir: default_workspaces_dir(),
            driver: Arc::new(DockerCli::new()),
            sandboxes: RwLock::new(HashMap::new()),
            session_sandboxes: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            sweep_task: Mutex::new(None),
        }
    }

    /// Root for sandbox workspace directories.
    pub fn with_workspaces_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspaces_dir = dir.into();
        self
    }

    /// Container driver handed to Docker sandboxes.
    pub fn with_container_driver(mut self, driver: Arc<dyn ContainerDriver>) -> Self {
        self.driver = driver;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn workspaces_dir(&self) -> &Path {
        &self.workspaces_dir
    }

    /// Sandbox for `execution_id` under `config`, creating it if needed.
    ///
    /// The execution is attached to the returned sandbox.
    pub async fn get_or_create_sandbox(
        &self,
        config: &SandboxToolsConfig,
        execution_id: &str,
        session_id: Option<&str>,
    ) -> Result<Arc<ManagedSandbox>> {
        config.validate()?;

        match config.scope {
            SandboxScope::Execution => {
                let sandbox = self.create_sandbox(config, session_id).await?;
                sandbox.attach_execution(execution_id).await;
                Ok(sandbox)
            }
            SandboxScope::Session => {
                let session_id = session_id
                    .filter(|id| !id.is_empty())
                    .ok_or(Error::MissingSessionId)?;
                let sandbox = self.get_or_create_session_sandbox(config, session_id).await?;
                sandbox.attach_execution(execution_id).await;
                Ok(sandbox)
            }
        }
    }

    async fn get_or_create_session_sandbox(
        &self,
        config: &SandboxToolsConfig,
        session_id: &str,
    ) -> Result<Arc<ManagedSandbox>> {
        if let Some(sandbox) = self.live_session_sandbox(session_id).await {
            return Ok(sandbox);
        }

        let lock = self.creation_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.live_session_sandbox(session_id).await {
                Some(sandbox) => Ok(sandbox),
                None => {
                    let created = self.create_sandbox(config, Some(session_id)).await;
                    if let Ok(sandbox) = &created {
                        self.session_sandboxes
                            .write()
                            .await
                            .insert(session_id.to_string(), sandbox.id().to_string());
                    }
                    created
                }
            }
        };
        self.release_creation_lock(session_id, lock).await;
        result
    }

    async fn live_session_sandbox(&self, session_id: &str) -> Option<Arc<ManagedSandbox>> {
        let sandbox_id = self.session_sandboxes.read().await.get(session_id).cloned()?;
        self.sandboxes
            .read()
            .await
            .get(&sandbox_id)
            .filter(|sandbox| !sandbox.is_destroyed())
            .cloned()
    }

    async fn create_sandbox(
        &self,
        config: &SandboxToolsConfig,
        session_id: Option<&str>,
    ) -> Result<Arc<ManagedSandbox>> {
        let id = config.id.clone().unwrap_or_else(generate_sandbox_id);
        let sandbox = Arc::new(
            ManagedSandbox::new(
                id.clone(),
                config.clone(),
                self.worker_id.clone(),
                self.project_id.clone(),
                session_id.map(str::to_string),
            )
            .with_workspaces_dir(self.workspaces_dir.clone())
            .with_container_driver(self.driver.clone()),
        );

        let mut sandboxes = self.sandboxes.write().await;
        if sandboxes.get(&id).is_some_and(|existing| !existing.is_destroyed()) {
            return Err(Error::config(format!(
                "sandbox id '{id}' is already in use"
            )));
        }
        sandboxes.insert(id.clone(), sandbox.clone());
        drop(sandboxes);

        info!(
            "Created {} sandbox {} ({}{})",
            config.scope,
            id,
            config.env,
            session_id
                .map(|s| format!(", session {s}"))
                .unwrap_or_default()
        );
        Ok(sandbox)
    }

    async fn creation_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.creation_locks
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Forget the lock for `key` unless another task is still waiting on it.
    async fn release_creation_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.creation_locks.lock().await;
        // One reference in the table, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Detach `execution_id` from every sandbox it uses, destroying
    /// execution-scoped sandboxes that are left without executions.
    pub async fn on_execution_complete(&self, execution_id: &str) {
        let sandboxes: Vec<Arc<ManagedSandbox>> =
            self.sandboxes.read().await.values().cloned().collect();

        for sandbox in sandboxes {
            if !sandbox.detach_execution(execution_id).await {
                continue;
            }
            debug!("Execution {} detached from {}", execution_id, sandbox.id());
            if sandbox.scope() == SandboxScope::Execution
                && sandbox.active_execution_ids().await.is_empty()
            {
                self.destroy_sandbox(sandbox.id()).await;
            }
        }
    }

    /// Destroy and unregister one sandbox. Returns whether it was tracked.
    pub async fn destroy_sandbox(&self, sandbox_id: &str) -> bool {
        let Some(sandbox) = self.sandboxes.write().await.remove(sandbox_id) else {
            return false;
        };
        if let Some(session_id) = sandbox.session_id() {
            let mut sessions = self.session_sandboxes.write().await;
            if sessions.get(session_id).map(String::as_str) == Some(sandbox_id) {
                sessions.remove(session_id);
            }
        }
        sandbox.destroy().await;
        true
    }

    /// Destroy every tracked sandbox.
    pub async fn destroy_all(&self) {
        let sandboxes: Vec<Arc<ManagedSandbox>> =
            self.sandboxes.write().await.drain().map(|(_, s)| s).collect();
        self.session_sandboxes.write().await.clear();

        if !sandboxes.is_empty() {
            info!("Destroying {} sandbox(es)", sandboxes.len());
        }
        futures::future::join_all(sandboxes.iter().map(|sandbox| sandbox.destroy())).await;
    }

    pub async fn get_sandbox(&self, sandbox_id: &str) -> Option<Arc<ManagedSandbox>> {
        self.sandboxes.read().await.get(sandbox_id).cloned()
    }

    pub async fn get_session_sandbox(&self, session_id: &str) -> Option<Arc<ManagedSandbox>> {
        let sandbox_id = self.session_sandboxes.read().await.get(session_id).cloned()?;
        self.get_sandbox(&sandbox_id).await
    }

    /// Summaries of all tracked sandboxes, ordered by id.
    pub async fn list_sandboxes(&self) -> Vec<SandboxSummary> {
        let sandboxes: Vec<Arc<ManagedSandbox>> =
            self.sandboxes.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(sandboxes.len());
        for sandbox in sandboxes {
            summaries.push(sandbox.summary().await);
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn sandbox_count(&self) -> usize {
        self.sandboxes.read().await.len()
    }

    /// Destroy sandboxes idle for longer than their configured timeout.
    ///
    /// Returns the ids of the sandboxes that were reclaimed.
    pub async fn sweep_idle_sandboxes(&self) -> Vec<String> {
        let sandboxes: Vec<Arc<ManagedSandbox>> =
            self.sandboxes.read().await.values().cloned().collect();
        let now = Instant::now();
        let mut reclaimed = Vec::new();

        for sandbox in sandboxes {
            let timeout = match parse_duration(&sandbox.config().idle_destroy_timeout) {
                Ok(timeout) => timeout,
                Err(e) => {
                    warn!("{}; using {}", e, DEFAULT_IDLE_DESTROY_TIMEOUT);
                    DEFAULT_IDLE_TIMEOUT
                }
            };
            let idle = now.saturating_duration_since(sandbox.last_activity_at().await);
            if idle <= timeout {
                continue;
            }

            info!(
                "Reclaiming sandbox {} after {}s idle",
                sandbox.id(),
                idle.as_secs()
            );
            // Another task may have destroyed it meanwhile.
            if self.destroy_sandbox(sandbox.id()).await {
                reclaimed.push(sandbox.id().to_string());
            }
        }
        reclaimed
    }

    /// Run [`sweep_idle_sandboxes`](Self::sweep_idle_sandboxes) every
    /// `interval`, replacing any sweep already running.
    ///
    /// The task only holds a weak reference and stops once the manager is
    /// dropped.
    pub async fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let manager = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("Sandbox manager dropped, stopping idle sweep");
                    break;
                };
                let reclaimed = manager.sweep_idle_sandboxes().await;
                if !reclaimed.is_empty() {
                    debug!("Idle sweep reclaimed {:?}", reclaimed);
                }
            }
        });

        if let Some(previous) = self.sweep_task.lock().await.replace(handle) {
            previous.abort();
        }
        info!("Idle sweep running every {}s", interval.as_secs_f64());
    }

    pub async fn stop_sweep(&self) {
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn is_sweeping(&self) -> bool {
        self.sweep_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SandboxManager {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.get_mut().take() {
            handle.abort();
        }
        let remaining = self.sandboxes.get_mut().len();
        if remaining > 0 {
            warn!(
                "Sandbox manager dropped with {} live sandbox(es); call destroy_all first",
                remaining
            );
        }
    }
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("worker_id", &self.worker_id)
            .field("project_id", &self.project_id)
            .field("workspaces_dir", &self.workspaces_dir)
            .finish_non_exhaustive()
    }
}
