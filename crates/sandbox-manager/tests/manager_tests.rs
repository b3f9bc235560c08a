//! Sandbox scoping, reuse and reclamation through the manager.

use async_trait::async_trait;
use sandbox_env::driver::{ContainerExec, ContainerSpec, DriverResult};
use sandbox_env::process::ProcessOutput;
use sandbox_env::{ContainerDriver, DockerConfig, DriverError, LocalConfig};
use sandbox_manager::{
    Error, SandboxManager, SandboxScope, SandboxState, SandboxToolsConfig,
};
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn manager(workspaces: &TempDir) -> SandboxManager {
    SandboxManager::new("worker-1", "proj").with_workspaces_dir(workspaces.path())
}

fn local_config(scope: SandboxScope) -> SandboxToolsConfig {
    SandboxToolsConfig::local(LocalConfig::default()).with_scope(scope)
}

/// Counts container operations and can pretend the container vanished.
#[derive(Default)]
struct CountingDriver {
    creates: AtomicUsize,
    execs: AtomicUsize,
    removes: AtomicUsize,
    gone: AtomicBool,
    /// Errors returned by the next execs, in order.
    exec_failures: Mutex<VecDeque<DriverError>>,
}

impl CountingDriver {
    fn fail_next_exec(&self, error: DriverError) {
        self.exec_failures.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl ContainerDriver for CountingDriver {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<String> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{}", spec.name, n))
    }

    async fn start(&self, _container: &str) -> DriverResult<()> {
        Ok(())
    }

    async fn exec(&self, container: &str, _request: &ContainerExec) -> DriverResult<ProcessOutput> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        if self.gone.load(Ordering::SeqCst) {
            return Err(DriverError::NotFound(container.to_string()));
        }
        if let Some(error) = self.exec_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ProcessOutput {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    async fn stop(&self, container: &str) -> DriverResult<()> {
        if self.gone.load(Ordering::SeqCst) {
            return Err(DriverError::NotFound(container.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, container: &str) -> DriverResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.gone.load(Ordering::SeqCst) {
            return Err(DriverError::NotFound(container.to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_execution_scope_creates_distinct_sandboxes() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let config = local_config(SandboxScope::Execution);

    let a = manager.get_or_create_sandbox(&config, "e1", None).await.unwrap();
    let b = manager.get_or_create_sandbox(&config, "e2", None).await.unwrap();

    assert_ne!(a.id(), b.id());
    assert!(a.id().starts_with("sandbox-"));
    assert!(a.has_execution("e1").await);
    assert!(b.has_execution("e2").await);
    assert_eq!(manager.sandbox_count().await, 2);
}

#[tokio::test]
async fn test_execution_complete_destroys_execution_scoped_sandbox() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let sandbox = manager
        .get_or_create_sandbox(&local_config(SandboxScope::Execution), "e1", None)
        .await
        .unwrap();
    sandbox.get_environment().await.unwrap();

    manager.on_execution_complete("unknown").await;
    assert_eq!(manager.sandbox_count().await, 1);

    manager.on_execution_complete("e1").await;
    assert!(sandbox.is_destroyed());
    assert!(manager.get_sandbox(sandbox.id()).await.is_none());
    assert!(matches!(
        sandbox.get_environment().await,
        Err(Error::Destroyed(_))
    ));
}

#[tokio::test]
async fn test_session_sandbox_is_shared_and_survives_executions() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let config = local_config(SandboxScope::Session);

    let first = manager
        .get_or_create_sandbox(&config, "e1", Some("s1"))
        .await
        .unwrap();
    first
        .get_environment()
        .await
        .unwrap()
        .write_file("a.txt", "x")
        .await
        .unwrap();
    manager.on_execution_complete("e1").await;
    assert!(!first.is_destroyed());

    let second = manager
        .get_or_create_sandbox(&config, "e2", Some("s1"))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    let content = second
        .get_environment()
        .await
        .unwrap()
        .read_file("a.txt")
        .await
        .unwrap();
    assert_eq!(content, "x");
    assert_eq!(
        second.workspace_dir(),
        workspaces.path().join("proj").join("s1")
    );

    let by_session = manager.get_session_sandbox("s1").await.unwrap();
    assert_eq!(by_session.id(), first.id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_session_calls_create_one_sandbox() {
    let workspaces = TempDir::new().unwrap();
    let manager = Arc::new(manager(&workspaces));
    let config = local_config(SandboxScope::Session);

    let calls = (0..16).map(|i| {
        let manager = manager.clone();
        let config = config.clone();
        tokio::spawn(async move {
            manager
                .get_or_create_sandbox(&config, &format!("e{i}"), Some("shared"))
                .await
        })
    });
    let sandboxes: Vec<_> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let first = &sandboxes[0];
    assert!(sandboxes.iter().all(|s| Arc::ptr_eq(s, first)));
    assert_eq!(manager.sandbox_count().await, 1);

    let attached = first.active_execution_ids().await;
    let expected: HashSet<String> = (0..16).map(|i| format!("e{i}")).collect();
    assert_eq!(attached, expected);
}

#[tokio::test]
async fn test_configuration_errors() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);

    let e2b = SandboxToolsConfig::from_json(r#"{"env": "e2b"}"#).unwrap();
    assert!(matches!(
        manager.get_or_create_sandbox(&e2b, "e1", None).await,
        Err(Error::UnsupportedEnvironment(_))
    ));

    let session = local_config(SandboxScope::Session);
    assert!(matches!(
        manager.get_or_create_sandbox(&session, "e1", None).await,
        Err(Error::MissingSessionId)
    ));

    let bad_timeout = local_config(SandboxScope::Execution).with_idle_destroy_timeout("10s");
    assert!(matches!(
        manager
            .get_or_create_sandbox(&bad_timeout, "e1", None)
            .await,
        Err(Error::InvalidDuration(_))
    ));

    assert_eq!(manager.sandbox_count().await, 0);
}

#[tokio::test]
async fn test_explicit_id_cannot_be_reused_while_live() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let config = local_config(SandboxScope::Execution).with_id("sandbox-fixed");

    let sandbox = manager.get_or_create_sandbox(&config, "e1", None).await.unwrap();
    assert_eq!(sandbox.id(), "sandbox-fixed");

    let reused = manager.get_or_create_sandbox(&config, "e2", None).await;
    assert!(matches!(reused, Err(Error::Config(_))));

    manager.on_execution_complete("e1").await;
    manager.get_or_create_sandbox(&config, "e3", None).await.unwrap();
}

#[tokio::test]
async fn test_destroy_sandbox_and_destroy_all() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let session = manager
        .get_or_create_sandbox(&local_config(SandboxScope::Session), "e1", Some("s1"))
        .await
        .unwrap();
    let execution = manager
        .get_or_create_sandbox(&local_config(SandboxScope::Execution), "e2", None)
        .await
        .unwrap();

    assert!(manager.destroy_sandbox(session.id()).await);
    assert!(!manager.destroy_sandbox(session.id()).await);
    assert!(manager.get_session_sandbox("s1").await.is_none());

    manager.destroy_all().await;
    assert!(execution.is_destroyed());
    assert_eq!(manager.sandbox_count().await, 0);
    assert!(manager.list_sandboxes().await.is_empty());
}

#[tokio::test]
async fn test_destroyed_session_sandbox_is_replaced() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let config = local_config(SandboxScope::Session);

    let first = manager
        .get_or_create_sandbox(&config, "e1", Some("s1"))
        .await
        .unwrap();
    first.destroy().await;

    let second = manager
        .get_or_create_sandbox(&config, "e2", Some("s1"))
        .await
        .unwrap();
    assert_ne!(first.id(), second.id());
    assert!(!second.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_reclaims_idle_sandboxes() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let short = local_config(SandboxScope::Session).with_idle_destroy_timeout("30m");
    let long = local_config(SandboxScope::Session).with_idle_destroy_timeout("2h");

    let idle = manager
        .get_or_create_sandbox(&short, "e1", Some("s-short"))
        .await
        .unwrap();
    let kept = manager
        .get_or_create_sandbox(&long, "e2", Some("s-long"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    let reclaimed = manager.sweep_idle_sandboxes().await;

    assert_eq!(reclaimed, vec![idle.id().to_string()]);
    assert!(idle.is_destroyed());
    assert!(!kept.is_destroyed());
    assert!(manager.get_session_sandbox("s-short").await.is_none());
    assert_eq!(manager.sandbox_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_tolerates_concurrent_destroy() {
    let workspaces = TempDir::new().unwrap();
    let manager = manager(&workspaces);
    let session = local_config(SandboxScope::Session).with_idle_destroy_timeout("1m");
    let execution = local_config(SandboxScope::Execution).with_idle_destroy_timeout("1m");

    let mut session_sandboxes = Vec::new();
    for i in 0..8 {
        let sandbox = manager
            .get_or_create_sandbox(&session, &format!("e{i}"), Some(format!("s{i}").as_str()))
            .await
            .unwrap();
        session_sandboxes.push(sandbox);
    }
    let execution_sandbox = manager
        .get_or_create_sandbox(&execution, "e-exec", None)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;

    let ids: Vec<String> = session_sandboxes.iter().map(|s| s.id().to_string()).collect();
    let (reclaimed, destroyed, ()) = tokio::join!(
        manager.sweep_idle_sandboxes(),
        async {
            let mut destroyed = Vec::new();
            for id in ids.iter().rev() {
                if manager.destroy_sandbox(id).await {
                    destroyed.push(id.clone());
                }
                tokio::task::yield_now().await;
            }
            destroyed
        },
        manager.on_execution_complete("e-exec"),
    );

    // Each session sandbox was torn down by exactly one of the two paths.
    for id in &ids {
        let by_sweep = reclaimed.contains(id);
        let by_caller = destroyed.contains(id);
        assert!(by_sweep != by_caller, "{id} reclaimed {by_sweep}, destroyed {by_caller}");
    }
    assert!(session_sandboxes.iter().all(|s| s.is_destroyed()));
    assert!(execution_sandbox.is_destroyed());
    assert_eq!(manager.sandbox_count().await, 0);
    assert!(manager.sweep_idle_sandboxes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep() {
    let workspaces = TempDir::new().unwrap();
    let manager = Arc::new(manager(&workspaces));
    let config = local_config(SandboxScope::Session).with_idle_destroy_timeout("1m");
    let sandbox = manager
        .get_or_create_sandbox(&config, "e1", Some("s1"))
        .await
        .unwrap();

    manager.start_sweep(Duration::from_secs(30)).await;
    assert!(manager.is_sweeping().await);

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(sandbox.is_destroyed());
    assert_eq!(manager.sandbox_count().await, 0);

    manager.stop_sweep().await;
    assert!(!manager.is_sweeping().await);
}

#[tokio::test]
async fn test_docker_sandbox_recovers_from_vanished_container() {
    let workspaces = TempDir::new().unwrap();
    let driver = Arc::new(CountingDriver::default());
    let manager = manager(&workspaces).with_container_driver(driver.clone());
    let config = SandboxToolsConfig::docker(DockerConfig::default());

    let sandbox = manager.get_or_create_sandbox(&config, "e1", None).await.unwrap();
    let first = sandbox.get_environment().await.unwrap();
    assert_eq!(driver.creates.load(Ordering::SeqCst), 1);
    assert_eq!(
        first.get_info().container_name,
        Some(format!("polos-{}", sandbox.id()))
    );

    // Healthy probe; the environment is reused.
    let again = sandbox.get_environment().await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    let probes = driver.execs.load(Ordering::SeqCst);

    // Within the debounce window no probe is issued.
    sandbox.get_environment().await.unwrap();
    assert_eq!(driver.execs.load(Ordering::SeqCst), probes);

    // Force a probe and let it find the container gone.
    driver.gone.store(true, Ordering::SeqCst);
    let fresh_sandbox = manager.get_or_create_sandbox(&config, "e2", None).await.unwrap();
    let stale = fresh_sandbox.get_environment().await.unwrap();
    let recovered = fresh_sandbox.get_environment().await.unwrap();

    assert!(!Arc::ptr_eq(&stale, &recovered));
    assert_eq!(driver.creates.load(Ordering::SeqCst), 3);
    assert!(!fresh_sandbox.is_destroyed());
    assert_eq!(fresh_sandbox.state().await, SandboxState::Ready);

    driver.gone.store(false, Ordering::SeqCst);
    manager.destroy_all().await;
    assert!(driver.removes.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_transient_health_check_failure_keeps_container() {
    let workspaces = TempDir::new().unwrap();
    let driver = Arc::new(CountingDriver::default());
    let manager = manager(&workspaces).with_container_driver(driver.clone());
    let config = SandboxToolsConfig::docker(DockerConfig::default());

    let sandbox = manager.get_or_create_sandbox(&config, "e1", None).await.unwrap();
    let first = sandbox.get_environment().await.unwrap();
    let execs = driver.execs.load(Ordering::SeqCst);

    driver.fail_next_exec(DriverError::Timeout(Duration::from_secs(10)));
    let after_timeout = sandbox.get_environment().await.unwrap();
    assert!(Arc::ptr_eq(&first, &after_timeout));

    // A failed health check does not start the debounce window, so the next call checks again.
    driver.fail_next_exec(DriverError::Failed {
        operation: "exec",
        message: "daemon hiccup".to_string(),
    });
    let after_failure = sandbox.get_environment().await.unwrap();
    assert!(Arc::ptr_eq(&first, &after_failure));

    assert_eq!(driver.execs.load(Ordering::SeqCst), execs + 2);
    assert_eq!(driver.creates.load(Ordering::SeqCst), 1);
    assert_eq!(driver.removes.load(Ordering::SeqCst), 0);
    assert_eq!(sandbox.state().await, SandboxState::Ready);
}
