//! Host-process environment.

use crate::error::Error;
use crate::process::run_with_timeout;
use crate::search;
use crate::{
    Environment, EnvironmentInfo, EnvironmentKind, ExecOptions, ExecResult, GlobOptions,
    GrepMatch, GrepOptions, Result,
};
use async_trait::async_trait;
use sandbox_security::{assert_safe_path, normalize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs commands as host processes in a working directory.
///
/// With a path restriction configured, every file path (and exec cwd) must
/// resolve inside the restriction root, symlinks included.
#[derive(Debug)]
pub struct LocalEnvironment {
    cwd: PathBuf,
    path_restriction: Option<PathBuf>,
    sandbox_id: Option<String>,
    initialized: AtomicBool,
}

impl LocalEnvironment {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: normalize(cwd.into()),
            path_restriction: None,
            sandbox_id: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// Confine file operations to `root`.
    pub fn with_path_restriction(mut self, root: impl Into<PathBuf>) -> Self {
        self.path_restriction = Some(normalize(root.into()));
        self
    }

    pub fn with_sandbox_id(mut self, id: impl Into<String>) -> Self {
        self.sandbox_id = Some(id.into());
        self
    }

    pub fn path_restriction(&self) -> Option<&Path> {
        self.path_restriction.as_deref()
    }

    /// Resolve `path` against the cwd, enforcing the restriction if any.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.cwd.join(candidate)
        };

        match &self.path_restriction {
            Some(root) => Ok(assert_safe_path(absolute, root)?),
            None => Ok(normalize(absolute)),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Local
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        match tokio::fs::metadata(&self.cwd).await {
            Ok(metadata) if metadata.is_dir() => {}
            _ => return Err(Error::InvalidWorkingDir(self.cwd.display().to_string())),
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("Local environment ready in {}", self.cwd.display());
        Ok(())
    }

    async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult> {
        self.ensure_initialized()?;

        let cwd = match &options.cwd {
            Some(cwd) => self.resolve_path(cwd)?,
            None => self.cwd.clone(),
        };
        debug!(command, cwd = %cwd.display(), "local exec");

        let mut process = Command::new("sh");
        process.arg("-c").arg(command).current_dir(&cwd);
        for (key, value) in &options.env {
            process.env(key, value);
        }

        let started = Instant::now();
        let output = run_with_timeout(process, options.timeout()).await?;
        Ok(ExecResult::from_output(
            output,
            started.elapsed(),
            options.max_output_chars(),
        ))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve_path(path)?;
        let bytes = tokio::fs::read(&resolved).await?;
        if sandbox_output::is_binary(&bytes) {
            return Err(Error::BinaryFile(resolved.display().to_string()));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve_path(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        debug!("Wrote {} bytes to {}", content.len(), resolved.display());
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve_path(path)?;
        Ok(tokio::fs::try_exists(&resolved).await?)
    }

    async fn glob(&self, pattern: &str, options: GlobOptions) -> Result<Vec<String>> {
        let root = match &options.cwd {
            Some(cwd) => self.resolve_path(cwd)?,
            None => self.cwd.clone(),
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
                self.resolve_path(path)?;
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
        // The working directory belongs to the caller; nothing is removed.
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn get_cwd(&self) -> String {
        self.cwd.display().to_string()
    }

    fn get_info(&self) -> EnvironmentInfo {
        EnvironmentInfo {
            kind: EnvironmentKind::Local,
            cwd: self.get_cwd(),
            sandbox_id: self.sandbox_id.clone(),
            container_name: None,
            image: None,
            workspace_dir: self.path_restriction.clone(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn ready(dir: &TempDir) -> LocalEnvironment {
        let env = LocalEnvironment::new(dir.path()).with_path_restriction(dir.path());
        env.initialize().await.unwrap();
        env
    }

    #[tokio::test]
    async fn test_initialize_requires_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let err = LocalEnvironment::new(&file).initialize().await.unwrap_err();
        assert!(matches!(err, Error::InvalidWorkingDir(_)));

        let err = LocalEnvironment::new(dir.path().join("missing"))
            .initialize()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidWorkingDir(_)));
    }

    #[tokio::test]
    async fn test_exec_before_initialize_fails() {
        let dir = TempDir::new().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let err = env.exec("true", ExecOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::Uninitialized));
    }

    #[tokio::test]
    async fn test_exec_non_zero_exit_is_a_result() {
        let dir = TempDir::new().unwrap();
        let env = ready(&dir).await;
        let result = env
            .exec("echo hi; exit 7", ExecOptions::new())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.stdout, "hi\n");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_exec_env_cwd_and_truncation() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let env = ready(&dir).await;

        let result = env
            .exec(
                "printf \"$GREETING\"; pwd",
                ExecOptions::new()
                    .with_cwd("sub")
                    .with_env("GREETING", "hello "),
            )
            .await
            .unwrap();
        assert!(result.stdout.starts_with("hello "));
        assert!(result.stdout.trim_end().ends_with("sub"));

        let result = env
            .exec(
                "printf '%0100d' 0",
                ExecOptions::new().with_max_output_chars(10),
            )
            .await
            .unwrap();
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_exec_cwd_outside_restriction_is_rejected() {
        let dir = TempDir::new().unwrap();
        let env = ready(&dir).await;
        let err = env
            .exec("ls", ExecOptions::new().with_cwd("/"))
            .await
            .unwrap_err();
        assert!(err.is_security_violation());
    }

    #[tokio::test]
    async fn test_write_then_read_creates_parents() {
        let dir = TempDir::new().unwrap();
        let env = ready(&dir).await;
        env.write_file("a/b/c.txt", "content").await.unwrap();
        assert_eq!(env.read_file("a/b/c.txt").await.unwrap(), "content");
        assert!(env.file_exists("a/b/c.txt").await.unwrap());
        assert!(!env.file_exists("a/b/missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let env = ready(&dir).await;
        assert!(env
            .read_file("../../etc/passwd")
            .await
            .unwrap_err()
            .is_security_violation());
        assert!(env
            .write_file("/etc/evil", "x")
            .await
            .unwrap_err()
            .is_security_violation());
    }

    #[test]
    fn test_relative_restriction_resolves_from_current_dir() {
        let env = LocalEnvironment::new(".").with_path_restriction(".");
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(env.resolve_path("a.txt").unwrap(), cwd.join("a.txt"));
        assert_eq!(env.resolve_path("sub/b.txt").unwrap(), cwd.join("sub/b.txt"));
        assert!(env
            .resolve_path("../a.txt")
            .unwrap_err()
            .is_security_violation());
    }

    #[tokio::test]
    async fn test_unrestricted_environment_allows_outside_paths() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("f.txt"), "outside").unwrap();

        let env = LocalEnvironment::new(dir.path());
        let path = outside.path().join("f.txt").display().to_string();
        assert_eq!(env.read_file(&path).await.unwrap(), "outside");
    }

    #[tokio::test]
    async fn test_binary_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blob.bin"), b"\x00\x01\x02").unwrap();
        let env = ready(&dir).await;
        assert!(matches!(
            env.read_file("blob.bin").await.unwrap_err(),
            Error::BinaryFile(_)
        ));
    }

    #[tokio::test]
    async fn test_glob_and_grep() {
        let dir = TempDir::new().unwrap();
        let env = ready(&dir).await;
        env.write_file("src/main.rs", "fn main() {}\n").await.unwrap();
        env.write_file("src/lib.rs", "pub fn lib() {}\n").await.unwrap();
        env.write_file("notes.md", "main ideas\n").await.unwrap();
        env.write_file(".git/HEAD", "ref: main\n").await.unwrap();

        let files = env.glob("**/*.rs", GlobOptions::default()).await.unwrap();
        assert_eq!(files, vec!["src/lib.rs", "src/main.rs"]);

        let matches = env
            .grep(
                "fn (main|lib)",
                GrepOptions {
                    include: Some("*.rs".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut paths: Vec<_> = matches.iter().map(|m| m.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["src/lib.rs", "src/main.rs"]);

        let none = env.grep("does-not-occur", GrepOptions::default()).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let env = ready(&dir).await;
        env.destroy().await.unwrap();
        env.destroy().await.unwrap();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_info_without_initialize() {
        let env = LocalEnvironment::new("/srv/ws").with_sandbox_id("sandbox-1234abcd");
        let info = env.get_info();
        assert_eq!(info.kind, EnvironmentKind::Local);
        assert_eq!(info.cwd, "/srv/ws");
        assert_eq!(info.sandbox_id.as_deref(), Some("sandbox-1234abcd"));
    }
}
