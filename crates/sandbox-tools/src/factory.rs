//! The tool set handed to an agent.

use crate::approval::{ApprovalRequest, Suspender};
use crate::definition::ToolDefinition;
use crate::edit::apply_edit;
use crate::error::Error;
use crate::params::{EditParams, ExecParams, GlobParams, GrepParams, ReadParams, WriteParams};
use crate::Result;
use sandbox_env::{Environment, EnvironmentKind, ExecOptions, ExecResult, GlobOptions, GrepMatch, GrepOptions};
use sandbox_manager::{
    ExecPolicyMode, FileApprovalMode, ManagedSandbox, SandboxManager, SandboxScope,
    SandboxToolsConfig, ToolName,
};
use sandbox_security::{evaluate_allowlist, is_within, normalize};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Identifies the execution (and session) a tool call belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolContext {
    pub execution_id: String,
    pub session_id: Option<String>,
}

impl ToolContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutput {
    pub path: String,
    pub content: String,
    pub total_lines: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutput {
    pub path: String,
    pub bytes_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutput {
    pub path: String,
    pub replacements: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobOutput {
    pub files: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrepOutput {
    pub matches: Vec<GrepMatch>,
    pub count: usize,
}

/// Key under which a tool set remembers a resolved sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SandboxKey {
    Execution(String),
    Session(String),
}

/// Build the tool set for `config`, backed by `manager`.
pub fn create_sandbox_tools(
    config: SandboxToolsConfig,
    manager: Arc<SandboxManager>,
    suspender: Arc<dyn Suspender>,
) -> Result<SandboxTools> {
    config.validate()?;
    Ok(SandboxTools::new(config, manager, suspender))
}

/// Sandbox-backed tools sharing one configuration.
///
/// Each call resolves the sandbox of its execution through the manager,
/// applies the approval policy and delegates to the sandbox environment.
pub struct SandboxTools {
    config: SandboxToolsConfig,
    manager: Arc<SandboxManager>,
    suspender: Arc<dyn Suspender>,
    approval_timeout: Option<Duration>,
    approval_counter: AtomicU64,
    /// Commands approved with "always allow".
    remembered: RwLock<HashSet<String>>,
    /// Sandboxes resolved by this tool set: one per session for session
    /// scope, one per execution otherwise.
    sandboxes: Mutex<HashMap<SandboxKey, Arc<ManagedSandbox>>>,
}

impl SandboxTools {
    fn new(
        config: SandboxToolsConfig,
        manager: Arc<SandboxManager>,
        suspender: Arc<dyn Suspender>,
    ) -> Self {
        Self {
            config,
            manager,
            suspender,
            approval_timeout: None,
            approval_counter: AtomicU64::new(0),
            remembered: RwLock::new(HashSet::new()),
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Bound how long an approval may stay pending.
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &SandboxToolsConfig {
        &self.config
    }

    /// Enabled tools, in canonical order.
    pub fn tool_names(&self) -> Vec<ToolName> {
        ToolName::ALL
            .into_iter()
            .filter(|tool| self.config.tool_enabled(*tool))
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tool_names()
            .into_iter()
            .map(ToolDefinition::for_tool)
            .collect()
    }

    /// Invoke tool `name` with JSON `arguments`, returning its JSON output.
    pub async fn call(
        &self,
        context: &ToolContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let tool = ToolName::parse(name).ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        if !self.config.tool_enabled(tool) {
            return Err(Error::ToolDisabled(name.to_string()));
        }

        let output = match tool {
            ToolName::Exec => to_json(self.exec(context, parse_params(tool, arguments)?).await?),
            ToolName::Read => to_json(self.read(context, parse_params(tool, arguments)?).await?),
            ToolName::Write => to_json(self.write(context, parse_params(tool, arguments)?).await?),
            ToolName::Edit => to_json(self.edit(context, parse_params(tool, arguments)?).await?),
            ToolName::Glob => to_json(self.glob(context, parse_params(tool, arguments)?).await?),
            ToolName::Grep => to_json(self.grep(context, parse_params(tool, arguments)?).await?),
        }?;
        Ok(output)
    }

    pub async fn exec(&self, context: &ToolContext, params: ExecParams) -> Result<ExecResult> {
        let (sandbox, environment) = self.environment(context).await?;

        if self.exec_needs_approval(&params.command).await {
            let response = self
                .request_approval(ToolName::Exec, params.command.clone(), &params, &sandbox)
                .await?;
            if response.allow_always {
                info!("Remembering approval for command: {}", params.command);
                self.remembered
                    .write()
                    .await
                    .insert(params.command.trim().to_string());
            }
        }

        let mut options = ExecOptions::new()
            .with_timeout(
                params
                    .timeout
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.config.exec.timeout()),
            )
            .with_max_output_chars(self.config.exec.max_output_chars);
        if let Some(cwd) = &params.cwd {
            options = options.with_cwd(cwd);
        }
        for (key, value) in params.env.clone().unwrap_or_default() {
            options = options.with_env(key, value);
        }

        let mut result = environment.exec(&params.command, options).await?;
        result.stdout = sandbox_output::strip_ansi(&result.stdout);
        result.stderr = sandbox_output::strip_ansi(&result.stderr);
        debug!(
            "exec in {} exited with {} after {}ms",
            sandbox.id(),
            result.exit_code,
            result.duration_ms
        );
        Ok(result)
    }

    pub async fn read(&self, context: &ToolContext, params: ReadParams) -> Result<ReadOutput> {
        let (sandbox, environment) = self.environment(context).await?;
        if self.outside_workspace(environment.as_ref(), &params.path) {
            self.request_approval(ToolName::Read, params.path.clone(), &params, &sandbox)
                .await?;
        }

        let content = environment.read_file(&params.path).await?;
        let total_lines = content.lines().count();
        let selected = match (params.offset, params.limit) {
            (None, None) => content,
            (offset, limit) => content
                .lines()
                .skip(offset.unwrap_or(0))
                .take(limit.unwrap_or(usize::MAX))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let truncated = sandbox_output::truncate_output(&selected, self.config.exec.max_output_chars);

        Ok(ReadOutput {
            path: params.path,
            content: truncated.text,
            total_lines,
            truncated: truncated.truncated,
        })
    }

    pub async fn write(&self, context: &ToolContext, params: WriteParams) -> Result<WriteOutput> {
        let (sandbox, environment) = self.environment(context).await?;
        if self.config.file_approval_mode() == FileApprovalMode::ApprovalAlways {
            self.request_approval(ToolName::Write, params.path.clone(), &params, &sandbox)
                .await?;
        }

        environment.write_file(&params.path, &params.content).await?;
        Ok(WriteOutput {
            bytes_written: params.content.len(),
            path: params.path,
        })
    }

    pub async fn edit(&self, context: &ToolContext, params: EditParams) -> Result<EditOutput> {
        let (sandbox, environment) = self.environment(context).await?;

        let content = environment.read_file(&params.path).await?;
        let (updated, replacements) = apply_edit(
            &content,
            &params.old_string,
            &params.new_string,
            params.replace_all,
        )?;

        if self.config.file_approval_mode() == FileApprovalMode::ApprovalAlways {
            self.request_approval(ToolName::Edit, params.path.clone(), &params, &sandbox)
                .await?;
        }

        environment.write_file(&params.path, &updated).await?;
        Ok(EditOutput {
            path: params.path,
            replacements,
        })
    }

    pub async fn glob(&self, context: &ToolContext, params: GlobParams) -> Result<GlobOutput> {
        let (sandbox, environment) = self.environment(context).await?;
        if let Some(cwd) = &params.cwd {
            if self.outside_workspace(environment.as_ref(), cwd) {
                self.request_approval(ToolName::Glob, params.pattern.clone(), &params, &sandbox)
                    .await?;
            }
        }

        let files = environment
            .glob(
                &params.pattern,
                GlobOptions {
                    cwd: params.cwd.clone(),
                },
            )
            .await?;
        Ok(GlobOutput {
            count: files.len(),
            files,
        })
    }

    pub async fn grep(&self, context: &ToolContext, params: GrepParams) -> Result<GrepOutput> {
        let (sandbox, environment) = self.environment(context).await?;
        if let Some(path) = &params.path {
            if self.outside_workspace(environment.as_ref(), path) {
                self.request_approval(ToolName::Grep, params.pattern.clone(), &params, &sandbox)
                    .await?;
            }
        }

        let matches = environment
            .grep(
                &params.pattern,
                GrepOptions {
                    path: params.path.clone(),
                    include: params.include.clone(),
                    ignore_case: params.ignore_case,
                    max_results: params.max_results,
                },
            )
            .await?;
        Ok(GrepOutput {
            count: matches.len(),
            matches,
        })
    }

    /// Destroy every sandbox this tool set created.
    pub async fn cleanup(&self) {
        let sandboxes: Vec<Arc<ManagedSandbox>> = self
            .sandboxes
            .lock()
            .await
            .drain()
            .map(|(_, sandbox)| sandbox)
            .collect();

        let mut destroyed = HashSet::new();
        for sandbox in sandboxes {
            if destroyed.insert(sandbox.id().to_string()) {
                self.manager.destroy_sandbox(sandbox.id()).await;
                sandbox.destroy().await;
            }
        }
        if !destroyed.is_empty() {
            info!("Cleaned up {} sandbox(es)", destroyed.len());
        }
    }

    /// Ids of the live sandboxes this tool set has resolved.
    pub async fn sandbox_ids(&self) -> Vec<String> {
        let sandboxes = self.sandboxes.lock().await;
        let mut ids: Vec<String> = sandboxes
            .values()
            .filter(|sandbox| !sandbox.is_destroyed())
            .map(|sandbox| sandbox.id().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    async fn environment(
        &self,
        context: &ToolContext,
    ) -> Result<(Arc<ManagedSandbox>, Arc<dyn Environment>)> {
        let key = self.sandbox_key(context);
        let sandbox = {
            let mut sandboxes = self.sandboxes.lock().await;
            sandboxes.retain(|_, sandbox| !sandbox.is_destroyed());
            match sandboxes.get(&key) {
                Some(sandbox) => {
                    // Later executions of a session reuse the cached sandbox.
                    sandbox.attach_execution(&context.execution_id).await;
                    sandbox.clone()
                }
                None => {
                    let sandbox = self
                        .manager
                        .get_or_create_sandbox(
                            &self.config,
                            &context.execution_id,
                            context.session_id.as_deref(),
                        )
                        .await?;
                    sandboxes.insert(key, sandbox.clone());
                    sandbox
                }
            }
        };
        let environment = sandbox.get_environment().await?;
        Ok((sandbox, environment))
    }

    fn sandbox_key(&self, context: &ToolContext) -> SandboxKey {
        match (self.config.scope, context.session_id.as_deref()) {
            (SandboxScope::Session, Some(session)) if !session.is_empty() => {
                SandboxKey::Session(session.to_string())
            }
            _ => SandboxKey::Execution(context.execution_id.clone()),
        }
    }

    async fn exec_needs_approval(&self, command: &str) -> bool {
        match self.config.exec_mode() {
            ExecPolicyMode::None | ExecPolicyMode::AllowAlways => false,
            ExecPolicyMode::ApprovalAlways => true,
            ExecPolicyMode::Allowlist => {
                if evaluate_allowlist(command, &self.config.exec.allowlist) {
                    return false;
                }
                !self.remembered.read().await.contains(command.trim())
            }
        }
    }

    /// Whether `path` resolves outside the directory the sandbox works in.
    fn outside_workspace(&self, environment: &dyn Environment, path: &str) -> bool {
        let info = environment.get_info();
        let root = match (info.kind, info.workspace_dir) {
            (EnvironmentKind::Local, Some(restriction)) => restriction,
            _ => PathBuf::from(&info.cwd),
        };
        let candidate = Path::new(path);
        let target = if candidate.is_absolute() {
            normalize(candidate)
        } else {
            normalize(Path::new(&info.cwd).join(candidate))
        };
        !is_within(&target, &root)
    }

    async fn request_approval<P: Serialize>(
        &self,
        tool: ToolName,
        summary: String,
        params: &P,
        sandbox: &ManagedSandbox,
    ) -> Result<crate::approval::ApprovalResponse> {
        let n = self.approval_counter.fetch_add(1, Ordering::SeqCst);
        let step_key = format!("{}_approval_{}", tool, n);
        let request = ApprovalRequest {
            tool,
            summary,
            arguments: serde_json::to_value(params)?,
            sandbox_id: Some(sandbox.id().to_string()),
        };

        info!("Requesting approval {} for {}: {}", step_key, tool, request.summary);
        let response = self
            .suspender
            .suspend(&step_key, request, self.approval_timeout)
            .await?;

        if response.approved {
            info!("Approval {} granted", step_key);
            Ok(response)
        } else {
            info!("Approval {} rejected", step_key);
            Err(Error::Rejected {
                tool: tool.to_string(),
                feedback: response.feedback,
            })
        }
    }
}

fn parse_params<P: DeserializeOwned>(tool: ToolName, arguments: serde_json::Value) -> Result<P> {
    serde_json::from_value(arguments).map_err(|e| Error::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn to_json<T: Serialize>(output: T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoApprove;
    use sandbox_env::LocalConfig;
    use tempfile::TempDir;

    fn true_command() -> ExecParams {
        ExecParams {
            command: "true".to_string(),
            cwd: None,
            env: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_session_executions_share_one_cache_entry() {
        let workspaces = TempDir::new().unwrap();
        let manager = Arc::new(
            SandboxManager::new("worker-1", "proj").with_workspaces_dir(workspaces.path()),
        );
        let config = SandboxToolsConfig::local(LocalConfig::default())
            .with_scope(SandboxScope::Session)
            .with_exec_mode(ExecPolicyMode::None);
        let tools = create_sandbox_tools(config, manager.clone(), Arc::new(AutoApprove)).unwrap();

        for i in 0..20 {
            let context = ToolContext::new(format!("e{i}")).with_session("s1");
            tools
                .exec(&context, true_command())
                .await
                .unwrap();
            let sandbox = manager.get_session_sandbox("s1").await.unwrap();
            assert!(sandbox.has_execution(&context.execution_id).await);
            manager.on_execution_complete(&context.execution_id).await;
        }

        assert_eq!(tools.sandboxes.lock().await.len(), 1);
        assert_eq!(manager.sandbox_count().await, 1);

        tools.cleanup().await;
        assert_eq!(manager.sandbox_count().await, 0);
    }

    #[tokio::test]
    async fn test_execution_entries_are_pruned_once_destroyed() {
        let workspaces = TempDir::new().unwrap();
        let manager = Arc::new(
            SandboxManager::new("worker-1", "proj").with_workspaces_dir(workspaces.path()),
        );
        let config = SandboxToolsConfig::local(LocalConfig::default())
            .with_exec_mode(ExecPolicyMode::None);
        let tools = create_sandbox_tools(config, manager.clone(), Arc::new(AutoApprove)).unwrap();

        for i in 0..5 {
            let context = ToolContext::new(format!("e{i}"));
            tools
                .exec(&context, true_command())
                .await
                .unwrap();
            manager.on_execution_complete(&context.execution_id).await;
        }

        // The last lookup prunes every entry destroyed before it.
        assert_eq!(tools.sandboxes.lock().await.len(), 1);
        assert!(tools.sandbox_ids().await.is_empty());
    }
}
