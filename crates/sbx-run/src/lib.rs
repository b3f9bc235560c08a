//! Command line front end for sandbox tools.
//!
//! Each invocation plays the part of one execution: it resolves a sandbox,
//! runs tool calls against it, reports completion to the manager and tears
//! everything down before exiting.

pub mod prompt;

use anyhow::{bail, Context, Result};
use sandbox_manager::{SandboxManager, SandboxToolsConfig};
use sandbox_tools::{
    create_sandbox_tools, AutoApprove, AutoReject, SandboxTools, Suspender, ToolContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sbx-run")]
#[command(about = "Run agent sandbox tools from the command line")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// Sandbox tools configuration (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project the sandboxes belong to
    #[arg(long, global = true, default_value = "default")]
    pub project: String,

    /// Session id, required for session-scoped sandboxes
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// Approve every request without asking
    #[arg(long, global = true, conflicts_with = "deny")]
    pub yes: bool,

    /// Reject every request without asking
    #[arg(long, global = true)]
    pub deny: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the tool definitions as JSON
    Tools,
    /// Invoke one tool with JSON arguments
    Call {
        /// Tool name: exec, read, write, edit, glob or grep
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Run a shell command through the exec tool
    Exec {
        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

impl Cli {
    /// Log to stderr; `RUST_LOG` overrides the level chosen by `--debug`.
    pub fn init_tracing(&self) {
        let default_level = if self.debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    pub fn load_config(&self) -> Result<SandboxToolsConfig> {
        match &self.config {
            Some(path) => SandboxToolsConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(SandboxToolsConfig::default()),
        }
    }

    fn suspender(&self) -> Arc<dyn Suspender> {
        if self.yes {
            Arc::new(AutoApprove)
        } else if self.deny {
            Arc::new(AutoReject {
                feedback: Some("rejected by --deny".to_string()),
            })
        } else {
            Arc::new(prompt::TerminalPrompt::new())
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        let worker_id = format!("sbx-run-{}", std::process::id());
        let manager = Arc::new(SandboxManager::new(worker_id, self.project.clone()));
        let tools = create_sandbox_tools(config, manager.clone(), self.suspender())
            .context("Invalid sandbox configuration")?;

        let mut context = ToolContext::new(format!("exec-{}", uuid::Uuid::new_v4().simple()));
        if let Some(session) = &self.session {
            context = context.with_session(session);
        }

        let outcome = self.dispatch(&tools, &context).await;

        manager.on_execution_complete(&context.execution_id).await;
        tools.cleanup().await;
        manager.destroy_all().await;
        info!("Sandboxes released");

        let output = outcome?;
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    async fn dispatch(
        &self,
        tools: &SandboxTools,
        context: &ToolContext,
    ) -> Result<serde_json::Value> {
        match &self.command {
            Commands::Tools => Ok(serde_json::to_value(tools.definitions())?),
            Commands::Call { tool, arguments } => {
                let arguments: serde_json::Value = serde_json::from_str(arguments)
                    .context("Tool arguments must be a JSON object")?;
                if !arguments.is_object() {
                    bail!("Tool arguments must be a JSON object");
                }
                Ok(tools.call(context, tool, arguments).await?)
            }
            Commands::Exec { command } => {
                let arguments = serde_json::json!({ "command": command.join(" ") });
                Ok(tools.call(context, "exec", arguments).await?)
            }
        }
    }
}
