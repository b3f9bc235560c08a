//! Provider-agnostic function-calling definitions of the tools.

use crate::params::{EditParams, ExecParams, GlobParams, GrepParams, ReadParams, WriteParams};
use sandbox_manager::ToolName;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// `{"type": "function", "function": {...}}`
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: RootSchema,
}

impl ToolDefinition {
    /// Definition whose parameter schema is derived from `P`.
    pub fn new<P: JsonSchema>(name: &'static str, description: &'static str) -> Self {
        let mut settings = SchemaSettings::draft07();
        settings.inline_subschemas = true;
        let parameters = settings.into_generator().into_root_schema_for::<P>();

        Self {
            tool_type: ToolType::Function,
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }

    pub fn for_tool(tool: ToolName) -> Self {
        match tool {
            ToolName::Exec => Self::new::<ExecParams>(
                "exec",
                "Run a shell command in the sandbox and return its exit code, stdout and stderr.",
            ),
            ToolName::Read => Self::new::<ReadParams>(
                "read",
                "Read a text file from the sandbox, optionally a range of lines.",
            ),
            ToolName::Write => Self::new::<WriteParams>(
                "write",
                "Create or overwrite a file in the sandbox.",
            ),
            ToolName::Edit => Self::new::<EditParams>(
                "edit",
                "Replace an exact string in a file. The string must be unique unless replace_all is set.",
            ),
            ToolName::Glob => Self::new::<GlobParams>(
                "glob",
                "Find files in the sandbox whose paths match a glob pattern.",
            ),
            ToolName::Grep => Self::new::<GrepParams>(
                "grep",
                "Search file contents in the sandbox with a regular expression.",
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        self.function.name
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.function
            .parameters
            .schema
            .object
            .as_ref()
            .map(|object| object.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn required_parameters(&self) -> Vec<String> {
        self.function
            .parameters
            .schema
            .object
            .as_ref()
            .map(|object| object.required.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}
