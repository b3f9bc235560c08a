//! Typed arguments of each tool. Their JSON Schemas are what the model sees.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecParams {
    /// Shell command to run with `sh -c`.
    pub command: String,
    /// Working directory for the command. Defaults to the sandbox workspace.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Timeout in seconds. Defaults to the sandbox's configured timeout.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReadParams {
    /// Path of the file to read.
    pub path: String,
    /// Zero-based line to start reading from.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WriteParams {
    /// Path of the file to write. Parent directories are created.
    pub path: String,
    /// Full new content of the file.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EditParams {
    /// Path of the file to edit.
    pub path: String,
    /// Exact text to replace. Must occur exactly once unless `replace_all` is set.
    pub old_string: String,
    /// Replacement text.
    pub new_string: String,
    /// Replace every occurrence.
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GlobParams {
    /// Glob pattern, e.g. `**/*.rs`.
    pub pattern: String,
    /// Directory to search from. Defaults to the sandbox workspace.
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GrepParams {
    /// Extended regular expression to search for.
    pub pattern: String,
    /// File or directory to search. Defaults to the sandbox workspace.
    #[serde(default)]
    pub path: Option<String>,
    /// Only search files matching this glob, e.g. `*.py`.
    #[serde(default)]
    pub include: Option<String>,
    /// Case-insensitive matching.
    #[serde(default)]
    pub ignore_case: bool,
    /// Maximum number of matches to return.
    #[serde(default)]
    pub max_results: Option<usize>,
}
