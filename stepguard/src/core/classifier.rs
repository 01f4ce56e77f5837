//! Deterministic classification of tool calls.
//!
//! The catalog maps tool names to a category, the `$defs` entry used to
//! validate their input, and whether their input is a shell command. Config
//! may add or replace entries without code changes.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::shell::classify_command;
use crate::core::types::{GateName, ToolCategory};

/// Catalog entry for one tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub category: ToolCategory,
    /// Name of the `$defs` entry in the tool input schema; `None` accepts any object.
    pub schema: Option<String>,
    /// Input carries a `command` string refined by shell heuristics.
    pub shell: bool,
    /// Gate this tool reports on when it completes.
    pub gate: Option<GateName>,
}

/// Config-provided tool entry (`[tools.<name>]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    pub category: ToolCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateName>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shell: bool,
}

const BUILTIN_TOOLS: &[(&str, ToolCategory, Option<&str>, bool)] = &[
    ("Read", ToolCategory::ReadOnly, Some("read"), false),
    ("read_file", ToolCategory::ReadOnly, Some("read_file"), false),
    ("Glob", ToolCategory::ReadOnly, Some("pattern"), false),
    ("Grep", ToolCategory::ReadOnly, Some("pattern"), false),
    ("LS", ToolCategory::ReadOnly, None, false),
    ("list_directory", ToolCategory::ReadOnly, None, false),
    ("search_files", ToolCategory::ReadOnly, None, false),
    ("BashOutput", ToolCategory::ReadOnly, None, false),
    ("Write", ToolCategory::Mutating, Some("write"), false),
    ("write_file", ToolCategory::Mutating, Some("write_file"), false),
    ("Edit", ToolCategory::Mutating, Some("edit"), false),
    ("edit_file", ToolCategory::Mutating, Some("write_file"), false),
    ("MultiEdit", ToolCategory::Mutating, Some("multi_edit"), false),
    ("NotebookEdit", ToolCategory::Mutating, Some("notebook_edit"), false),
    ("Bash", ToolCategory::Execute, Some("command"), true),
    ("run_command", ToolCategory::Execute, Some("command"), true),
    ("KillShell", ToolCategory::Execute, None, false),
    ("Task", ToolCategory::Delegate, Some("task"), false),
    ("WebFetch", ToolCategory::Network, Some("web_fetch"), false),
    ("WebSearch", ToolCategory::Network, Some("web_search"), false),
    ("TodoWrite", ToolCategory::Planning, Some("todo_write"), false),
    ("ExitPlanMode", ToolCategory::Planning, None, false),
];

/// Keys that name a file target inside `tool_input`.
const PATH_KEYS: &[&str] = &["file_path", "path", "notebook_path"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolCatalog {
    pub fn builtin() -> Self {
        let tools = BUILTIN_TOOLS
            .iter()
            .map(|(name, category, schema, shell)| {
                (
                    (*name).to_string(),
                    ToolSpec {
                        category: *category,
                        schema: schema.map(str::to_string),
                        shell: *shell,
                        gate: None,
                    },
                )
            })
            .collect();
        Self { tools }
    }

    /// Builtin catalog with config entries layered on top.
    pub fn with_overrides(overrides: &BTreeMap<String, ToolOverride>) -> Self {
        let mut catalog = Self::builtin();
        for (name, entry) in overrides {
            let schema = catalog
                .tools
                .get(name)
                .and_then(|existing| existing.schema.clone())
                .or_else(|| entry.shell.then(|| "command".to_string()));
            catalog.tools.insert(
                name.clone(),
                ToolSpec {
                    category: entry.category,
                    schema,
                    shell: entry.shell,
                    gate: entry.gate,
                },
            );
        }
        catalog
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolSpec> {
        self.tools.get(tool_name)
    }
}

/// Classification of a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// `None` for tools missing from the catalog.
    pub category: Option<ToolCategory>,
    /// Shell command text, for shell tools.
    pub command: Option<String>,
    /// File targets named in the input.
    pub paths: Vec<String>,
}

/// Classify `tool_name` + `tool_input` against the catalog.
///
/// - Shell tools take the category of their command string.
/// - File-mutating tools whose targets are all documentation become
///   `Documentation`.
pub fn classify_tool(catalog: &ToolCatalog, tool_name: &str, tool_input: &Value) -> Classification {
    let paths = target_paths(tool_input);
    let Some(spec) = catalog.get(tool_name) else {
        return Classification {
            category: None,
            command: None,
            paths,
        };
    };

    let command = spec
        .shell
        .then(|| tool_input.get("command").and_then(Value::as_str))
        .flatten()
        .map(str::to_string);

    let mut category = match &command {
        Some(command) => classify_command(command),
        None => spec.category,
    };
    if category == ToolCategory::Mutating
        && !paths.is_empty()
        && paths.iter().all(|path| is_documentation_path(Path::new(path)))
    {
        category = ToolCategory::Documentation;
    }

    Classification {
        category: Some(category),
        command,
        paths,
    }
}

pub fn target_paths(tool_input: &Value) -> Vec<String> {
    PATH_KEYS
        .iter()
        .filter_map(|key| tool_input.get(*key).and_then(Value::as_str))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_documentation_path(path: &Path) -> bool {
    let doc_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "md" | "mdx" | "rst" | "adoc"));
    let doc_dir = path
        .components()
        .any(|component| matches!(component, Component::Normal(name) if name == "docs" || name == "doc"));
    let doc_file = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("README") || name.starts_with("CHANGELOG"));
    doc_extension || doc_dir || doc_file
}
