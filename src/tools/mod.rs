//! Native tools exposed to the project agent.
//!
//! A [`ToolRegistry`] holds the tool set for one generation. Calls never fail
//! the agent loop: an unknown tool, malformed arguments or a tool error all
//! become an `Error: ...` result that is fed back to the model.

pub mod files;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

/// A tool implemented in-process.
#[async_trait]
pub trait NativeTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn schema(&self) -> serde_json::Value;
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Result of one tool invocation as seen by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub success: bool,
}

impl ToolOutcome {
    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {message}"),
            success: false,
        }
    }
}

/// Named set of native tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<BTreeMap<String, Arc<dyn NativeTool>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the project file tools rooted at `workspace`.
    #[must_use]
    pub fn project_tools(workspace: &Workspace) -> Self {
        files::all(workspace)
            .into_iter()
            .fold(Self::new(), Self::with_tool)
    }

    #[must_use]
    pub fn with_tool(self, tool: Arc<dyn NativeTool>) -> Self {
        let mut tools = (*self.tools).clone();
        tools.insert(tool.name().to_string(), tool);
        Self {
            tools: Arc::new(tools),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in `OpenAI` function format.
    #[must_use]
    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.schema(),
                    }
                })
            })
            .collect()
    }

    /// Execute a tool by name with raw JSON arguments.
    pub async fn call(&self, name: &str, arguments: &str) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool_name = %name, "Model called an unknown tool");
            return ToolOutcome::error(format_args!("there is no tool called {name}"));
        };

        let args = if arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => return ToolOutcome::error(format_args!("invalid arguments for {name}: {e}")),
            }
        };

        match tool.call(args).await {
            Ok(serde_json::Value::String(s)) => ToolOutcome {
                content: s,
                success: true,
            },
            Ok(v) => ToolOutcome {
                content: v.to_string(),
                success: true,
            },
            Err(e) => ToolOutcome::error(e),
        }
    }
}

/// Sandbox root for file tools. Every path a tool touches resolves inside it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied relative path.
    ///
    /// Absolute paths and `..` components are rejected.
    pub fn resolve(&self, relative: &str) -> anyhow::Result<PathBuf> {
        let relative = relative.trim();
        if relative.is_empty() {
            anyhow::bail!("path must not be empty");
        }

        let path = Path::new(relative);
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => anyhow::bail!("path {relative} leaves the project directory"),
                Component::RootDir | Component::Prefix(_) => {
                    anyhow::bail!("path {relative} must be relative to the project root");
                }
            }
        }
        Ok(self.root.join(path))
    }
}
