//! File tools for building a project inside a [`Workspace`].

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{NativeTool, Workspace};

/// Files the agent may not delete; the build depends on them.
const PROTECTED_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "vite.config.js",
    "vite.config.ts",
    "index.html",
];

/// Directories skipped when listing the project.
const IGNORED_DIRS: &[&str] = &["node_modules", "dist", ".git", ".vite"];

/// Every file tool, bound to one workspace.
#[must_use]
pub fn all(workspace: &Workspace) -> Vec<Arc<dyn NativeTool>> {
    vec![
        Arc::new(WriteFileTool(workspace.clone())),
        Arc::new(ReadFileTool(workspace.clone())),
        Arc::new(ModifyFileTool(workspace.clone())),
        Arc::new(ListDirTool(workspace.clone())),
        Arc::new(DeleteFileTool(workspace.clone())),
        Arc::new(ExitTool),
    ]
}

fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing string argument `{key}`"))
}

#[derive(Debug)]
pub struct WriteFileTool(Workspace);

#[async_trait]
impl NativeTool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the project. Parent directories are created."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root." },
                "content": { "type": "string", "description": "Full file content." }
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let rel = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let path = self.0.resolve(rel)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create directory for {rel}"))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("cannot write {rel}"))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "Agent wrote file");
        Ok(json!(format!("Wrote {rel}")))
    }
}

#[derive(Debug)]
pub struct ReadFileTool(Workspace);

#[async_trait]
impl NativeTool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root." }
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let rel = str_arg(&args, "path")?;
        let path = self.0.resolve(rel)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("cannot read {rel}"))?;
        Ok(json!(content))
    }
}

#[derive(Debug)]
pub struct ModifyFileTool(Workspace);

#[async_trait]
impl NativeTool for ModifyFileTool {
    fn name(&self) -> &str {
        "modify_file"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of old_content with new_content in an existing file."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root." },
                "old_content": { "type": "string", "description": "Exact text to replace." },
                "new_content": { "type": "string", "description": "Replacement text." }
            },
            "required": ["path", "old_content", "new_content"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let rel = str_arg(&args, "path")?;
        let old = str_arg(&args, "old_content")?;
        let new = str_arg(&args, "new_content")?;
        if old.is_empty() {
            anyhow::bail!("old_content must not be empty");
        }

        let path = self.0.resolve(rel)?;
        let original = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("cannot read {rel}"))?;

        let count = original.matches(old).count();
        if count == 0 {
            anyhow::bail!("old_content not found in {rel}");
        }
        tokio::fs::write(&path, original.replace(old, new))
            .await
            .with_context(|| format!("cannot write {rel}"))?;

        Ok(json!(format!("Replaced {count} occurrence(s) in {rel}")))
    }
}

#[derive(Debug)]
pub struct ListDirTool(Workspace);

#[async_trait]
impl NativeTool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List files under a project directory, recursively. Build output and dependencies are skipped."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the project root. Defaults to the root." }
            }
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let dir = match args["path"].as_str().map(str::trim) {
            None | Some("" | ".") => self.0.root().to_path_buf(),
            Some(rel) => self.0.resolve(rel)?,
        };
        let root = self.0.root().to_path_buf();

        let entries = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&dir)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    !(e.file_type().is_dir()
                        && IGNORED_DIRS.iter().any(|d| e.file_name() == *d))
                })
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    e.path()
                        .strip_prefix(&root)
                        .ok()
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                })
                .collect::<Vec<_>>()
        })
        .await?;

        if entries.is_empty() {
            return Ok(json!("(empty)"));
        }
        Ok(json!(entries.join("\n")))
    }
}

#[derive(Debug)]
pub struct DeleteFileTool(Workspace);

#[async_trait]
impl NativeTool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the project. Build configuration files cannot be deleted."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root." }
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let rel = str_arg(&args, "path")?;
        let path = self.0.resolve(rel)?;

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if PROTECTED_FILES.contains(&file_name) {
            anyhow::bail!("{rel} is required by the build and cannot be deleted");
        }

        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("cannot delete {rel}"))?;
        Ok(json!(format!("Deleted {rel}")))
    }
}

/// Signals that the project is complete.
#[derive(Debug)]
pub struct ExitTool;

#[async_trait]
impl NativeTool for ExitTool {
    fn name(&self) -> &str {
        "exit"
    }

    fn description(&self) -> &str {
        "Call once every file is written. Afterwards reply with a short summary and call no more tools."
    }

    fn schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        Ok(json!("Done. Do not call any more tools; reply with a short summary of the project."))
    }
}
