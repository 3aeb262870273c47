//! File system tools: `io.read_file`, `io.write_file`, `io.list_directory`,
//! `io.search_files`. All paths go through the shared [`PathPolicy`].

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

use crate::params::{opt_bool, opt_str, opt_u64, require_str};
use crate::safety::PathPolicy;
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

fn entry_value(path: &std::path::Path, meta: &std::fs::Metadata) -> serde_json::Value {
    json!({
        "name": path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
        "path": path.display().to_string(),
        "type": if meta.is_dir() { "directory" } else { "file" },
        "size": meta.len(),
    })
}

pub struct ReadFileTool {
    descriptor: ToolDescriptor,
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("io.read_file", "Read file contents")
                .with_capability(
                    "read",
                    "read",
                    "Read a UTF-8 file, optionally truncated to max_lines",
                    json!({
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "max_lines": { "type": "integer" }
                        },
                        "required": ["path"]
                    }),
                ),
            policy,
        }
    }
}

#[async_trait]
impl FabricTool for ReadFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let path = require_str(&params, "path")?;
        let resolved = self.policy.check(path)?;

        if !resolved.exists() {
            return Err(ToolError::new("FILE_NOT_FOUND", format!("File not found: {path}")));
        }

        let content = fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::new("READ_ERROR", e.to_string()))?;

        let max_lines = params.get("max_lines").and_then(|v| v.as_u64());
        let (content, line_count, truncated) = match max_lines {
            Some(max) => {
                let lines: Vec<&str> = content.lines().take(max as usize).collect();
                let truncated = content.lines().count() > lines.len();
                (lines.join("\n"), lines.len(), truncated)
            }
            None => {
                let count = content.lines().count();
                (content, count, false)
            }
        };

        let size = content.len();
        Ok(json!({
            "content": content,
            "line_count": line_count,
            "truncated": truncated,
            "path": resolved.display().to_string(),
            "size": size,
        }))
    }
}

pub struct WriteFileTool {
    descriptor: ToolDescriptor,
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("io.write_file", "Write content to a file")
                .with_capability(
                    "write",
                    "write",
                    "Write or append UTF-8 content, creating parent directories",
                    json!({
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "content": { "type": "string" },
                            "append": { "type": "boolean" }
                        },
                        "required": ["path", "content"]
                    }),
                ),
            policy,
        }
    }
}

#[async_trait]
impl FabricTool for WriteFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let path = require_str(&params, "path")?;
        let content = require_str(&params, "content")?;
        let append = opt_bool(&params, "append", false);
        let resolved = self.policy.check(path)?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::new("WRITE_ERROR", e.to_string()))?;
        }

        if append {
            let mut existing = fs::read_to_string(&resolved).await.unwrap_or_default();
            existing.push_str(content);
            fs::write(&resolved, existing)
                .await
                .map_err(|e| ToolError::new("WRITE_ERROR", e.to_string()))?;
        } else {
            fs::write(&resolved, content)
                .await
                .map_err(|e| ToolError::new("WRITE_ERROR", e.to_string()))?;
        }

        Ok(json!({
            "bytes_written": content.len(),
            "path": resolved.display().to_string(),
            "append": append,
        }))
    }
}

pub struct ListDirectoryTool {
    descriptor: ToolDescriptor,
    policy: Arc<PathPolicy>,
}

impl ListDirectoryTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("io.list_directory", "List directory contents")
                .with_capability(
                    "list",
                    "list",
                    "List entries, optionally recursive and filtered by glob pattern",
                    json!({
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "recursive": { "type": "boolean" },
                            "pattern": { "type": "string" }
                        },
                        "required": ["path"]
                    }),
                ),
            policy,
        }
    }
}

async fn walk(
    root: PathBuf,
    recursive: bool,
    pattern: Option<glob::Pattern>,
    limit: usize,
) -> Result<Vec<serde_json::Value>, ToolError> {
    let mut entries = Vec::new();
    let mut queue = vec![root];
    while let Some(dir) = queue.pop() {
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| ToolError::new("LIST_ERROR", e.to_string()))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::new("LIST_ERROR", e.to_string()))?
        {
            let path = entry.path();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| ToolError::new("LIST_ERROR", e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let matched = pattern
                .as_ref()
                .map(|p| p.matches(&name))
                .unwrap_or(true);
            if matched {
                entries.push(entry_value(&path, &meta));
                if entries.len() >= limit {
                    return Ok(entries);
                }
            }
            if recursive && meta.is_dir() {
                queue.push(path);
            }
        }
    }
    Ok(entries)
}

#[async_trait]
impl FabricTool for ListDirectoryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let path = require_str(&params, "path")?;
        let recursive = opt_bool(&params, "recursive", false);
        let pattern = opt_str(&params, "pattern")
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::new("INVALID_PATTERN", e.to_string()))?;
        let resolved = self.policy.check(path)?;

        if !resolved.is_dir() {
            return Err(ToolError::new("DIR_NOT_FOUND", format!("Directory not found: {path}")));
        }

        let mut entries = walk(resolved.clone(), recursive, pattern, 10_000).await?;
        entries.sort_by(|a, b| {
            let type_order = |v: &serde_json::Value| v["type"] == "file";
            type_order(a)
                .cmp(&type_order(b))
                .then_with(|| a["name"].as_str().cmp(&b["name"].as_str()))
        });

        Ok(json!({
            "path": resolved.display().to_string(),
            "entries": entries,
            "count": entries.len(),
        }))
    }
}

pub struct SearchFilesTool {
    descriptor: ToolDescriptor,
    policy: Arc<PathPolicy>,
}

impl SearchFilesTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("io.search_files", "Search files by name and content")
                .with_capability(
                    "search",
                    "search",
                    "Recursively find files matching a name glob, optionally containing a substring",
                    json!({
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "pattern": { "type": "string" },
                            "content": { "type": "string" },
                            "max_results": { "type": "integer" }
                        },
                        "required": ["path", "pattern"]
                    }),
                ),
            policy,
        }
    }
}

#[async_trait]
impl FabricTool for SearchFilesTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let path = require_str(&params, "path")?;
        let pattern = glob::Pattern::new(require_str(&params, "pattern")?)
            .map_err(|e| ToolError::new("INVALID_PATTERN", e.to_string()))?;
        let needle = opt_str(&params, "content").map(str::to_string);
        let max_results = opt_u64(&params, "max_results", 100) as usize;
        let resolved = self.policy.check(path)?;

        let candidates = walk(resolved.clone(), true, Some(pattern), 10_000).await?;
        let mut matches = Vec::new();
        for entry in candidates {
            if matches.len() >= max_results {
                break;
            }
            if entry["type"] != "file" {
                continue;
            }
            let file_path = entry["path"].as_str().unwrap_or_default().to_string();
            match &needle {
                None => matches.push(entry),
                Some(needle) => {
                    if let Ok(content) = fs::read_to_string(&file_path).await {
                        if content.contains(needle.as_str()) {
                            matches.push(entry);
                        }
                    }
                }
            }
        }

        Ok(json!({
            "path": resolved.display().to_string(),
            "matches": matches,
            "count": matches.len(),
        }))
    }
}
