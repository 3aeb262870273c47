//! Text tools: `text.regex`, `text.transform`, `text.diff`.

use async_trait::async_trait;
use serde_json::json;

use crate::params::{opt_u64, require_str};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

pub struct RegexTool {
    descriptor: ToolDescriptor,
}

impl RegexTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("text.regex", "Regex matching")
                .with_capability(
                    "match",
                    "match",
                    "Find all matches of a pattern; flags: i, m, s",
                    json!({
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "pattern": { "type": "string" },
                            "flags": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["text", "pattern"]
                    }),
                ),
        }
    }
}

impl Default for RegexTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for RegexTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let text = require_str(&params, "text")?;
        let pattern = require_str(&params, "pattern")?;
        let flags: Vec<&str> = params
            .get("flags")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let regex = regex::RegexBuilder::new(pattern)
            .case_insensitive(flags.contains(&"i"))
            .multi_line(flags.contains(&"m"))
            .dot_matches_new_line(flags.contains(&"s"))
            .build()
            .map_err(|e| ToolError::new("INVALID_REGEX", e.to_string()))?;

        let mut matches = Vec::new();
        let mut groups = Vec::new();
        for caps in regex.captures_iter(text) {
            matches.push(json!(caps.get(0).map(|m| m.as_str()).unwrap_or_default()));
            if caps.len() > 1 {
                let group_values: Vec<Option<&str>> = (1..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str()))
                    .collect();
                groups.push(json!(group_values));
            }
        }

        let count = matches.len();
        Ok(json!({
            "matches": matches,
            "groups": groups,
            "count": count,
            "pattern": pattern,
        }))
    }
}

pub struct TransformTool {
    descriptor: ToolDescriptor,
}

impl TransformTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("text.transform", "Apply text transformations")
                .with_capability(
                    "transform",
                    "transform",
                    "Apply a pipeline of operations: uppercase, lowercase, trim, truncate, replace, split",
                    json!({
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "operations": { "type": "array", "items": { "type": "object" } }
                        },
                        "required": ["text", "operations"]
                    }),
                ),
        }
    }
}

impl Default for TransformTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for TransformTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let text = require_str(&params, "text")?;
        let operations = params
            .get("operations")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::new("MISSING_PARAM", "'operations' is required"))?;

        let mut result = text.to_string();
        let mut applied = 0usize;

        for op in operations {
            let op_type = op.get("type").and_then(|v| v.as_str()).unwrap_or_default();
            match op_type {
                "uppercase" => result = result.to_uppercase(),
                "lowercase" => result = result.to_lowercase(),
                "trim" => result = result.trim().to_string(),
                "truncate" => {
                    let length = op.get("length").and_then(|v| v.as_u64()).unwrap_or(100) as usize;
                    if result.chars().count() > length {
                        result = result.chars().take(length).collect::<String>() + "...";
                    }
                }
                "replace" => {
                    let old = op.get("old").and_then(|v| v.as_str()).unwrap_or_default();
                    let new = op.get("new").and_then(|v| v.as_str()).unwrap_or_default();
                    if !old.is_empty() {
                        match op.get("count").and_then(|v| v.as_u64()) {
                            Some(count) => result = result.replacen(old, new, count as usize),
                            None => result = result.replace(old, new),
                        }
                    }
                }
                "split" => {
                    // Split terminates the pipeline: the result becomes a list.
                    let sep = op.get("separator").and_then(|v| v.as_str()).unwrap_or("\n");
                    let parts: Vec<&str> = result.split(sep).collect();
                    return Ok(json!({
                        "result": parts,
                        "operations_applied": applied + 1,
                        "count": parts.len(),
                    }));
                }
                other => {
                    return Err(ToolError::new(
                        "UNKNOWN_OPERATION",
                        format!("Unknown operation: {other}"),
                    ))
                }
            }
            applied += 1;
        }

        Ok(json!({
            "result": result,
            "operations_applied": applied,
        }))
    }
}

pub struct DiffTool {
    descriptor: ToolDescriptor,
}

impl DiffTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("text.diff", "Compare two texts")
                .with_capability(
                    "compare",
                    "compare",
                    "Line diff with added/removed counts",
                    json!({
                        "type": "object",
                        "properties": {
                            "original": { "type": "string" },
                            "modified": { "type": "string" }
                        },
                        "required": ["original", "modified"]
                    }),
                ),
        }
    }
}

impl Default for DiffTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest-common-subsequence table over lines.
fn lcs_table(a: &[&str], b: &[&str]) -> Vec<Vec<usize>> {
    let mut table = vec![vec![0; b.len() + 1]; a.len() + 1];
    for (i, line_a) in a.iter().enumerate() {
        for (j, line_b) in b.iter().enumerate() {
            table[i + 1][j + 1] = if line_a == line_b {
                table[i][j] + 1
            } else {
                table[i][j + 1].max(table[i + 1][j])
            };
        }
    }
    table
}

fn line_diff(original: &str, modified: &str) -> (Vec<String>, usize, usize) {
    let a: Vec<&str> = original.lines().collect();
    let b: Vec<&str> = modified.lines().collect();
    let table = lcs_table(&a, &b);

    let mut diff = Vec::new();
    let (mut i, mut j) = (a.len(), b.len());
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && a[i - 1] == b[j - 1] {
            diff.push(format!("  {}", a[i - 1]));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            diff.push(format!("+ {}", b[j - 1]));
            j -= 1;
        } else {
            diff.push(format!("- {}", a[i - 1]));
            i -= 1;
        }
    }
    diff.reverse();

    let added = diff.iter().filter(|l| l.starts_with("+ ")).count();
    let removed = diff.iter().filter(|l| l.starts_with("- ")).count();
    (diff, added, removed)
}

#[async_trait]
impl FabricTool for DiffTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let original = require_str(&params, "original")?;
        let modified = require_str(&params, "modified")?;
        let _context_lines = opt_u64(&params, "context_lines", 3);

        let (diff, added, removed) = line_diff(original, modified);
        let original_line_count = original.lines().count();

        Ok(json!({
            "diff": diff.join("\n"),
            "added": added,
            "removed": removed,
            "unchanged": original_line_count.saturating_sub(removed),
            "total_changes": added + removed,
        }))
    }
}
