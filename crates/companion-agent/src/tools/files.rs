//! Filesystem tools: read, write, edit, and list — all routed through the
//! shared [`PathPolicy`].

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;

use super::pathsafe::PathPolicy;
use super::{Tool, ToolCtx, ToolResult};

/// Maximum characters returned by read_file.
const MAX_READ_CHARS: usize = 30_000;

pub struct ReadFileTool {
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file inside the workspace (or /tmp). \
         Optionally limit to a line range with `offset` (1-based) and `limit`."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path (workspace-relative or absolute)." },
                "offset": { "type": "integer", "description": "1-based first line (optional)." },
                "limit": { "type": "integer", "description": "Max lines to return (optional)." }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };

        let (mut file, _resolved) = match self.policy.open_for_read(path) {
            Ok(pair) => pair,
            Err(e) => return ToolResult::error(e),
        };

        let mut content = String::new();
        if let Err(e) = file.read_to_string(&mut content) {
            return ToolResult::error(format!("failed to read '{path}': {e}"));
        }

        let offset = input
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|v| v.saturating_sub(1) as usize);
        let limit = input.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        let result = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(0);
            let lines: Vec<&str> = content.lines().skip(start).collect();
            let lines = if let Some(n) = limit {
                &lines[..n.min(lines.len())]
            } else {
                &lines[..]
            };
            lines.join("\n")
        } else {
            content
        };

        ToolResult::success(super::truncate_result(&result, MAX_READ_CHARS))
    }
}

pub struct WriteFileTool {
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the workspace (or /tmp), replacing \
         any existing content. Parent directories are created as needed."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Destination path." },
                "content": { "type": "string", "description": "Full file content." }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };

        let (mut file, resolved) = match self.policy.open_for_write(path) {
            Ok(pair) => pair,
            Err(e) => return ToolResult::error(e),
        };
        match file.write_all(content.as_bytes()) {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} bytes to {}",
                content.len(),
                resolved.display()
            )),
            Err(e) => ToolResult::error(format!("write failed: {e}")),
        }
    }
}

pub struct EditFileTool {
    policy: Arc<PathPolicy>,
}

impl EditFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text fragment in a file. `old_text` must appear \
         exactly once; use a larger fragment to disambiguate."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_text": { "type": "string", "description": "Exact text to replace (must be unique in the file)." },
                "new_text": { "type": "string", "description": "Replacement text." }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let (Some(path), Some(old_text), Some(new_text)) = (
            input.get("path").and_then(|v| v.as_str()),
            input.get("old_text").and_then(|v| v.as_str()),
            input.get("new_text").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("path, old_text, and new_text are required");
        };

        let (mut file, resolved) = match self.policy.open_for_read(path) {
            Ok(pair) => pair,
            Err(e) => return ToolResult::error(e),
        };
        let mut content = String::new();
        if let Err(e) = file.read_to_string(&mut content) {
            return ToolResult::error(format!("failed to read '{path}': {e}"));
        }
        drop(file);

        let occurrences = content.matches(old_text).count();
        if occurrences == 0 {
            return ToolResult::error("old_text not found in file");
        }
        if occurrences > 1 {
            return ToolResult::error(format!(
                "old_text appears {occurrences} times; provide a unique fragment"
            ));
        }

        let updated = content.replacen(old_text, new_text, 1);
        let (mut file, _) = match self.policy.open_for_write(path) {
            Ok(pair) => pair,
            Err(e) => return ToolResult::error(e),
        };
        match file.write_all(updated.as_bytes()) {
            Ok(()) => ToolResult::success(format!("Edited {}", resolved.display())),
            Err(e) => ToolResult::error(format!("write failed: {e}")),
        }
    }
}

pub struct ListFilesTool {
    policy: Arc<PathPolicy>,
}

impl ListFilesTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List directory entries (name, type, size) inside the workspace or /tmp."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path. Defaults to the workspace root." }
            }
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = match self.policy.resolve_for_read(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let entries = match std::fs::read_dir(&resolved) {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("cannot list '{path}': {e}")),
        };

        let mut lines: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = match entry.file_type() {
                Ok(t) if t.is_dir() => "dir",
                Ok(t) if t.is_symlink() => "link",
                _ => "file",
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            lines.push(format!("{kind:5} {size:>10}  {name}"));
        }
        lines.sort();

        if lines.is_empty() {
            ToolResult::success("(empty directory)")
        } else {
            ToolResult::success(lines.join("\n"))
        }
    }
}
