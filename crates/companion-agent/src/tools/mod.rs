//! Tool system for model-initiated actions.
//!
//! Every tool implements [`Tool`]; the registry in `build.rs` assembles the
//! per-turn list and `tool_loop.rs` drives dispatch. Results are plain
//! strings, truncated before they reach the model. Handlers that refuse an
//! action (path policy, command policy) return an error result starting
//! with `Error:` — the model decides how to proceed.

pub mod agent_tools;
pub mod build;
pub mod command;
pub mod files;
pub mod memory_tools;
pub mod pathsafe;
pub mod schedule_tool;
pub mod tool_loop;
pub mod web;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

/// Request-scoped context threaded explicitly through tool dispatch so
/// handlers deep in the loop know which chat they act for.
#[derive(Debug, Clone, Copy)]
pub struct ToolCtx {
    pub chat_id: i64,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: if message.starts_with("Error:") {
                message
            } else {
                format!("Error: {message}")
            },
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "save_memory").
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input parameters.
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, ctx: &ToolCtx, input: serde_json::Value) -> ToolResult;
}

/// Convert a tool list to API-level definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Cap a tool result before it is fed back to the model.
pub fn truncate_result(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut cut = max_chars;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[output truncated at {} characters]", &text[..cut], max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_results_are_prefixed_once() {
        assert_eq!(ToolResult::error("nope").content, "Error: nope");
        assert_eq!(ToolResult::error("Error: nope").content, "Error: nope");
    }

    #[test]
    fn truncation_appends_marker() {
        let long = "a".repeat(50);
        let cut = truncate_result(&long, 10);
        assert!(cut.starts_with("aaaaaaaaaa\n[output truncated"));
        assert_eq!(truncate_result("short", 10), "short");
    }
}
