//! Tools for spawning and inspecting background agents.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolCtx, ToolResult};

pub struct SpawnAgentTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> SpawnAgentTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for SpawnAgentTool<C> {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Start a background agent that works on a task independently and \
         reports back to this chat when done. Use for slow research or \
         multi-step work the user shouldn't wait on."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Self-contained task description." }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, input: Value) -> ToolResult {
        let Some(task) = input.get("task").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: task");
        };

        match self.ctx.agents().spawn(task, ctx.chat_id) {
            Ok(id) => {
                self.ctx.health().record_agent_run();
                ToolResult::success(format!(
                    "Background agent `{id}` started. Its result will be posted here when ready."
                ))
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub struct AgentStatusTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> AgentStatusTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for AgentStatusTool<C> {
    fn name(&self) -> &str {
        "agent_status"
    }

    fn description(&self) -> &str {
        "Check on background agents for this chat: 'list' shows them all, \
         'get' shows one by id, 'cancel' aborts a running one."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "get", "cancel"] },
                "agent_id": { "type": "string", "description": "Required for get/cancel." }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, input: Value) -> ToolResult {
        let action = input.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "list" => {
                let agents = self.ctx.agents().list_for_chat(ctx.chat_id);
                if agents.is_empty() {
                    return ToolResult::success("No background agents for this chat.");
                }
                let lines: Vec<String> = agents
                    .iter()
                    .map(|a| format!("- {} | {} | {}", a.id, a.status, a.task))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            "get" => {
                let Some(id) = input.get("agent_id").and_then(|v| v.as_str()) else {
                    return ToolResult::error("agent_id is required for get");
                };
                match self.ctx.agents().get(id) {
                    Some(a) => {
                        let mut out = format!("Agent {} — {}\nTask: {}", a.id, a.status, a.task);
                        if let Some(result) = &a.result {
                            out.push_str(&format!("\nResult: {result}"));
                        }
                        if let Some(error) = &a.error {
                            out.push_str(&format!("\nError: {error}"));
                        }
                        ToolResult::success(out)
                    }
                    None => ToolResult::error(format!("no such agent: {id}")),
                }
            }
            "cancel" => {
                let Some(id) = input.get("agent_id").and_then(|v| v.as_str()) else {
                    return ToolResult::error("agent_id is required for cancel");
                };
                match self.ctx.agents().cancel(id) {
                    Ok(()) => ToolResult::success(format!("Agent {id} cancelled.")),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            other => ToolResult::error(format!("unknown action '{other}'")),
        }
    }
}
