//! Memory tools: persist facts to the workspace, search the hybrid index,
//! and pin context to the current session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use companion_sessions::types::PinSource;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolCtx, ToolResult};

pub struct SaveMemoryTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> SaveMemoryTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for SaveMemoryTool<C> {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Save a fact about the user to long-term memory. Use when the user \
         shares something worth remembering across conversations — \
         preferences, facts, instructions, plans."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember, one sentence." },
                "category": {
                    "type": "string",
                    "enum": ["preference", "fact", "instruction", "plan"],
                    "description": "What kind of memory this is."
                }
            },
            "required": ["content", "category"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: Value) -> ToolResult {
        let (Some(content), Some(category)) = (
            input.get("content").and_then(|v| v.as_str()),
            input.get("category").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("content and category are required");
        };

        let line = format!("[{category}] {content}");
        if let Err(e) = self.ctx.workspace().append_memory(&line) {
            return ToolResult::error(format!("memory write failed: {e}"));
        }

        // Refresh the indices so the fact is immediately searchable.
        let docs = self.ctx.workspace().memory_documents();
        if let Err(e) = self.ctx.memory().reindex_all(&docs) {
            return ToolResult::error(format!("saved, but reindex failed: {e}"));
        }

        ToolResult::success(format!("Remembered: {line}"))
    }
}

pub struct SearchMemoryTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> SearchMemoryTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for SearchMemoryTool<C> {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search long-term memory (semantic + keyword). Use before claiming \
         you don't know something about the user."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for." },
                "top_k": { "type": "integer", "description": "Max results (default 5)." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, input: Value) -> ToolResult {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: query");
        };
        let top_k = input
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(5);

        let pins = self.ctx.sessions().build_context_for_prompt(ctx.chat_id);
        let context = (!pins.is_empty()).then_some(pins.as_str());

        match self.ctx.memory().search(query, context, top_k).await {
            Ok(hits) if hits.is_empty() => ToolResult::success("No matching memories."),
            Ok(hits) => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|h| format!("- [{}] {} (score {:.2})", h.source, h.text, h.score))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("search failed: {e}")),
        }
    }
}

pub struct PinContextTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> PinContextTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for PinContextTool<C> {
    fn name(&self) -> &str {
        "pin_context"
    }

    fn description(&self) -> &str {
        "Pin a short piece of context to this conversation. Pinned text is \
         injected into every future turn and survives history trimming."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The context to pin (keep it short)." }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, input: Value) -> ToolResult {
        let Some(text) = input.get("text").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: text");
        };

        if self
            .ctx
            .sessions()
            .pin_context(ctx.chat_id, text, PinSource::User)
        {
            ToolResult::success(format!("Pinned: {text}"))
        } else {
            ToolResult::error("pinned context budget is full — unpin or shorten something first")
        }
    }
}
