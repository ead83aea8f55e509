//! Tool execution loop.
//!
//! Flow: request → LLM → if tool_use → dispatch tools in order → inject
//! results → LLM → repeat. Stops when the model stops calling tools or the
//! iteration cap is reached — the cap is a hard bound on provider calls, so
//! hitting it returns a fixed user-visible message instead of an extra call.

use tracing::{debug, info, warn};

use crate::provider::{ChatRequest, LlmProvider, ProviderError, ToolCall};
use crate::retry::{send_with_retry, RetryPolicy};

use super::{truncate_result, Tool, ToolCtx, ToolResult};

/// Returned when the model keeps calling tools past the iteration cap.
pub const TOO_MANY_ITERATIONS_MESSAGE: &str =
    "I made too many tool calls in a row without finishing — please try again, \
     maybe with a narrower request.";

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub result_max_chars: usize,
    pub retry: RetryPolicy,
}

/// Textual surrogate of one tool-use iteration, for history persistence.
/// Tool blocks are multimodal content; only these elided strings reach the
/// session log.
#[derive(Debug, Clone)]
pub struct ToolTurn {
    /// Assistant turn: any preamble text plus `[tool_use]` lines.
    pub assistant_surrogate: String,
    /// The matching user turn carrying `[tool_result]` lines.
    pub results_surrogate: String,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub text: String,
    pub used_tools: bool,
    /// Tool names invoked, in dispatch order.
    pub tool_names: Vec<String>,
    /// One entry per tool-use iteration, in order.
    pub turns: Vec<ToolTurn>,
}

/// Run the full tool loop (non-streaming) starting from `request`.
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    mut request: ChatRequest,
    tools: &[Box<dyn Tool>],
    ctx: &ToolCtx,
    cfg: &LoopConfig,
) -> Result<LoopOutcome, ProviderError> {
    let mut used_tools = false;
    let mut tool_names: Vec<String> = Vec::new();
    let mut turns: Vec<ToolTurn> = Vec::new();

    for iteration in 0..cfg.max_iterations {
        debug!(iteration, "tool loop iteration");
        let response = send_with_retry(provider, &request, cfg.retry).await?;

        if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
            info!(iteration, used_tools, "tool loop complete");
            return Ok(LoopOutcome {
                text: response.content,
                used_tools,
                tool_names,
                turns,
            });
        }
        used_tools = true;

        // Re-append the assistant turn as content blocks (text + tool_use).
        let mut assistant_content: Vec<serde_json::Value> = Vec::new();
        if !response.content.is_empty() {
            assistant_content.push(serde_json::json!({
                "type": "text",
                "text": response.content,
            }));
        }
        for call in &response.tool_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }
        request.messages.push(serde_json::json!({
            "role": "assistant",
            "content": assistant_content,
        }));

        // Dispatch sequentially, preserving order, and collect results.
        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();
        let mut result_surrogates: Vec<String> = Vec::new();
        for call in &response.tool_calls {
            tool_names.push(call.name.clone());
            let result = execute_tool(tools, ctx, call).await;
            result_surrogates.push(format!(
                "[tool_result] {}",
                truncate_result(&result.content, 500)
            ));
            tool_result_content.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": truncate_result(&result.content, cfg.result_max_chars),
                "is_error": result.is_error,
            }));
        }
        request.messages.push(serde_json::json!({
            "role": "user",
            "content": tool_result_content,
        }));

        // History surrogates for this iteration.
        let mut assistant_surrogate = String::new();
        if !response.content.is_empty() {
            assistant_surrogate.push_str(&response.content);
            assistant_surrogate.push('\n');
        }
        for call in &response.tool_calls {
            assistant_surrogate.push_str(&format!("[tool_use] {}({})\n", call.name, call.input));
        }
        turns.push(ToolTurn {
            assistant_surrogate: assistant_surrogate.trim_end().to_string(),
            results_surrogate: result_surrogates.join("\n"),
        });
    }

    warn!(
        max_iterations = cfg.max_iterations,
        "tool loop hit the iteration cap"
    );
    Ok(LoopOutcome {
        text: TOO_MANY_ITERATIONS_MESSAGE.to_string(),
        used_tools: true,
        tool_names,
        turns,
    })
}

/// Find and execute the named tool; unknown names become error results.
async fn execute_tool(tools: &[Box<dyn Tool>], ctx: &ToolCtx, call: &ToolCall) -> ToolResult {
    match tools.iter().find(|t| t.name() == call.name) {
        Some(tool) => {
            debug!(tool = %call.name, "executing tool");
            tool.execute(ctx, call.input.clone()).await
        }
        None => ToolResult::error(format!("unknown tool: {}", call.name)),
    }
}
