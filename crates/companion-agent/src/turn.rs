//! Streaming turn orchestration.
//!
//! Streaming and tool use don't compose: a streamed response that stops for
//! tool_use can't be continued in place, so the accumulated text is
//! discarded and the whole turn reruns through the non-streaming tool loop.
//! Errors before the first streamed byte fall back to the non-streaming
//! path; errors after streaming began return the partial text with a marker.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::provider::{ChatRequest, LlmProvider, ProviderError};
use crate::stream::StreamEvent;
use crate::tools::tool_loop::{run_tool_loop, LoopConfig, ToolTurn};
use crate::tools::{Tool, ToolCtx};

/// One text increment plus everything received so far.
#[derive(Debug, Clone)]
pub struct StreamDelta {
    pub delta: String,
    pub accumulated: String,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub used_tools: bool,
    pub tool_names: Vec<String>,
    /// Surrogates of intermediate tool-use iterations, for persistence.
    pub turns: Vec<ToolTurn>,
}

/// Marker appended when generation dies mid-stream but partial text exists.
const GENERATION_ERROR_MARKER: &str = " (error during generation)";

/// Run a turn with live text deltas sent to `delta_tx`.
pub async fn run_streaming_turn(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    tools: &[Box<dyn Tool>],
    ctx: &ToolCtx,
    cfg: &LoopConfig,
    delta_tx: mpsc::Sender<StreamDelta>,
) -> Result<TurnOutcome, ProviderError> {
    // Streaming disables extended thinking.
    let mut stream_req = request.clone();
    stream_req.thinking_budget = None;

    let (ev_tx, mut ev_rx) = mpsc::channel::<StreamEvent>(64);

    let consume = async {
        let mut accumulated = String::new();
        let mut stop_reason = String::new();
        let mut stream_error: Option<String> = None;
        while let Some(event) = ev_rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    accumulated.push_str(&text);
                    let _ = delta_tx
                        .send(StreamDelta {
                            delta: text,
                            accumulated: accumulated.clone(),
                        })
                        .await;
                }
                StreamEvent::ToolUse { .. } => {
                    // The Done event carries the authoritative stop_reason;
                    // nothing to do with the call itself here.
                }
                StreamEvent::Done {
                    stop_reason: reason,
                    ..
                } => stop_reason = reason,
                StreamEvent::Error { message } => {
                    stream_error = Some(message);
                    break;
                }
            }
        }
        (accumulated, stop_reason, stream_error)
    };

    let (send_result, (accumulated, stop_reason, stream_error)) =
        tokio::join!(provider.send_stream(&stream_req, ev_tx), consume);

    // Error before the first byte: the non-streaming path owns retries.
    if let Err(e) = send_result {
        if accumulated.is_empty() {
            warn!(error = %e, "stream failed before first byte, falling back to non-streaming");
            return run_non_streaming(provider, request, tools, ctx, cfg).await;
        }
        return Ok(TurnOutcome {
            text: format!("{accumulated}{GENERATION_ERROR_MARKER}"),
            used_tools: false,
            tool_names: Vec::new(),
            turns: Vec::new(),
        });
    }

    if let Some(message) = stream_error {
        if accumulated.is_empty() {
            warn!(%message, "stream errored before first byte, falling back to non-streaming");
            return run_non_streaming(provider, request, tools, ctx, cfg).await;
        }
        warn!(%message, "stream errored mid-generation, returning partial text");
        return Ok(TurnOutcome {
            text: format!("{accumulated}{GENERATION_ERROR_MARKER}"),
            used_tools: false,
            tool_names: Vec::new(),
            turns: Vec::new(),
        });
    }

    if stop_reason == "tool_use" {
        // The streamed accumulation can't satisfy the tool loop — discard it
        // and run the turn to completion without streaming.
        info!("stream stopped for tool use, rerunning non-streaming");
        let mut outcome = run_non_streaming(provider, request, tools, ctx, cfg).await?;
        outcome.used_tools = true;
        return Ok(outcome);
    }

    Ok(TurnOutcome {
        text: accumulated,
        used_tools: false,
        tool_names: Vec::new(),
        turns: Vec::new(),
    })
}

async fn run_non_streaming(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    tools: &[Box<dyn Tool>],
    ctx: &ToolCtx,
    cfg: &LoopConfig,
) -> Result<TurnOutcome, ProviderError> {
    let outcome = run_tool_loop(provider, request, tools, ctx, cfg).await?;
    Ok(TurnOutcome {
        text: outcome.text,
        used_tools: outcome.used_tools,
        tool_names: outcome.tool_names,
        turns: outcome.turns,
    })
}
