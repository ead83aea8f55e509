//! The full message turn: pins, URL enrichment, prompt assembly, the LLM
//! call (streaming or not), persistence, and compaction.
//!
//! Every failure is classified into a friendly user-visible sentence, and
//! the assistant turn is still appended to history with an `[error]` prefix
//! so role alternation survives for subsequent turns.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use companion_core::types::{ChatId, ChatMessage, Role};
use companion_core::CompanionError;
use companion_sessions::detect::detect_important_context;
use companion_sessions::types::PinSource;

use crate::provider::{ChatRequest, ProviderError};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::tools::tool_loop::{run_tool_loop, LoopConfig};
use crate::tools::{build, web, ToolCtx};
use crate::turn::{run_streaming_turn, StreamDelta, TurnOutcome};

use super::context::MessageContext;

/// Per-fetched-URL excerpt cap inside the API-bound message.
const URL_EXCERPT_CHARS: usize = 4_000;

const SUMMARIZER_SYSTEM_PROMPT: &str = "Summarize the conversation below into a compact \
    paragraph a future assistant can rely on. Keep every concrete fact about the user \
    (names, dates, preferences, decisions, open tasks). Drop greetings and filler. \
    Reply with the summary only.";

/// Default caption for photos sent without one.
const DEFAULT_PHOTO_CAPTION: &str = "what's in this photo?";

/// Run a text turn. Returns the user-visible reply — on failure this is the
/// classified friendly message, already recorded in history.
pub async fn process_text_turn<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    chat_id: ChatId,
    text: &str,
    delta_tx: Option<mpsc::Sender<StreamDelta>>,
) -> String {
    ctx.health().record_message();

    // Auto-pin phrases the user clearly wants remembered.
    if let Some(phrase) = detect_important_context(text) {
        if ctx.sessions().pin_context(chat_id, &phrase, PinSource::Auto) {
            info!(chat_id, %phrase, "important context pinned");
        }
    }

    // Fetch up to N linked pages concurrently; excerpts go only into the
    // API-bound message, never into persisted history.
    let url_context = fetch_url_context(ctx, text).await;

    // Snapshot history before appending so the final API message can be
    // assembled separately from what gets persisted.
    let prior = ctx.sessions().get_history(chat_id);
    ctx.sessions().add_message(chat_id, Role::User, text);

    let tools = build::build_tools(Arc::clone(ctx));
    let tool_ctx = ToolCtx { chat_id };
    let loop_cfg = loop_config(ctx);

    let mut request = base_request(ctx, chat_id, &tools);
    for message in &prior {
        request.push_text(&message.role.to_string(), &message.content);
    }
    let api_text = match &url_context {
        Some(extra) => format!("{text}\n\n{extra}"),
        None => text.to_string(),
    };
    request.push_text("user", &api_text);

    let result = match delta_tx {
        Some(tx) => {
            run_streaming_turn(ctx.provider(), request, &tools, &tool_ctx, &loop_cfg, tx).await
        }
        None => run_tool_loop(ctx.provider(), request, &tools, &tool_ctx, &loop_cfg)
            .await
            .map(|o| TurnOutcome {
                text: o.text,
                used_tools: o.used_tools,
                tool_names: o.tool_names,
                turns: o.turns,
            }),
    };

    finish_turn(ctx, chat_id, result)
}

/// Run a photo turn: the image goes to the model as a base64 block, the
/// history records a text surrogate. Streaming is never used with images.
pub async fn process_photo_turn<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    chat_id: ChatId,
    image_base64: String,
    media_type: String,
    caption: Option<String>,
) -> String {
    ctx.health().record_message();
    let caption = caption
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PHOTO_CAPTION.to_string());

    let prior = ctx.sessions().get_history(chat_id);
    ctx.sessions()
        .add_message(chat_id, Role::User, &format!("[photo] {caption}"));

    let tools = build::build_tools(Arc::clone(ctx));
    let tool_ctx = ToolCtx { chat_id };
    let loop_cfg = loop_config(ctx);

    let mut request = base_request(ctx, chat_id, &tools);
    for message in &prior {
        request.push_text(&message.role.to_string(), &message.content);
    }
    request.messages.push(serde_json::json!({
        "role": "user",
        "content": [
            {
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": image_base64,
                }
            },
            { "type": "text", "text": caption },
        ]
    }));

    let result = run_tool_loop(ctx.provider(), request, &tools, &tool_ctx, &loop_cfg)
        .await
        .map(|o| TurnOutcome {
            text: o.text,
            used_tools: o.used_tools,
            tool_names: o.tool_names,
            turns: o.turns,
        });

    finish_turn(ctx, chat_id, result)
}

/// Force a compaction pass now (the `/compact` command).
pub async fn compact_now<C: MessageContext + 'static>(ctx: &Arc<C>, chat_id: ChatId) -> bool {
    let ctx2 = Arc::clone(ctx);
    ctx.sessions()
        .smart_trim(chat_id, true, move |oldest| async move {
            summarize_history(&ctx2, oldest).await
        })
        .await
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn loop_config<C: MessageContext>(ctx: &Arc<C>) -> LoopConfig {
    let limits = &ctx.config().limits;
    LoopConfig {
        max_iterations: limits.max_tool_iterations,
        result_max_chars: limits.tool_result_max_chars,
        retry: RetryPolicy::new(limits.max_retries, limits.base_retry_delay_ms),
    }
}

fn base_request<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    chat_id: ChatId,
    tools: &[Box<dyn crate::tools::Tool>],
) -> ChatRequest {
    let tier = ctx.sessions().model(chat_id);
    let snapshot = ctx.workspace().load();
    let session_context = ctx.sessions().build_context_for_prompt(chat_id);
    let catalog = build::tool_catalog(tools);

    let system = crate::prompt::build_system_prompt(&crate::prompt::PromptInputs {
        model: tier,
        snapshot: &snapshot,
        session_context: &session_context,
        now: Utc::now(),
        tools: &catalog,
        bootstrap_active: ctx.workspace().bootstrap_active(),
    });

    let mut request = ChatRequest::new(tier.api_id(), tier.max_output_tokens());
    request.system = Some(system);
    request.tools = build::tool_definitions(tools);
    request.thinking_budget = Some(tier.thinking_budget()).filter(|b| *b > 0);
    request
}

/// Persist the outcome (success or classified failure) and kick off
/// compaction. Returns the reply text.
fn finish_turn<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    chat_id: ChatId,
    result: Result<TurnOutcome, ProviderError>,
) -> String {
    match result {
        Ok(outcome) => {
            for _ in &outcome.tool_names {
                ctx.health().record_tool_call();
            }
            // Tool iterations persist as elided text turns so the log stays
            // scalar while the shape of the exchange survives.
            for turn in &outcome.turns {
                ctx.sessions()
                    .add_message(chat_id, Role::Assistant, &turn.assistant_surrogate);
                ctx.sessions()
                    .add_message(chat_id, Role::User, &turn.results_surrogate);
            }
            ctx.sessions()
                .add_message(chat_id, Role::Assistant, &outcome.text);

            // Fire-and-forget compaction after each successful turn.
            let ctx2 = Arc::clone(ctx);
            tokio::spawn(async move {
                let ctx3 = Arc::clone(&ctx2);
                let trimmed = ctx2
                    .sessions()
                    .smart_trim(chat_id, false, move |oldest| async move {
                        summarize_history(&ctx3, oldest).await
                    })
                    .await;
                if let Err(e) = trimmed {
                    warn!(chat_id, error = %e, "post-turn compaction failed");
                }
            });

            outcome.text
        }
        Err(e) => {
            ctx.health().record_error();
            let classified = classify_provider_error(&e);
            let friendly = classified.user_hint();
            warn!(chat_id, error = %e, "turn failed: {friendly}");

            // Keep the conversation well-formed for future turns.
            ctx.sessions()
                .add_message(chat_id, Role::Assistant, &format!("[error] {friendly}"));
            friendly
        }
    }
}

/// Map a provider failure onto the user-facing error taxonomy.
pub fn classify_provider_error(e: &ProviderError) -> CompanionError {
    match e {
        ProviderError::RateLimited { retry_after_ms } => CompanionError::RateLimited {
            retry_after_ms: *retry_after_ms,
        },
        ProviderError::Api { status, message } if (500..=599).contains(status) => {
            CompanionError::UpstreamServer {
                status: *status,
                message: message.clone(),
            }
        }
        ProviderError::Api { message, .. }
            if message.contains("too long") || message.contains("maximum context") =>
        {
            CompanionError::ContextTooLong
        }
        ProviderError::Http(inner) if inner.is_timeout() => CompanionError::Timeout { ms: 0 },
        other => CompanionError::Transient(other.to_string()),
    }
}

async fn summarize_history<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    oldest: Vec<ChatMessage>,
) -> Result<String, String> {
    let transcript: String = oldest
        .iter()
        .map(|m| format!("{}: {}", m.role.to_string().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let tier = companion_core::model::ModelTier::Haiku;
    let mut req = ChatRequest::new(tier.api_id(), 1024);
    req.system = Some(SUMMARIZER_SYSTEM_PROMPT.to_string());
    req.push_text("user", &transcript);

    let limits = &ctx.config().limits;
    let policy = RetryPolicy::new(limits.max_retries, limits.base_retry_delay_ms);
    match send_with_retry(ctx.provider(), &req, policy).await {
        Ok(resp) if resp.content.trim().is_empty() => Err("empty summary".to_string()),
        Ok(resp) => Ok(resp.content),
        Err(e) => Err(e.to_string()),
    }
}

/// Extract up to N URLs from the message and fetch them concurrently behind
/// the SSRF guard.
async fn fetch_url_context<C: MessageContext>(ctx: &Arc<C>, text: &str) -> Option<String> {
    let urls = extract_urls(text, ctx.config().limits.max_urls_per_turn);
    if urls.is_empty() {
        return None;
    }

    let client = ctx.http();
    let fetches = urls.iter().map(|url| async move {
        match web::fetch_page(client, url).await {
            Ok(content) => {
                let mut cut = content.len().min(URL_EXCERPT_CHARS);
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                Some(format!("[Content from {url}]\n{}", &content[..cut]))
            }
            Err(e) => {
                warn!(%url, error = %e, "url fetch skipped");
                None
            }
        }
    });

    let excerpts: Vec<String> = futures_util::future::join_all(fetches)
        .await
        .into_iter()
        .flatten()
        .collect();

    if excerpts.is_empty() {
        None
    } else {
        Some(excerpts.join("\n\n"))
    }
}

fn extract_urls(text: &str, max: usize) -> Vec<String> {
    let re = Regex::new(r"https?://[^\s<>\)\]]+").expect("url pattern compiles");
    re.find_iter(text)
        .take(max)
        .map(|m| m.as_str().trim_end_matches(&['.', ',', '!', '?'][..]).to_string())
        .collect()
}
