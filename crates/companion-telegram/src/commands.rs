//! Slash command surface.

use std::sync::Arc;

use companion_agent::pipeline::context::MessageContext;
use companion_agent::pipeline::process::compact_now;
use companion_core::model::ModelTier;

use crate::context::TelegramAppContext;

/// Handle a slash command. Returns `Some(reply)` when the text was a known
/// command, `None` when it should flow to the LLM pipeline.
pub async fn handle_command<C: TelegramAppContext + 'static>(
    ctx: &Arc<C>,
    chat_id: i64,
    text: &str,
) -> Option<String> {
    let trimmed = text.trim();
    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (trimmed, ""),
    };

    match command {
        "/start" => Some(
            "Hi! I'm your companion bot. Talk to me like a friend — I remember \
             what matters, set reminders, and run tasks in the background.\n\n\
             Commands: /compact /memory /model /reminders /reset"
                .to_string(),
        ),

        "/compact" => {
            if compact_now(ctx, chat_id).await {
                Some("Condensed the older part of this conversation into a summary.".to_string())
            } else {
                Some("Nothing to compact yet.".to_string())
            }
        }

        "/memory" => {
            let docs = ctx.workspace().memory_documents();
            let chunks = ctx.memory().indexed_chunks().unwrap_or(0);
            let pins = ctx.sessions().pins(chat_id);
            let mut out = format!(
                "Memory: {} files, {} indexed chunks.\n",
                docs.len(),
                chunks
            );
            if pins.is_empty() {
                out.push_str("No pinned context for this chat.");
            } else {
                out.push_str("Pinned here:\n");
                for pin in pins {
                    out.push_str(&format!("- {}\n", pin.text));
                }
            }
            Some(out)
        }

        "/model" => {
            if rest.is_empty() {
                let current = ctx.sessions().model(chat_id);
                Some(format!(
                    "Current model tier: {current}. Use /model haiku|sonnet|opus to switch."
                ))
            } else {
                match rest.parse::<ModelTier>() {
                    Ok(tier) => {
                        ctx.sessions().set_model(chat_id, tier);
                        Some(format!("Model tier set to {tier}."))
                    }
                    Err(_) => Some(format!(
                        "Unknown tier '{rest}' — pick one of haiku, sonnet, opus."
                    )),
                }
            }
        }

        "/reset" => {
            ctx.pending_resets().arm(chat_id);
            Some(
                "This will erase our conversation history and its log file \
                 (pinned context survives a /compact but not this). \
                 Send /confirm_reset within 60 seconds to proceed."
                    .to_string(),
            )
        }

        "/confirm_reset" => {
            if ctx.pending_resets().confirm(chat_id) {
                ctx.sessions().clear_session(chat_id);
                Some("Done — we're starting fresh.".to_string())
            } else {
                Some("No reset pending (or it expired). Send /reset first.".to_string())
            }
        }

        "/reminders" => {
            let jobs = ctx.jobs().list_for_chat(chat_id);
            if jobs.is_empty() {
                return Some("No scheduled jobs for this chat.".to_string());
            }
            let mut out = format!("Scheduled jobs ({}):\n", jobs.len());
            for job in jobs {
                out.push_str(&format!(
                    "- {} | {} | {} | next: {}\n",
                    job.id,
                    job.name,
                    if job.enabled { "on" } else { "off" },
                    job.next_run
                        .and_then(chrono::DateTime::from_timestamp_millis)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| "—".to_string()),
                ));
            }
            Some(out)
        }

        "/calendar" => {
            let connected = ctx
                .config()
                .home_dir
                .join("google-token.json")
                .exists();
            if connected {
                Some(
                    "Calendar is connected. Ask me things like \"what's on my \
                     calendar tomorrow?\" in plain chat."
                        .to_string(),
                )
            } else {
                Some(
                    "Calendar isn't connected yet — run /calendar_setup for \
                     instructions."
                        .to_string(),
                )
            }
        }

        "/setup" => Some(
            "Setup runs on the host, not in chat: `companionbot setup` walks \
             through tokens and persona files."
                .to_string(),
        ),

        "/weather_setup" => {
            if rest.is_empty() {
                Some("Usage: /weather_setup <openweathermap-api-key>".to_string())
            } else {
                Some(
                    "Store the key in the OS keychain (service `companionbot`, \
                     entry `openweathermap-api-key`) or the OPENWEATHERMAP_API_KEY \
                     environment variable, then restart me."
                        .to_string(),
                )
            }
        }

        "/calendar_setup" => Some(
            "Calendar access uses Google OAuth on the host: put the client \
             credentials in ~/.companionbot/google-credentials.json and run \
             `companionbot calendar-auth`."
                .to_string(),
        ),

        _ => None,
    }
}
