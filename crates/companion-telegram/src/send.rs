//! Message sending helpers.
//!
//! Telegram's message limit is 4096 characters; we use 4090 for safety.
//! Long replies split on line boundaries, keeping fenced code blocks
//! balanced across chunks.

use std::time::Duration;

use teloxide::prelude::*;
use tracing::warn;

/// Maximum characters per Telegram message.
pub const CHUNK_MAX: usize = 4090;

/// Code-fence-aware splitter. When a split lands inside a fenced block the
/// fence is closed at the chunk boundary and reopened in the next chunk.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in text.split('\n') {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };

        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(lang) = &fence_lang {
                current.push_str("```");
                current.push_str(lang);
                current.push('\n');
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after) = trimmed.strip_prefix("```") {
            fence_lang = match fence_lang {
                Some(_) => None,
                None => Some(after.trim().to_string()),
            };
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Force-split any single line longer than the cap.
    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
            continue;
        }
        let mut rest = chunk.as_str();
        while rest.len() > CHUNK_MAX {
            let mut cut = CHUNK_MAX;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let split_at = rest[..cut].rfind(' ').filter(|&i| i > 0).unwrap_or(cut);
            result.push(rest[..split_at].to_string());
            rest = rest[split_at..].trim_start();
        }
        if !rest.is_empty() {
            result.push(rest.to_string());
        }
    }
    result
}

/// Send `text` as one or more chunked messages.
pub async fn send_response(bot: &Bot, chat_id: ChatId, text: &str) {
    let chunks = split_chunks(text);
    let total = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        if let Err(e) = bot.send_message(chat_id, &chunk).await {
            warn!(chat_id = chat_id.0, chunk = i, error = %e, "send failed");
        }
        // Stay clear of Telegram's per-chat rate limit between chunks.
        if i + 1 < total {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
