//! Message handler registered in the teloxide Dispatcher.

use std::sync::Arc;

use teloxide::prelude::*;

use companion_agent::pipeline::context::MessageContext;
use companion_agent::pipeline::process::{process_photo_turn, process_text_turn};
use companion_core::config::TelegramConfig;

use crate::attach;
use crate::commands;
use crate::context::TelegramAppContext;
use crate::editor::StreamEditor;
use crate::send;
use crate::typing::TypingHandle;

/// Runs for every incoming `Message`:
/// 1. bot-message and allowlist filters
/// 2. slash command interception
/// 3. photo or text turn, serialized per chat, spawned off the dispatcher
pub async fn handle_message<C: TelegramAppContext + 'static>(
    bot: Bot,
    msg: Message,
    ctx: Arc<C>,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    let allowed = &ctx.config().telegram.allowed_chats;
    if !allowed.is_empty() && !allowed.contains(&chat_id) {
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();

    if text.starts_with('/') {
        if let Some(reply) = commands::handle_command(&ctx, chat_id, &text).await {
            send::send_response(&bot, msg.chat.id, &reply).await;
            return Ok(());
        }
    }

    let has_photo = msg.photo().is_some();
    if text.is_empty() && !has_photo {
        return Ok(());
    }

    // Run the turn off the dispatcher so other chats keep flowing; the
    // per-chat lock preserves arrival order within this chat.
    let config = ctx.config().telegram.clone();
    tokio::spawn(async move {
        let lock = ctx.chat_queues().lock_for(chat_id);
        let _turn = lock.lock().await;

        if has_photo {
            handle_photo(&bot, &msg, &ctx, chat_id, text).await;
        } else {
            handle_text(&bot, &msg, &ctx, chat_id, text, &config).await;
        }
    });

    Ok(())
}

async fn handle_text<C: TelegramAppContext + 'static>(
    bot: &Bot,
    msg: &Message,
    ctx: &Arc<C>,
    chat_id: i64,
    text: String,
    config: &TelegramConfig,
) {
    let typing = TypingHandle::start(bot.clone(), msg.chat.id);

    let (delta_tx, delta_rx) = tokio::sync::mpsc::channel(64);
    let mut editor = StreamEditor::new(bot.clone(), msg.chat.id, config.edit_interval_ms);

    let ctx2 = Arc::clone(ctx);
    let (reply, ()) = tokio::join!(
        process_text_turn(&ctx2, chat_id, &text, Some(delta_tx)),
        editor.run(delta_rx),
    );

    typing.stop();
    editor.finalize(&reply).await;
}

async fn handle_photo<C: TelegramAppContext + 'static>(
    bot: &Bot,
    msg: &Message,
    ctx: &Arc<C>,
    chat_id: i64,
    caption: String,
) {
    let typing = TypingHandle::start(bot.clone(), msg.chat.id);

    let max_bytes = ctx.config().limits.max_image_bytes;
    let Some(photo) = attach::download_photo(bot, msg, max_bytes).await else {
        typing.stop();
        send::send_response(
            bot,
            msg.chat.id,
            "I couldn't take that photo — it may be over the 10 MB limit.",
        )
        .await;
        return;
    };

    let caption = (!caption.is_empty()).then_some(caption);
    // Streaming is never used when the turn starts with image blocks.
    let reply = process_photo_turn(ctx, chat_id, photo.base64, photo.media_type, caption).await;

    typing.stop();
    send::send_response(bot, msg.chat.id, &reply).await;
}
