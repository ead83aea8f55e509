//! Throttled streaming edits.
//!
//! The first delta sends a new message; later deltas edit it in place, at
//! most once per configured interval (Telegram throttles editMessageText
//! hard). The final text is applied by `finalize`, falling back to chunked
//! sends when it no longer fits one message.

use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::sync::mpsc;
use tracing::warn;

use companion_agent::turn::StreamDelta;

use crate::send::{self, CHUNK_MAX};

pub struct StreamEditor {
    bot: Bot,
    chat_id: ChatId,
    min_interval: Duration,
    message_id: Option<MessageId>,
    last_edit: Instant,
    last_text: String,
}

impl StreamEditor {
    pub fn new(bot: Bot, chat_id: ChatId, min_interval_ms: u64) -> Self {
        Self {
            bot,
            chat_id,
            min_interval: Duration::from_millis(min_interval_ms),
            message_id: None,
            last_edit: Instant::now(),
            last_text: String::new(),
        }
    }

    /// Drain the delta channel until the turn ends, editing along the way.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<StreamDelta>) {
        while let Some(delta) = rx.recv().await {
            self.apply(&delta.accumulated).await;
        }
    }

    async fn apply(&mut self, accumulated: &str) {
        if accumulated.trim().is_empty() || accumulated.len() > CHUNK_MAX {
            return;
        }

        match self.message_id {
            None => {
                match self.bot.send_message(self.chat_id, accumulated).await {
                    Ok(sent) => {
                        self.message_id = Some(sent.id);
                        self.last_edit = Instant::now();
                        self.last_text = accumulated.to_string();
                    }
                    Err(e) => warn!(error = %e, "stream placeholder send failed"),
                }
            }
            Some(id) => {
                if self.last_edit.elapsed() < self.min_interval || accumulated == self.last_text {
                    return;
                }
                if let Err(e) = self
                    .bot
                    .edit_message_text(self.chat_id, id, accumulated)
                    .await
                {
                    warn!(error = %e, "stream edit failed");
                }
                self.last_edit = Instant::now();
                self.last_text = accumulated.to_string();
            }
        }
    }

    /// Apply the final reply text: edit in place when it fits, otherwise
    /// drop the streamed message and send chunked.
    pub async fn finalize(self, final_text: &str) {
        match self.message_id {
            Some(id) if final_text.len() <= CHUNK_MAX => {
                if final_text != self.last_text {
                    if let Err(e) = self
                        .bot
                        .edit_message_text(self.chat_id, id, final_text)
                        .await
                    {
                        warn!(error = %e, "final edit failed, sending fresh");
                        send::send_response(&self.bot, self.chat_id, final_text).await;
                    }
                }
            }
            Some(id) => {
                let _ = self.bot.delete_message(self.chat_id, id).await;
                send::send_response(&self.bot, self.chat_id, final_text).await;
            }
            None => {
                send::send_response(&self.bot, self.chat_id, final_text).await;
            }
        }
    }
}
