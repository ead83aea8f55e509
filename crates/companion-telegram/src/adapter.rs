//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling loop
//! for the lifetime of the process. Outbound runtime messages (agent
//! results, fired reminders, proactive check-ins) drain from an mpsc
//! channel into chats.

use std::sync::Arc;

use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use companion_core::types::Outbound;

use crate::context::TelegramAppContext;
use crate::handler::handle_message;
use crate::send;

pub struct TelegramAdapter<C: TelegramAppContext + 'static> {
    ctx: Arc<C>,
    bot: Bot,
}

impl<C: TelegramAppContext + 'static> TelegramAdapter<C> {
    pub fn new(bot_token: &str, ctx: Arc<C>) -> Self {
        Self {
            ctx,
            bot: Bot::new(bot_token),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    /// Connect and drive the long-polling loop. Never returns under normal
    /// operation. `outbound_rx` feeds runtime-initiated messages into chats.
    pub async fn run(self, outbound_rx: mpsc::Receiver<Outbound>) {
        tokio::spawn(run_outbound_delivery(self.bot.clone(), outbound_rx));

        info!("telegram: starting long-polling dispatcher");

        let ctx = Arc::clone(&self.ctx);
        let handler = Update::filter_message().endpoint(handle_message::<C>);

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![ctx])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}

/// Deliver runtime-originated messages (agent results, reminders) to chats.
async fn run_outbound_delivery(bot: Bot, mut rx: mpsc::Receiver<Outbound>) {
    info!("telegram outbound delivery task started");
    while let Some(outbound) = rx.recv().await {
        send::send_response(&bot, ChatId(outbound.chat_id), &outbound.text).await;
    }
    warn!("telegram outbound delivery task ended (channel closed)");
}
