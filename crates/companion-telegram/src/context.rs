//! Adapter-side context: the pipeline context plus per-chat ordering and
//! the two-step reset state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use companion_agent::pipeline::context::MessageContext;

/// Messages within one chat are processed in arrival order; a fair per-chat
/// mutex serializes them while different chats proceed concurrently.
pub struct ChatQueues {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatQueues {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_for(&self, chat_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(chat_id).or_default())
    }
}

impl Default for ChatQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// `/reset` arms a pending reset; `/confirm_reset` within the window
/// executes it.
pub struct PendingResets {
    pending: Mutex<HashMap<i64, Instant>>,
    window: Duration,
}

impl PendingResets {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            window: Duration::from_secs(60),
        }
    }

    pub fn arm(&self, chat_id: i64) {
        self.pending.lock().unwrap().insert(chat_id, Instant::now());
    }

    /// Consume the pending reset if it is still inside the window.
    pub fn confirm(&self, chat_id: i64) -> bool {
        let mut pending = self.pending.lock().unwrap();
        match pending.remove(&chat_id) {
            Some(armed) => armed.elapsed() <= self.window,
            None => false,
        }
    }
}

impl Default for PendingResets {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the Telegram handlers need from the host.
pub trait TelegramAppContext: MessageContext {
    fn chat_queues(&self) -> &ChatQueues;
    fn pending_resets(&self) -> &PendingResets;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_chat_gets_same_lock() {
        let queues = ChatQueues::new();
        let a = queues.lock_for(7);
        let b = queues.lock_for(7);
        assert!(Arc::ptr_eq(&a, &b));
        let c = queues.lock_for(8);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn reset_confirm_requires_arming() {
        let resets = PendingResets::new();
        assert!(!resets.confirm(1));
        resets.arm(1);
        assert!(resets.confirm(1));
        // Consumed: a second confirm needs re-arming.
        assert!(!resets.confirm(1));
    }
}
