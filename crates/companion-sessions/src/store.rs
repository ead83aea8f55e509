//! Thread-safe in-memory session store keyed by chat id.
//!
//! Sessions are created lazily on first access and hydrated from the tail of
//! the JSONL log. Eviction is LRU once `max_sessions` is reached, plus a TTL
//! sweep for idle sessions. All mutation happens inside short map-entry
//! closures; no lock is ever held across an await point — `smart_trim`
//! snapshots under the lock, summarizes unlocked, then re-applies.

use std::future::Future;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use companion_core::config::Limits;
use companion_core::model::ModelTier;
use companion_core::tokens;
use companion_core::types::{ChatId, ChatMessage, Role};

use crate::error::Result;
use crate::log::SessionLog;
use crate::types::{PinSource, PinnedContext, Session, SummaryChunk};

pub struct SessionStore {
    sessions: DashMap<ChatId, Session>,
    log: SessionLog,
    limits: Limits,
}

impl SessionStore {
    pub fn new(log: SessionLog, limits: Limits) -> Self {
        Self {
            sessions: DashMap::new(),
            log,
            limits,
        }
    }

    /// Run `f` against the session for `chat_id`, creating and hydrating it
    /// first if needed. Updates the access time.
    fn with_session<R>(&self, chat_id: ChatId, f: impl FnOnce(&mut Session) -> R) -> R {
        if !self.sessions.contains_key(&chat_id) {
            self.evict_for_capacity(chat_id);
            let mut session = Session::new();
            session.history = self.log.load_tail(chat_id, self.limits.max_history_load);
            if !session.history.is_empty() {
                debug!(chat_id, loaded = session.history.len(), "session hydrated from log");
            }
            self.sessions.entry(chat_id).or_insert(session);
        }

        let mut entry = self
            .sessions
            .get_mut(&chat_id)
            .expect("session inserted above");
        entry.last_accessed = Utc::now();
        f(&mut entry)
    }

    /// LRU eviction: drop the least-recently-accessed session when the map is
    /// full. The JSONL log is kept, so the evicted chat rehydrates on its
    /// next message.
    fn evict_for_capacity(&self, incoming: ChatId) {
        while self.sessions.len() >= self.limits.max_sessions {
            let oldest = self
                .sessions
                .iter()
                .filter(|e| *e.key() != incoming)
                .min_by_key(|e| e.value().last_accessed)
                .map(|e| *e.key());
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                    info!(chat_id = id, "session evicted (LRU)");
                }
                None => break,
            }
        }
    }

    /// Remove sessions idle longer than the configured TTL.
    /// Called from the periodic cleanup task.
    pub fn evict_idle(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(self.limits.session_ttl_hours as i64);
        let stale: Vec<ChatId> = self
            .sessions
            .iter()
            .filter(|e| e.value().last_accessed < cutoff)
            .map(|e| *e.key())
            .collect();
        for id in &stale {
            self.sessions.remove(id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "idle sessions evicted (TTL)");
        }
        stale.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // --- history ------------------------------------------------------------

    pub fn get_history(&self, chat_id: ChatId) -> Vec<ChatMessage> {
        self.with_session(chat_id, |s| s.history.clone())
    }

    /// Append a message to in-memory history and the JSONL log.
    pub fn add_message(&self, chat_id: ChatId, role: Role, content: &str) {
        self.with_session(chat_id, |s| {
            s.history.push(ChatMessage::new(role, content));
        });
        self.log.append(chat_id, role, content);
    }

    /// Wipe history and summaries, preserving pins.
    pub fn clear_history(&self, chat_id: ChatId) {
        self.with_session(chat_id, |s| {
            s.history.clear();
            s.summary_chunks.clear();
        });
    }

    /// Remove the session entirely and delete its JSONL log.
    pub fn clear_session(&self, chat_id: ChatId) {
        self.sessions.remove(&chat_id);
        self.log.delete(chat_id);
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    // --- model tier ---------------------------------------------------------

    pub fn model(&self, chat_id: ChatId) -> ModelTier {
        self.with_session(chat_id, |s| s.model)
    }

    pub fn set_model(&self, chat_id: ChatId, tier: ModelTier) {
        self.with_session(chat_id, |s| s.model = tier);
    }

    /// Last access time, if the session is resident. Used by the heartbeat
    /// job to measure idle time.
    pub fn last_accessed(&self, chat_id: ChatId) -> Option<chrono::DateTime<Utc>> {
        self.sessions.get(&chat_id).map(|s| s.last_accessed)
    }

    // --- pinned context -----------------------------------------------------

    /// Pin a piece of context, enforcing the pinned-token budget.
    ///
    /// Auto pins are evicted oldest-first to make room. Returns `false` iff
    /// the new pin would still exceed the budget after evicting every auto
    /// pin — in that case nothing is changed.
    pub fn pin_context(&self, chat_id: ChatId, text: &str, source: PinSource) -> bool {
        let budget = self.limits.max_pinned_tokens;
        let new_cost = tokens::estimate(text);

        self.with_session(chat_id, |s| {
            // Work on a copy so a rejected pin never partially applies.
            let mut pins = s.pins.clone();
            let mut used: usize = pins.iter().map(|p| tokens::estimate(&p.text)).sum();

            while used + new_cost > budget {
                let oldest_auto = pins
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.source == PinSource::Auto)
                    .min_by_key(|(_, p)| p.created_at)
                    .map(|(i, _)| i);
                match oldest_auto {
                    Some(i) => {
                        let removed = pins.remove(i);
                        used -= tokens::estimate(&removed.text);
                    }
                    None => return false,
                }
            }

            pins.push(PinnedContext {
                text: text.to_string(),
                created_at: Utc::now(),
                source,
            });
            s.pins = pins;
            true
        })
    }

    pub fn pins(&self, chat_id: ChatId) -> Vec<PinnedContext> {
        self.with_session(chat_id, |s| s.pins.clone())
    }

    pub fn summary_chunks(&self, chat_id: ChatId) -> Vec<SummaryChunk> {
        self.with_session(chat_id, |s| s.summary_chunks.clone())
    }

    /// Concatenate pins and summary chunks into the stable block injected
    /// into the system prompt.
    pub fn build_context_for_prompt(&self, chat_id: ChatId) -> String {
        self.with_session(chat_id, |s| {
            let mut out = String::new();
            if !s.pins.is_empty() {
                out.push_str("## Pinned context\n");
                for pin in &s.pins {
                    out.push_str("- ");
                    out.push_str(&pin.text);
                    out.push('\n');
                }
            }
            if !s.summary_chunks.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str("## Earlier conversation summaries\n");
                for chunk in &s.summary_chunks {
                    out.push_str(&format!(
                        "- ({} messages, {} — {}) {}\n",
                        chunk.message_count,
                        chunk.start_time.format("%Y-%m-%d %H:%M"),
                        chunk.end_time.format("%Y-%m-%d %H:%M"),
                        chunk.summary,
                    ));
                }
            }
            out
        })
    }

    // --- trimming & summarization -------------------------------------------

    /// Drop oldest entries until the history fits the token budget or only
    /// `min_recent` messages remain.
    pub fn trim_by_tokens(&self, chat_id: ChatId) {
        let (max, min_recent) = (self.limits.max_history_tokens, self.limits.min_recent);
        self.with_session(chat_id, |s| {
            let before = s.history.len();
            trim_history(&mut s.history, max, min_recent);
            let dropped = before - s.history.len();
            if dropped > 0 {
                debug!(chat_id, dropped, "history trimmed by tokens");
            }
        });
    }

    /// Summarize the oldest part of the history when it exceeds the summary
    /// threshold (always when `force` is set and there is enough history).
    ///
    /// `summarize` receives the messages to condense and returns the summary
    /// text. On summarizer failure the store falls back to plain token
    /// trimming. Returns `true` when a summary chunk was produced.
    pub async fn smart_trim<F, Fut>(&self, chat_id: ChatId, force: bool, summarize: F) -> Result<bool>
    where
        F: FnOnce(Vec<ChatMessage>) -> Fut,
        Fut: Future<Output = std::result::Result<String, String>>,
    {
        // Phase 1: snapshot the split under the lock.
        let min_recent = self.limits.min_recent;
        let threshold = self.limits.summary_threshold_tokens;
        let split = self.with_session(chat_id, |s| {
            let total = tokens::estimate_messages(&s.history);
            if (!force && total <= threshold) || s.history.len() <= min_recent {
                return None;
            }
            let cut = s.history.len() - min_recent;
            Some(s.history[..cut].to_vec())
        });

        let Some(oldest) = split else {
            return Ok(false);
        };
        let oldest_len = oldest.len();
        let start_time = oldest.first().map(|m| m.timestamp).unwrap_or_else(Utc::now);
        let end_time = oldest.last().map(|m| m.timestamp).unwrap_or_else(Utc::now);

        // Phase 2: summarize without holding any lock.
        let summary = match summarize(oldest).await {
            Ok(s) => s,
            Err(e) => {
                warn!(chat_id, error = %e, "summarizer failed, falling back to token trim");
                self.trim_by_tokens(chat_id);
                return Ok(false);
            }
        };

        // Phase 3: re-apply. Per-chat serial handling guarantees the history
        // prefix we summarized is still in place.
        let max_chunks = self.limits.max_summary_chunks;
        self.with_session(chat_id, |s| {
            let keep = s.history.split_off(oldest_len.min(s.history.len()));
            let mut new_history = vec![
                ChatMessage::user(format!("[previous-conversation summary]\n{summary}")),
                ChatMessage::assistant("Understood — I have the summary of our earlier conversation."),
            ];
            new_history.extend(keep);
            s.history = new_history;

            s.summary_chunks.push(SummaryChunk {
                summary,
                message_count: oldest_len,
                start_time,
                end_time,
            });
            merge_overflow_chunks(&mut s.summary_chunks, max_chunks);
        });

        info!(chat_id, summarized = oldest_len, "history summarized");
        Ok(true)
    }
}

/// Drop oldest entries while over `max_tokens` and more than `min_recent`
/// messages remain.
fn trim_history(history: &mut Vec<ChatMessage>, max_tokens: usize, min_recent: usize) {
    while tokens::estimate_messages(history) > max_tokens && history.len() > min_recent {
        history.remove(0);
    }
}

/// Merge summary chunks pairwise from the oldest end until within the cap.
fn merge_overflow_chunks(chunks: &mut Vec<SummaryChunk>, max_chunks: usize) {
    while chunks.len() > max_chunks && chunks.len() >= 2 {
        let first = chunks.remove(0);
        let second = &mut chunks[0];
        second.summary = format!("{} {}", first.summary, second.summary);
        second.message_count += first.message_count;
        second.start_time = first.start_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_limits(limits: Limits) -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path().to_path_buf());
        (dir, SessionStore::new(log, limits))
    }

    fn store() -> (tempfile::TempDir, SessionStore) {
        store_with_limits(Limits::default())
    }

    #[test]
    fn add_message_persists_to_log_and_history() {
        let (_dir, store) = store();
        store.add_message(1, Role::User, "hello");
        store.add_message(1, Role::Assistant, "hi");

        assert_eq!(store.get_history(1).len(), 2);
        assert_eq!(store.log().count(1), 2);
    }

    #[test]
    fn session_hydrates_from_log_tail() {
        let (_dir, store) = store();
        store.add_message(1, Role::User, "before eviction");
        store.clear_history(1); // in-memory only; log keeps the line
        store.sessions.remove(&1);

        let history = store.get_history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "before eviction");
    }

    #[test]
    fn clear_history_preserves_pins() {
        let (_dir, store) = store();
        store.add_message(1, Role::User, "hello");
        assert!(store.pin_context(1, "likes tea", PinSource::User));
        store.clear_history(1);

        assert!(store.get_history(1).is_empty());
        assert_eq!(store.pins(1).len(), 1);
    }

    #[test]
    fn clear_session_deletes_log() {
        let (_dir, store) = store();
        store.add_message(1, Role::User, "hello");
        store.clear_session(1);
        assert_eq!(store.log().count(1), 0);
    }

    #[test]
    fn lru_eviction_keeps_map_bounded() {
        let mut limits = Limits::default();
        limits.max_sessions = 3;
        let (_dir, store) = store_with_limits(limits);

        for id in 0..5 {
            store.add_message(id, Role::User, "hi");
        }
        assert!(store.session_count() <= 3);
    }

    #[test]
    fn pin_budget_rejects_without_partial_apply() {
        let mut limits = Limits::default();
        limits.max_pinned_tokens = 10;
        let (_dir, store) = store_with_limits(limits);

        assert!(store.pin_context(1, "short", PinSource::User));
        // A pin that can never fit: user pins are not evictable.
        let huge = "x".repeat(200);
        assert!(!store.pin_context(1, &huge, PinSource::User));
        assert_eq!(store.pins(1).len(), 1, "rejected pin must not alter state");
    }

    #[test]
    fn auto_pins_evicted_oldest_first_before_user_pins() {
        let mut limits = Limits::default();
        limits.max_pinned_tokens = 15;
        let (_dir, store) = store_with_limits(limits);

        assert!(store.pin_context(1, "aaaa aaaa aaaa aaaa", PinSource::Auto)); // 5 tokens
        assert!(store.pin_context(1, "bbbb bbbb bbbb bbbb", PinSource::Auto));
        assert!(store.pin_context(1, "user pin", PinSource::User)); // 2 tokens
        // 12 tokens used; this one forces eviction of the oldest auto pin.
        assert!(store.pin_context(1, "cccc cccc cccc cccc", PinSource::Auto));

        let pins = store.pins(1);
        assert!(pins.iter().all(|p| !p.text.starts_with("aaaa")));
        assert!(pins.iter().any(|p| p.source == PinSource::User));

        let used: usize = pins.iter().map(|p| tokens::estimate(&p.text)).sum();
        assert!(used <= 15);
    }

    #[test]
    fn trim_by_tokens_respects_min_recent() {
        let mut limits = Limits::default();
        limits.max_history_tokens = 10;
        limits.min_recent = 4;
        let (_dir, store) = store_with_limits(limits);

        for i in 0..8 {
            store.add_message(1, Role::User, &format!("message number {i} with some words"));
        }
        store.trim_by_tokens(1);

        let history = store.get_history(1);
        // Over budget but never below min_recent.
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn smart_trim_replaces_oldest_with_summary() {
        let mut limits = Limits::default();
        limits.summary_threshold_tokens = 1; // force summarization
        limits.min_recent = 2;
        let (_dir, store) = store_with_limits(limits);

        for i in 0..6 {
            store.add_message(1, Role::User, &format!("turn {i}"));
        }

        let did = store
            .smart_trim(1, false, |oldest| async move {
                assert_eq!(oldest.len(), 4);
                Ok("they talked about turns".to_string())
            })
            .await
            .unwrap();
        assert!(did);

        let history = store.get_history(1);
        assert_eq!(history.len(), 4); // summary pair + 2 kept
        assert!(history[0].content.starts_with("[previous-conversation summary]"));
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);

        let chunks = store.summary_chunks(1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].message_count, 4);
    }

    #[tokio::test]
    async fn smart_trim_falls_back_on_summarizer_failure() {
        let mut limits = Limits::default();
        limits.summary_threshold_tokens = 1;
        limits.max_history_tokens = 10;
        limits.min_recent = 2;
        let (_dir, store) = store_with_limits(limits);

        for i in 0..6 {
            store.add_message(1, Role::User, &format!("turn number {i} padded out a bit"));
        }

        let did = store
            .smart_trim(1, false, |_| async { Err("boom".to_string()) })
            .await
            .unwrap();
        assert!(!did);
        // Fallback trim kicked in.
        assert_eq!(store.get_history(1).len(), 2);
        assert!(store.summary_chunks(1).is_empty());
    }

    #[tokio::test]
    async fn smart_trim_noop_under_threshold() {
        let (_dir, store) = store();
        store.add_message(1, Role::User, "hi");
        let did = store
            .smart_trim(1, false, |_| async { Ok("unused".to_string()) })
            .await
            .unwrap();
        assert!(!did);
    }

    #[test]
    fn summary_chunks_merge_pairwise_from_oldest() {
        let mut chunks: Vec<SummaryChunk> = (0..5)
            .map(|i| SummaryChunk {
                summary: format!("s{i}"),
                message_count: 2,
                start_time: Utc::now(),
                end_time: Utc::now(),
            })
            .collect();
        merge_overflow_chunks(&mut chunks, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].summary, "s0 s1 s2");
        assert_eq!(chunks[0].message_count, 6);
    }

    #[test]
    fn context_block_is_stable() {
        let (_dir, store) = store();
        assert!(store.pin_context(1, "likes tea", PinSource::User));
        let block = store.build_context_for_prompt(1);
        assert!(block.contains("## Pinned context"));
        assert!(block.contains("- likes tea"));
    }
}
