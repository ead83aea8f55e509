use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use companion_core::model::ModelTier;
use companion_core::types::ChatMessage;

/// Origin of a pinned-context entry. Automatic pins are evicted before user
/// pins when the token budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinSource {
    Auto,
    User,
}

/// Short text injected into every system prompt, surviving history trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedContext {
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub source: PinSource,
}

/// Condensed representation of a span of older history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryChunk {
    pub summary: String,
    pub message_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// In-memory state for one chat. Owned exclusively by the [`SessionStore`];
/// callers never hold a `Session` across an await point.
///
/// [`SessionStore`]: crate::store::SessionStore
#[derive(Debug)]
pub struct Session {
    pub history: Vec<ChatMessage>,
    pub model: ModelTier,
    pub pins: Vec<PinnedContext>,
    pub summary_chunks: Vec<SummaryChunk>,
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            model: ModelTier::default(),
            pins: Vec::new(),
            summary_chunks: Vec::new(),
            last_accessed: Utc::now(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
