use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation channel identifier (Telegram chat id).
pub type ChatId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single turn of conversation history.
///
/// History holds scalar text only; multimodal turns (images, tool blocks)
/// exist transiently in the API-bound message array and are persisted as a
/// textual surrogate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A message produced by the runtime for delivery to a chat (agent results,
/// fired reminders, proactive check-ins).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub chat_id: ChatId,
    pub text: String,
}
