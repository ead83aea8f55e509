use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("Rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Upstream server error ({status}): {message}")]
    UpstreamServer { status: u16, message: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Conversation context too long")]
    ContextTooLong,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Transient(String),
}

impl CompanionError {
    /// Friendly one-liner shown to the user when a turn fails.
    /// Never includes stack traces; always carries an actionable hint.
    pub fn user_hint(&self) -> String {
        match self {
            CompanionError::RateLimited { .. } => {
                "I'm being rate-limited right now — give me a minute and try again.".to_string()
            }
            CompanionError::UpstreamServer { .. } => {
                "The model service hit an error — please try again shortly.".to_string()
            }
            CompanionError::Timeout { .. } => {
                "That took too long and timed out — try again, or simplify the request."
                    .to_string()
            }
            CompanionError::ContextTooLong => {
                "This conversation is too long — run /compact to condense it.".to_string()
            }
            CompanionError::QuotaExceeded(msg) => format!("{msg} — wait for a task to finish."),
            other => format!("Something went wrong ({other}) — try again."),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompanionError>;
