use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
