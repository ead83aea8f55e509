use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("index database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
