//! The error taxonomy exposed at the engine's verb boundary. Storage and
//! embedding failures bubble up as `Error: <kind>: <message>`; quality and
//! privacy rejections are not errors, they render as `Rejected: <reason>`
//! through `WriteOutcome` instead and never reach this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        MemoryError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        MemoryError::Storage(err.to_string())
    }
}
