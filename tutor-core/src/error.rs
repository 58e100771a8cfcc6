//! Error types for the tutor core

use thiserror::Error;

/// Result type alias using the tutor's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors surfaced by the persistence and playback layer
#[derive(Error, Debug)]
pub enum Error {
    /// The database cannot be opened or has been closed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] rusqlite::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The chat collaborator failed to produce a reply
    #[error("Failed to send message: {0}")]
    Chat(String),

    #[error("Speech engine error: {0}")]
    Speech(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    /// Whether this error means the record addressed by the caller does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
