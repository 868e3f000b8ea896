use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Message protocol [{0}] not supported")]
    UnsupportedProtocol(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout error after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublisherError {
    /// Whether tearing down and re-establishing the session may clear the error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublisherError::Transport(_)
                | PublisherError::Session(_)
                | PublisherError::Timeout(_)
                | PublisherError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PublisherError>;
