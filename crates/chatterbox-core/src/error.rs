//! Error taxonomy shared by every Chatterbox crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Bad user input: task name, channel name, interval, spec JSON, unknown kind.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Persisted state and in-memory scheduler disagree. Never recoverable.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Send could not be attempted yet; the item stays queued.
    #[error("send deferred: {0}")]
    RetryableSend(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Fatal errors must terminate the process; everything else is reported to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Consistency(_))
    }

    /// Whether the failed operation may succeed on a later attempt without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BotError::RetryableSend(_))
    }

    /// Message suitable for returning to a chat user.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Validation(m) | BotError::AlreadyExists(m) | BotError::NotFound(m) => {
                m.clone()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
