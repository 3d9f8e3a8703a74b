use thiserror::Error;

use crate::core::models::Uid;

/// Failure reported by a backend driver while handling one action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The action failed but the connection is still usable.
    #[error("{0}")]
    Action(String),

    /// The connection is presumed dead.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend does not implement this action.
    #[error("unsupported action")]
    Unsupported,

    /// The driver noticed the action's context was cancelled and stopped.
    #[error("cancelled")]
    Cancelled,

    /// The worker loop is gone and can no longer take actions.
    #[error("worker stopped")]
    Stopped,
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid sort criterion: {0}")]
    InvalidSort(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),
}

/// Errors from message store operations that the caller asked for
/// explicitly (thread lookups, folding).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no thread found for uid {0}")]
    NoThread(Uid),

    #[error("threading is not enabled")]
    NotThreaded,
}
