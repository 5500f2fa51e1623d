//! Broker errors.

use queue_core::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid broker config: {0}")]
    InvalidConfig(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("broker ready check failed: {0}")]
    ReadyCheck(String),

    #[error("broker connection is closed")]
    Closed,

    #[error("queue '{0}' is closed")]
    QueueClosed(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
}

impl BrokerError {
    /// Whether the error came from a released connection or queue handle.
    pub fn is_closed(&self) -> bool {
        matches!(self, BrokerError::Closed | BrokerError::QueueClosed(_))
    }
}
