//! Error types for the job system.

use std::time::Duration;

use actors::ActorError;
use broker::BrokerError;
use thiserror::Error;

/// Errors returned by [`crate::QueueService`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The subsystem is disabled: no broker is configured.
    #[error("job queue is not available")]
    Unavailable,

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("event listener error: {0}")]
    Listener(#[from] ActorError),
}

/// Errors while bringing the job system up.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to connect to broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("failed to start actors: {0}")]
    Actor(#[from] ActorError),
}

/// Errors while tearing the job system down.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("shutdown did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("actor failed during shutdown: {0}")]
    Actor(String),
}
