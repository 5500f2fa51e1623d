//! Message types for actor communication.

use broker::EventRecord;
use queue_core::{Job, JobEvent};
use ractor::RpcReplyPort;
use tokio::sync::{OwnedSemaphorePermit, broadcast};

use crate::handler::HandlerResult;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// The fetch loop claimed a job. The permit is held until the outcome
    /// is recorded in the broker.
    Claimed {
        job: Box<Job>,
        permit: OwnedSemaphorePermit,
    },

    /// A job task finished running the processor.
    Finished {
        job: Box<Job>,
        outcome: HandlerResult,
    },

    /// The fetch loop exited and released its blocking handle.
    FetcherStopped { error: Option<String> },

    /// Number of jobs currently being processed.
    InFlight { reply: RpcReplyPort<usize> },

    /// Stop claiming, let in-flight jobs finish, then stop.
    Close { reply: RpcReplyPort<()> },
}

/// Messages for the EventsActor.
#[derive(Debug)]
pub enum EventsMessage {
    /// An event read from the queue's event stream.
    Event(Box<EventRecord>),

    /// Get a receiver for every event read from now on.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<JobEvent>>,
    },

    /// The reader loop exited and released its blocking handle.
    ReaderStopped { error: Option<String> },

    /// Stop reading and stop the actor.
    Close { reply: RpcReplyPort<()> },
}

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Failed to spawn actor: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Actor did not reply in time")]
    Timeout,
}

impl From<ractor::SpawnErr> for ActorError {
    fn from(err: ractor::SpawnErr) -> Self {
        ActorError::Spawn(err.to_string())
    }
}
