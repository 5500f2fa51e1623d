//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based actors that consume a broker
//! queue in-process.
//!
//! # Architecture
//!
//! - `WorkerActor` - Claims jobs from one queue and runs them through a
//!   [`JobProcessor`] with bounded concurrency
//! - `EventsActor` - Tails the queue's event stream, logs outcomes and
//!   re-broadcasts events to subscribers
//!
//! # Usage
//!
//! ```ignore
//! use actors::{DemoProcessor, WorkerConfig, start_worker};
//!
//! let worker = start_worker(queue, Arc::new(DemoProcessor::default()), WorkerConfig::default()).await?;
//! // ...
//! worker.close().await?;
//! ```

mod events_actor;
mod handler;
mod messages;
mod worker_actor;

pub use events_actor::{EventsActor, EventsArgs, EventsHandle, start_events, subscribe_events};
pub use handler::{DemoProcessor, FnProcessor, HandlerFuture, HandlerResult, JobProcessor};
pub use messages::{ActorError, EventsMessage, WorkerMessage};
pub use worker_actor::{WorkerActor, WorkerArgs, WorkerConfig, WorkerHandle, start_worker};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
