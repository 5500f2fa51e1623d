//! Broker integration for the job queue subsystem.
//!
//! This crate owns the single connection to the job broker and the queue
//! handle that producers and workers use to move jobs through their
//! lifecycle.
//!
//! # Backends
//!
//! - `redis://` / `rediss://` URLs (or a host): Redis, the production broker
//! - `memory://`: in-process broker for local development and tests
//!
//! An empty configuration yields no connection at all, which disables the
//! subsystem.

mod config;
mod connection;
mod error;
mod memory;
mod queue;
mod redis_store;

pub use config::{BrokerConfig, BrokerTarget};
pub use connection::{BlockingHandle, Connection, connect};
pub use error::BrokerError;
pub use queue::{BrokerQueue, EventRecord};
