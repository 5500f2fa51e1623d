//! Job queue wiring for host applications.
//!
//! - [`Settings`] - configuration read from the environment
//! - [`JobSystem`] - owns the broker connection, queue handle, event
//!   listener and optional in-process worker
//! - [`QueueService`] - producer facade handed to request handlers
//! - [`ShutdownOrchestrator`] - drains the system on SIGINT/SIGTERM or an
//!   explicit teardown
//! - [`admin::router`] - status/stats/enqueue endpoints
//!
//! With no broker configured the system starts disabled and every
//! producer call reports that instead of failing at startup.

pub mod admin;
mod config;
mod error;
pub mod logging;
mod service;
mod shutdown;
mod system;

pub use config::{ConfigError, LogLevel, Settings};
pub use error::{QueueError, ShutdownError, StartError};
pub use service::{EnqueueOptions, EnqueuedJob, Producer, QueueService, QueueStatus};
pub use shutdown::{ShutdownOrchestrator, ShutdownTrigger, TriggerHandle, exit_code};
pub use system::{JobSystem, LifecycleState, ShutdownOutcome};

pub use queue_core::{Job, JobCounts, JobEvent, JobId, JobPayload, JobState};
