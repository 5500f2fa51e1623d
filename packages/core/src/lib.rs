//! Core domain types for the job queue subsystem.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobId and JobOptions for units of deferred work
//! - JobState and JobCounts for broker-side lifecycle bookkeeping
//! - Events published on the queue's event stream

mod counts;
mod events;
mod job;

pub use counts::{JobCounts, JobState, UnknownState};
pub use events::JobEvent;
pub use job::{Job, JobId, JobOptions, JobPayload, JobResult, RetentionPolicy};
