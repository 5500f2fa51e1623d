//! Events published on a queue's event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Lifecycle events emitted by the broker for one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was added and is waiting.
    Added {
        job_id: JobId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// A job was added with a delay.
    Delayed {
        job_id: JobId,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    Active {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    Completed {
        job_id: JobId,
        return_value: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    /// A job failed.
    Failed {
        job_id: JobId,
        failed_reason: String,
        timestamp: DateTime<Utc>,
    },
    /// The queue was paused.
    Paused { timestamp: DateTime<Utc> },
    /// The queue was resumed.
    Resumed { timestamp: DateTime<Utc> },
}

impl JobEvent {
    /// Short event kind, used as the stream entry's `event` field.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Added { .. } => "added",
            JobEvent::Delayed { .. } => "delayed",
            JobEvent::Active { .. } => "active",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Paused { .. } => "paused",
            JobEvent::Resumed { .. } => "resumed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Added { timestamp, .. }
            | JobEvent::Delayed { timestamp, .. }
            | JobEvent::Active { timestamp, .. }
            | JobEvent::Completed { timestamp, .. }
            | JobEvent::Failed { timestamp, .. }
            | JobEvent::Paused { timestamp }
            | JobEvent::Resumed { timestamp } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::Added { job_id, .. }
            | JobEvent::Delayed { job_id, .. }
            | JobEvent::Active { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => Some(job_id),
            JobEvent::Paused { .. } | JobEvent::Resumed { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::Added { job_id, name, .. } => format!("Job {} ({}) added", job_id, name),
            JobEvent::Delayed {
                job_id, delay_ms, ..
            } => format!("Job {} delayed by {}ms", job_id, delay_ms),
            JobEvent::Active { job_id, .. } => format!("Job {} active", job_id),
            JobEvent::Completed { job_id, .. } => format!("Job {} completed", job_id),
            JobEvent::Failed {
                job_id,
                failed_reason,
                ..
            } => format!("Job {} failed: {}", job_id, failed_reason),
            JobEvent::Paused { .. } => "Queue paused".to_string(),
            JobEvent::Resumed { .. } => "Queue resumed".to_string(),
        }
    }
}
