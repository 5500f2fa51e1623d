//! Job domain types for units of deferred work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job payload: a mapping of string keys to arbitrary JSON values.
pub type JobPayload = serde_json::Map<String, serde_json::Value>;

/// Broker-assigned job identifier.
///
/// Ids are opaque strings; the Redis backend hands out `"1"`, `"2"`, ...
/// from a per-queue counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How many finished job records the broker keeps per outcome.
///
/// Older records beyond the cap are discarded when a job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Completed records to retain.
    pub keep_completed: u32,
    /// Failed records to retain.
    pub keep_failed: u32,
}

impl RetentionPolicy {
    pub const DEFAULT_KEEP: u32 = 100;

    pub fn new(keep_completed: u32, keep_failed: u32) -> Self {
        Self {
            keep_completed,
            keep_failed,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEEP, Self::DEFAULT_KEEP)
    }
}

/// Per-job options stored alongside the job in the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Retention caps applied when this job finishes.
    pub retention: RetentionPolicy,
    /// Hold the job in `delayed` for this many milliseconds before it can be claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl JobOptions {
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = (delay_ms > 0).then_some(delay_ms);
        self
    }
}

/// Result of a successfully processed job, tagged with its completion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Structured output returned by the processor.
    pub output: serde_json::Value,
    /// When processing finished.
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            completed_at: Utc::now(),
        }
    }
}

/// A job as recorded by the broker.
///
/// The job's lifecycle state is owned by the broker and is not part of
/// this record; see [`crate::JobState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Broker-assigned identifier.
    pub id: JobId,
    /// Queue-scoped type discriminator.
    pub name: String,
    /// Payload passed to the processor.
    pub data: JobPayload,
    /// Options given at enqueue time.
    pub opts: JobOptions,
    /// When the job was added.
    pub created_at: DateTime<Utc>,
    /// When a worker last claimed the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job reached `completed` or `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of times the job was claimed.
    #[serde(default)]
    pub attempts_made: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

impl Job {
    /// Create a freshly added job.
    pub fn new(id: JobId, name: impl Into<String>, data: JobPayload, opts: JobOptions) -> Self {
        Self {
            id,
            name: name.into(),
            data,
            opts,
            created_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            attempts_made: 0,
            return_value: None,
            failed_reason: None,
        }
    }

    /// Check if the job has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
