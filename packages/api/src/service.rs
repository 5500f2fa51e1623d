//! Producer facade over the job queue.

use std::time::Duration;

use actors::{ActorRef, EventsMessage};
use broker::BrokerQueue;
use queue_core::{Job, JobCounts, JobEvent, JobId, JobOptions, JobPayload, RetentionPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::QueueError;

/// Reply to a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueuedJob {
    pub id: JobId,
}

/// Whether the queue is available, and which queue it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Per-call enqueue options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Keep the job out of reach of workers for this long.
    pub delay: Option<Duration>,
}

/// Producer side of an enabled queue.
#[derive(Debug, Clone)]
pub struct Producer {
    queue: BrokerQueue,
    retention: RetentionPolicy,
    events: Option<ActorRef<EventsMessage>>,
}

impl Producer {
    pub fn new(queue: BrokerQueue, retention: RetentionPolicy) -> Self {
        Self {
            queue,
            retention,
            events: None,
        }
    }

    pub fn with_events(mut self, events: ActorRef<EventsMessage>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn queue(&self) -> &BrokerQueue {
        &self.queue
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }
}

/// Entry point for request handlers that want to defer work.
///
/// A disabled service answers every call consistently: `status` and `stats`
/// report the disabled state, everything else fails with
/// [`QueueError::Unavailable`].
#[derive(Debug, Clone)]
pub enum QueueService {
    Enabled(Producer),
    Disabled,
}

impl QueueService {
    pub fn is_enabled(&self) -> bool {
        matches!(self, QueueService::Enabled(_))
    }

    pub fn status(&self) -> QueueStatus {
        match self {
            QueueService::Enabled(producer) => QueueStatus {
                enabled: true,
                queue: Some(producer.queue.name().to_string()),
            },
            QueueService::Disabled => QueueStatus {
                enabled: false,
                queue: None,
            },
        }
    }

    fn producer(&self) -> Result<&Producer, QueueError> {
        match self {
            QueueService::Enabled(producer) => Ok(producer),
            QueueService::Disabled => Err(QueueError::Unavailable),
        }
    }

    /// Add a job and return its id without waiting for it to run.
    pub async fn enqueue(&self, name: &str, payload: JobPayload) -> Result<EnqueuedJob, QueueError> {
        self.enqueue_with(name, payload, EnqueueOptions::default())
            .await
    }

    pub async fn enqueue_with(
        &self,
        name: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<EnqueuedJob, QueueError> {
        let producer = self.producer()?;
        let mut opts = JobOptions::default().with_retention(producer.retention);
        if let Some(delay) = options.delay {
            opts = opts.with_delay_ms(delay.as_millis() as u64);
        }
        let job = producer.queue.add(name, payload, opts).await?;
        Ok(EnqueuedJob { id: job.id })
    }

    /// Enqueue an arbitrary JSON value; only objects are accepted as payloads.
    pub async fn enqueue_value(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<EnqueuedJob, QueueError> {
        self.producer()?;
        match payload {
            serde_json::Value::Object(payload) => self.enqueue(name, payload).await,
            other => Err(QueueError::InvalidPayload(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Job counts per state; empty when disabled.
    pub async fn stats(&self) -> Result<JobCounts, QueueError> {
        match self {
            QueueService::Enabled(producer) => Ok(producer.queue.counts().await?),
            QueueService::Disabled => Ok(JobCounts::empty()),
        }
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.producer()?.queue.get_job(id).await?)
    }

    pub async fn pause(&self) -> Result<bool, QueueError> {
        Ok(self.producer()?.queue.pause().await?)
    }

    pub async fn resume(&self) -> Result<bool, QueueError> {
        Ok(self.producer()?.queue.resume().await?)
    }

    /// Receive queue events while the event listener runs.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<JobEvent>, QueueError> {
        let events = self
            .producer()?
            .events
            .as_ref()
            .ok_or(QueueError::Unavailable)?;
        Ok(actors::subscribe_events(events).await?)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
