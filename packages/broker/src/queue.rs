//! Named job queue on top of a broker [`Connection`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use queue_core::{Job, JobCounts, JobEvent, JobId, JobOptions, JobPayload, JobResult};

use crate::connection::{BlockingHandle, Commands, Connection};
use crate::error::BrokerError;
use crate::redis_store::{self, KeySet};

/// Approximate cap on the event stream length.
pub(crate) const EVENT_STREAM_MAX_LEN: usize = 10_000;

/// Events returned by a single [`BrokerQueue::read_events`] call, at most.
pub(crate) const EVENT_READ_COUNT: usize = 100;

/// An event read from a queue's event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Stream position; pass it back as `after` to continue reading.
    pub id: String,
    pub event: JobEvent,
}

/// Handle to one named queue.
///
/// Clones share the same closed flag, so closing any clone closes them all.
/// The underlying [`Connection`] is borrowed, not owned: closing the queue
/// leaves the connection open for its owner to release.
#[derive(Debug, Clone)]
pub struct BrokerQueue {
    connection: Connection,
    name: String,
    keys: KeySet,
    closed: Arc<AtomicBool>,
}

impl BrokerQueue {
    pub fn new(connection: &Connection, name: impl Into<String>) -> Result<Self, BrokerError> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(':') {
            return Err(BrokerError::InvalidConfig(format!(
                "invalid queue name '{}'",
                name
            )));
        }
        Ok(Self {
            keys: KeySet::new(connection.key_prefix(), &name),
            connection: connection.clone(),
            name,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting operations on this queue handle.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closed queue handle '{}'", self.name);
        }
    }

    fn commands(&self) -> Result<Commands, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::QueueClosed(self.name.clone()));
        }
        self.connection.commands()
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::QueueClosed(self.name.clone()));
        }
        self.connection.ensure_open()
    }

    /// Key under which the in-process backend tracks this queue.
    fn memory_key(&self) -> String {
        format!("{}:{}", self.connection.key_prefix(), self.name)
    }

    /// Add a job. It is claimable immediately unless `opts` carries a delay
    /// or the queue is paused.
    pub async fn add(
        &self,
        name: &str,
        data: JobPayload,
        opts: JobOptions,
    ) -> Result<Job, BrokerError> {
        let job = match self.commands()? {
            Commands::Redis(mut conn) => {
                let id = redis_store::next_id(&mut conn, &self.keys).await?;
                let job = Job::new(id, name, data, opts);
                redis_store::add(&mut conn, &self.keys, &job).await?;
                job
            }
            Commands::Memory(store) => store.add(&self.memory_key(), name, data, opts)?,
        };
        tracing::debug!("Added job {} ({}) to '{}'", job.id, job.name, self.name);
        Ok(job)
    }

    /// Number of jobs in every lifecycle state.
    pub async fn counts(&self) -> Result<JobCounts, BrokerError> {
        match self.commands()? {
            Commands::Redis(mut conn) => redis_store::counts(&mut conn, &self.keys).await,
            Commands::Memory(store) => store.counts(&self.memory_key()),
        }
    }

    /// Fetch a job record; finished jobs are only found while retained.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>, BrokerError> {
        match self.commands()? {
            Commands::Redis(mut conn) => redis_store::get_job(&mut conn, &self.keys, id).await,
            Commands::Memory(store) => store.get_job(&self.memory_key(), id),
        }
    }

    /// Hold waiting jobs back from workers. Returns `false` if the queue
    /// was already paused.
    pub async fn pause(&self) -> Result<bool, BrokerError> {
        self.set_paused(true).await
    }

    /// Release jobs held by [`BrokerQueue::pause`]. Returns `false` if the
    /// queue was not paused.
    pub async fn resume(&self) -> Result<bool, BrokerError> {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> Result<bool, BrokerError> {
        let changed = match self.commands()? {
            Commands::Redis(mut conn) => {
                redis_store::set_paused(&mut conn, &self.keys, paused).await?
            }
            Commands::Memory(store) => store.set_paused(&self.memory_key(), paused)?,
        };
        if changed {
            tracing::info!(
                "Queue '{}' {}",
                self.name,
                if paused { "paused" } else { "resumed" }
            );
        }
        Ok(changed)
    }

    pub async fn is_paused(&self) -> Result<bool, BrokerError> {
        match self.commands()? {
            Commands::Redis(mut conn) => redis_store::is_paused(&mut conn, &self.keys).await,
            Commands::Memory(store) => store.is_paused(&self.memory_key()),
        }
    }

    /// Move delayed jobs whose time has come into `waiting`.
    pub async fn promote_delayed(&self) -> Result<usize, BrokerError> {
        match self.commands()? {
            Commands::Redis(mut conn) => redis_store::promote_delayed(&mut conn, &self.keys).await,
            Commands::Memory(store) => store.promote_delayed(&self.memory_key()),
        }
    }

    /// Claim the oldest waiting job, blocking up to `block` for one.
    ///
    /// Due delayed jobs are promoted first. The claimed job is `active`
    /// until [`BrokerQueue::complete`] or [`BrokerQueue::fail`] is called.
    pub async fn claim(
        &self,
        handle: &mut BlockingHandle,
        block: Duration,
    ) -> Result<Option<Job>, BrokerError> {
        self.ensure_open()?;
        match handle {
            BlockingHandle::Redis(conn) => {
                redis_store::promote_delayed(conn, &self.keys).await?;
                redis_store::claim(conn, &self.keys, block).await
            }
            BlockingHandle::Memory(store) => store.claim(&self.memory_key(), block).await,
        }
    }

    /// Record a successful outcome for a claimed job.
    pub async fn complete(&self, job: &Job, result: &JobResult) -> Result<(), BrokerError> {
        let return_value = serde_json::to_value(result)?;
        let event = JobEvent::Completed {
            job_id: job.id.clone(),
            return_value: return_value.clone(),
            timestamp: Utc::now(),
        };
        match self.commands()? {
            Commands::Redis(mut conn) => {
                redis_store::finish(
                    &mut conn,
                    &self.keys,
                    job,
                    job.opts.retention.keep_completed,
                    return_value.to_string(),
                    &event,
                )
                .await?
            }
            Commands::Memory(store) => store.complete(&self.memory_key(), job, result, event)?,
        }
        tracing::debug!("Job {} completed on '{}'", job.id, self.name);
        Ok(())
    }

    /// Record a failed outcome for a claimed job.
    pub async fn fail(&self, job: &Job, reason: &str) -> Result<(), BrokerError> {
        let event = JobEvent::Failed {
            job_id: job.id.clone(),
            failed_reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        match self.commands()? {
            Commands::Redis(mut conn) => {
                redis_store::finish(
                    &mut conn,
                    &self.keys,
                    job,
                    job.opts.retention.keep_failed,
                    reason.to_string(),
                    &event,
                )
                .await?
            }
            Commands::Memory(store) => store.fail(&self.memory_key(), job, reason, event)?,
        }
        tracing::debug!("Job {} failed on '{}': {}", job.id, self.name, reason);
        Ok(())
    }

    /// Position of the newest event; reading after it yields only new events.
    pub async fn event_tail(&self) -> Result<String, BrokerError> {
        match self.commands()? {
            Commands::Redis(mut conn) => redis_store::event_tail(&mut conn, &self.keys).await,
            Commands::Memory(store) => store.event_tail(&self.memory_key()),
        }
    }

    /// Read events after `after`, blocking up to `block` for the first one.
    pub async fn read_events(
        &self,
        handle: &mut BlockingHandle,
        after: &str,
        block: Duration,
    ) -> Result<Vec<EventRecord>, BrokerError> {
        self.ensure_open()?;
        match handle {
            BlockingHandle::Redis(conn) => {
                redis_store::read_events(conn, &self.keys, after, block).await
            }
            BlockingHandle::Memory(store) => {
                store.read_events(&self.memory_key(), after, block).await
            }
        }
    }
}
