//! In-process broker backend.
//!
//! Mirrors the Redis layout (wait/active/paused lists, delayed and finished
//! sets, an event log) inside one mutex so every transition is atomic.
//! Blocking reads park on a [`Notify`] that every write pokes.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use queue_core::{Job, JobCounts, JobEvent, JobId, JobOptions, JobPayload, JobResult, JobState};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::BrokerError;
use crate::queue::{EVENT_READ_COUNT, EVENT_STREAM_MAX_LEN, EventRecord};

pub(crate) struct MemoryStore {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct MemoryQueue {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
    /// Oldest job at the front.
    wait: VecDeque<JobId>,
    active: Vec<JobId>,
    paused_jobs: VecDeque<JobId>,
    paused: bool,
    /// (due time in ms, insertion sequence, id)
    delayed: BTreeSet<(i64, u64, JobId)>,
    /// Oldest finished job at the front.
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    events: VecDeque<(u64, JobEvent)>,
    event_seq: u64,
}

impl MemoryQueue {
    fn push_event(&mut self, event: JobEvent) {
        self.event_seq += 1;
        self.events.push_back((self.event_seq, event));
        while self.events.len() > EVENT_STREAM_MAX_LEN {
            self.events.pop_front();
        }
    }

    fn promote_delayed(&mut self, now_ms: i64) -> usize {
        let mut promoted = 0;
        while let Some(first) = self.delayed.first() {
            if first.0 > now_ms {
                break;
            }
            if let Some((_, _, id)) = self.delayed.pop_first() {
                if self.paused {
                    self.paused_jobs.push_back(id);
                } else {
                    self.wait.push_back(id);
                }
                promoted += 1;
            }
        }
        promoted
    }

    fn next_delayed_due(&self) -> Option<i64> {
        self.delayed.first().map(|(due, _, _)| *due)
    }

    fn finish(
        &mut self,
        job_id: &JobId,
        keep: u32,
        update: impl FnOnce(&mut Job),
        completed: bool,
    ) -> Result<(), BrokerError> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::JobNotFound(job_id.clone()))?;
        job.finished_at = Some(Utc::now());
        update(job);

        self.active.retain(|id| id != job_id);
        let finished = if completed {
            &mut self.completed
        } else {
            &mut self.failed
        };
        finished.retain(|id| id != job_id);
        finished.push_back(job_id.clone());

        let mut stale = Vec::new();
        while finished.len() > keep as usize {
            if let Some(id) = finished.pop_front() {
                stale.push(id);
            }
        }
        for id in stale {
            self.jobs.remove(&id);
        }
        Ok(())
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_queue<T>(
        &self,
        queue: &str,
        f: impl FnOnce(&mut MemoryQueue) -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        self.ensure_open()?;
        let result = {
            let mut queues = self.lock();
            f(queues.entry(queue.to_string()).or_default())
        };
        self.notify.notify_waiters();
        result
    }

    pub(crate) fn add(
        &self,
        queue: &str,
        name: &str,
        data: JobPayload,
        opts: JobOptions,
    ) -> Result<Job, BrokerError> {
        self.with_queue(queue, |q| {
            q.next_id += 1;
            let job = Job::new(JobId::new(q.next_id.to_string()), name, data, opts);
            let id = job.id.clone();

            match job.opts.delay_ms {
                Some(delay_ms) => {
                    let due = job.created_at.timestamp_millis() + delay_ms as i64;
                    q.delayed.insert((due, q.next_id, id.clone()));
                    q.push_event(JobEvent::Delayed {
                        job_id: id.clone(),
                        delay_ms,
                        timestamp: job.created_at,
                    });
                }
                None => {
                    if q.paused {
                        q.paused_jobs.push_back(id.clone());
                    } else {
                        q.wait.push_back(id.clone());
                    }
                    q.push_event(JobEvent::Added {
                        job_id: id.clone(),
                        name: job.name.clone(),
                        timestamp: job.created_at,
                    });
                }
            }

            q.jobs.insert(id, job.clone());
            Ok(job)
        })
    }

    pub(crate) fn counts(&self, queue: &str) -> Result<JobCounts, BrokerError> {
        self.with_queue(queue, |q| {
            Ok(JobState::ALL
                .into_iter()
                .map(|state| {
                    let count = match state {
                        JobState::Waiting => q.wait.len(),
                        JobState::Active => q.active.len(),
                        JobState::Completed => q.completed.len(),
                        JobState::Failed => q.failed.len(),
                        JobState::Delayed => q.delayed.len(),
                        JobState::Paused => q.paused_jobs.len(),
                    };
                    (state, count as u64)
                })
                .collect())
        })
    }

    pub(crate) fn get_job(&self, queue: &str, job_id: &JobId) -> Result<Option<Job>, BrokerError> {
        self.with_queue(queue, |q| Ok(q.jobs.get(job_id).cloned()))
    }

    pub(crate) fn set_paused(&self, queue: &str, paused: bool) -> Result<bool, BrokerError> {
        self.with_queue(queue, |q| {
            if q.paused == paused {
                return Ok(false);
            }
            q.paused = paused;
            let timestamp = Utc::now();
            if paused {
                q.paused_jobs.extend(q.wait.drain(..));
                q.push_event(JobEvent::Paused { timestamp });
            } else {
                q.wait.extend(q.paused_jobs.drain(..));
                q.push_event(JobEvent::Resumed { timestamp });
            }
            Ok(true)
        })
    }

    pub(crate) fn is_paused(&self, queue: &str) -> Result<bool, BrokerError> {
        self.with_queue(queue, |q| Ok(q.paused))
    }

    pub(crate) fn promote_delayed(&self, queue: &str) -> Result<usize, BrokerError> {
        let now_ms = Utc::now().timestamp_millis();
        self.with_queue(queue, |q| Ok(q.promote_delayed(now_ms)))
    }

    fn try_claim(&self, queue: &str) -> Result<(Option<Job>, Option<i64>), BrokerError> {
        self.ensure_open()?;
        let mut queues = self.lock();
        let q = queues.entry(queue.to_string()).or_default();
        let now = Utc::now();
        q.promote_delayed(now.timestamp_millis());

        let Some(id) = q.wait.pop_front() else {
            return Ok((None, q.next_delayed_due()));
        };
        let Some(job) = q.jobs.get_mut(&id) else {
            return Ok((None, q.next_delayed_due()));
        };
        job.processed_at = Some(now);
        job.attempts_made += 1;
        let job = job.clone();
        q.active.push(id.clone());
        q.push_event(JobEvent::Active {
            job_id: id,
            timestamp: now,
        });
        Ok((Some(job), None))
    }

    /// Claim the oldest waiting job, waiting up to `block` for one to arrive.
    pub(crate) async fn claim(&self, queue: &str, block: Duration) -> Result<Option<Job>, BrokerError> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (job, next_due) = self.try_claim(queue)?;
            if job.is_some() {
                self.notify.notify_waiters();
                return Ok(job);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake = next_due
                .map(|due_ms| {
                    let wait_ms = (due_ms - Utc::now().timestamp_millis()).max(0) as u64;
                    (now + Duration::from_millis(wait_ms)).min(deadline)
                })
                .unwrap_or(deadline);

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    pub(crate) fn complete(
        &self,
        queue: &str,
        job: &Job,
        result: &JobResult,
        event: JobEvent,
    ) -> Result<(), BrokerError> {
        let output = serde_json::to_value(result)?;
        self.with_queue(queue, |q| {
            q.finish(
                &job.id,
                job.opts.retention.keep_completed,
                |stored| stored.return_value = Some(output),
                true,
            )?;
            q.push_event(event);
            Ok(())
        })
    }

    pub(crate) fn fail(
        &self,
        queue: &str,
        job: &Job,
        reason: &str,
        event: JobEvent,
    ) -> Result<(), BrokerError> {
        self.with_queue(queue, |q| {
            q.finish(
                &job.id,
                job.opts.retention.keep_failed,
                |stored| stored.failed_reason = Some(reason.to_string()),
                false,
            )?;
            q.push_event(event);
            Ok(())
        })
    }

    pub(crate) fn event_tail(&self, queue: &str) -> Result<String, BrokerError> {
        self.with_queue(queue, |q| Ok(q.event_seq.to_string()))
    }

    fn events_after(&self, queue: &str, after: u64) -> Result<Vec<EventRecord>, BrokerError> {
        self.ensure_open()?;
        let mut queues = self.lock();
        let q = queues.entry(queue.to_string()).or_default();
        Ok(q.events
            .iter()
            .filter(|(seq, _)| *seq > after)
            .take(EVENT_READ_COUNT)
            .map(|(seq, event)| EventRecord {
                id: seq.to_string(),
                event: event.clone(),
            })
            .collect())
    }

    /// Read events newer than `after`, waiting up to `block` for the first one.
    pub(crate) async fn read_events(
        &self,
        queue: &str,
        after: &str,
        block: Duration,
    ) -> Result<Vec<EventRecord>, BrokerError> {
        let after: u64 = after
            .parse()
            .map_err(|_| BrokerError::InvalidConfig(format!("invalid event cursor: {}", after)))?;
        let deadline = Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let events = self.events_after(queue, after)?;
            if !events.is_empty() || Instant::now() >= deadline {
                return Ok(events);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}
