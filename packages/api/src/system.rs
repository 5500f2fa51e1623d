//! Job system lifecycle.
//!
//! [`JobSystem::start`] wires the connection, queue handle, event listener
//! and optional in-process worker together; [`JobSystem::shutdown`] takes
//! them apart again in reverse order under the configured timeout.

use std::sync::Arc;

use actors::{EventsArgs, EventsHandle, JobProcessor, WorkerConfig, WorkerHandle};
use broker::{BrokerQueue, Connection};
use tokio::sync::{Mutex, watch};

use crate::config::Settings;
use crate::error::{ShutdownError, StartError};
use crate::service::{Producer, QueueService};

/// Buffered events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Where the job system is in its lifecycle.
///
/// `Disabled` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Enabled,
    Disabled,
    Running,
    Draining,
    Closed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Enabled => "enabled",
            LifecycleState::Disabled => "disabled",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
        }
    }

    /// Whether the system has started (or finished) tearing down.
    pub fn is_stopping(&self) -> bool {
        matches!(self, LifecycleState::Draining | LifecycleState::Closed)
    }
}

/// What a call to [`JobSystem::shutdown`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Everything was closed by this call.
    Closed,
    /// Nothing to close: the subsystem never started.
    Disabled,
    /// Another call already closed (or is closing) the system.
    AlreadyShutdown,
}

struct Resources {
    worker: Option<WorkerHandle>,
    events: EventsHandle,
    queue: BrokerQueue,
    connection: Connection,
}

impl Resources {
    /// Close worker, event listener, queue handle and connection, in order.
    async fn close(self) -> Result<(), ShutdownError> {
        let mut first_error = None;

        if let Some(worker) = self.worker {
            tracing::info!("Closing worker {}", worker.id());
            if let Err(e) = worker.close().await {
                tracing::error!("Failed to close worker: {}", e);
                first_error.get_or_insert(ShutdownError::Actor(e.to_string()));
            }
        }

        tracing::info!("Closing event listener");
        if let Err(e) = self.events.close().await {
            tracing::error!("Failed to close event listener: {}", e);
            first_error.get_or_insert(ShutdownError::Actor(e.to_string()));
        }

        tracing::info!("Closing queue '{}'", self.queue.name());
        self.queue.close();
        self.connection.close().await;

        first_error.map_or(Ok(()), Err)
    }
}

/// Owner of every job-queue resource in the process.
pub struct JobSystem {
    settings: Settings,
    service: QueueService,
    state_tx: watch::Sender<LifecycleState>,
    resources: Mutex<Option<Resources>>,
}

impl JobSystem {
    /// Connect and start the configured actors.
    ///
    /// An unconfigured broker is not an error: the system comes up
    /// `Disabled` and its service reports that consistently.
    pub async fn start(
        settings: Settings,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<Self, StartError> {
        let (state_tx, _) = watch::channel(LifecycleState::Uninitialized);

        let Some(connection) = broker::connect(&settings.broker).await? else {
            tracing::warn!("No broker configured (set REDIS_URL or REDIS_HOST); job queue disabled");
            state_tx.send_replace(LifecycleState::Disabled);
            return Ok(Self {
                settings,
                service: QueueService::Disabled,
                state_tx,
                resources: Mutex::new(None),
            });
        };
        state_tx.send_replace(LifecycleState::Enabled);

        let resources = match start_resources(&settings, &connection, processor).await {
            Ok(resources) => resources,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };

        let producer = Producer::new(resources.queue.clone(), settings.retention)
            .with_events(resources.events.actor().clone());
        state_tx.send_replace(LifecycleState::Running);
        tracing::info!(
            "Job queue '{}' running on {}",
            settings.queue_name,
            connection.target()
        );

        Ok(Self {
            settings,
            service: QueueService::Enabled(producer),
            state_tx,
            resources: Mutex::new(Some(resources)),
        })
    }

    pub fn service(&self) -> &QueueService {
        &self.service
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Follow lifecycle changes, e.g. to stop an HTTP server when draining starts.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Drain and close everything, bounded by the shutdown timeout.
    ///
    /// Safe to call more than once; only the first call does any work. On
    /// timeout the connection is closed anyway and
    /// [`ShutdownError::TimedOut`] is returned so the caller can exit
    /// non-zero.
    pub async fn shutdown(&self) -> Result<ShutdownOutcome, ShutdownError> {
        if self.state() == LifecycleState::Disabled {
            return Ok(ShutdownOutcome::Disabled);
        }
        let Some(resources) = self.resources.lock().await.take() else {
            return Ok(ShutdownOutcome::AlreadyShutdown);
        };

        self.state_tx.send_replace(LifecycleState::Draining);
        tracing::info!("Draining job queue '{}'", self.settings.queue_name);

        let connection = resources.connection.clone();
        let timeout = self.settings.shutdown_timeout;
        let result = match tokio::time::timeout(timeout, resources.close()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Job queue did not drain within {:?}; closing connection", timeout);
                connection.close().await;
                Err(ShutdownError::TimedOut(timeout))
            }
        };

        self.state_tx.send_replace(LifecycleState::Closed);
        if result.is_ok() {
            tracing::info!("Job queue closed");
        }
        result.map(|()| ShutdownOutcome::Closed)
    }
}

async fn start_resources(
    settings: &Settings,
    connection: &Connection,
    processor: Arc<dyn JobProcessor>,
) -> Result<Resources, StartError> {
    let queue = BrokerQueue::new(connection, settings.queue_name.clone())?;

    let events = actors::start_events(EventsArgs {
        queue: queue.clone(),
        block_timeout: settings.worker_block_timeout,
        capacity: EVENT_BUFFER,
    })
    .await?;

    let worker = if settings.inprocess_worker {
        let config = WorkerConfig {
            concurrency: settings.worker_concurrency,
            block_timeout: settings.worker_block_timeout,
        };
        match actors::start_worker(queue.clone(), processor, config).await {
            Ok(worker) => {
                tracing::info!(
                    "Started worker {} (concurrency {})",
                    worker.id(),
                    settings.worker_concurrency
                );
                Some(worker)
            }
            Err(e) => {
                let _ = events.close().await;
                return Err(e.into());
            }
        }
    } else {
        tracing::info!("In-process worker disabled; jobs wait for an external worker");
        None
    };

    Ok(Resources {
        worker,
        events,
        queue,
        connection: connection.clone(),
    })
}
