//! Broker connection management.
//!
//! [`connect`] turns a [`BrokerConfig`] into either a live [`Connection`]
//! or `None` when nothing is configured. The connection is created once
//! and lent to the queue handle, the worker and the event listener; clones
//! share the same session and all of them stop working once
//! [`Connection::close`] has run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use redis::aio::{ConnectionManager, MultiplexedConnection};

use crate::config::{BrokerConfig, BrokerTarget, redact};
use crate::error::BrokerError;
use crate::memory::MemoryStore;

/// A live session to the broker.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    /// Redacted target, safe to log.
    target: String,
    key_prefix: String,
    backend: Backend,
    closed: AtomicBool,
}

enum Backend {
    Redis {
        client: redis::Client,
        /// Multiplexed command connection. Taken out on close.
        manager: Mutex<Option<ConnectionManager>>,
    },
    Memory(Arc<MemoryStore>),
}

/// Command-side access to the broker for a single operation.
pub(crate) enum Commands {
    Redis(ConnectionManager),
    Memory(Arc<MemoryStore>),
}

/// A connection reserved for long blocking reads (dequeue, event stream).
///
/// Blocking commands would stall every other caller on the shared
/// multiplexed connection, so each long-lived reader gets its own handle
/// derived from the same [`Connection`]. Dropping the handle releases it.
pub enum BlockingHandle {
    Redis(MultiplexedConnection),
    Memory(Arc<MemoryStore>),
}

impl std::fmt::Debug for BlockingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockingHandle::Redis(_) => f.write_str("BlockingHandle::Redis"),
            BlockingHandle::Memory(_) => f.write_str("BlockingHandle::Memory"),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.inner.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Connect to the configured broker.
///
/// Returns `Ok(None)` when neither a connection URL nor a host is
/// configured; that is the documented way to run without a job queue.
pub async fn connect(config: &BrokerConfig) -> Result<Option<Connection>, BrokerError> {
    let Some(target) = config.target() else {
        tracing::info!("No broker configured; job queue disabled");
        return Ok(None);
    };

    let key_prefix = config.key_prefix.trim().to_string();
    if key_prefix.is_empty() {
        return Err(BrokerError::InvalidConfig(
            "key prefix must not be empty".to_string(),
        ));
    }

    let (target, backend) = match target {
        BrokerTarget::Memory => (
            BrokerConfig::MEMORY_SCHEME.to_string(),
            Backend::Memory(Arc::new(MemoryStore::new())),
        ),
        BrokerTarget::Redis(url) => {
            tracing::info!("Connecting to broker: {}", redact(&url));
            let client = redis::Client::open(url.as_str())
                .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;
            // The manager reconnects on its own and puts no cap on requests
            // waiting for a reply, so slow or blocking traffic never trips a
            // client-side retry limit.
            let manager = ConnectionManager::new(client.clone()).await?;
            (
                redact(&url),
                Backend::Redis {
                    client,
                    manager: Mutex::new(Some(manager)),
                },
            )
        }
    };

    let connection = Connection {
        inner: Arc::new(ConnectionInner {
            target,
            key_prefix,
            backend,
            closed: AtomicBool::new(false),
        }),
    };

    if config.enable_ready_check {
        connection.ping().await?;
    }

    tracing::info!("Connected to broker: {}", connection.inner.target);
    Ok(Some(connection))
}

impl Connection {
    /// Redacted connection target.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn key_prefix(&self) -> &str {
        &self.inner.key_prefix
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Verify the broker answers.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        match self.commands()? {
            Commands::Redis(mut conn) => {
                let pong: String = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| BrokerError::ReadyCheck(e.to_string()))?;
                if pong != "PONG" {
                    return Err(BrokerError::ReadyCheck(format!(
                        "unexpected PING reply: {}",
                        pong
                    )));
                }
                Ok(())
            }
            Commands::Memory(_) => Ok(()),
        }
    }

    /// Open a handle for blocking reads.
    pub async fn blocking(&self) -> Result<BlockingHandle, BrokerError> {
        self.ensure_open()?;
        match &self.inner.backend {
            Backend::Redis { client, .. } => Ok(BlockingHandle::Redis(
                client.get_multiplexed_async_connection().await?,
            )),
            Backend::Memory(store) => Ok(BlockingHandle::Memory(store.clone())),
        }
    }

    /// Release the broker session.
    ///
    /// Every clone of this connection, and every handle derived from it,
    /// fails with [`BrokerError::Closed`] afterwards. Closing twice is a
    /// no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.inner.backend {
            Backend::Redis { manager, .. } => {
                drop(lock(manager).take());
            }
            Backend::Memory(store) => store.close(),
        }
        tracing::info!("Closed broker connection: {}", self.inner.target);
    }

    pub(crate) fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn commands(&self) -> Result<Commands, BrokerError> {
        self.ensure_open()?;
        match &self.inner.backend {
            Backend::Redis { manager, .. } => lock(manager)
                .clone()
                .map(Commands::Redis)
                .ok_or(BrokerError::Closed),
            Backend::Memory(store) => Ok(Commands::Memory(store.clone())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
