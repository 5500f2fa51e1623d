//! Shutdown orchestration.
//!
//! Termination signals and explicit teardown requests all arrive on one
//! channel. The first one drains the [`JobSystem`]; anything after that is
//! logged and ignored.

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ShutdownError;
use crate::system::{JobSystem, ShutdownOutcome};

/// Why shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Signal(&'static str),
    Teardown,
}

impl std::fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownTrigger::Signal(name) => write!(f, "{} received", name),
            ShutdownTrigger::Teardown => f.write_str("teardown requested"),
        }
    }
}

/// Sends triggers to a running [`ShutdownOrchestrator`].
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<ShutdownTrigger>,
}

impl TriggerHandle {
    /// Returns false once the orchestrator is gone.
    pub fn trigger(&self, trigger: ShutdownTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }

    pub fn teardown(&self) -> bool {
        self.trigger(ShutdownTrigger::Teardown)
    }
}

pub struct ShutdownOrchestrator {
    system: Arc<JobSystem>,
    tx: mpsc::UnboundedSender<ShutdownTrigger>,
    rx: mpsc::UnboundedReceiver<ShutdownTrigger>,
}

impl ShutdownOrchestrator {
    pub fn new(system: Arc<JobSystem>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { system, tx, rx }
    }

    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Forward SIGINT and SIGTERM to the termination channel.
    ///
    /// Handlers are installed before this returns, so installation errors
    /// surface here rather than in the spawned task.
    #[cfg(unix)]
    pub fn listen_for_signals(&self) -> io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let tx = self.tx.clone();

        Ok(tokio::spawn(async move {
            loop {
                let trigger = tokio::select! {
                    Some(()) = sigint.recv() => ShutdownTrigger::Signal("SIGINT"),
                    Some(()) = sigterm.recv() => ShutdownTrigger::Signal("SIGTERM"),
                    else => break,
                };
                if tx.send(trigger).is_err() {
                    break;
                }
            }
        }))
    }

    /// Forward Ctrl-C to the termination channel.
    #[cfg(not(unix))]
    pub fn listen_for_signals(&self) -> io::Result<JoinHandle<()>> {
        let tx = self.tx.clone();
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(ShutdownTrigger::Signal("CTRL-C")).is_err() {
                    break;
                }
            }
        }))
    }

    /// Wait for the first trigger and shut the job system down.
    ///
    /// If every trigger handle is dropped before anything arrives, that
    /// counts as a teardown request.
    pub async fn run(self) -> Result<ShutdownOutcome, ShutdownError> {
        let ShutdownOrchestrator { system, tx, mut rx } = self;
        drop(tx);

        let trigger = rx.recv().await.unwrap_or(ShutdownTrigger::Teardown);
        tracing::info!("{}, shutting down job queue", trigger);

        let ignore_rest = tokio::spawn(async move {
            while let Some(trigger) = rx.recv().await {
                tracing::info!("{} while already shutting down; ignored", trigger);
            }
        });

        let result = system.shutdown().await;
        ignore_rest.abort();
        result
    }
}

/// Process exit code for a finished shutdown: non-zero unless the drain
/// completed.
pub fn exit_code(result: &Result<ShutdownOutcome, ShutdownError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(ShutdownError::TimedOut(timeout)) => {
            tracing::error!("Job queue did not drain within {:?}; exiting", timeout);
            1
        }
        Err(e) => {
            tracing::error!("Shutdown failed: {}", e);
            1
        }
    }
}
