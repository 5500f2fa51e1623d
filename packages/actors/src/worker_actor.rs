//! Worker actor for executing jobs.
//!
//! The actor's mailbox is the worker's dispatch loop. A separate fetch
//! task claims jobs from the broker and hands each one to the actor
//! together with a concurrency permit; every job runs in its own task and
//! reports back with [`WorkerMessage::Finished`]. The actor records the
//! outcome in the broker and only then drops the permit, so no more than
//! `concurrency` jobs are ever active for one worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use broker::{BlockingHandle, BrokerQueue};
use queue_core::{Job, JobId};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::handler::{HandlerResult, JobProcessor};
use crate::messages::{ActorError, WorkerMessage};

/// Pause before claiming again after a broker error.
const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Worker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum number of jobs processed at once.
    pub concurrency: usize,
    /// How long one claim blocks waiting for a job. Bounds how quickly the
    /// worker notices a close request while idle.
    pub block_timeout: Duration,
}

impl WorkerConfig {
    pub const DEFAULT_CONCURRENCY: usize = 2;
    pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(1000);
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::DEFAULT_CONCURRENCY,
            block_timeout: Self::DEFAULT_BLOCK_TIMEOUT,
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: BrokerQueue,
    pub processor: Arc<dyn JobProcessor>,
    pub config: WorkerConfig,
}

/// State for the worker actor.
pub struct WorkerActorState {
    pub worker_id: String,
    queue: BrokerQueue,
    processor: Arc<dyn JobProcessor>,
    /// Permits of jobs being processed, released once their outcome is recorded.
    in_flight: HashMap<JobId, OwnedSemaphorePermit>,
    stop_tx: watch::Sender<bool>,
    fetcher_running: bool,
    closing: bool,
    close_waiters: Vec<RpcReplyPort<()>>,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn drained(&self) -> bool {
        self.closing && !self.fetcher_running && self.is_idle()
    }

    async fn record(&self, job: &Job, outcome: HandlerResult) {
        let recorded = match outcome {
            Ok(result) => {
                tracing::debug!("Job {} completed on worker {}", job.id, self.worker_id);
                self.queue.complete(job, &result).await
            }
            Err(reason) => {
                tracing::warn!("Job {} ({}) failed: {}", job.id, job.name, reason);
                self.queue.fail(job, &reason).await
            }
        };
        if let Err(e) = recorded {
            tracing::error!("Failed to record outcome of job {}: {}", job.id, e);
        }
    }
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let concurrency = args.config.concurrency.max(1);
        tracing::info!(
            "Starting worker {} on queue '{}' (concurrency {})",
            args.worker_id,
            args.queue.name(),
            concurrency
        );

        let handle = args.queue.connection().blocking().await?;
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(fetch_loop(
            myself,
            args.queue.clone(),
            handle,
            Arc::new(Semaphore::new(concurrency)),
            stop_rx,
            args.config.block_timeout,
        ));

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue: args.queue,
            processor: args.processor,
            in_flight: HashMap::new(),
            stop_tx,
            fetcher_running: true,
            closing: false,
            close_waiters: Vec::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Claimed { job, permit } => {
                tracing::debug!("Worker {} processing job {}", state.worker_id, job.id);
                state.in_flight.insert(job.id.clone(), permit);
                tokio::spawn(run_job(myself.clone(), state.processor.clone(), job));
            }

            WorkerMessage::Finished { job, outcome } => {
                state.record(&job, outcome).await;
                state.in_flight.remove(&job.id);
            }

            WorkerMessage::FetcherStopped { error } => {
                state.fetcher_running = false;
                match error {
                    Some(e) => tracing::error!("Worker {} stopped claiming: {}", state.worker_id, e),
                    None => tracing::debug!("Worker {} stopped claiming", state.worker_id),
                }
            }

            WorkerMessage::InFlight { reply } => {
                let _ = reply.send(state.in_flight.len());
            }

            WorkerMessage::Close { reply } => {
                if !state.closing {
                    tracing::info!(
                        "Closing worker {} ({} job(s) in flight)",
                        state.worker_id,
                        state.in_flight.len()
                    );
                    state.closing = true;
                    let _ = state.stop_tx.send(true);
                }
                state.close_waiters.push(reply);
            }
        }

        if state.drained() {
            for waiter in state.close_waiters.drain(..) {
                let _ = waiter.send(());
            }
            myself.stop(None);
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let _ = state.stop_tx.send(true);
        tracing::info!("Worker {} stopped", state.worker_id);
        Ok(())
    }
}

/// Claim jobs while permits are available until told to stop.
///
/// A claim is never raced against the stop signal: a job moved to
/// `active` must reach the actor. The bounded block timeout is what lets
/// the loop notice a stop request while the queue is idle.
async fn fetch_loop(
    myself: ActorRef<WorkerMessage>,
    queue: BrokerQueue,
    mut handle: BlockingHandle,
    permits: Arc<Semaphore>,
    mut stop: watch::Receiver<bool>,
    block_timeout: Duration,
) {
    let error = loop {
        let permit = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break None,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break None,
            },
        };
        if *stop.borrow() {
            break None;
        }

        match queue.claim(&mut handle, block_timeout).await {
            Ok(Some(job)) => {
                let claimed = WorkerMessage::Claimed {
                    job: Box::new(job),
                    permit,
                };
                if myself.send_message(claimed).is_err() {
                    break Some("worker mailbox closed".to_string());
                }
            }
            Ok(None) => drop(permit),
            Err(e) if e.is_closed() => break None,
            Err(e) => {
                drop(permit);
                tracing::error!("Failed to claim from '{}': {}", queue.name(), e);
                tokio::select! {
                    _ = stop.wait_for(|stopped| *stopped) => break None,
                    _ = tokio::time::sleep(CLAIM_RETRY_DELAY) => {}
                }
            }
        }
    };

    drop(handle);
    let _ = myself.send_message(WorkerMessage::FetcherStopped { error });
}

async fn run_job(myself: ActorRef<WorkerMessage>, processor: Arc<dyn JobProcessor>, job: Box<Job>) {
    // `process` itself runs inside the spawned task so a panic before the
    // future is returned also becomes a failure.
    let input = (*job).clone();
    let outcome = match tokio::spawn(async move { processor.process(input).await }).await {
        Ok(outcome) => outcome,
        Err(e) => Err(join_failure(e)),
    };
    if myself
        .send_message(WorkerMessage::Finished { job, outcome })
        .is_err()
    {
        tracing::warn!("Worker stopped before a job outcome could be recorded");
    }
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("processor task cancelled: {}", err);
    }
    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("processor panicked: {}", message)
}

/// Handle to a running worker.
pub struct WorkerHandle {
    worker_id: String,
    actor: ActorRef<WorkerMessage>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn actor(&self) -> &ActorRef<WorkerMessage> {
        &self.actor
    }

    /// Number of jobs this worker is processing right now.
    pub async fn in_flight(&self) -> Result<usize, ActorError> {
        match ractor::rpc::call(&self.actor, |reply| WorkerMessage::InFlight { reply }, None).await
        {
            Ok(CallResult::Success(count)) => Ok(count),
            Ok(CallResult::Timeout) => Err(ActorError::Timeout),
            Ok(CallResult::SenderError) => Err(ActorError::Actor("worker dropped the reply".into())),
            Err(e) => Err(ActorError::Actor(e.to_string())),
        }
    }

    /// Stop claiming, wait for in-flight jobs to be recorded and for the
    /// actor to stop. The blocking handle is released on the way out.
    pub async fn close(self) -> Result<(), ActorError> {
        match ractor::rpc::call(&self.actor, |reply| WorkerMessage::Close { reply }, None).await {
            Ok(CallResult::Timeout) => return Err(ActorError::Timeout),
            // The actor stopped on its own; waiting on the join handle is enough.
            Ok(CallResult::Success(())) | Ok(CallResult::SenderError) | Err(_) => {}
        }
        self.join
            .await
            .map_err(|e| ActorError::Actor(format!("worker {} panicked: {}", self.worker_id, e)))
    }
}

/// Spawn a worker bound to `queue`.
pub async fn start_worker(
    queue: BrokerQueue,
    processor: Arc<dyn JobProcessor>,
    config: WorkerConfig,
) -> Result<WorkerHandle, ActorError> {
    let worker_id = format!("worker-{}", ulid::Ulid::new().to_string().to_lowercase());
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        queue,
        processor,
        config,
    };
    let (actor, join) = Actor::spawn(Some(worker_id.clone()), WorkerActor, args).await?;
    Ok(WorkerHandle {
        worker_id,
        actor,
        join,
    })
}
