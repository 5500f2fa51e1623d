//! Event-stream listener.
//!
//! Tails a queue's event stream, logs job outcomes and re-broadcasts every
//! event to in-process subscribers.

use std::time::Duration;

use broker::{BlockingHandle, BrokerQueue};
use queue_core::JobEvent;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::messages::{ActorError, EventsMessage};

const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Event listener arguments.
pub struct EventsArgs {
    pub queue: BrokerQueue,
    /// How long one stream read blocks.
    pub block_timeout: Duration,
    /// Broadcast buffer per subscriber.
    pub capacity: usize,
}

/// State for the events actor.
pub struct EventsActorState {
    queue_name: String,
    event_tx: broadcast::Sender<JobEvent>,
    stop_tx: watch::Sender<bool>,
    reader_running: bool,
    closing: bool,
    close_waiters: Vec<RpcReplyPort<()>>,
}

/// Actor that owns the queue's event-stream reader.
pub struct EventsActor;

impl Actor for EventsActor {
    type Msg = EventsMessage;
    type State = EventsActorState;
    type Arguments = EventsArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let handle = args.queue.connection().blocking().await?;
        // Start after the newest entry: reading from "now" would race with
        // events written between this call and the first read.
        let cursor = args.queue.event_tail().await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(args.capacity.max(1));

        tracing::info!("Listening for events on queue '{}'", args.queue.name());
        tokio::spawn(read_loop(
            myself,
            args.queue.clone(),
            handle,
            cursor,
            stop_rx,
            args.block_timeout,
        ));

        Ok(EventsActorState {
            queue_name: args.queue.name().to_string(),
            event_tx,
            stop_tx,
            reader_running: true,
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
            EventsMessage::Event(record) => {
                let event = record.event;
                match &event {
                    JobEvent::Completed { .. } => {
                        tracing::debug!("[{}] {}", state.queue_name, event.description())
                    }
                    JobEvent::Failed { .. } => {
                        tracing::warn!("[{}] {}", state.queue_name, event.description())
                    }
                    _ => tracing::trace!("[{}] {}", state.queue_name, event.description()),
                }
                // No subscribers is fine.
                let _ = state.event_tx.send(event);
            }

            EventsMessage::Subscribe { reply } => {
                let _ = reply.send(state.event_tx.subscribe());
            }

            EventsMessage::ReaderStopped { error } => {
                state.reader_running = false;
                if let Some(e) = error {
                    tracing::error!("Event reader for '{}' stopped: {}", state.queue_name, e);
                }
            }

            EventsMessage::Close { reply } => {
                if !state.closing {
                    state.closing = true;
                    let _ = state.stop_tx.send(true);
                }
                state.close_waiters.push(reply);
            }
        }

        if state.closing && !state.reader_running {
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
        tracing::info!("Stopped listening for events on queue '{}'", state.queue_name);
        Ok(())
    }
}

async fn read_loop(
    myself: ActorRef<EventsMessage>,
    queue: BrokerQueue,
    mut handle: BlockingHandle,
    mut cursor: String,
    mut stop: watch::Receiver<bool>,
    block_timeout: Duration,
) {
    let error = 'read: loop {
        if *stop.borrow() {
            break None;
        }
        match queue.read_events(&mut handle, &cursor, block_timeout).await {
            Ok(records) => {
                for record in records {
                    cursor = record.id.clone();
                    if myself
                        .send_message(EventsMessage::Event(Box::new(record)))
                        .is_err()
                    {
                        break 'read None;
                    }
                }
            }
            Err(e) if e.is_closed() => break None,
            Err(e) => {
                tracing::error!("Failed to read events from '{}': {}", queue.name(), e);
                tokio::select! {
                    _ = stop.wait_for(|stopped| *stopped) => break None,
                    _ = tokio::time::sleep(READ_RETRY_DELAY) => {}
                }
            }
        }
    };

    drop(handle);
    let _ = myself.send_message(EventsMessage::ReaderStopped { error });
}

/// Handle to a running event listener.
pub struct EventsHandle {
    actor: ActorRef<EventsMessage>,
    join: JoinHandle<()>,
}

impl EventsHandle {
    pub fn actor(&self) -> &ActorRef<EventsMessage> {
        &self.actor
    }

    /// Receive every event read from now on.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<JobEvent>, ActorError> {
        subscribe_events(&self.actor).await
    }

    /// Stop reading and wait for the actor to stop.
    pub async fn close(self) -> Result<(), ActorError> {
        match ractor::rpc::call(&self.actor, |reply| EventsMessage::Close { reply }, None).await {
            Ok(CallResult::Timeout) => return Err(ActorError::Timeout),
            Ok(CallResult::Success(())) | Ok(CallResult::SenderError) | Err(_) => {}
        }
        self.join
            .await
            .map_err(|e| ActorError::Actor(format!("event listener panicked: {}", e)))
    }
}

/// Subscribe to a running event listener.
pub async fn subscribe_events(
    actor: &ActorRef<EventsMessage>,
) -> Result<broadcast::Receiver<JobEvent>, ActorError> {
    match ractor::rpc::call(actor, |reply| EventsMessage::Subscribe { reply }, None).await {
        Ok(CallResult::Success(rx)) => Ok(rx),
        Ok(CallResult::Timeout) => Err(ActorError::Timeout),
        Ok(CallResult::SenderError) => {
            Err(ActorError::Actor("event listener dropped the reply".into()))
        }
        Err(e) => Err(ActorError::Actor(e.to_string())),
    }
}

/// Spawn an event listener for `queue`.
pub async fn start_events(args: EventsArgs) -> Result<EventsHandle, ActorError> {
    let (actor, join) = Actor::spawn(None, EventsActor, args).await?;
    Ok(EventsHandle { actor, join })
}
