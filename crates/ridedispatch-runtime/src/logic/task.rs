//! Dispatch Task
//!
//! Event loop feeding the engine. Every inbound event and every elapsed
//! timer runs as its own tokio task, so unrelated rides proceed in parallel.
//! Work for one identity is chained: each task waits for its predecessor on
//! the same identity to finish, which keeps arrival order no matter how the
//! scheduler interleaves tasks.

use std::collections::HashMap;
use std::future::Future;

use ridedispatch_core::{
    Command, CommandReceiver, DispatchError, DispatchResult, Event, EventReceiver, RiderId,
};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use super::engine::DispatchEngine;
use crate::managers::TimerFiredReceiver;

// ----------------------------------------------------------------------------
// Dispatch Task
// ----------------------------------------------------------------------------

/// Identity and ticket of a finished task, if it was chained
type TaskOutcome = (Option<(RiderId, u64)>, DispatchResult<()>);

/// Most recently spawned task for one identity
struct ChainTail {
    ticket: u64,
    done: oneshot::Receiver<()>,
}

/// Event loop driving a [`DispatchEngine`]
pub struct DispatchTask {
    engine: DispatchEngine,
    event_receiver: EventReceiver,
    timer_receiver: TimerFiredReceiver,
    command_receiver: CommandReceiver,
    in_flight: JoinSet<TaskOutcome>,
    tails: HashMap<RiderId, ChainTail>,
    next_ticket: u64,
    events_open: bool,
    fatal: Option<DispatchError>,
}

impl DispatchTask {
    pub fn new(
        engine: DispatchEngine,
        event_receiver: EventReceiver,
        timer_receiver: TimerFiredReceiver,
        command_receiver: CommandReceiver,
    ) -> Self {
        Self {
            engine,
            event_receiver,
            timer_receiver,
            command_receiver,
            in_flight: JoinSet::new(),
            tails: HashMap::new(),
            next_ticket: 0,
            events_open: true,
            fatal: None,
        }
    }

    /// Run until a `Shutdown` command, a closed command channel, or an
    /// unrecoverable error. In-flight events are drained and live timers
    /// aborted before returning.
    pub async fn run(mut self) -> DispatchResult<()> {
        info!("Dispatch task starting");

        while self.fatal.is_none() {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(Command::Shutdown) => {
                            info!("Shutdown requested");
                            break;
                        }
                        Some(Command::BroadcastPendingList) => {
                            let engine = self.engine.clone();
                            self.in_flight
                                .spawn(async move { (None, engine.broadcast_pending_list().await) });
                        }
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                event = self.event_receiver.recv(), if self.events_open => {
                    match event {
                        Some(event) => self.spawn_event(event),
                        None => {
                            info!("Event channel closed");
                            self.events_open = false;
                        }
                    }
                }

                Some(handle) = self.timer_receiver.recv() => {
                    let engine = self.engine.clone();
                    let identity = handle.identity.clone();
                    self.spawn_chained(identity, async move { engine.handle_timer_fired(handle).await });
                }

                Some(joined) = self.in_flight.join_next() => {
                    self.record_outcome(joined);
                }
            }
        }

        // Events already queued before shutdown still get handled
        self.event_receiver.close();
        if self.fatal.is_none() {
            while let Ok(event) = self.event_receiver.try_recv() {
                self.spawn_event(event);
            }
        }

        while let Some(joined) = self.in_flight.join_next().await {
            self.record_outcome(joined);
        }
        let aborted = self.engine.cancel_all_timers();
        info!(aborted_timers = aborted, "Dispatch task stopped");

        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_event(&mut self, event: Event) {
        let engine = self.engine.clone();
        let identity = event.ride_key().clone();
        self.spawn_chained(identity, async move { engine.process(event).await });
    }

    /// Spawn `work` so that it starts only after every earlier task for
    /// `identity` has finished
    fn spawn_chained<F>(&mut self, identity: RiderId, work: F)
    where
        F: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.tails.insert(
            identity.clone(),
            ChainTail {
                ticket,
                done: done_rx,
            },
        );

        self.in_flight.spawn(async move {
            if let Some(previous) = previous {
                // Err means the predecessor finished or panicked; either way it is done
                let _ = previous.done.await;
            }
            // Dropped when this task ends, releasing the next task in the chain
            let _done = done_tx;
            let result = work.await;
            (Some((identity, ticket)), result)
        });
    }

    fn record_outcome(&mut self, joined: Result<TaskOutcome, JoinError>) {
        let joined = joined.map(|(chain, result)| {
            if let Some((identity, ticket)) = chain {
                if self.tails.get(&identity).is_some_and(|tail| tail.ticket == ticket) {
                    self.tails.remove(&identity);
                }
            }
            result
        });

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_unrecoverable() => {
                error!("Unrecoverable error, shutting down dispatch task: {}", err);
                self.fatal = Some(err);
            }
            // Both were logged where they happened
            Ok(Err(DispatchError::DuplicateActiveRide { .. }))
            | Ok(Err(DispatchError::Persistence(_))) => {}
            Ok(Err(DispatchError::InvalidEvent { reason })) => {
                warn!("Dropping invalid event: {}", reason);
            }
            Ok(Err(err)) => {
                error!("Error processing event: {}", err);
            }
            Err(join_error) if join_error.is_panic() => {
                error!("Event task panicked: {}", join_error);
            }
            Err(_) => {}
        }
    }
}
