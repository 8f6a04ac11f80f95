//! Correlator actor - runs an [`EventCorrelator`] on a single task
//!
//! The task owns the correlator and reacts to two things: mailbox messages
//! and the nearest armed deadline. Callers talk to it through a cloneable
//! [`CorrelatorHandle`], which is also how the correlator takes part in the
//! start/stop broadcast as an [`ExecutionObserver`].

use async_trait::async_trait;
use op_workflow_core::{Clock, Error, ExecutionTraceEvent, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CorrelatorSnapshot, EventCorrelator};
use crate::observer::{ExecutionObserver, StartSignal, StopSignal};

/// Message sent to the correlator task
pub enum CorrelatorMessage {
    Trace(ExecutionTraceEvent),
    Start(StartSignal),
    Stop {
        signal: StopSignal,
        ack: oneshot::Sender<()>,
    },
    Snapshot(oneshot::Sender<CorrelatorSnapshot>),
    Shutdown,
}

/// Handle to interact with the correlator task
#[derive(Clone)]
pub struct CorrelatorHandle {
    sender: mpsc::UnboundedSender<CorrelatorMessage>,
}

impl CorrelatorHandle {
    fn send(&self, message: CorrelatorMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::internal("Correlator task stopped"))
    }

    /// Feed one engine trace event
    pub fn record(&self, event: ExecutionTraceEvent) -> Result<()> {
        self.send(CorrelatorMessage::Trace(event))
    }

    pub async fn snapshot(&self) -> Result<CorrelatorSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(CorrelatorMessage::Snapshot(tx))?;
        rx.await
            .map_err(|_| Error::internal("Correlator task dropped the snapshot request"))
    }

    /// Stop the task after the messages already queued
    pub fn shutdown(&self) -> Result<()> {
        self.send(CorrelatorMessage::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl ExecutionObserver for CorrelatorHandle {
    fn name(&self) -> &str {
        "event-correlator"
    }

    fn on_start(&self, signal: StartSignal) {
        let execution_id = signal.execution_id;
        if self.send(CorrelatorMessage::Start(signal)).is_err() {
            warn!(execution_id = %execution_id, "Correlator task stopped; start signal lost");
        }
    }

    async fn on_stop(&self, signal: StopSignal) -> Result<()> {
        let (ack, acknowledged) = oneshot::channel();
        self.send(CorrelatorMessage::Stop { signal, ack })?;
        acknowledged
            .await
            .map_err(|_| Error::internal("Correlator dropped the stop acknowledgement"))
    }
}

/// Task wrapper around an [`EventCorrelator`]
pub struct CorrelatorActor {
    correlator: EventCorrelator,
    clock: Arc<dyn Clock>,
    receiver: mpsc::UnboundedReceiver<CorrelatorMessage>,
}

impl CorrelatorActor {
    pub fn new(correlator: EventCorrelator) -> (Self, CorrelatorHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let clock = Arc::clone(&correlator.clock);
        let actor = Self {
            correlator,
            clock,
            receiver,
        };
        (actor, CorrelatorHandle { sender })
    }

    /// Spawn the actor on the current tokio runtime
    pub fn spawn(correlator: EventCorrelator) -> (CorrelatorHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(correlator);
        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        info!("Event correlator started");

        loop {
            let delay = self
                .correlator
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(self.clock.now()));

            tokio::select! {
                // Due timers run before messages that arrived at the same instant
                biased;
                _ = sleep_for(delay) => self.correlator.on_tick().await,
                message = self.receiver.recv() => match message {
                    Some(CorrelatorMessage::Shutdown) | None => break,
                    Some(message) => self.handle(message).await,
                },
            }
        }

        info!("Event correlator stopped");
    }

    async fn handle(&mut self, message: CorrelatorMessage) {
        match message {
            CorrelatorMessage::Trace(event) => self.correlator.on_trace(event).await,
            CorrelatorMessage::Start(signal) => self.correlator.on_start(signal).await,
            CorrelatorMessage::Stop { signal, ack } => {
                self.correlator.on_stop(signal.execution_id, ack)
            }
            CorrelatorMessage::Snapshot(reply) => {
                let _ = reply.send(self.correlator.snapshot());
            }
            CorrelatorMessage::Shutdown => debug!("Shutdown handled by the run loop"),
        }
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
