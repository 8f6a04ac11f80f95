//! Event correlator - joins engine trace events with start/stop signals
//!
//! Trace events and start/stop signals travel on independent channels with
//! no ordering between them. A trace event for an execution whose start
//! signal has not arrived yet is queued and joined once the signal shows up,
//! or discarded once it has waited longer than the eviction duration.
//!
//! [`EventCorrelator`] is the state machine. It is driven by exactly one task
//! (see [`CorrelatorActor`]), so it carries no locks; every handler runs to
//! completion before the next message is looked at.

mod actor;
mod persist;

pub use actor::{CorrelatorActor, CorrelatorHandle, CorrelatorMessage};

use op_workflow_core::{Clock, Error, ExecutionId, ExecutionTraceEvent, CLOCK_TICK};
use op_workflow_store::PersistenceGateway;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::metrics::ExecutionMetrics;
use crate::observer::StartSignal;

/// Trace event waiting for its execution's start signal
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Clock reading when the event arrived
    pub arrival: Duration,
    pub event: ExecutionTraceEvent,
}

/// Point-in-time view of the correlator's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelatorSnapshot {
    pub queued: usize,
    pub started: Vec<ExecutionId>,
    pub ended_root: Vec<ExecutionId>,
    pub pending_stop: Vec<ExecutionId>,
}

/// Bounded time-window join of trace events against start/stop signals
pub struct EventCorrelator {
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    eviction_duration: Duration,
    metrics: Option<Arc<ExecutionMetrics>>,

    started: HashMap<ExecutionId, StartSignal>,
    ended_root: HashSet<ExecutionId>,
    pending_stop: HashMap<ExecutionId, oneshot::Sender<()>>,
    queue: VecDeque<QueuedEvent>,

    /// Deadline of the next queue cleaning, if one is armed
    queue_deadline: Option<Duration>,
    /// Fallback removals, earliest first
    removal_deadlines: BinaryHeap<Reverse<(Duration, ExecutionId)>>,
}

impl EventCorrelator {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
        eviction_duration: Duration,
    ) -> Self {
        Self {
            gateway,
            clock,
            eviction_duration,
            metrics: None,
            started: HashMap::new(),
            ended_root: HashSet::new(),
            pending_stop: HashMap::new(),
            queue: VecDeque::new(),
            queue_deadline: None,
            removal_deadlines: BinaryHeap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn eviction_duration(&self) -> Duration {
        self.eviction_duration
    }

    /// Handle one engine trace event.
    pub async fn on_trace(&mut self, event: ExecutionTraceEvent) {
        let execution_id = event.execution_id;
        let root_end = event.is_root_end();

        match self.started.get(&execution_id).cloned() {
            Some(start) => self.persist(&start, &event).await,
            None => {
                debug!(
                    execution_id = %execution_id,
                    event = %event,
                    "Queuing trace event because the execution id is currently unknown"
                );
                self.queue.push_back(QueuedEvent {
                    arrival: self.clock.now(),
                    event,
                });
                if let Some(metrics) = &self.metrics {
                    metrics.trace_event_queued();
                }
                self.schedule_queue_cleaning();
            }
        }

        // Recorded on receipt, even when the event itself had to be queued
        if root_end {
            self.ended_root.insert(execution_id);
            self.try_remove(execution_id);
        }
    }

    /// Handle a start signal. A second signal for the same id replaces the
    /// first one.
    pub async fn on_start(&mut self, signal: StartSignal) {
        self.started.insert(signal.execution_id, signal);
        self.process_queued().await;
    }

    /// Handle a stop signal; `ack` fires once the execution is forgotten.
    pub fn on_stop(&mut self, execution_id: ExecutionId, ack: oneshot::Sender<()>) {
        self.pending_stop.insert(execution_id, ack);
        self.try_remove(execution_id);

        // Armed even if the removal above already happened
        let deadline = self.clock.now() + self.eviction_duration;
        self.removal_deadlines.push(Reverse((deadline, execution_id)));
    }

    /// Run every timer whose deadline has passed.
    pub async fn on_tick(&mut self) {
        let now = self.clock.now();

        if matches!(self.queue_deadline, Some(deadline) if deadline <= now) {
            self.clean_queue();
        }

        while let Some(Reverse((deadline, execution_id))) = self.removal_deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.removal_deadlines.pop();
            self.remove_execution(execution_id);
        }
    }

    /// Earliest armed deadline, on the correlator's clock
    pub fn next_deadline(&self) -> Option<Duration> {
        let removal = self.removal_deadlines.peek().map(|Reverse((d, _))| *d);
        match (self.queue_deadline, removal) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn snapshot(&self) -> CorrelatorSnapshot {
        let sorted = |ids: Vec<ExecutionId>| {
            let mut ids = ids;
            ids.sort();
            ids
        };
        CorrelatorSnapshot {
            queued: self.queue.len(),
            started: sorted(self.started.keys().copied().collect()),
            ended_root: sorted(self.ended_root.iter().copied().collect()),
            pending_stop: sorted(self.pending_stop.keys().copied().collect()),
        }
    }

    fn is_expired(&self, queued: &QueuedEvent, now: Duration) -> bool {
        now.saturating_sub(queued.arrival) > self.eviction_duration
    }

    fn schedule_queue_cleaning(&mut self) {
        if self.queue_deadline.is_none() {
            if let Some(oldest) = self.queue.front() {
                self.queue_deadline = Some(oldest.arrival + self.eviction_duration + CLOCK_TICK);
            }
        }
    }

    fn discard(&self, queued: &QueuedEvent) {
        debug!(
            execution_id = %queued.event.execution_id,
            event = %queued.event,
            eviction_ms = self.eviction_duration.as_millis() as u64,
            "Discarding trace event because no start signal was received in time"
        );
        if let Some(metrics) = &self.metrics {
            metrics.trace_event_evicted();
        }
    }

    /// Persist every queued event that became resolvable and drop expired
    /// ones, for any execution id.
    async fn process_queued(&mut self) {
        self.queue_deadline = None;

        let now = self.clock.now();
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        let mut evicted = Vec::new();
        while let Some(queued) = self.queue.pop_front() {
            if self.is_expired(&queued, now) {
                self.discard(&queued);
                evicted.push(queued.event.execution_id);
                continue;
            }
            match self.started.get(&queued.event.execution_id).cloned() {
                Some(start) => self.persist(&start, &queued.event).await,
                None => remaining.push_back(queued),
            }
        }
        self.queue = remaining;

        self.forget_stale_root_ends(evicted);
        self.schedule_queue_cleaning();
    }

    /// Drop expired events from the front of the queue. The queue is ordered
    /// by arrival, so scanning stops at the first event still in budget.
    fn clean_queue(&mut self) {
        self.queue_deadline = None;

        let now = self.clock.now();
        let mut evicted = Vec::new();
        while let Some(oldest) = self.queue.front() {
            if !self.is_expired(oldest, now) {
                break;
            }
            if let Some(queued) = self.queue.pop_front() {
                self.discard(&queued);
                evicted.push(queued.event.execution_id);
            }
        }

        self.forget_stale_root_ends(evicted);
        self.schedule_queue_cleaning();
    }

    /// Drop the root-End marks of evicted ids nothing refers to anymore, such
    /// as a root End that arrived after the execution was forgotten.
    fn forget_stale_root_ends(&mut self, evicted: Vec<ExecutionId>) {
        for execution_id in evicted {
            let referenced = self.started.contains_key(&execution_id)
                || self.pending_stop.contains_key(&execution_id)
                || self.queue.iter().any(|q| q.event.execution_id == execution_id);
            if !referenced {
                self.ended_root.remove(&execution_id);
            }
        }
    }

    fn try_remove(&mut self, execution_id: ExecutionId) {
        if self.ended_root.contains(&execution_id) && self.pending_stop.contains_key(&execution_id) {
            self.remove_execution(execution_id);
        }
    }

    /// Forget `execution_id`. Calling this for an id that is already gone is
    /// a no-op.
    fn remove_execution(&mut self, execution_id: ExecutionId) {
        let was_started = self.started.remove(&execution_id).is_some();
        self.ended_root.remove(&execution_id);
        if let Some(ack) = self.pending_stop.remove(&execution_id) {
            // The stop requester may have given up already
            let _ = ack.send(());
            debug!(execution_id = %execution_id, was_started, "Forgot execution");
        }
    }

    async fn persist(&self, start: &StartSignal, event: &ExecutionTraceEvent) {
        match persist::persist_event(self.gateway.as_ref(), start, event).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.trace_event_persisted();
                }
            }
            Err(e) => {
                match &e {
                    Error::UnresolvedTracePath { .. } => warn!(
                        execution_id = %event.execution_id,
                        error = %e,
                        "Dropping trace event that does not resolve against the root module"
                    ),
                    _ => warn!(
                        execution_id = %event.execution_id,
                        event = %event,
                        error = %e,
                        "Failed to persist trace event"
                    ),
                }
                if let Some(metrics) = &self.metrics {
                    metrics.trace_event_dropped();
                }
            }
        }
    }
}
