//! Start/stop fan-out to execution observers
//!
//! Observers learn when an execution starts (fire-and-forget) and when it
//! stops (acknowledged). The coordinator bounds every acknowledgement by the
//! same timeout and waits for all of them, so one slow observer delays only
//! the aggregate.

use async_trait::async_trait;
use futures::future::join_all;
use op_workflow_core::{ExecutionId, Module, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::ExecutionMetrics;

/// Sent once per execution, after both its id and root module resolved
#[derive(Debug, Clone)]
pub struct StartSignal {
    pub execution_id: ExecutionId,
    pub root: Arc<Module>,
    pub prefix: String,
}

impl StartSignal {
    pub fn new(execution_id: ExecutionId, root: Arc<Module>, prefix: impl Into<String>) -> Self {
        Self {
            execution_id,
            root,
            prefix: prefix.into(),
        }
    }
}

/// Sent once per execution after the engine finished it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSignal {
    pub execution_id: ExecutionId,
}

/// Pluggable sink for execution start/stop notifications
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    /// Name used in logs and stop reports
    fn name(&self) -> &str;

    /// Must not block; no acknowledgement is expected.
    fn on_start(&self, signal: StartSignal);

    /// Resolves once the observer is done with the execution.
    async fn on_stop(&self, signal: StopSignal) -> Result<()>;
}

/// Outcome of one stop fan-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub execution_id: ExecutionId,
    pub acknowledged: Vec<String>,
    pub timed_out: Vec<String>,
    /// Observer name and error message
    pub failed: Vec<(String, String)>,
}

impl StopReport {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            acknowledged: Vec::new(),
            timed_out: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Every observer acknowledged in time
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty()
    }
}

/// Broadcasts start/stop signals to a fixed set of observers
#[derive(Clone)]
pub struct ObserverCoordinator {
    observers: Arc<Vec<Arc<dyn ExecutionObserver>>>,
    ack_timeout: Duration,
    metrics: Option<Arc<ExecutionMetrics>>,
}

impl ObserverCoordinator {
    pub fn new(observers: Vec<Arc<dyn ExecutionObserver>>, ack_timeout: Duration) -> Self {
        Self {
            observers: Arc::new(observers),
            ack_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn observers(&self) -> &[Arc<dyn ExecutionObserver>] {
        &self.observers
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn broadcast_start(&self, signal: StartSignal) {
        debug!(execution_id = %signal.execution_id, observers = self.observers.len(), "Broadcasting start signal");
        for observer in self.observers.iter() {
            observer.on_start(signal.clone());
        }
    }

    /// Ask every observer to acknowledge the stop and wait until each one
    /// acknowledged, failed or timed out.
    pub async fn broadcast_stop(&self, signal: StopSignal) -> StopReport {
        let execution_id = signal.execution_id;
        let ack_timeout = self.ack_timeout;

        let acks = self.observers.iter().map(|observer| async move {
            let outcome = tokio::time::timeout(ack_timeout, observer.on_stop(signal)).await;
            (observer.name().to_string(), outcome)
        });

        let mut report = StopReport::new(execution_id);
        for (name, outcome) in join_all(acks).await {
            match outcome {
                Ok(Ok(())) => report.acknowledged.push(name),
                Ok(Err(e)) => {
                    warn!(execution_id = %execution_id, observer = %name, error = %e, "Observer failed to acknowledge stop");
                    report.failed.push((name, e.to_string()));
                }
                Err(_) => {
                    warn!(
                        execution_id = %execution_id,
                        observer = %name,
                        timeout_ms = ack_timeout.as_millis() as u64,
                        "Observer did not acknowledge stop in time"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.observer_ack_timed_out();
                    }
                    report.timed_out.push(name);
                }
            }
        }
        report
    }
}
