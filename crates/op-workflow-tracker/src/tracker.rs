//! Wiring of registry, observers and correlator

use op_workflow_core::{
    ExecuteRequest, ExecutionId, ExecutionStatus, Result, SystemClock, TrackerConfig,
};
use op_workflow_store::PersistenceGateway;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::correlator::{CorrelatorActor, CorrelatorHandle, EventCorrelator};
use crate::engine::Engine;
use crate::metrics::ExecutionMetrics;
use crate::observer::{ExecutionObserver, ObserverCoordinator};
use crate::registry::{ExecutionRegistry, WorkflowExecution};
use crate::telemetry::ExecutionTelemetry;

const SERVICE_NAME: &str = "op-workflow";

/// A running tracker: the caller-facing registry plus the correlator task
/// that turns the engine's trace stream into persisted records.
pub struct Tracker {
    registry: ExecutionRegistry,
    correlator: CorrelatorHandle,
    correlator_task: JoinHandle<()>,
    metrics: Arc<ExecutionMetrics>,
}

impl Tracker {
    /// Spawn the correlator and build the registry. The correlator is always
    /// the first observer; `extra_observers` follow in order.
    pub fn spawn(
        engine: Arc<dyn Engine>,
        gateway: Arc<dyn PersistenceGateway>,
        config: &TrackerConfig,
        extra_observers: Vec<Arc<dyn ExecutionObserver>>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(
            ExecutionMetrics::new()
                .map_err(|e| op_workflow_core::Error::internal(format!("metrics: {}", e)))?,
        );

        let correlator = EventCorrelator::new(
            Arc::clone(&gateway),
            Arc::new(SystemClock::new()),
            config.eviction_duration,
        )
        .with_metrics(Arc::clone(&metrics));
        let (handle, correlator_task) = CorrelatorActor::spawn(correlator);

        let mut observers: Vec<Arc<dyn ExecutionObserver>> = vec![Arc::new(handle.clone())];
        observers.extend(extra_observers);
        let coordinator = ObserverCoordinator::new(observers, config.observer_ack_timeout)
            .with_metrics(Arc::clone(&metrics));

        let registry = ExecutionRegistry::new(
            engine,
            gateway,
            coordinator,
            Arc::clone(&metrics),
            Arc::new(ExecutionTelemetry::new(SERVICE_NAME)),
        );

        info!(
            eviction_ms = config.eviction_duration.as_millis() as u64,
            observer_timeout_ms = config.observer_ack_timeout.as_millis() as u64,
            "Workflow tracker started"
        );

        Ok(Self {
            registry,
            correlator: handle,
            correlator_task,
            metrics,
        })
    }

    pub fn start(&self, request: &ExecuteRequest) -> Result<WorkflowExecution> {
        self.registry.start(request)
    }

    pub async fn status(&self, execution_id: ExecutionId) -> Result<ExecutionStatus> {
        self.registry.status(execution_id).await
    }

    pub async fn stop(&self, execution_id: ExecutionId) -> Result<()> {
        self.registry.stop(execution_id).await
    }

    pub async fn list_active(&self) -> Vec<ExecutionStatus> {
        self.registry.list_active().await
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Sink for the engine's trace events
    pub fn trace_sink(&self) -> CorrelatorHandle {
        self.correlator.clone()
    }

    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop the correlator after the messages already queued. Executions still
    /// running lose their remaining trace events.
    pub async fn shutdown(self) -> Result<()> {
        self.correlator.shutdown()?;
        self.correlator_task
            .await
            .map_err(|e| op_workflow_core::Error::internal(format!("correlator task: {}", e)))?;
        info!("Workflow tracker stopped");
        Ok(())
    }
}
