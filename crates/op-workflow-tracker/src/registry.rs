use op_workflow_core::{
    Error, ExecuteRequest, ExecutionFailure, ExecutionId, ExecutionStatus, Module, Result,
};
use op_workflow_store::PersistenceGateway;
use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::engine::{Engine, EngineExecution};
use crate::metrics::ExecutionMetrics;
use crate::observer::{ObserverCoordinator, StartSignal, StopReport, StopSignal};
use crate::telemetry::ExecutionTelemetry;

/// Registry entry of a running execution
struct ActiveExecution {
    engine: Arc<dyn EngineExecution>,
    status: ExecutionStatus,
    started_at: Instant,
}

#[derive(Debug, Clone)]
enum Settlement {
    Pending,
    /// `None` when the engine never assigned an id, so no observer was involved
    Settled(Option<StopReport>),
}

/// Caller-facing handle of one started workflow execution
#[derive(Clone)]
pub struct WorkflowExecution {
    engine: Arc<dyn EngineExecution>,
    completion: watch::Receiver<Settlement>,
}

impl WorkflowExecution {
    pub async fn execution_id(&self) -> std::result::Result<ExecutionId, ExecutionFailure> {
        self.engine.execution_id().await
    }

    pub async fn root_module(&self) -> std::result::Result<Arc<Module>, ExecutionFailure> {
        self.engine.root_module().await
    }

    pub async fn output(&self, name: &str) -> std::result::Result<Value, ExecutionFailure> {
        self.engine.output(name).await
    }

    pub fn cancel(&self) -> bool {
        self.engine.cancel()
    }

    /// True until the engine finished and every observer settled
    pub fn is_running(&self) -> bool {
        matches!(*self.completion.borrow(), Settlement::Pending)
    }

    /// Wait for the observers to settle, then return the engine's own result.
    pub async fn wait(&self) -> std::result::Result<(), ExecutionFailure> {
        let mut completion = self.completion.clone();
        // A closed channel means the lifecycle task is gone; fall through to the engine
        let _ = completion
            .wait_for(|s| !matches!(s, Settlement::Pending))
            .await;
        self.engine.finished().await
    }

    /// Outcome of the stop broadcast, once settled
    pub fn stop_report(&self) -> Option<StopReport> {
        match &*self.completion.borrow() {
            Settlement::Settled(report) => report.clone(),
            Settlement::Pending => None,
        }
    }
}

/// Authoritative map of running executions
///
/// One lock guards both membership and the stored statuses; everything handed
/// out is a copy taken while holding it.
#[derive(Clone)]
pub struct ExecutionRegistry {
    engine: Arc<dyn Engine>,
    gateway: Arc<dyn PersistenceGateway>,
    coordinator: ObserverCoordinator,
    active: Arc<Mutex<BTreeMap<ExecutionId, ActiveExecution>>>,
    metrics: Arc<ExecutionMetrics>,
    telemetry: Arc<ExecutionTelemetry>,
}

impl ExecutionRegistry {
    pub fn new(
        engine: Arc<dyn Engine>,
        gateway: Arc<dyn PersistenceGateway>,
        coordinator: ObserverCoordinator,
        metrics: Arc<ExecutionMetrics>,
        telemetry: Arc<ExecutionTelemetry>,
    ) -> Self {
        Self {
            engine,
            gateway,
            coordinator,
            active: Arc::new(Mutex::new(BTreeMap::new())),
            metrics,
            telemetry,
        }
    }

    /// Start a workflow execution.
    ///
    /// The execution becomes visible to [`status`](Self::status) once the
    /// engine assigned its id; until then queries answer `NotFound`.
    #[instrument(skip(self, request), fields(prefix = request.prefix.as_deref().unwrap_or_default()))]
    pub fn start(&self, request: &ExecuteRequest) -> Result<WorkflowExecution> {
        request.validate()?;

        let request = request.clone();
        let execution = self.engine.start(&request)?;
        let (settled, completion) = watch::channel(Settlement::Pending);

        let registry = self.clone();
        tokio::spawn(registry.drive(Arc::clone(&execution), request, settled));

        Ok(WorkflowExecution {
            engine: execution,
            completion,
        })
    }

    /// Lifecycle of one execution, from id assignment to observer fan-in
    async fn drive(
        self,
        execution: Arc<dyn EngineExecution>,
        request: ExecuteRequest,
        settled: watch::Sender<Settlement>,
    ) {
        let execution_id = match execution.execution_id().await {
            Ok(id) => id,
            Err(failure) => {
                debug!(error = %failure, "Engine failed before assigning an execution id");
                let _ = settled.send(Settlement::Settled(None));
                return;
            }
        };

        let prefix = request.prefix().to_string();
        {
            let mut active = self.active.lock().await;
            active.insert(
                execution_id,
                ActiveExecution {
                    engine: Arc::clone(&execution),
                    status: ExecutionStatus::running(execution_id, request),
                    started_at: Instant::now(),
                },
            );
        }
        self.metrics.execution_started();
        self.telemetry.start_execution_span(execution_id, &prefix);

        // The root module may never resolve, so it must not hold back the stop
        let mut root = execution.root_module();
        let mut finished = execution.finished();
        let mut announced = false;
        let outcome = loop {
            tokio::select! {
                biased;
                resolved = &mut root, if !announced => {
                    announced = true;
                    self.announce(execution_id, &prefix, resolved);
                }
                outcome = &mut finished => break outcome,
            }
        };
        if !announced {
            match root.now_or_never() {
                Some(resolved) => self.announce(execution_id, &prefix, resolved),
                None => debug!(
                    execution_id = %execution_id,
                    "Execution finished before its root module resolved; no start signal sent"
                ),
            }
        }

        let finalized = self.on_finished(execution_id, outcome.as_ref().err()).await;

        // Start was enqueued above, so observers see it before the stop
        let report = self
            .coordinator
            .broadcast_stop(StopSignal { execution_id })
            .await;

        if let Some(finalized) = finalized {
            let _ = finalized.await;
        }
        let _ = settled.send(Settlement::Settled(Some(report)));
    }

    fn announce(
        &self,
        execution_id: ExecutionId,
        prefix: &str,
        root: std::result::Result<Arc<Module>, ExecutionFailure>,
    ) {
        match root {
            Ok(root) => self
                .coordinator
                .broadcast_start(StartSignal::new(execution_id, root, prefix)),
            Err(failure) => debug!(
                execution_id = %execution_id,
                error = %failure,
                "Root module never resolved; no start signal sent"
            ),
        }
    }

    /// Record the terminal status of `execution_id`, persist it in the
    /// background and forget the execution once persistence settled.
    ///
    /// Returns the background task, or `None` if the id is not active.
    pub async fn on_finished(
        &self,
        execution_id: ExecutionId,
        failure: Option<&ExecutionFailure>,
    ) -> Option<JoinHandle<()>> {
        let status = {
            let mut active = self.active.lock().await;
            let entry = active.get_mut(&execution_id)?;
            let elapsed = entry.started_at.elapsed();
            match failure {
                Some(failure) => {
                    entry.status.mark_failed(failure.summary());
                    self.metrics.execution_failed(elapsed);
                }
                None => {
                    entry.status.mark_successful();
                    self.metrics.execution_succeeded(elapsed);
                }
            }
            self.telemetry
                .end_execution_span(&entry.status, elapsed.as_millis() as u64);
            entry.status.clone()
        };
        info!(execution_id = %execution_id, status = %status.status, "Execution finished");

        let gateway = Arc::clone(&self.gateway);
        let active = Arc::clone(&self.active);
        let metrics = Arc::clone(&self.metrics);
        Some(tokio::spawn(async move {
            if let Err(e) = gateway.persist_status(&status).await {
                warn!(execution_id = %execution_id, error = %e, "Failed to persist final execution status");
            }
            if active.lock().await.remove(&execution_id).is_some() {
                metrics.execution_removed();
            }
        }))
    }

    /// Current status of `execution_id`, from the live map or the store
    pub async fn status(&self, execution_id: ExecutionId) -> Result<ExecutionStatus> {
        {
            let active = self.active.lock().await;
            if let Some(entry) = active.get(&execution_id) {
                return Ok(entry.status.clone());
            }
        }
        Ok(self.gateway.load_status(execution_id).await?)
    }

    /// Ask the engine to cancel `execution_id`. The entry stays until the
    /// engine reports the execution finished.
    #[instrument(skip(self))]
    pub async fn stop(&self, execution_id: ExecutionId) -> Result<()> {
        let active = self.active.lock().await;
        let entry = active.get(&execution_id).ok_or(Error::NotFound(execution_id))?;
        let cancelled = entry.engine.cancel();
        debug!(execution_id = %execution_id, cancelled, "Cancellation requested");
        if cancelled {
            self.telemetry
                .record_event(execution_id, "cancel", "cancellation forwarded to engine");
        }
        Ok(())
    }

    /// Snapshot of every active execution, ordered by id
    pub async fn list_active(&self) -> Vec<ExecutionStatus> {
        let active = self.active.lock().await;
        active.values().map(|entry| entry.status.clone()).collect()
    }

    /// First id the engine should hand out, past everything on record
    pub async fn first_execution_id(&self) -> Result<ExecutionId> {
        Ok(self.gateway.first_execution_id().await?)
    }

    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }
}
