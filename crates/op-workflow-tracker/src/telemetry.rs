use op_workflow_core::{ExecutionId, ExecutionStatus, Status};
use tracing::{info, instrument};

/// Execution telemetry through tracing spans
pub struct ExecutionTelemetry {
    /// Service name for tracing
    service_name: String,
}

impl ExecutionTelemetry {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Start execution span
    #[instrument(skip(self), fields(service = %self.service_name))]
    pub fn start_execution_span(&self, execution_id: ExecutionId, prefix: &str) {
        info!("Execution started");
    }

    /// End execution span
    #[instrument(skip(self, status), fields(
        execution_id = %status.execution_id,
        final_status = %status.status,
        service = %self.service_name
    ))]
    pub fn end_execution_span(&self, status: &ExecutionStatus, duration_ms: u64) {
        match status.status {
            Status::Failed => info!(
                duration_ms,
                failure = status.failure_description.as_deref().unwrap_or_default(),
                "Execution failed"
            ),
            _ => info!(duration_ms, "Execution finished"),
        }
    }

    /// Record execution event
    #[instrument(skip(self), fields(service = %self.service_name))]
    pub fn record_event(&self, execution_id: ExecutionId, event_name: &str, details: &str) {
        info!("Recorded execution event");
    }
}
