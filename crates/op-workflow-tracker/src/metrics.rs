use prometheus::proto::MetricType;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Duration;

/// Execution and correlation metrics collector
#[derive(Clone)]
pub struct ExecutionMetrics {
    /// Total executions started
    executions_started: IntCounter,

    /// Currently active executions
    active_executions: IntGauge,

    /// Executions completed successfully
    executions_succeeded: IntCounter,

    /// Executions failed
    executions_failed: IntCounter,

    /// Execution duration histogram
    execution_duration: Histogram,

    /// Trace events written through the persistence gateway
    trace_events_persisted: IntCounter,

    /// Trace events that arrived before their start signal
    trace_events_queued: IntCounter,

    /// Queued trace events discarded after the eviction window
    trace_events_evicted: IntCounter,

    /// Trace events dropped on persistence or resolution failure
    trace_events_dropped: IntCounter,

    /// Stop acknowledgements that did not arrive in time
    observer_ack_timeouts: IntCounter,

    registry: Registry,
}

impl ExecutionMetrics {
    /// Create new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let executions_started = IntCounter::new(
            "op_workflow_executions_started_total",
            "Total number of executions started",
        )?;
        registry.register(Box::new(executions_started.clone()))?;

        let active_executions = IntGauge::new(
            "op_workflow_active_executions",
            "Number of currently active executions",
        )?;
        registry.register(Box::new(active_executions.clone()))?;

        let executions_succeeded = IntCounter::new(
            "op_workflow_executions_succeeded_total",
            "Total number of successfully completed executions",
        )?;
        registry.register(Box::new(executions_succeeded.clone()))?;

        let executions_failed = IntCounter::new(
            "op_workflow_executions_failed_total",
            "Total number of failed executions",
        )?;
        registry.register(Box::new(executions_failed.clone()))?;

        let execution_duration = Histogram::with_opts(
            HistogramOpts::new(
                "op_workflow_execution_duration_seconds",
                "Execution duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
        )?;
        registry.register(Box::new(execution_duration.clone()))?;

        let trace_events_persisted = IntCounter::new(
            "op_workflow_trace_events_persisted_total",
            "Trace events persisted by the correlator",
        )?;
        registry.register(Box::new(trace_events_persisted.clone()))?;

        let trace_events_queued = IntCounter::new(
            "op_workflow_trace_events_queued_total",
            "Trace events queued because their execution was not yet started",
        )?;
        registry.register(Box::new(trace_events_queued.clone()))?;

        let trace_events_evicted = IntCounter::new(
            "op_workflow_trace_events_evicted_total",
            "Queued trace events discarded after the eviction window",
        )?;
        registry.register(Box::new(trace_events_evicted.clone()))?;

        let trace_events_dropped = IntCounter::new(
            "op_workflow_trace_events_dropped_total",
            "Trace events that could not be resolved or persisted",
        )?;
        registry.register(Box::new(trace_events_dropped.clone()))?;

        let observer_ack_timeouts = IntCounter::new(
            "op_workflow_observer_ack_timeouts_total",
            "Stop acknowledgements that timed out",
        )?;
        registry.register(Box::new(observer_ack_timeouts.clone()))?;

        Ok(Self {
            executions_started,
            active_executions,
            executions_succeeded,
            executions_failed,
            execution_duration,
            trace_events_persisted,
            trace_events_queued,
            trace_events_evicted,
            trace_events_dropped,
            observer_ack_timeouts,
            registry,
        })
    }

    pub fn execution_started(&self) {
        self.executions_started.inc();
        self.active_executions.inc();
    }

    pub fn execution_succeeded(&self, duration: Duration) {
        self.executions_succeeded.inc();
        self.execution_duration.observe(duration.as_secs_f64());
    }

    pub fn execution_failed(&self, duration: Duration) {
        self.executions_failed.inc();
        self.execution_duration.observe(duration.as_secs_f64());
    }

    /// The execution left the active map
    pub fn execution_removed(&self) {
        self.active_executions.dec();
    }

    pub fn trace_event_persisted(&self) {
        self.trace_events_persisted.inc();
    }

    pub fn trace_event_queued(&self) {
        self.trace_events_queued.inc();
    }

    pub fn trace_event_evicted(&self) {
        self.trace_events_evicted.inc();
    }

    pub fn trace_event_dropped(&self) {
        self.trace_events_dropped.inc();
    }

    pub fn observer_ack_timed_out(&self) {
        self.observer_ack_timeouts.inc();
    }

    pub fn executions_started_total(&self) -> u64 {
        self.executions_started.get()
    }

    pub fn active(&self) -> i64 {
        self.active_executions.get()
    }

    pub fn trace_events_persisted_total(&self) -> u64 {
        self.trace_events_persisted.get()
    }

    pub fn trace_events_evicted_total(&self) -> u64 {
        self.trace_events_evicted.get()
    }

    pub fn observer_ack_timeouts_total(&self) -> u64 {
        self.observer_ack_timeouts.get()
    }

    /// Get metrics registry for scraping
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metric names with their current value (histograms report sample count)
    pub fn gather_json(&self) -> serde_json::Value {
        let mut metrics = Vec::new();

        for family in self.registry.gather() {
            let value: f64 = family
                .get_metric()
                .iter()
                .map(|m| match family.get_field_type() {
                    MetricType::COUNTER => m.get_counter().get_value(),
                    MetricType::GAUGE => m.get_gauge().get_value(),
                    MetricType::HISTOGRAM => m.get_histogram().get_sample_count() as f64,
                    _ => 0.0,
                })
                .sum();
            metrics.push(serde_json::json!({
                "name": family.get_name(),
                "help": family.get_help(),
                "value": value,
            }));
        }

        serde_json::json!({ "metrics": metrics })
    }
}
