//! OP Workflow Tracker - execution lifecycle tracking for an external engine
//!
//! Provides:
//! - A registry of running executions with copy-out status queries
//! - Start/stop fan-out to observers with bounded acknowledgement waits
//! - Correlation of the engine's trace stream with start/stop signals
//! - Execution metrics and telemetry

pub mod correlator;
pub mod engine;
pub mod metrics;
pub mod observer;
pub mod registry;
pub mod telemetry;
pub mod tracker;

pub use correlator::{
    CorrelatorActor, CorrelatorHandle, CorrelatorMessage, CorrelatorSnapshot, EventCorrelator,
    QueuedEvent,
};
pub use engine::{Engine, EngineExecution};
pub use metrics::ExecutionMetrics;
pub use observer::{ExecutionObserver, ObserverCoordinator, StartSignal, StopReport, StopSignal};
pub use registry::{ExecutionRegistry, WorkflowExecution};
pub use telemetry::ExecutionTelemetry;
pub use tracker::Tracker;
