//! Core types and utilities for op-workflow
//!
//! # Modules
//!
//! - `clock`: Injectable monotonic time sources
//! - `config`: Environment loading and tracker configuration
//! - `error`: Error types and Result alias
//! - `module`: Module trees and trace-path resolution
//! - `trace`: Execution trace events and executor results
//! - `types`: Execution ids, statuses and requests

pub mod clock;
pub mod config;
pub mod error;
pub mod module;
pub mod trace;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock, CLOCK_TICK};
pub use config::TrackerConfig;
pub use error::{Error, ExecutionFailure, Result};
pub use module::{Module, ModuleKind};
pub use trace::{ExecutionTraceEvent, ExecutorResult, ProducerKind, TraceEventKind, TracePath};
pub use types::*;
