//! OP Workflow Store - Persistence gateway for execution records
//!
//! Stores what the correlator learns about each execution:
//! execution → frames (one per trace path) → frame errors / executor properties,
//! plus the final status of each execution.
//!
//! Features:
//! - Transaction-scoped find-or-create / persist contract
//! - In-memory store (tests, no-status-keeping mode)
//! - SQLite persistent storage
//! - Prometheus metrics

pub mod error;
pub mod gateway;
pub mod memory_store;
pub mod metrics;
pub mod records;
pub mod sqlite_store;

pub use error::StateStoreError;
pub use gateway::{GatewayTransaction, PersistenceGateway};
pub use memory_store::MemoryStore;
pub use records::{
    ExecutionRecord, FrameErrorRecord, FrameKey, FrameProperties, FrameRecord, LauncherProperties,
    ProcessProperties, Record,
};
pub use sqlite_store::SqliteStore;
