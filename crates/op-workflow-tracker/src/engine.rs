//! Interpretation engine collaborator
//!
//! The tracker never interprets workflows itself. It asks an [`Engine`] to
//! start one and then follows the resulting [`EngineExecution`], whose facts
//! (id, root module, outputs, terminal result) resolve independently.

use async_trait::async_trait;
use op_workflow_core::{ExecuteRequest, ExecutionFailure, ExecutionId, Module, Result};
use serde_json::Value;
use std::sync::Arc;

/// Starts workflow executions
pub trait Engine: Send + Sync {
    /// Create an execution for a validated request. Errors here mean the
    /// engine refused the request outright.
    fn start(&self, request: &ExecuteRequest) -> Result<Arc<dyn EngineExecution>>;
}

/// One running execution as seen by the engine
///
/// Every method may be awaited any number of times, from any task.
#[async_trait]
pub trait EngineExecution: Send + Sync {
    async fn execution_id(&self) -> std::result::Result<ExecutionId, ExecutionFailure>;

    /// Linked structure used to resolve trace paths
    async fn root_module(&self) -> std::result::Result<Arc<Module>, ExecutionFailure>;

    async fn output(&self, name: &str) -> std::result::Result<Value, ExecutionFailure>;

    /// Terminal result of the execution
    async fn finished(&self) -> std::result::Result<(), ExecutionFailure>;

    /// Request cancellation. Idempotent; returns whether this call had an effect.
    fn cancel(&self) -> bool;
}
