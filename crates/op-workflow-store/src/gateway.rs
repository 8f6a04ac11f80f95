use async_trait::async_trait;
use op_workflow_core::{ExecutionId, ExecutionStatus, ModuleKind};

use crate::error::Result;
use crate::records::{
    ExecutionRecord, FrameErrorRecord, FrameKey, FrameProperties, FrameRecord, Record,
};

/// Durable store for execution records and final statuses.
///
/// The correlator opens one short transaction per trace event, on its own
/// critical path, so implementations should keep `begin`/`commit` cheap.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Open a transaction. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn GatewayTransaction>>;

    async fn persist_status(&self, status: &ExecutionStatus) -> Result<()>;

    /// Fails with `NotFound` if no status was persisted for `id`.
    async fn load_status(&self, id: ExecutionId) -> Result<ExecutionStatus>;

    /// Smallest id greater than every execution id on record (1 when empty).
    async fn first_execution_id(&self) -> Result<ExecutionId>;

    async fn execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>>;

    /// Frames of an execution, ordered by trace path
    async fn frames(&self, id: ExecutionId) -> Result<Vec<FrameRecord>>;

    async fn frame_errors(&self, id: ExecutionId) -> Result<Vec<FrameErrorRecord>>;

    async fn frame_properties(&self, id: ExecutionId) -> Result<Vec<FrameProperties>>;
}

/// One unit of work against a [`PersistenceGateway`]
#[async_trait]
pub trait GatewayTransaction: Send {
    async fn find_or_create_execution(
        &mut self,
        id: ExecutionId,
        key_prefix: &str,
    ) -> Result<ExecutionRecord>;

    async fn find_or_create_frame(
        &mut self,
        key: &FrameKey,
        module_kind: ModuleKind,
    ) -> Result<FrameRecord>;

    /// Insert or replace a record
    async fn persist(&mut self, record: Record) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
