//! In-memory persistence gateway
//!
//! Backs the tracker in tests and in deployments that do not keep execution
//! statuses. Transactions stage their writes privately and apply them in one
//! step on commit.

use async_trait::async_trait;
use op_workflow_core::{ExecutionId, ExecutionStatus, ModuleKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StateStoreError};
use crate::gateway::{GatewayTransaction, PersistenceGateway};
use crate::metrics::{self, OperationTimer};
use crate::records::{
    ExecutionRecord, FrameErrorRecord, FrameKey, FrameProperties, FrameRecord, Record,
};

const STORE_TYPE: &str = "memory";

#[derive(Debug, Default)]
struct Tables {
    executions: BTreeMap<ExecutionId, ExecutionRecord>,
    frames: BTreeMap<FrameKey, FrameRecord>,
    frame_errors: BTreeMap<FrameKey, FrameErrorRecord>,
    frame_properties: BTreeMap<FrameKey, FrameProperties>,
}

impl Tables {
    fn apply(&mut self, record: Record) {
        match record {
            Record::Execution(r) => {
                self.executions.insert(r.id, r);
            }
            Record::Frame(r) => {
                self.frames.insert(r.key.clone(), r);
            }
            Record::FrameError(r) => {
                self.frame_errors.insert(r.key.clone(), r);
            }
            Record::FrameProperties(r) => {
                self.frame_properties.insert(r.key.clone(), r);
            }
        }
    }

    fn merge(&mut self, staged: Tables) {
        self.executions.extend(staged.executions);
        self.frames.extend(staged.frames);
        self.frame_errors.extend(staged.frame_errors);
        self.frame_properties.extend(staged.frame_properties);
    }
}

fn of_execution<V: Clone>(map: &BTreeMap<FrameKey, V>, id: ExecutionId) -> Vec<V> {
    map.iter()
        .filter(|(k, _)| k.execution_id == id)
        .map(|(_, v)| v.clone())
        .collect()
}

/// Gateway keeping everything in process memory
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    statuses: Arc<Mutex<HashMap<ExecutionId, ExecutionStatus>>>,
    keep_statuses: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        metrics::register_metrics();
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            keep_statuses: true,
        }
    }

    /// With `false`, persisted statuses are discarded and every
    /// `load_status` answers `NotFound`.
    pub fn with_status_keeping(mut self, keep_statuses: bool) -> Self {
        self.keep_statuses = keep_statuses;
        self
    }

    pub async fn execution_count(&self) -> usize {
        self.tables.lock().await.executions.len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn GatewayTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            staged: Tables::default(),
        }))
    }

    async fn persist_status(&self, status: &ExecutionStatus) -> Result<()> {
        if !self.keep_statuses {
            return Ok(());
        }
        let _timer = OperationTimer::new("persist_status", STORE_TYPE);
        self.statuses
            .lock()
            .await
            .insert(status.execution_id, status.clone());
        debug!(execution_id = %status.execution_id, status = %status.status, "Stored execution status");
        Ok(())
    }

    async fn load_status(&self, id: ExecutionId) -> Result<ExecutionStatus> {
        self.statuses
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StateStoreError::NotFound(id))
    }

    async fn first_execution_id(&self) -> Result<ExecutionId> {
        let tables = self.tables.lock().await;
        let statuses = self.statuses.lock().await;
        let max = tables
            .executions
            .keys()
            .chain(statuses.keys())
            .max()
            .copied();
        match max {
            None => Ok(ExecutionId(1)),
            Some(max) => max
                .next()
                .ok_or_else(|| StateStoreError::Corrupt(format!("no execution id after {}", max))),
        }
    }

    async fn execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>> {
        Ok(self.tables.lock().await.executions.get(&id).cloned())
    }

    async fn frames(&self, id: ExecutionId) -> Result<Vec<FrameRecord>> {
        Ok(of_execution(&self.tables.lock().await.frames, id))
    }

    async fn frame_errors(&self, id: ExecutionId) -> Result<Vec<FrameErrorRecord>> {
        Ok(of_execution(&self.tables.lock().await.frame_errors, id))
    }

    async fn frame_properties(&self, id: ExecutionId) -> Result<Vec<FrameProperties>> {
        Ok(of_execution(&self.tables.lock().await.frame_properties, id))
    }
}

struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    staged: Tables,
}

#[async_trait]
impl GatewayTransaction for MemoryTransaction {
    async fn find_or_create_execution(
        &mut self,
        id: ExecutionId,
        key_prefix: &str,
    ) -> Result<ExecutionRecord> {
        if let Some(record) = self.staged.executions.get(&id) {
            return Ok(record.clone());
        }
        if let Some(record) = self.tables.lock().await.executions.get(&id) {
            return Ok(record.clone());
        }
        let record = ExecutionRecord::new(id, key_prefix);
        self.staged.executions.insert(id, record.clone());
        Ok(record)
    }

    async fn find_or_create_frame(
        &mut self,
        key: &FrameKey,
        module_kind: ModuleKind,
    ) -> Result<FrameRecord> {
        if let Some(record) = self.staged.frames.get(key) {
            return Ok(record.clone());
        }
        if let Some(record) = self.tables.lock().await.frames.get(key) {
            return Ok(record.clone());
        }
        let record = FrameRecord::new(key.clone(), module_kind);
        self.staged.frames.insert(key.clone(), record.clone());
        Ok(record)
    }

    async fn persist(&mut self, record: Record) -> Result<()> {
        metrics::record_written(record.label(), STORE_TYPE);
        self.staged.apply(record);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let _timer = OperationTimer::new("commit", STORE_TYPE);
        let MemoryTransaction { tables, staged } = *self;
        tables.lock().await.merge(staged);
        Ok(())
    }
}
