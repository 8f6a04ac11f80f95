//! Test doubles shared by the tracker integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use op_workflow_core::{
    ExecuteRequest, ExecutionFailure, ExecutionId, ExecutionStatus, Module, Result,
};
use op_workflow_store::{
    ExecutionRecord, FrameErrorRecord, FrameProperties, FrameRecord, GatewayTransaction,
    MemoryStore, PersistenceGateway, StateStoreError,
};
use op_workflow_tracker::{ExecutionObserver, StartSignal, StopSignal};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::oneshot;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn request(prefix: &str) -> ExecuteRequest {
    ExecuteRequest::new(json!({"name": "fib", "modules": ["loop", "sum"]}), prefix)
}

type Fact<T> = Shared<BoxFuture<'static, std::result::Result<T, ExecutionFailure>>>;
type Resolver<T> = Mutex<Option<oneshot::Sender<std::result::Result<T, ExecutionFailure>>>>;

fn fact<T>() -> (Resolver<T>, Fact<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    let fact = async move {
        rx.await
            .unwrap_or_else(|_| Err(ExecutionFailure::msg("engine execution dropped")))
    }
    .boxed()
    .shared();
    (Mutex::new(Some(tx)), fact)
}

fn resolve<T>(resolver: &Resolver<T>, value: std::result::Result<T, ExecutionFailure>) -> bool {
    match resolver.lock().unwrap().take() {
        Some(tx) => tx.send(value).is_ok(),
        None => false,
    }
}

/// Engine execution whose facts the test resolves by hand
pub struct FakeExecution {
    pub request: ExecuteRequest,
    id_tx: Resolver<ExecutionId>,
    id: Fact<ExecutionId>,
    root_tx: Resolver<Arc<Module>>,
    root: Fact<Arc<Module>>,
    finished_tx: Resolver<()>,
    finished: Fact<()>,
    outputs: Mutex<HashMap<String, Value>>,
    cancelled: AtomicBool,
}

impl FakeExecution {
    fn new(request: ExecuteRequest) -> Self {
        let (id_tx, id) = fact();
        let (root_tx, root) = fact();
        let (finished_tx, finished) = fact();
        Self {
            request,
            id_tx,
            id,
            root_tx,
            root,
            finished_tx,
            finished,
            outputs: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn assign_id(&self, id: u64) {
        resolve(&self.id_tx, Ok(ExecutionId(id)));
    }

    pub fn fail_before_id(&self, message: &'static str) {
        resolve(&self.id_tx, Err(ExecutionFailure::msg(message)));
    }

    pub fn link(&self, root: Module) {
        resolve(&self.root_tx, Ok(Arc::new(root)));
    }

    pub fn set_output(&self, name: &str, value: Value) {
        self.outputs.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn succeed(&self) {
        resolve(&self.finished_tx, Ok(()));
    }

    pub fn fail(&self, failure: ExecutionFailure) {
        resolve(&self.finished_tx, Err(failure));
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl op_workflow_tracker::EngineExecution for FakeExecution {
    async fn execution_id(&self) -> std::result::Result<ExecutionId, ExecutionFailure> {
        self.id.clone().await
    }

    async fn root_module(&self) -> std::result::Result<Arc<Module>, ExecutionFailure> {
        self.root.clone().await
    }

    async fn output(&self, name: &str) -> std::result::Result<Value, ExecutionFailure> {
        let _ = self.finished.clone().await;
        self.outputs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionFailure::msg(format!("no output named {}", name)))
    }

    async fn finished(&self) -> std::result::Result<(), ExecutionFailure> {
        self.finished.clone().await
    }

    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        resolve(&self.finished_tx, Err(ExecutionFailure::msg("execution cancelled")))
    }
}

/// Engine handing out [`FakeExecution`]s in start order
#[derive(Default)]
pub struct FakeEngine {
    started: Mutex<Vec<Arc<FakeExecution>>>,
    calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn execution(&self, index: usize) -> Arc<FakeExecution> {
        Arc::clone(&self.started.lock().unwrap()[index])
    }
}

impl op_workflow_tracker::Engine for FakeEngine {
    fn start(
        &self,
        request: &ExecuteRequest,
    ) -> Result<Arc<dyn op_workflow_tracker::EngineExecution>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let execution = Arc::new(FakeExecution::new(request.clone()));
        self.started.lock().unwrap().push(Arc::clone(&execution));
        Ok(execution)
    }
}

/// Observer that records signals and acknowledges at once
#[derive(Default)]
pub struct RecordingObserver {
    pub starts: Mutex<Vec<(ExecutionId, String)>>,
    pub stops: Mutex<Vec<ExecutionId>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> Vec<(ExecutionId, String)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<ExecutionId> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionObserver for RecordingObserver {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_start(&self, signal: StartSignal) {
        self.starts
            .lock()
            .unwrap()
            .push((signal.execution_id, signal.prefix));
    }

    async fn on_stop(&self, signal: StopSignal) -> Result<()> {
        self.stops.lock().unwrap().push(signal.execution_id);
        Ok(())
    }
}

/// Observer that never acknowledges a stop
pub struct SilentObserver;

#[async_trait]
impl ExecutionObserver for SilentObserver {
    fn name(&self) -> &str {
        "silent"
    }

    fn on_start(&self, _signal: StartSignal) {}

    async fn on_stop(&self, _signal: StopSignal) -> Result<()> {
        std::future::pending().await
    }
}

/// Gateway whose final-status writes always fail
pub struct FailingStatusGateway {
    inner: MemoryStore,
    pub attempts: AtomicUsize,
}

impl FailingStatusGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PersistenceGateway for FailingStatusGateway {
    async fn begin(&self) -> std::result::Result<Box<dyn GatewayTransaction>, StateStoreError> {
        self.inner.begin().await
    }

    async fn persist_status(
        &self,
        _status: &ExecutionStatus,
    ) -> std::result::Result<(), StateStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StateStoreError::Transaction("disk unavailable".into()))
    }

    async fn load_status(
        &self,
        id: ExecutionId,
    ) -> std::result::Result<ExecutionStatus, StateStoreError> {
        self.inner.load_status(id).await
    }

    async fn first_execution_id(&self) -> std::result::Result<ExecutionId, StateStoreError> {
        self.inner.first_execution_id().await
    }

    async fn execution(
        &self,
        id: ExecutionId,
    ) -> std::result::Result<Option<ExecutionRecord>, StateStoreError> {
        self.inner.execution(id).await
    }

    async fn frames(&self, id: ExecutionId) -> std::result::Result<Vec<FrameRecord>, StateStoreError> {
        self.inner.frames(id).await
    }

    async fn frame_errors(
        &self,
        id: ExecutionId,
    ) -> std::result::Result<Vec<FrameErrorRecord>, StateStoreError> {
        self.inner.frame_errors(id).await
    }

    async fn frame_properties(
        &self,
        id: ExecutionId,
    ) -> std::result::Result<Vec<FrameProperties>, StateStoreError> {
        self.inner.frame_properties(id).await
    }
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
