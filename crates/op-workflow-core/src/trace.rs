//! Execution trace events and executor results
//!
//! Trace events are emitted by the engine, possibly from another process, so
//! they carry only ids, paths and plain data; never references to the
//! execution's linked structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, ExecutionFailure, Result};
use crate::types::ExecutionId;

/// Hierarchical name of a node in an execution; the root is the empty path
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TracePath(String);

impl TracePath {
    pub fn new(path: impl Into<String>) -> Self {
        TracePath(path.into())
    }

    pub fn root() -> Self {
        TracePath(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments below the root. Non-root paths must start with `/`.
    pub fn segments(&self) -> Result<Vec<&str>> {
        if self.is_root() {
            return Ok(Vec::new());
        }
        let rest = self
            .0
            .strip_prefix('/')
            .ok_or_else(|| Error::unresolved_path(self.as_str(), "path must start with '/'"))?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::unresolved_path(self.as_str(), "empty path segment"));
        }
        Ok(segments)
    }
}

impl fmt::Display for TracePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TracePath {
    fn from(path: &str) -> Self {
        TracePath::new(path)
    }
}

/// What happened to the node named by an event's path
#[derive(Debug, Clone)]
pub enum TraceEventKind {
    Begin,
    End {
        successful: bool,
        result: Option<ExecutorResult>,
    },
    Failed {
        error: ExecutionFailure,
    },
}

/// Per-node lifecycle event emitted by the engine
#[derive(Debug, Clone)]
pub struct ExecutionTraceEvent {
    pub execution_id: ExecutionId,
    pub path: TracePath,
    /// Engine wall-clock time in milliseconds since the Unix epoch
    pub timestamp_millis: i64,
    pub kind: TraceEventKind,
}

impl ExecutionTraceEvent {
    pub fn begin(execution_id: ExecutionId, timestamp_millis: i64, path: impl Into<TracePath>) -> Self {
        Self {
            execution_id,
            path: path.into(),
            timestamp_millis,
            kind: TraceEventKind::Begin,
        }
    }

    pub fn end(
        execution_id: ExecutionId,
        timestamp_millis: i64,
        path: impl Into<TracePath>,
        successful: bool,
    ) -> Self {
        Self {
            execution_id,
            path: path.into(),
            timestamp_millis,
            kind: TraceEventKind::End {
                successful,
                result: None,
            },
        }
    }

    /// End of a simple module, carrying the executor's structured result
    pub fn end_with_result(
        execution_id: ExecutionId,
        timestamp_millis: i64,
        path: impl Into<TracePath>,
        result: ExecutorResult,
    ) -> Self {
        Self {
            execution_id,
            path: path.into(),
            timestamp_millis,
            kind: TraceEventKind::End {
                successful: result.is_successful(),
                result: Some(result),
            },
        }
    }

    pub fn failed(
        execution_id: ExecutionId,
        timestamp_millis: i64,
        path: impl Into<TracePath>,
        error: ExecutionFailure,
    ) -> Self {
        Self {
            execution_id,
            path: path.into(),
            timestamp_millis,
            kind: TraceEventKind::Failed { error },
        }
    }

    pub fn is_root_end(&self) -> bool {
        self.path.is_root() && matches!(self.kind, TraceEventKind::End { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TraceEventKind::Begin => "begin",
            TraceEventKind::End { .. } => "end",
            TraceEventKind::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ExecutionTraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(execution {}, path '{}', t={})",
            self.kind_name(),
            self.execution_id,
            self.path,
            self.timestamp_millis
        )
    }
}

/// DRMAA cluster executor
pub const DRMAA_EXECUTOR: &str = "drmaa-executor";
/// Executor forking one local process per module
pub const FORKING_EXECUTOR: &str = "forking-executor";
/// Launcher of the forked worker process, nested under the producer
pub const FORKED_LAUNCHER: &str = "forked-launcher";
/// In-process executor running the module body, nested under the launcher
pub const LOCAL_EXECUTOR: &str = "local-executor";

pub const SUBMISSION_TIME_MILLIS: &str = "submission_time_millis";
pub const COMPLETION_TIME_MILLIS: &str = "completion_time_millis";
pub const PROCESSING_START_TIME_MILLIS: &str = "processing_start_time_millis";
pub const PROCESSING_FINISH_TIME_MILLIS: &str = "processing_finish_time_millis";
pub const JOB_ID: &str = "job_id";
pub const NATIVE_ARGUMENTS: &str = "native_arguments";
pub const COMMAND_LINE: &str = "command_line";
pub const EXIT_VALUE: &str = "exit_value";

/// Structured result reported by the executor of a simple module
///
/// Executors may delegate, so a result nests the results of the executors it
/// used; property lookups are keyed by executor name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub executor_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub nested: Vec<ExecutorResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutorResult {
    pub fn new(executor_name: impl Into<String>) -> Self {
        Self {
            executor_name: executor_name.into(),
            properties: BTreeMap::new(),
            nested: Vec::new(),
            error: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_nested(mut self, nested: ExecutorResult) -> Self {
        self.nested.push(nested);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }

    /// Find the result produced by `executor`, searching depth-first.
    pub fn find(&self, executor: &str) -> Option<&ExecutorResult> {
        if self.executor_name == executor {
            return Some(self);
        }
        self.nested.iter().find_map(|n| n.find(executor))
    }

    pub fn property(&self, executor: &str, key: &str) -> Option<&Value> {
        self.find(executor).and_then(|r| r.properties.get(key))
    }

    pub fn property_str(&self, executor: &str, key: &str) -> Option<String> {
        self.property(executor, key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn property_i64(&self, executor: &str, key: &str) -> Option<i64> {
        self.property(executor, key).and_then(Value::as_i64)
    }
}

/// Which executor produced a result, decided once from its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerKind {
    Drmaa,
    Forking,
    Unknown(String),
}

impl ProducerKind {
    pub fn of(result: &ExecutorResult) -> Self {
        match result.executor_name.as_str() {
            DRMAA_EXECUTOR => ProducerKind::Drmaa,
            FORKING_EXECUTOR => ProducerKind::Forking,
            other => ProducerKind::Unknown(other.to_string()),
        }
    }
}
