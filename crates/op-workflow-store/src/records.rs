//! Persisted record types
//!
//! Records are keyed by execution id and, below the execution, by trace path.

use chrono::{DateTime, Utc};
use op_workflow_core::{ExecutionId, ModuleKind, TracePath};
use serde::{Deserialize, Serialize};

/// Convert an engine timestamp (epoch milliseconds) into a UTC time
pub fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// One execution, as seen through its root frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub key_prefix: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(id: ExecutionId, key_prefix: impl Into<String>) -> Self {
        Self {
            id,
            key_prefix: key_prefix.into(),
            start_time: None,
            finish_time: None,
        }
    }
}

/// Identity of a frame: an execution plus a trace path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameKey {
    pub execution_id: ExecutionId,
    pub path: TracePath,
}

impl FrameKey {
    pub fn new(execution_id: ExecutionId, path: impl Into<TracePath>) -> Self {
        Self {
            execution_id,
            path: path.into(),
        }
    }
}

/// Lifecycle of one node of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub key: FrameKey,
    pub module_kind: ModuleKind,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub successful: Option<bool>,
}

impl FrameRecord {
    pub fn new(key: FrameKey, module_kind: ModuleKind) -> Self {
        Self {
            key,
            module_kind,
            start_time: None,
            finish_time: None,
            successful: None,
        }
    }
}

/// Failure recorded for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameErrorRecord {
    pub key: FrameKey,
    pub error_message: String,
}

/// Timings and identifiers of a launched worker process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessProperties {
    pub command_line: Option<String>,
    pub exit_status: Option<i32>,
    pub launcher_start_time: Option<DateTime<Utc>>,
    pub launcher_finish_time: Option<DateTime<Utc>>,
    pub module_start_time: Option<DateTime<Utc>>,
    pub module_finish_time: Option<DateTime<Utc>>,
}

/// Producer-specific part of [`FrameProperties`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "launcher", rename_all = "snake_case")]
pub enum LauncherProperties {
    Drmaa {
        job_id: Option<String>,
        native_arguments: Option<String>,
        process: ProcessProperties,
    },
    Simple {
        process: ProcessProperties,
    },
    Unknown,
}

impl LauncherProperties {
    pub fn label(&self) -> &'static str {
        match self {
            LauncherProperties::Drmaa { .. } => "drmaa",
            LauncherProperties::Simple { .. } => "simple",
            LauncherProperties::Unknown => "unknown",
        }
    }
}

/// Executor details of a finished simple module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameProperties {
    pub key: FrameKey,
    pub worker_name: String,
    pub worker_start_time: Option<DateTime<Utc>>,
    pub worker_finish_time: Option<DateTime<Utc>>,
    pub launcher: LauncherProperties,
}

/// Anything a transaction can persist
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Execution(ExecutionRecord),
    Frame(FrameRecord),
    FrameError(FrameErrorRecord),
    FrameProperties(FrameProperties),
}

impl Record {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Record::Execution(r) => r.id,
            Record::Frame(r) => r.key.execution_id,
            Record::FrameError(r) => r.key.execution_id,
            Record::FrameProperties(r) => r.key.execution_id,
        }
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Record::Execution(_) => "execution",
            Record::Frame(_) => "frame",
            Record::FrameError(_) => "frame_error",
            Record::FrameProperties(_) => "frame_properties",
        }
    }
}

impl From<ExecutionRecord> for Record {
    fn from(r: ExecutionRecord) -> Self {
        Record::Execution(r)
    }
}

impl From<FrameRecord> for Record {
    fn from(r: FrameRecord) -> Self {
        Record::Frame(r)
    }
}

impl From<FrameErrorRecord> for Record {
    fn from(r: FrameErrorRecord) -> Self {
        Record::FrameError(r)
    }
}

impl From<FrameProperties> for Record {
    fn from(r: FrameProperties) -> Self {
        Record::FrameProperties(r)
    }
}
