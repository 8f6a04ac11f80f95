//! Execution ids, statuses and requests

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Process-unique id assigned to an execution by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub u64);

impl ExecutionId {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Following id, or `None` once the id space is exhausted
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(ExecutionId)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ExecutionId {
    fn from(id: u64) -> Self {
        ExecutionId(id)
    }
}

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// The engine accepted the request and assigned an execution id
    Running,

    /// The execution finished successfully
    Successful,

    /// The execution finished with an error
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => write!(f, "RUNNING"),
            Status::Successful => write!(f, "SUCCESSFUL"),
            Status::Failed => write!(f, "FAILED"),
        }
    }
}

/// Request to run a workflow
///
/// `module` and `prefix` are optional only so that incomplete requests can be
/// represented and rejected by [`ExecuteRequest::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Workflow definition, opaque to the tracker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<serde_json::Value>,

    /// Bundles the engine should link against
    #[serde(default)]
    pub bundle_identifiers: Vec<String>,

    /// Engine-specific overrides, opaque to the tracker
    #[serde(default)]
    pub overrides: Vec<serde_json::Value>,

    /// Staging-area prefix; also recorded as the execution's key prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Remove intermediate results as soon as they are no longer needed
    #[serde(default = "default_cleaning_requested")]
    pub cleaning_requested: bool,
}

fn default_cleaning_requested() -> bool {
    true
}

impl Default for ExecuteRequest {
    fn default() -> Self {
        Self {
            module: None,
            bundle_identifiers: Vec::new(),
            overrides: Vec::new(),
            prefix: None,
            cleaning_requested: true,
        }
    }
}

impl ExecuteRequest {
    pub fn new(module: serde_json::Value, prefix: impl Into<String>) -> Self {
        Self {
            module: Some(module),
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn with_bundle_identifiers(mut self, bundles: Vec<String>) -> Self {
        self.bundle_identifiers = bundles;
        self
    }

    /// Reject requests lacking a module or a prefix.
    pub fn validate(&self) -> Result<()> {
        if self.module.is_none() || self.prefix.is_none() {
            return Err(Error::invalid_argument(
                "Invalid request is lacking prefix or module.",
            ));
        }
        Ok(())
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or_default()
    }
}

/// Status of an execution as handed to callers
///
/// Values of this type are always copies; mutating one never affects the
/// registry or the store it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: ExecutionId,
    pub request: ExecuteRequest,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_description: Option<String>,
}

impl ExecutionStatus {
    /// Status of a freshly started execution
    pub fn running(execution_id: ExecutionId, request: ExecuteRequest) -> Self {
        Self {
            execution_id,
            request,
            status: Status::Running,
            failure_description: None,
        }
    }

    pub fn mark_successful(&mut self) {
        self.status = Status::Successful;
        self.failure_description = None;
    }

    pub fn mark_failed(&mut self, description: impl Into<String>) {
        self.status = Status::Failed;
        self.failure_description = Some(description.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_id_stops_at_the_end_of_the_id_space() {
        assert_eq!(ExecutionId(41).next(), Some(ExecutionId(42)));
        assert_eq!(ExecutionId(u64::MAX).next(), None);
    }

    #[test]
    fn test_validate_requires_module_and_prefix() {
        assert!(ExecuteRequest::new(json!({"name": "fib"}), "run-1").validate().is_ok());

        let no_prefix = ExecuteRequest {
            module: Some(json!({})),
            ..ExecuteRequest::default()
        };
        assert!(matches!(no_prefix.validate(), Err(Error::InvalidArgument(_))));

        let no_module = ExecuteRequest {
            prefix: Some("run-1".into()),
            ..ExecuteRequest::default()
        };
        assert!(matches!(no_module.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_status_copy_is_independent() {
        let original = ExecutionStatus::running(
            ExecutionId(3),
            ExecuteRequest::new(json!({"name": "fib"}), "p").with_bundle_identifiers(vec!["b".into()]),
        );
        let mut copy = original.clone();
        copy.request.bundle_identifiers.push("other".into());
        copy.mark_failed("boom");

        assert_eq!(original.status, Status::Running);
        assert_eq!(original.request.bundle_identifiers, vec!["b".to_string()]);
        assert_eq!(copy.failure_description.as_deref(), Some("boom"));
    }

    #[test]
    fn test_status_serialization() {
        let mut status = ExecutionStatus::running(ExecutionId(1), ExecuteRequest::new(json!(1), "p"));
        status.mark_successful();
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "SUCCESSFUL");
        assert_eq!(value["execution_id"], 1);
        assert!(value.get("failure_description").is_none());
    }

    #[test]
    fn test_request_defaults_when_deserialized() {
        let request: ExecuteRequest = serde_json::from_value(json!({"prefix": "p"})).unwrap();
        assert!(request.cleaning_requested);
        assert!(request.bundle_identifiers.is_empty());
        assert!(request.module.is_none());
    }
}
