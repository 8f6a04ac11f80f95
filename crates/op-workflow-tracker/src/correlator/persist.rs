//! Turning a resolvable trace event into persisted records

use chrono::{DateTime, Utc};
use op_workflow_core::trace::{
    COMMAND_LINE, COMPLETION_TIME_MILLIS, EXIT_VALUE, FORKED_LAUNCHER, JOB_ID, LOCAL_EXECUTOR,
    NATIVE_ARGUMENTS, PROCESSING_FINISH_TIME_MILLIS, PROCESSING_START_TIME_MILLIS,
    SUBMISSION_TIME_MILLIS,
};
use op_workflow_core::{ExecutionTraceEvent, ExecutorResult, ProducerKind, Result, TraceEventKind};
use op_workflow_store::records::millis_to_time;
use op_workflow_store::{
    FrameErrorRecord, FrameKey, FrameProperties, LauncherProperties, PersistenceGateway,
    ProcessProperties,
};

use crate::observer::StartSignal;

/// Persist `event` in one gateway transaction, resolving its path against
/// the root module announced by `start`.
pub(crate) async fn persist_event(
    gateway: &dyn PersistenceGateway,
    start: &StartSignal,
    event: &ExecutionTraceEvent,
) -> Result<()> {
    let module_kind = start.root.resolve(&event.path)?;
    let is_root = event.path.is_root();
    let time = millis_to_time(event.timestamp_millis);

    let mut tx = gateway.begin().await?;
    let mut execution = tx
        .find_or_create_execution(event.execution_id, &start.prefix)
        .await?;
    let key = FrameKey::new(event.execution_id, event.path.clone());
    let mut frame = tx.find_or_create_frame(&key, module_kind).await?;

    match &event.kind {
        TraceEventKind::Begin => {
            if is_root {
                execution.start_time = time;
                tx.persist(execution.into()).await?;
            }
            frame.start_time = time;
            tx.persist(frame.into()).await?;
        }
        TraceEventKind::End { successful, result } => {
            if is_root {
                execution.finish_time = time;
                tx.persist(execution.into()).await?;
            }
            frame.finish_time = time;
            frame.successful = Some(*successful);
            tx.persist(frame.into()).await?;

            if let Some(result) = result {
                tx.persist(frame_properties(key, result).into()).await?;
            }
        }
        TraceEventKind::Failed { error } => {
            tx.persist(
                FrameErrorRecord {
                    key,
                    error_message: error.summary(),
                }
                .into(),
            )
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

fn time(result: &ExecutorResult, executor: &str, key: &str) -> Option<DateTime<Utc>> {
    result.property_i64(executor, key).and_then(millis_to_time)
}

fn exit_status(result: &ExecutorResult, executor: &str) -> Option<i32> {
    result
        .property_i64(executor, EXIT_VALUE)
        .and_then(|v| i32::try_from(v).ok())
}

/// Executor details of a finished simple module, shaped by its producer
pub(crate) fn frame_properties(key: FrameKey, result: &ExecutorResult) -> FrameProperties {
    let producer = result.executor_name.as_str();
    let process = |command_line: Option<String>, exit_status: Option<i32>| ProcessProperties {
        command_line,
        exit_status,
        launcher_start_time: time(result, FORKED_LAUNCHER, SUBMISSION_TIME_MILLIS),
        launcher_finish_time: time(result, FORKED_LAUNCHER, COMPLETION_TIME_MILLIS),
        module_start_time: time(result, LOCAL_EXECUTOR, PROCESSING_START_TIME_MILLIS),
        module_finish_time: time(result, LOCAL_EXECUTOR, PROCESSING_FINISH_TIME_MILLIS),
    };

    let launcher = match ProducerKind::of(result) {
        ProducerKind::Drmaa => LauncherProperties::Drmaa {
            job_id: result.property_str(producer, JOB_ID),
            native_arguments: result.property_str(producer, NATIVE_ARGUMENTS),
            process: process(
                result.property_str(producer, COMMAND_LINE),
                exit_status(result, producer),
            ),
        },
        ProducerKind::Forking => LauncherProperties::Simple {
            process: process(
                result.property_str(producer, COMMAND_LINE),
                exit_status(result, producer),
            ),
        },
        ProducerKind::Unknown(_) => LauncherProperties::Unknown,
    };

    FrameProperties {
        key,
        worker_name: producer.to_string(),
        worker_start_time: time(result, producer, SUBMISSION_TIME_MILLIS),
        worker_finish_time: time(result, producer, COMPLETION_TIME_MILLIS),
        launcher,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_workflow_core::trace::{DRMAA_EXECUTOR, FORKING_EXECUTOR};
    use op_workflow_core::{ExecutionId, ExecutionFailure, Module};
    use op_workflow_store::MemoryStore;
    use std::sync::Arc;

    fn key() -> FrameKey {
        FrameKey::new(ExecutionId(1), "/loop/1/sum")
    }

    fn launched(producer: ExecutorResult) -> ExecutorResult {
        producer.with_nested(
            ExecutorResult::new(FORKED_LAUNCHER)
                .with_property(SUBMISSION_TIME_MILLIS, 110)
                .with_property(COMPLETION_TIME_MILLIS, 190)
                .with_nested(
                    ExecutorResult::new(LOCAL_EXECUTOR)
                        .with_property(PROCESSING_START_TIME_MILLIS, 120)
                        .with_property(PROCESSING_FINISH_TIME_MILLIS, 180),
                ),
        )
    }

    #[test]
    fn test_drmaa_properties() {
        let result = launched(
            ExecutorResult::new(DRMAA_EXECUTOR)
                .with_property(JOB_ID, "job-42")
                .with_property(NATIVE_ARGUMENTS, "-l h_vmem=2G")
                .with_property(COMMAND_LINE, "java Main")
                .with_property(EXIT_VALUE, 0)
                .with_property(SUBMISSION_TIME_MILLIS, 100)
                .with_property(COMPLETION_TIME_MILLIS, 200),
        );

        let properties = frame_properties(key(), &result);

        assert_eq!(properties.worker_name, DRMAA_EXECUTOR);
        assert_eq!(properties.worker_start_time, millis_to_time(100));
        assert_eq!(properties.worker_finish_time, millis_to_time(200));
        match properties.launcher {
            LauncherProperties::Drmaa {
                job_id,
                native_arguments,
                process,
            } => {
                assert_eq!(job_id.as_deref(), Some("job-42"));
                assert_eq!(native_arguments.as_deref(), Some("-l h_vmem=2G"));
                assert_eq!(process.command_line.as_deref(), Some("java Main"));
                assert_eq!(process.exit_status, Some(0));
                assert_eq!(process.launcher_start_time, millis_to_time(110));
                assert_eq!(process.launcher_finish_time, millis_to_time(190));
                assert_eq!(process.module_start_time, millis_to_time(120));
                assert_eq!(process.module_finish_time, millis_to_time(180));
            }
            other => panic!("expected DRMAA properties, got {:?}", other),
        }
    }

    #[test]
    fn test_forking_properties() {
        let result = launched(
            ExecutorResult::new(FORKING_EXECUTOR)
                .with_property(COMMAND_LINE, "sh -c run")
                .with_property(EXIT_VALUE, 3),
        );

        match frame_properties(key(), &result).launcher {
            LauncherProperties::Simple { process } => {
                assert_eq!(process.command_line.as_deref(), Some("sh -c run"));
                assert_eq!(process.exit_status, Some(3));
                assert_eq!(process.module_finish_time, millis_to_time(180));
            }
            other => panic!("expected simple properties, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_producer_keeps_worker_fields_only() {
        let result = launched(
            ExecutorResult::new("in-process")
                .with_property(SUBMISSION_TIME_MILLIS, 5)
                .with_property(COMMAND_LINE, "ignored"),
        );

        let properties = frame_properties(key(), &result);
        assert_eq!(properties.worker_name, "in-process");
        assert_eq!(properties.worker_start_time, millis_to_time(5));
        assert_eq!(properties.worker_finish_time, None);
        assert_eq!(properties.launcher, LauncherProperties::Unknown);
    }

    #[tokio::test]
    async fn test_failed_event_records_whole_cause_chain() {
        let store = MemoryStore::new();
        let start = StartSignal::new(
            ExecutionId(1),
            Arc::new(Module::composite([("a", Module::Simple)])),
            "p",
        );
        let error = anyhow::anyhow!("disk full")
            .context("could not stage output")
            .context("module /a failed");
        let event = ExecutionTraceEvent::failed(ExecutionId(1), 50, "/a", ExecutionFailure::new(error));

        persist_event(&store, &start, &event).await.unwrap();

        let errors = store.frame_errors(ExecutionId(1)).await.unwrap();
        assert_eq!(errors.len(), 1);
        let message = &errors[0].error_message;
        assert!(message.contains("module /a failed"));
        assert!(message.contains("could not stage output"));
        assert!(message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_unresolvable_path_writes_nothing() {
        let store = MemoryStore::new();
        let start = StartSignal::new(ExecutionId(1), Arc::new(Module::composite([("a", Module::Simple)])), "p");
        let event = ExecutionTraceEvent::begin(ExecutionId(1), 5, "/missing");

        assert!(persist_event(&store, &start, &event).await.is_err());
        assert_eq!(store.execution_count().await, 0);
    }
}
