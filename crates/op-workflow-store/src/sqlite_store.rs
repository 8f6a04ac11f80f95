//! SQLite-based persistence gateway
//!
//! Durable storage for executions, their frames, frame errors, executor
//! properties and final statuses. Uses SQLx for async database operations;
//! every [`GatewayTransaction`] is one SQLx transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use op_workflow_core::config::get_config;
use op_workflow_core::{ExecuteRequest, ExecutionId, ExecutionStatus, ModuleKind, Status, TracePath};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{Result, StateStoreError};
use crate::gateway::{GatewayTransaction, PersistenceGateway};
use crate::metrics::{self, OperationTimer};
use crate::records::{
    ExecutionRecord, FrameErrorRecord, FrameKey, FrameProperties, FrameRecord, LauncherProperties,
    Record,
};

const STORE_TYPE: &str = "sqlite";

/// Environment variable naming the database location
pub const DATABASE_URL_VAR: &str = "OP_WORKFLOW_DATABASE_URL";
pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

/// SQLite-backed persistence gateway
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database URL
    ///
    /// URL format: `sqlite:///path/to/db.sqlite` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        info!("Initializing SQLite persistence gateway: {}", url);

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            // Every connection would open its own empty database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.initialize_schema().await?;

        metrics::register_metrics();
        info!("SQLite persistence gateway initialized successfully");
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub async fn in_memory() -> Result<Self> {
        Self::new(DEFAULT_DATABASE_URL).await
    }

    /// Open the database named by `OP_WORKFLOW_DATABASE_URL`
    pub async fn from_env() -> Result<Self> {
        Self::new(&get_config(DATABASE_URL_VAR, DEFAULT_DATABASE_URL)).await
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY,
                key_prefix TEXT NOT NULL,
                start_time TEXT,
                finish_time TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_frames (
                execution_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                module_kind TEXT NOT NULL,
                start_time TEXT,
                finish_time TEXT,
                successful INTEGER,
                PRIMARY KEY (execution_id, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_frame_errors (
                execution_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                error_message TEXT NOT NULL,
                PRIMARY KEY (execution_id, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_frame_properties (
                execution_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                worker_name TEXT NOT NULL,
                worker_start_time TEXT,
                worker_finish_time TEXT,
                launcher TEXT NOT NULL,
                PRIMARY KEY (execution_id, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_statuses (
                execution_id INTEGER PRIMARY KEY,
                status TEXT NOT NULL,
                request TEXT NOT NULL,
                failure_description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Database schema initialized");
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn GatewayTransaction>> {
        let _timer = OperationTimer::new("begin", STORE_TYPE);
        let tx = metrics::observe("begin", STORE_TYPE, self.pool.begin().await.map_err(Into::into))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn persist_status(&self, status: &ExecutionStatus) -> Result<()> {
        let _timer = OperationTimer::new("persist_status", STORE_TYPE);
        let request_json = serde_json::to_string(&status.request)?;

        let result = sqlx::query(
            r#"
            INSERT INTO execution_statuses (execution_id, status, request, failure_description)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(execution_id) DO UPDATE SET
                status = excluded.status,
                request = excluded.request,
                failure_description = excluded.failure_description
            "#,
        )
        .bind(id_to_db(status.execution_id)?)
        .bind(status.status.to_string())
        .bind(&request_json)
        .bind(&status.failure_description)
        .execute(&self.pool)
        .await;
        metrics::observe("persist_status", STORE_TYPE, result.map_err(Into::into))?;

        debug!(execution_id = %status.execution_id, status = %status.status, "Stored execution status");
        Ok(())
    }

    async fn load_status(&self, id: ExecutionId) -> Result<ExecutionStatus> {
        let row = sqlx::query(
            "SELECT execution_id, status, request, failure_description FROM execution_statuses WHERE execution_id = ?",
        )
        .bind(id_to_db(id)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_status(&row),
            None => Err(StateStoreError::NotFound(id)),
        }
    }

    async fn first_execution_id(&self) -> Result<ExecutionId> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(id) FROM (
                SELECT id FROM executions
                UNION ALL
                SELECT execution_id AS id FROM execution_statuses
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        match max {
            None => Ok(ExecutionId(1)),
            Some(max) => id_from_db(max)?
                .next()
                .ok_or_else(|| StateStoreError::Corrupt(format!("no execution id after {}", max))),
        }
    }

    async fn execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT id, key_prefix, start_time, finish_time FROM executions WHERE id = ?")
            .bind(id_to_db(id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    async fn frames(&self, id: ExecutionId) -> Result<Vec<FrameRecord>> {
        let rows = sqlx::query(
            "SELECT execution_id, path, module_kind, start_time, finish_time, successful FROM execution_frames WHERE execution_id = ? ORDER BY path",
        )
        .bind(id_to_db(id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_frame).collect()
    }

    async fn frame_errors(&self, id: ExecutionId) -> Result<Vec<FrameErrorRecord>> {
        let rows = sqlx::query(
            "SELECT execution_id, path, error_message FROM execution_frame_errors WHERE execution_id = ? ORDER BY path",
        )
        .bind(id_to_db(id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FrameErrorRecord {
                    key: row_to_key(row)?,
                    error_message: row.try_get("error_message")?,
                })
            })
            .collect()
    }

    async fn frame_properties(&self, id: ExecutionId) -> Result<Vec<FrameProperties>> {
        let rows = sqlx::query(
            "SELECT execution_id, path, worker_name, worker_start_time, worker_finish_time, launcher FROM execution_frame_properties WHERE execution_id = ? ORDER BY path",
        )
        .bind(id_to_db(id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_properties).collect()
    }
}

struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl GatewayTransaction for SqliteTransaction {
    async fn find_or_create_execution(
        &mut self,
        id: ExecutionId,
        key_prefix: &str,
    ) -> Result<ExecutionRecord> {
        let row = sqlx::query("SELECT id, key_prefix, start_time, finish_time FROM executions WHERE id = ?")
            .bind(id_to_db(id)?)
            .fetch_optional(&mut *self.tx)
            .await?;
        if let Some(row) = row {
            return row_to_execution(&row);
        }

        let record = ExecutionRecord::new(id, key_prefix);
        self.persist(Record::Execution(record.clone())).await?;
        Ok(record)
    }

    async fn find_or_create_frame(
        &mut self,
        key: &FrameKey,
        module_kind: ModuleKind,
    ) -> Result<FrameRecord> {
        let row = sqlx::query(
            "SELECT execution_id, path, module_kind, start_time, finish_time, successful FROM execution_frames WHERE execution_id = ? AND path = ?",
        )
        .bind(id_to_db(key.execution_id)?)
        .bind(key.path.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        if let Some(row) = row {
            return row_to_frame(&row);
        }

        let record = FrameRecord::new(key.clone(), module_kind);
        self.persist(Record::Frame(record.clone())).await?;
        Ok(record)
    }

    async fn persist(&mut self, record: Record) -> Result<()> {
        let label = record.label();
        let result = upsert(&mut self.tx, record).await;
        metrics::observe("persist", STORE_TYPE, result)?;
        metrics::record_written(label, STORE_TYPE);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let _timer = OperationTimer::new("commit", STORE_TYPE);
        metrics::observe("commit", STORE_TYPE, self.tx.commit().await.map_err(Into::into))
    }
}

async fn upsert(tx: &mut sqlx::Transaction<'static, Sqlite>, record: Record) -> Result<()> {
    match record {
        Record::Execution(r) => {
            sqlx::query(
                r#"
                INSERT INTO executions (id, key_prefix, start_time, finish_time)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    key_prefix = excluded.key_prefix,
                    start_time = excluded.start_time,
                    finish_time = excluded.finish_time
                "#,
            )
            .bind(id_to_db(r.id)?)
            .bind(&r.key_prefix)
            .bind(time_to_db(r.start_time))
            .bind(time_to_db(r.finish_time))
            .execute(&mut **tx)
            .await?;
        }
        Record::Frame(r) => {
            sqlx::query(
                r#"
                INSERT INTO execution_frames (execution_id, path, module_kind, start_time, finish_time, successful)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(execution_id, path) DO UPDATE SET
                    module_kind = excluded.module_kind,
                    start_time = excluded.start_time,
                    finish_time = excluded.finish_time,
                    successful = excluded.successful
                "#,
            )
            .bind(id_to_db(r.key.execution_id)?)
            .bind(r.key.path.as_str())
            .bind(r.module_kind.as_str())
            .bind(time_to_db(r.start_time))
            .bind(time_to_db(r.finish_time))
            .bind(r.successful)
            .execute(&mut **tx)
            .await?;
        }
        Record::FrameError(r) => {
            sqlx::query(
                r#"
                INSERT INTO execution_frame_errors (execution_id, path, error_message)
                VALUES (?, ?, ?)
                ON CONFLICT(execution_id, path) DO UPDATE SET
                    error_message = excluded.error_message
                "#,
            )
            .bind(id_to_db(r.key.execution_id)?)
            .bind(r.key.path.as_str())
            .bind(&r.error_message)
            .execute(&mut **tx)
            .await?;
        }
        Record::FrameProperties(r) => {
            let launcher_json = serde_json::to_string(&r.launcher)?;
            sqlx::query(
                r#"
                INSERT INTO execution_frame_properties
                    (execution_id, path, worker_name, worker_start_time, worker_finish_time, launcher)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(execution_id, path) DO UPDATE SET
                    worker_name = excluded.worker_name,
                    worker_start_time = excluded.worker_start_time,
                    worker_finish_time = excluded.worker_finish_time,
                    launcher = excluded.launcher
                "#,
            )
            .bind(id_to_db(r.key.execution_id)?)
            .bind(r.key.path.as_str())
            .bind(&r.worker_name)
            .bind(time_to_db(r.worker_start_time))
            .bind(time_to_db(r.worker_finish_time))
            .bind(&launcher_json)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

// SQLite integers are signed
fn id_to_db(id: ExecutionId) -> Result<i64> {
    i64::try_from(id.get())
        .map_err(|_| StateStoreError::Corrupt(format!("execution id {} exceeds the SQLite integer range", id)))
}

fn id_from_db(id: i64) -> Result<ExecutionId> {
    u64::try_from(id)
        .map(ExecutionId)
        .map_err(|_| StateStoreError::Corrupt(format!("negative execution id {}", id)))
}

fn time_to_db(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.to_rfc3339())
}

fn time_from_db(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StateStoreError::Corrupt(format!("{}: {}", column, e)))
        })
        .transpose()
}

fn row_to_key(row: &SqliteRow) -> Result<FrameKey> {
    let path: String = row.try_get("path")?;
    Ok(FrameKey {
        execution_id: id_from_db(row.try_get("execution_id")?)?,
        path: TracePath::new(path),
    })
}

fn row_to_execution(row: &SqliteRow) -> Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: id_from_db(row.try_get("id")?)?,
        key_prefix: row.try_get("key_prefix")?,
        start_time: time_from_db(row, "start_time")?,
        finish_time: time_from_db(row, "finish_time")?,
    })
}

fn row_to_frame(row: &SqliteRow) -> Result<FrameRecord> {
    let kind: String = row.try_get("module_kind")?;
    Ok(FrameRecord {
        key: row_to_key(row)?,
        module_kind: ModuleKind::parse(&kind)
            .ok_or_else(|| StateStoreError::Corrupt(format!("unknown module kind '{}'", kind)))?,
        start_time: time_from_db(row, "start_time")?,
        finish_time: time_from_db(row, "finish_time")?,
        successful: row.try_get("successful")?,
    })
}

fn row_to_properties(row: &SqliteRow) -> Result<FrameProperties> {
    let launcher_json: String = row.try_get("launcher")?;
    let launcher: LauncherProperties = serde_json::from_str(&launcher_json)?;
    Ok(FrameProperties {
        key: row_to_key(row)?,
        worker_name: row.try_get("worker_name")?,
        worker_start_time: time_from_db(row, "worker_start_time")?,
        worker_finish_time: time_from_db(row, "worker_finish_time")?,
        launcher,
    })
}

fn row_to_status(row: &SqliteRow) -> Result<ExecutionStatus> {
    let status_str: String = row.try_get("status")?;
    let request_json: String = row.try_get("request")?;
    let request: ExecuteRequest = serde_json::from_str(&request_json)?;

    Ok(ExecutionStatus {
        execution_id: id_from_db(row.try_get("execution_id")?)?,
        request,
        status: string_to_status(&status_str)?,
        failure_description: row.try_get("failure_description")?,
    })
}

fn string_to_status(s: &str) -> Result<Status> {
    match s {
        "RUNNING" => Ok(Status::Running),
        "SUCCESSFUL" => Ok(Status::Successful),
        "FAILED" => Ok(Status::Failed),
        other => Err(StateStoreError::Corrupt(format!("unknown status '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{millis_to_time, ProcessProperties};
    use serde_json::json;

    fn key(id: u64, path: &str) -> FrameKey {
        FrameKey::new(ExecutionId(id), path)
    }

    #[tokio::test]
    async fn test_execution_and_frames() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut execution = tx.find_or_create_execution(ExecutionId(5), "run-5").await.unwrap();
        execution.start_time = millis_to_time(1_000);
        tx.persist(execution.into()).await.unwrap();

        let mut frame = tx.find_or_create_frame(&key(5, ""), ModuleKind::Composite).await.unwrap();
        frame.start_time = millis_to_time(1_000);
        tx.persist(frame.into()).await.unwrap();
        tx.find_or_create_frame(&key(5, "/loop/1"), ModuleKind::Loop).await.unwrap();
        tx.commit().await.unwrap();

        let execution = store.execution(ExecutionId(5)).await.unwrap().unwrap();
        assert_eq!(execution.key_prefix, "run-5");
        assert_eq!(execution.start_time, millis_to_time(1_000));
        assert!(execution.finish_time.is_none());

        let frames = store.frames(ExecutionId(5)).await.unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].key.path.is_root());
        assert_eq!(frames[0].module_kind, ModuleKind::Composite);
        assert_eq!(frames[1].module_kind, ModuleKind::Loop);
        assert_eq!(frames[1].successful, None);
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_rolled_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        {
            let mut tx = store.begin().await.unwrap();
            tx.find_or_create_execution(ExecutionId(1), "p").await.unwrap();
        }
        assert!(store.execution(ExecutionId(1)).await.unwrap().is_none());
        assert_eq!(store.first_execution_id().await.unwrap(), ExecutionId(1));
    }

    #[tokio::test]
    async fn test_frame_upsert_updates_existing_row() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.find_or_create_execution(ExecutionId(2), "p").await.unwrap();
        tx.find_or_create_frame(&key(2, "/a"), ModuleKind::Simple).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut frame = tx.find_or_create_frame(&key(2, "/a"), ModuleKind::Simple).await.unwrap();
        frame.finish_time = millis_to_time(2_500);
        frame.successful = Some(false);
        tx.persist(frame.into()).await.unwrap();
        tx.persist(Record::FrameError(FrameErrorRecord {
            key: key(2, "/a"),
            error_message: "outer\ncaused by: inner".into(),
        }))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let frames = store.frames(ExecutionId(2)).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].successful, Some(false));
        assert_eq!(frames[0].finish_time, millis_to_time(2_500));
        let errors = store.frame_errors(ExecutionId(2)).await.unwrap();
        assert_eq!(errors[0].error_message, "outer\ncaused by: inner");
    }

    #[tokio::test]
    async fn test_frame_properties() {
        let store = SqliteStore::in_memory().await.unwrap();
        let properties = FrameProperties {
            key: key(3, "/sum"),
            worker_name: "worker-1".into(),
            worker_start_time: millis_to_time(10),
            worker_finish_time: millis_to_time(90),
            launcher: LauncherProperties::Drmaa {
                job_id: Some("job-7".into()),
                native_arguments: Some("-q fast".into()),
                process: ProcessProperties {
                    command_line: Some("java -cp x".into()),
                    exit_status: Some(0),
                    launcher_start_time: millis_to_time(20),
                    ..ProcessProperties::default()
                },
            },
        };

        let mut tx = store.begin().await.unwrap();
        tx.persist(properties.clone().into()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.frame_properties(ExecutionId(3)).await.unwrap(), vec![properties]);
    }

    #[tokio::test]
    async fn test_status_round_trip_and_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut status = ExecutionStatus::running(ExecutionId(9), ExecuteRequest::new(json!({"name": "fib"}), "p"));
        store.persist_status(&status).await.unwrap();
        status.mark_failed("boom");
        store.persist_status(&status).await.unwrap();

        assert_eq!(store.load_status(ExecutionId(9)).await.unwrap(), status);
        assert!(matches!(
            store.load_status(ExecutionId(10)).await,
            Err(StateStoreError::NotFound(ExecutionId(10)))
        ));
        assert_eq!(store.first_execution_id().await.unwrap(), ExecutionId(10));
    }

    #[tokio::test]
    async fn test_ids_outside_sqlite_range_are_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        let largest = ExecutionId(i64::MAX as u64);
        let status = ExecutionStatus::running(largest, ExecuteRequest::new(json!({}), "p"));
        store.persist_status(&status).await.unwrap();
        assert_eq!(
            store.first_execution_id().await.unwrap(),
            ExecutionId(i64::MAX as u64 + 1)
        );

        let too_large = ExecutionStatus::running(ExecutionId(u64::MAX), ExecuteRequest::new(json!({}), "p"));
        assert!(matches!(
            store.persist_status(&too_large).await,
            Err(StateStoreError::Corrupt(_))
        ));
        assert!(matches!(
            store.begin().await.unwrap().find_or_create_execution(ExecutionId(u64::MAX), "p").await,
            Err(StateStoreError::Corrupt(_))
        ));
        assert_eq!(store.load_status(largest).await.unwrap(), status);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("workflow.db").display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            let mut tx = store.begin().await.unwrap();
            tx.find_or_create_execution(ExecutionId(17), "p").await.unwrap();
            tx.commit().await.unwrap();
        }

        let store = SqliteStore::new(&url).await.unwrap();
        assert_eq!(store.first_execution_id().await.unwrap(), ExecutionId(18));
    }
}
