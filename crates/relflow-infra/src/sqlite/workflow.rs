//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `relflow-core` using sqlx with split
//! read/write pools. Parameter bindings and outputs are stored as JSON text;
//! each step keeps exactly one row holding its latest snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use relflow_core::repository::workflow::WorkflowRepository;
use relflow_types::error::RepositoryError;
use relflow_types::workflow::{Params, StepSnapshot, WorkflowRecord};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    params: String,
    created_at: String,
    updated_at: String,
    finished: bool,
    outputs: Option<String>,
    error: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            params: row.try_get("params")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            finished: row.try_get("finished")?,
            outputs: row.try_get("outputs")?,
            error: row.try_get("error")?,
        })
    }

    fn into_record(self) -> Result<WorkflowRecord, RepositoryError> {
        let params: Params = serde_json::from_str(&self.params)
            .map_err(|e| RepositoryError::Query(format!("invalid params JSON: {e}")))?;
        let outputs = self
            .outputs
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid outputs JSON: {e}")))
            })
            .transpose()?;

        Ok(WorkflowRecord {
            id: parse_uuid(&self.id)?,
            name: self.name,
            params,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            finished: self.finished,
            outputs,
            error: self.error,
        })
    }
}

struct StepRow {
    name: String,
    started: bool,
    finished: bool,
    result: Option<String>,
    serialized_result: Option<String>,
    error: Option<String>,
    retry_count: i64,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            name: row.try_get("name")?,
            started: row.try_get("started")?,
            finished: row.try_get("finished")?,
            result: row.try_get("result")?,
            serialized_result: row.try_get("serialized_result")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
        })
    }

    fn into_snapshot(self) -> Result<StepSnapshot, RepositoryError> {
        let result = self
            .result
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step result: {e}")))
            })
            .transpose()?;

        Ok(StepSnapshot {
            name: self.name,
            started: self.started,
            finished: self.finished,
            result,
            serialized_result: self.serialized_result,
            error: self.error,
            retry_count: u32::try_from(self.retry_count)
                .map_err(|_| RepositoryError::Query(format!("invalid retry count: {}", self.retry_count)))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

const WORKFLOW_COLUMNS: &str = "id, name, params, created_at, updated_at, finished, outputs, error";

fn records(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowRecord>, RepositoryError> {
    rows.iter()
        .map(|row| {
            WorkflowRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_record()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let params = to_json(&record.params)?;
        let outputs = record.outputs.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, params, created_at, updated_at, finished, outputs, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&params)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .bind(record.finished)
        .bind(&outputs)
        .bind(&record.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("workflow {} already exists", record.id))
            }
            _ => RepositoryError::Query(e.to_string()),
        })?;

        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(&self, limit: u32) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        records(&rows)
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE finished = 0 ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        records(&rows)
    }

    async fn mark_finished(
        &self,
        id: &Uuid,
        outputs: Option<&HashMap<String, serde_json::Value>>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let outputs = outputs.map(to_json).transpose()?;

        let result = sqlx::query(
            "UPDATE workflows SET finished = 1, outputs = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&outputs)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn upsert_step(&self, workflow_id: &Uuid, snapshot: &StepSnapshot) -> Result<(), RepositoryError> {
        let result = snapshot.result.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_steps
               (workflow_id, name, started, finished, result, serialized_result, error, retry_count, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id, name) DO UPDATE SET
                 started = excluded.started,
                 finished = excluded.finished,
                 result = excluded.result,
                 serialized_result = excluded.serialized_result,
                 error = excluded.error,
                 retry_count = excluded.retry_count,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow_id.to_string())
        .bind(&snapshot.name)
        .bind(snapshot.started)
        .bind(snapshot.finished)
        .bind(&result)
        .bind(&snapshot.serialized_result)
        .bind(&snapshot.error)
        .bind(i64::from(snapshot.retry_count))
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
            _ => RepositoryError::Query(e.to_string()),
        })?;

        Ok(())
    }

    async fn list_steps(&self, workflow_id: &Uuid) -> Result<Vec<StepSnapshot>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT name, started, finished, result, serialized_result, error, retry_count
               FROM workflow_steps WHERE workflow_id = ? ORDER BY name ASC"#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                StepRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_snapshot()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
