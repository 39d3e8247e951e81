//! Task persistence in SQLite
//!
//! Scalar task fields live in columns; results, issues, scores, narrative
//! and report are JSON text. Writes go through `retry_on_lock`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fhg_common::events::{PipelineState, TaskStatus};
use fhg_common::{Error, Result};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::models::{BundleInfo, Task};
use crate::store::TaskStore;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const TASK_COLUMNS: &str = "task_id, upload_key, filename, size_bytes, state, status, percentage, \
     reason, results, extraction_issues, clinical_scores, narrative, report, created_at, updated_at";

/// Serialized column values of one task
struct TaskColumns {
    task_id: String,
    upload_key: Option<String>,
    filename: Option<String>,
    size_bytes: i64,
    state: &'static str,
    status: &'static str,
    percentage: f64,
    reason: Option<String>,
    results: String,
    extraction_issues: String,
    clinical_scores: Option<String>,
    narrative: Option<String>,
    report: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskColumns {
    fn from_task(task: &Task) -> Result<Self> {
        Ok(Self {
            task_id: task.task_id.to_string(),
            upload_key: task.bundle.upload_key.clone(),
            filename: task.bundle.filename.clone(),
            size_bytes: task.bundle.size_bytes as i64,
            state: task.state.as_str(),
            status: task.status.as_str(),
            percentage: task.percentage,
            reason: task.reason.clone(),
            results: serde_json::to_string(&task.results)?,
            extraction_issues: serde_json::to_string(&task.extraction_issues)?,
            clinical_scores: task.clinical_scores.as_ref().map(serde_json::to_string).transpose()?,
            narrative: task.narrative.as_ref().map(serde_json::to_string).transpose()?,
            report: task.report.as_ref().map(serde_json::to_string).transpose()?,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        })
    }
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let text: String = row.try_get(column)?;
    Ok(serde_json::from_str(&text)?)
}

fn optional_json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let text: Option<String> = row.try_get(column)?;
    Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
}

fn time_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let text: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let task_id: String = row.try_get("task_id")?;
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|e| Error::Internal(format!("Invalid task_id {}: {}", task_id, e)))?;
    let state: String = row.try_get("state")?;
    let state = PipelineState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown pipeline state {}", state)))?;
    let status: String = row.try_get("status")?;
    let status = TaskStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown task status {}", status)))?;
    let size_bytes: i64 = row.try_get("size_bytes")?;

    Ok(Task {
        task_id,
        state,
        status,
        created_at: time_column(row, "created_at")?,
        updated_at: time_column(row, "updated_at")?,
        bundle: BundleInfo {
            upload_key: row.try_get("upload_key")?,
            filename: row.try_get("filename")?,
            size_bytes: size_bytes.max(0) as usize,
        },
        results: json_column(row, "results")?,
        extraction_issues: json_column(row, "extraction_issues")?,
        clinical_scores: optional_json_column(row, "clinical_scores")?,
        narrative: optional_json_column(row, "narrative")?,
        percentage: row.try_get("percentage")?,
        reason: row.try_get("reason")?,
        report: optional_json_column(row, "report")?,
    })
}

/// SQLite-backed [`TaskStore`]
pub struct SqliteTaskStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Open the database file, creating tables as needed
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = super::init_database_pool(path).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task, bundle: &[u8]) -> Result<()> {
        let c = TaskColumns::from_task(task)?;
        retry_on_lock("insert_task", self.max_lock_wait_ms, || async {
            sqlx::query(&format!(
                "INSERT INTO tasks ({}, bundle) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TASK_COLUMNS
            ))
            .bind(&c.task_id)
            .bind(&c.upload_key)
            .bind(&c.filename)
            .bind(c.size_bytes)
            .bind(c.state)
            .bind(c.status)
            .bind(c.percentage)
            .bind(&c.reason)
            .bind(&c.results)
            .bind(&c.extraction_issues)
            .bind(&c.clinical_scores)
            .bind(&c.narrative)
            .bind(&c.report)
            .bind(&c.created_at)
            .bind(&c.updated_at)
            .bind(bundle)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let c = TaskColumns::from_task(task)?;
        let updated = retry_on_lock("save_task", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE tasks SET
                    state = ?, status = ?, percentage = ?, reason = ?,
                    results = ?, extraction_issues = ?, clinical_scores = ?,
                    narrative = ?, report = ?, updated_at = ?
                WHERE task_id = ?
                "#,
            )
            .bind(c.state)
            .bind(c.status)
            .bind(c.percentage)
            .bind(&c.reason)
            .bind(&c.results)
            .bind(&c.extraction_issues)
            .bind(&c.clinical_scores)
            .bind(&c.narrative)
            .bind(&c.report)
            .bind(&c.updated_at)
            .bind(&c.task_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("task {}", task.task_id)));
        }
        Ok(())
    }

    async fn load(&self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE task_id = ?", TASK_COLUMNS))
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn load_bundle(&self, task_id: Uuid) -> Result<Option<Vec<u8>>> {
        let bundle: Option<Vec<u8>> = sqlx::query_scalar("SELECT bundle FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(bundle)
    }

    async fn list_unfinished(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status IN ('queued', 'running') ORDER BY created_at",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn find_by_upload_key(&self, upload_key: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE upload_key = ? ORDER BY created_at",
            TASK_COLUMNS
        ))
        .bind(upload_key)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn purge(&self, task_id: Uuid) -> Result<bool> {
        let id = task_id.to_string();
        let deleted = retry_on_lock("purge_task", self.max_lock_wait_ms, || async {
            let result = sqlx::query("DELETE FROM tasks WHERE task_id = ?")
                .bind(&id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(deleted > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
