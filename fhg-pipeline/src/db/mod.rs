//! SQLite persistence for fhg-pipeline

pub mod tasks;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

pub use tasks::SqliteTaskStore;

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the tasks table if it does not exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            upload_key TEXT,
            filename TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            bundle BLOB NOT NULL,
            state TEXT NOT NULL,
            status TEXT NOT NULL,
            percentage REAL NOT NULL DEFAULT 0.0,
            reason TEXT,
            results TEXT NOT NULL DEFAULT '[]',
            extraction_issues TEXT NOT NULL DEFAULT '[]',
            clinical_scores TEXT,
            narrative TEXT,
            report TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_upload_key ON tasks(upload_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (tasks)");
    Ok(())
}
