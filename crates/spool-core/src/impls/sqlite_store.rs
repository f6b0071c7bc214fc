//! SQLite-backed task store.
//!
//! One `tasks` table, indexed on `status` and `next_retry_at`. Timestamps are
//! stored as Unix epoch milliseconds so ordering and `<=` comparisons in SQL
//! are exact.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use crate::domain::{StatusCount, Task, TaskId, TaskStatus};
use crate::ports::{StoreError, TaskStore};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        task_data     TEXT    NOT NULL,
        status        TEXT    NOT NULL DEFAULT 'pending',
        retry_count   INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000),
        updated_at    INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000),
        next_retry_at INTEGER NULL
    )
"#;

const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)";

const CREATE_RETRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_next_retry_at ON tasks (next_retry_at)";

const TASK_COLUMNS: &str =
    "id, task_data, status, retry_count, created_at, updated_at, next_retry_at";

/// `TaskStore` persisted in a SQLite database.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (or create) the database file at `path` and make sure the schema
    /// exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        debug!(path = %path.display(), "opened sqlite task store");
        Self::with_pool(pool).await
    }

    /// Private in-memory database. The pool is pinned to one connection that
    /// never expires, since the database lives and dies with it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool; creates the schema if missing.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in [CREATE_TABLE, CREATE_STATUS_INDEX, CREATE_RETRY_INDEX] {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {millis}")))
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let retry_count = u32::try_from(retry_count)
        .map_err(|_| StoreError::Corrupt(format!("retry_count out of range: {retry_count}")))?;
    let next_retry_at = row
        .try_get::<Option<i64>, _>("next_retry_at")?
        .map(|millis| from_millis("next_retry_at", millis))
        .transpose()?;

    Ok(Task {
        id: TaskId::new(row.try_get("id")?),
        payload: row.try_get("task_data")?,
        status,
        retry_count,
        created_at: from_millis("created_at", row.try_get("created_at")?)?,
        updated_at: from_millis("updated_at", row.try_get("updated_at")?)?,
        next_retry_at,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, payload: &str, now: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (task_data, status, retry_count, created_at, updated_at, next_retry_at)
            VALUES (?1, 'pending', 0, ?2, ?2, NULL)
            "#,
        )
        .bind(payload)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(TaskId::new(result.last_insert_rowid()))
    }

    async fn select_ready(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE status = 'pending'
               OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1)
            ORDER BY created_at ASC, id ASC
            LIMIT ?2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(to_millis(now))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?1, retry_count = ?2, next_retry_at = ?3, updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(i64::from(retry_count))
        .bind(next_retry_at.map(to_millis))
        .bind(to_millis(now))
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn counts_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM tasks GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                let status = status
                    .parse::<TaskStatus>()
                    .map_err(|err| StoreError::Corrupt(err.to_string()))?;
                let count: i64 = row.try_get("count")?;
                Ok::<_, StoreError>(StatusCount {
                    status,
                    count: u64::try_from(count).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE status = 'completed' AND updated_at < ?1")
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn earliest_retry_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            "SELECT MIN(next_retry_at) AS soonest FROM tasks \
             WHERE status = 'failed' AND next_retry_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        row.try_get::<Option<i64>, _>("soonest")?
            .map(|millis| from_millis("next_retry_at", millis))
            .transpose()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
