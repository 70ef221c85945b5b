//! SqliteCheckpointStore: SQLite persistence for workflow checkpoints.
//!
//! One row per task; the checkpoint body is stored as JSON.

use super::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CheckpointSummary};
use super::state::WorkflowState;
use crate::task::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite-backed checkpoint store.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) a store at the given path.
    pub async fn from_path(db_path: &std::path::Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Checkpoint store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for tests).
    pub async fn in_memory() -> Result<Self, CheckpointError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        debug!("In-memory sqlite checkpoint store initialized");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                task_id     TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                state       TEXT NOT NULL,
                version     INTEGER NOT NULL,
                body        TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_updated
             ON workflow_checkpoints(updated_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Io(format!("bad timestamp '{raw}': {e}")))
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let body = serde_json::to_string(checkpoint)?;
        let version = i64::try_from(checkpoint.version).unwrap_or(i64::MAX);

        // Upsert only when the incoming version is newer
        let result = sqlx::query(
            "INSERT INTO workflow_checkpoints
                (task_id, description, state, version, body, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(task_id) DO UPDATE SET
                description = excluded.description,
                state       = excluded.state,
                version     = excluded.version,
                body        = excluded.body,
                updated_at  = excluded.updated_at
             WHERE excluded.version > workflow_checkpoints.version",
        )
        .bind(checkpoint.task_id().to_string())
        .bind(&checkpoint.task.description)
        .bind(checkpoint.state.as_str())
        .bind(version)
        .bind(body)
        .bind(checkpoint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let stored: i64 = sqlx::query("SELECT version FROM workflow_checkpoints WHERE task_id = ?1")
                .bind(checkpoint.task_id().to_string())
                .fetch_one(&self.pool)
                .await?
                .try_get("version")?;
            return Err(CheckpointError::Stale {
                task_id: checkpoint.task_id(),
                version: checkpoint.version,
                stored: u64::try_from(stored).unwrap_or(0),
            });
        }
        debug!(
            task_id = %checkpoint.task_id(),
            state = %checkpoint.state,
            version = checkpoint.version,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query("SELECT body FROM workflow_checkpoints WHERE task_id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT task_id, description, state, version, updated_at
             FROM workflow_checkpoints ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CheckpointSummary, CheckpointError> {
                let task_id: String = row.try_get("task_id")?;
                let state: String = row.try_get("state")?;
                let version: i64 = row.try_get("version")?;
                let updated_at: String = row.try_get("updated_at")?;
                Ok(CheckpointSummary {
                    task_id: Uuid::parse_str(&task_id)
                        .map_err(|e| CheckpointError::Io(format!("bad task id '{task_id}': {e}")))?,
                    description: row.try_get("description")?,
                    state: state
                        .parse::<WorkflowState>()
                        .map_err(|e| CheckpointError::Io(e.to_string()))?,
                    version: u64::try_from(version).unwrap_or(0),
                    updated_at: parse_time(&updated_at)?,
                })
            })
            .collect()
    }

    async fn delete(&self, task_id: TaskId) -> Result<bool, CheckpointError> {
        let result = sqlx::query("DELETE FROM workflow_checkpoints WHERE task_id = ?1")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_older_than(&self, days: u32) -> Result<usize, CheckpointError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let result = sqlx::query(
            "DELETE FROM workflow_checkpoints
             WHERE updated_at < ?1 AND state IN ('done', 'failed')",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        let removed = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
        if removed > 0 {
            info!(removed, days, "old checkpoints cleaned up");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    async fn saved(store: &SqliteCheckpointStore, state: WorkflowState) -> Checkpoint {
        let mut cp = Checkpoint::new(Task::new("add pagination to the orders api"));
        cp.state = state;
        cp.touch();
        store.save(&cp).await.unwrap();
        cp
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        let mut cp = saved(&store, WorkflowState::Created).await;

        cp.state = WorkflowState::Planning;
        cp.touch();
        store.save(&cp).await.unwrap();

        let loaded = store.load(cp.task_id()).await.unwrap().unwrap();
        assert_eq!(loaded.state, WorkflowState::Planning);
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.task.description, cp.task.description);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_save_rejected() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        let cp = saved(&store, WorkflowState::Created).await;

        let err = store.save(&cp).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Stale { stored: 1, .. }));
    }

    #[tokio::test]
    async fn test_list_delete_and_cleanup() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        let running = saved(&store, WorkflowState::Executing).await;
        let mut done = Checkpoint::new(Task::new("rename the billing module"));
        done.state = WorkflowState::Done;
        done.touch();
        done.updated_at = Utc::now() - Duration::days(40);
        store.save(&done).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].task_id, running.task_id());

        assert_eq!(store.cleanup_older_than(30).await.unwrap(), 1);
        assert!(store.load(done.task_id()).await.unwrap().is_none());

        assert!(store.delete(running.task_id()).await.unwrap());
        assert!(!store.delete(running.task_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let cp = {
            let store = SqliteCheckpointStore::from_path(&path).await.unwrap();
            saved(&store, WorkflowState::ReadyForDispatch).await
        };

        let reopened = SqliteCheckpointStore::from_path(&path).await.unwrap();
        let loaded = reopened.load(cp.task_id()).await.unwrap().unwrap();
        assert_eq!(loaded.state, WorkflowState::ReadyForDispatch);
    }
}
