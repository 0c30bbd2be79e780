//! Dedup ledger operations.

use crate::error::{Error, Result};
use crate::types::{Task, TaskId};

use super::Store;

impl Store {
    /// Whether a task is recorded as completed
    ///
    /// Always false when the completed ledger is disabled.
    pub async fn is_completed(&self, task_id: &TaskId) -> Result<bool> {
        if !self.completed_enabled {
            return Ok(false);
        }

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM completed WHERE task_id = ?")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(count > 0)
    }

    /// Record a task as completed
    ///
    /// Upserts, so forced re-downloads simply refresh the row. A no-op
    /// when the completed ledger is disabled.
    pub async fn record_success(&self, task: &Task, bytes_transferred: u64) -> Result<()> {
        if !self.completed_enabled {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO completed (
                task_id, provider, item_id, label, quality, kind,
                destination, bytes_transferred, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                bytes_transferred = excluded.bytes_transferred,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&task.id)
        .bind(task.provider.as_str())
        .bind(&task.item_id)
        .bind(&task.label)
        .bind(i64::from(task.quality.get()))
        .bind(task.kind.as_str())
        .bind(task.destination.to_string_lossy().into_owned())
        .bind(bytes_transferred as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Remove a task from the completed ledger
    ///
    /// Used when the caller forces a re-download of a known item.
    /// Returns whether a row was actually removed.
    pub async fn forget_completed(&self, task_id: &TaskId) -> Result<bool> {
        if !self.completed_enabled {
            return Ok(false);
        }

        let result = sqlx::query("DELETE FROM completed WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of completed records
    pub async fn count_completed(&self) -> Result<i64> {
        if !self.completed_enabled {
            return Ok(0);
        }

        sqlx::query_scalar("SELECT COUNT(*) FROM completed")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}
