//! Repair ledger operations.

use crate::error::{Error, Result};
use crate::types::{FailureKind, Task, TaskId};

use super::{DownloadRecord, Store};

impl Store {
    /// Whether a task has a recorded failure
    ///
    /// Always false when the failed ledger is disabled.
    pub async fn is_failed(&self, task_id: &TaskId) -> Result<bool> {
        if !self.failed_enabled {
            return Ok(false);
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(count > 0)
    }

    /// Record a task failure with its classification
    ///
    /// Upserts: a repeated failure refreshes the classification,
    /// message, and timestamp. The row carries full item metadata so
    /// `repair` can rebuild the task without upstream help. A no-op
    /// when the failed ledger is disabled.
    pub async fn record_failure(
        &self,
        task: &Task,
        kind: FailureKind,
        message: &str,
    ) -> Result<()> {
        if !self.failed_enabled {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO failed (
                task_id, provider, item_id, label, quality, kind,
                destination, error_kind, message, failed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                error_kind = excluded.error_kind,
                message = excluded.message,
                failed_at = excluded.failed_at
            "#,
        )
        .bind(&task.id)
        .bind(task.provider.as_str())
        .bind(&task.item_id)
        .bind(&task.label)
        .bind(i64::from(task.quality.get()))
        .bind(task.kind.as_str())
        .bind(task.destination.to_string_lossy().into_owned())
        .bind(kind.as_str())
        .bind(message)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Remove a task from the failed ledger
    ///
    /// Invoked the moment a previously-failed task succeeds. Returns
    /// whether a row was actually removed.
    pub async fn clear_failure(&self, task_id: &TaskId) -> Result<bool> {
        if !self.failed_enabled {
            return Ok(false);
        }

        let result = sqlx::query("DELETE FROM failed WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// All recorded failures, oldest first
    ///
    /// This is the work list for
    /// [`repair`](crate::downloader::MediaDownloader::repair). Empty
    /// when the failed ledger is disabled.
    pub async fn list_failed(&self) -> Result<Vec<DownloadRecord>> {
        if !self.failed_enabled {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, DownloadRecord>(
            r#"
            SELECT task_id, provider, item_id, label, quality, kind,
                   destination, error_kind, message, failed_at
            FROM failed
            ORDER BY failed_at ASC, task_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    /// Number of failed records
    pub async fn count_failed(&self) -> Result<i64> {
        if !self.failed_enabled {
            return Ok(0);
        }

        sqlx::query_scalar("SELECT COUNT(*) FROM failed")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}
