//! Database layer for media-dl
//!
//! SQLite persistence for the download ledgers. Two physical tables,
//! keyed by task id:
//!
//! - `completed` — dedup ledger; a task present here is never
//!   re-fetched unless the caller forces a re-download
//! - `failed` — repair ledger; rows carry enough item metadata for
//!   [`repair`](crate::downloader::MediaDownloader::repair) to rebuild
//!   the task without re-resolving anything upstream
//!
//! Each table can be disabled independently via
//! [`DatabaseConfig`](crate::config::DatabaseConfig); a disabled table
//! reads as empty and swallows writes. Writes commit before the
//! corresponding outcome is reported, so a crash after a recorded
//! success never causes a re-download, and a crash before one leaves
//! the task correctly retryable.
//!
//! ## Submodules
//!
//! Methods on [`Store`] are organized by domain:
//! - [`migrations`] — store lifecycle, schema migrations
//! - [`completed`] — dedup ledger reads/writes
//! - [`failed`] — repair ledger reads/writes

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::types::{MediaKind, Provider, Quality, Task, TaskId};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;

mod completed;
mod failed;
mod migrations;

/// A persisted download record, as read back from the failed ledger
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Stable task identity
    pub task_id: TaskId,
    /// Provider name (see [`Provider::as_str`])
    pub provider: String,
    /// Provider-scoped item identifier
    pub item_id: String,
    /// Display label
    pub label: String,
    /// Quality tier
    pub quality: i64,
    /// Media kind name (see [`MediaKind::as_str`])
    pub kind: String,
    /// Final destination path
    pub destination: String,
    /// Failure classification name (see [`FailureKind::as_str`](crate::types::FailureKind::as_str))
    pub error_kind: String,
    /// Failure message
    pub message: String,
    /// Unix timestamp when the failure was recorded
    pub failed_at: i64,
}

impl DownloadRecord {
    /// Rebuild the task this record was written for
    ///
    /// Fails with [`Error::InvalidRecord`] when the stored provider or
    /// kind name no longer parses (e.g., a record written by a newer
    /// version with providers this build does not know).
    pub fn to_task(&self) -> Result<Task> {
        let provider = Provider::from_name(&self.provider).ok_or_else(|| Error::InvalidRecord {
            task_id: self.task_id.as_str().to_string(),
            reason: format!("unknown provider '{}'", self.provider),
        })?;
        let kind = MediaKind::from_name(&self.kind).ok_or_else(|| Error::InvalidRecord {
            task_id: self.task_id.as_str().to_string(),
            reason: format!("unknown media kind '{}'", self.kind),
        })?;
        let quality = u8::try_from(self.quality).map_err(|_| Error::InvalidRecord {
            task_id: self.task_id.as_str().to_string(),
            reason: format!("quality {} out of range", self.quality),
        })?;

        Ok(Task {
            id: self.task_id.clone(),
            provider,
            item_id: self.item_id.clone(),
            label: self.label.clone(),
            destination: PathBuf::from(&self.destination),
            quality: Quality(quality),
            kind,
        })
    }
}

/// Durable ledger of completed and failed tasks
///
/// All access goes through one SQLite connection pool, which
/// serializes writes to the backing file; concurrent workers write
/// disjoint task ids so no cross-task conflict arises.
pub struct Store {
    pool: SqlitePool,
    completed_enabled: bool,
    failed_enabled: bool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
