//! Replay of persisted failures.

use super::MediaDownloader;
use crate::error::{Error, Result};
use crate::types::{BatchSummary, Task};
use std::sync::atomic::Ordering;

impl MediaDownloader {
    /// Re-attempt every task in the failed ledger
    ///
    /// Each failure record carries full item metadata, so tasks are
    /// rebuilt locally and run through the exact same worker-pool path
    /// as a fresh batch. A task that succeeds is removed from the
    /// failed ledger by the pipeline; one that fails again simply
    /// refreshes its record. Completed tasks are never touched —
    /// repair's work list comes only from the failed table.
    pub async fn repair(&self) -> Result<BatchSummary> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let records = self.store.list_failed().await?;
        let mut tasks: Vec<Task> = Vec::with_capacity(records.len());
        for record in records {
            match record.to_task() {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    // An unreadable record is left in place for inspection
                    // rather than silently deleted
                    tracing::warn!(error = %e, "Skipping failure record that cannot be rebuilt");
                }
            }
        }

        if tasks.is_empty() {
            tracing::info!("No failed downloads to repair");
            let summary = BatchSummary::default();
            self.emit_summary(&summary);
            return Ok(summary);
        }

        tracing::info!(tasks = tasks.len(), "Repairing failed downloads");
        let summary = self.run_batch(tasks, false).await?;
        self.emit_summary(&summary);

        tracing::info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Repair batch finished"
        );
        Ok(summary)
    }
}
