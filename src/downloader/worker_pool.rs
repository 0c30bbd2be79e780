//! Worker pool — bounded-concurrency execution of a task batch.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::MediaDownloader;
use super::pipeline::{self, TaskContext};
use crate::error::Result;
use crate::types::{BatchSummary, Task};

impl MediaDownloader {
    /// Execute one batch of tasks with bounded concurrency
    ///
    /// Maintains exactly `concurrency` in-flight task handlers (all at
    /// once when the sentinel `None` is configured). Each handler runs
    /// the full pipeline in [`pipeline::execute_task`]; its failures
    /// are converted to outcomes there, so nothing a single task does
    /// can abort its siblings.
    ///
    /// Cancellation is scoped to the batch via a child token: a batch
    /// cancelled mid-flight (user interrupt, fatal auth failure) stops
    /// spawning new handlers and counts the never-started tasks as
    /// `cancelled` without recording them anywhere — they remain
    /// retryable.
    pub(crate) async fn run_batch(&self, tasks: Vec<Task>, force: bool) -> Result<BatchSummary> {
        let started = Instant::now();
        let batch_cancel = self.cancel.child_token();
        let semaphore = self
            .config
            .download
            .concurrency
            .map(|n| Arc::new(Semaphore::new(n)));

        let mut summary = BatchSummary::default();
        let mut join_set: JoinSet<Option<crate::types::DownloadOutcome>> = JoinSet::new();

        let mut pending = tasks.into_iter();
        while let Some(task) = pending.next() {
            if batch_cancel.is_cancelled() {
                summary.cancelled += 1 + pending.len() as u64;
                break;
            }

            // Respect the concurrency bound before spawning, so the pool
            // holds `concurrency` live handlers rather than one task each
            let permit = match &semaphore {
                Some(semaphore) => {
                    let acquired = tokio::select! {
                        permit = semaphore.clone().acquire_owned() => permit.ok(),
                        _ = batch_cancel.cancelled() => None,
                    };
                    match acquired {
                        Some(permit) => Some(permit),
                        None => {
                            summary.cancelled += 1 + pending.len() as u64;
                            break;
                        }
                    }
                }
                None => None,
            };

            let ctx = TaskContext {
                task,
                store: Arc::clone(&self.store),
                bus: self.bus.clone(),
                limiter: self.limiter.clone(),
                providers: Arc::clone(&self.providers),
                postprocessor: Arc::clone(&self.postprocessor),
                config: Arc::clone(&self.config),
                cancel: batch_cancel.clone(),
                force,
            };

            join_set.spawn(async move {
                let _permit = permit;
                pipeline::execute_task(ctx).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(outcome)) => summary.record(&outcome),
                Ok(None) => summary.cancelled += 1,
                Err(e) => {
                    // A panicking handler is isolated here; its task is
                    // simply counted failed and the batch continues
                    tracing::error!(error = %e, "Download worker task aborted");
                    summary.failed += 1;
                }
            }
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}
