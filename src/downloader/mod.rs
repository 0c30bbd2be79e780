//! Core downloader implementation split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`worker_pool`] - bounded-concurrency batch execution
//! - [`pipeline`] - the six-step single-task download pipeline
//! - [`repair`] - replay of persisted failures
//! - [`lifecycle`] - shutdown coordination

mod lifecycle;
mod pipeline;
mod repair;
mod worker_pool;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Store;
use crate::error::{Error, Result};
use crate::postprocess::PostProcessor;
use crate::progress::{ProgressBus, ProgressSink};
use crate::provider::ProviderRegistry;
use crate::rate_limit::RateLimiter;
use crate::types::{BatchSummary, MediaItem, ProgressEvent, Task};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-call options for a download batch
#[derive(Clone, Debug, Default)]
pub struct DownloadOptions {
    /// Re-fetch items already present in the completed ledger
    ///
    /// ORed with `DownloadConfig::force_redownload`, so either the
    /// configuration or the call site can force a batch.
    pub force_redownload: bool,
}

/// Top-level download orchestrator
///
/// Owns the store, the progress bus, the per-provider rate limiter,
/// and the injected provider/post-processing capabilities. Cloneable -
/// all clones share the same components.
#[derive(Clone)]
pub struct MediaDownloader {
    pub(crate) store: Arc<Store>,
    pub(crate) bus: ProgressBus,
    pub(crate) limiter: RateLimiter,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) postprocessor: Arc<dyn PostProcessor>,
    pub(crate) config: Arc<Config>,
    pub(crate) cancel: tokio_util::sync::CancellationToken,
    pub(crate) shutting_down: Arc<AtomicBool>,
}

impl MediaDownloader {
    /// Create a new `MediaDownloader` instance
    ///
    /// Validates the configuration, creates the download and temp
    /// directories, opens the ledger database (running migrations),
    /// and spawns the progress consumer.
    pub async fn new(
        config: Config,
        providers: ProviderRegistry,
        postprocessor: Arc<dyn PostProcessor>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.folder)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.folder.display(),
                        e
                    ),
                ))
            })?;
        tokio::fs::create_dir_all(&config.download.temp_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.download.temp_dir.display(),
                        e
                    ),
                ))
            })?;

        let store = Store::new(&config.database).await?;
        let limiter = RateLimiter::new(&config);
        let bus = ProgressBus::new(&config.progress, sink);

        tracing::info!(
            providers = providers.len(),
            postprocessor = postprocessor.name(),
            concurrency = ?config.download.concurrency,
            "Downloader initialized"
        );

        Ok(Self {
            store: Arc::new(store),
            bus,
            limiter,
            providers: Arc::new(providers),
            postprocessor,
            config: Arc::new(config),
            cancel: tokio_util::sync::CancellationToken::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Download a batch of resolved items
    ///
    /// Builds one task per item, skips tasks already in the completed
    /// ledger (unless forced), runs the rest through the worker pool,
    /// and emits a [`ProgressEvent::BatchSummary`] when done.
    ///
    /// Per-task failures never surface here — they are folded into the
    /// returned [`BatchSummary`]. An `Err` means the batch itself could
    /// not run (store unavailable, shutdown in progress).
    pub async fn download(
        &self,
        items: Vec<MediaItem>,
        options: &DownloadOptions,
    ) -> Result<BatchSummary> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let force = options.force_redownload || self.config.download.force_redownload;
        let tasks: Vec<Task> = items.iter().map(|item| self.build_task(item)).collect();

        tracing::info!(tasks = tasks.len(), force, "Starting download batch");
        let summary = self.run_batch(tasks, force).await?;
        self.emit_summary(&summary);

        tracing::info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis(),
            "Download batch finished"
        );
        Ok(summary)
    }

    /// Access the underlying ledger store
    ///
    /// Public for embedders that want to display history or counts.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Number of progress events dropped because the queue was full
    pub fn dropped_progress_events(&self) -> u64 {
        self.bus.dropped_events()
    }

    /// Token cancelled when the user interrupts or shutdown begins
    ///
    /// Cancelling it makes in-flight workers stop initiating new
    /// pipeline steps; already-completed tasks stay recorded.
    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel.clone()
    }

    /// Compute a task's destination and identity from a resolved item
    fn build_task(&self, item: &MediaItem) -> Task {
        let mut folder = self.config.download.folder.clone();
        if self.config.download.source_subdirectories {
            folder.push(item.provider.as_str());
        }
        Task::new(item, folder.join(&item.file_name))
    }

    /// Publish the end-of-batch summary event
    pub(crate) fn emit_summary(&self, summary: &BatchSummary) {
        self.bus.publish(ProgressEvent::BatchSummary {
            completed: summary.completed,
            skipped: summary.skipped,
            failed: summary.failed,
        });
    }
}
