//! Shutdown coordination.

use super::MediaDownloader;
use crate::error::Result;
use std::sync::atomic::Ordering;

impl MediaDownloader {
    /// Gracefully shut down the downloader
    ///
    /// Sequence:
    /// 1. Stop accepting new batches
    /// 2. Cancel the batch token — in-flight workers stop initiating
    ///    new pipeline steps and leave no partially-moved final files;
    ///    work already recorded stays recorded
    /// 3. Close the progress bus, draining queued events to the sink
    ///    so nothing reported before shutdown is lost
    ///
    /// The ledger needs no explicit checkpoint: every outcome commits
    /// to SQLite at the moment it is recorded. The connection pool
    /// closes when the last clone of the downloader is dropped.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!("Stopped accepting new batches");

        self.cancel.cancel();
        tracing::info!("Signaled cancellation to in-flight workers");

        self.bus.close().await;
        tracing::info!("Progress bus drained");

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
