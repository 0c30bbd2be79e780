//! # media-dl
//!
//! Concurrent multi-provider streaming media download orchestration library.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Workers publish progress events; rendering is the consumer's job
//! - **Restart-safe** - Completed and failed work is persisted durably, so batches
//!   can be resumed and failed tasks repaired across process restarts
//! - **Transport-agnostic** - Providers are injected capabilities, not baked in
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_dl::{
//!     Config, DownloadOptions, HttpFetch, MediaDownloader, MediaItem, MediaKind,
//!     NoopPostProcessor, Provider, ProviderRegistry, Quality, TracingSink,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let providers = ProviderRegistry::new().with_provider(Arc::new(HttpFetch::new()?));
//!     let downloader = MediaDownloader::new(
//!         Config::default(),
//!         providers,
//!         Arc::new(NoopPostProcessor),
//!         Arc::new(TracingSink),
//!     )
//!     .await?;
//!
//!     let items = vec![MediaItem {
//!         provider: Provider::Generic,
//!         item_id: "https://example.com/track.flac".to_string(),
//!         label: "Example Track".to_string(),
//!         file_name: "track.flac".to_string(),
//!         quality: Quality(0),
//!         kind: MediaKind::Audio,
//!     }];
//!
//!     let summary = downloader.download(items, &DownloadOptions::default()).await?;
//!     println!("completed={} failed={}", summary.completed, summary.failed);
//!
//!     // Re-attempt anything that failed, then drain progress events
//!     let _ = downloader.repair().await?;
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer (completed/failed ledgers)
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Post-processing capability (conversion, tagging)
pub mod postprocess;
/// Progress bus and sink
pub mod progress;
/// Provider fetch capability
pub mod provider;
/// Per-provider request rate limiting
pub mod rate_limit;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, DownloadConfig, ProgressConfig, RetryConfig};
pub use db::{DownloadRecord, Store};
pub use downloader::{DownloadOptions, MediaDownloader};
pub use error::{DatabaseError, Error, FetchError, PostProcessError, Result};
pub use postprocess::{NoopPostProcessor, PostProcessor};
pub use progress::{ProgressBus, ProgressSink, TracingSink};
pub use provider::{ByteStream, FetchHandle, HttpFetch, ProviderFetch, ProviderRegistry};
pub use rate_limit::RateLimiter;
pub use types::{
    BatchSummary, DownloadOutcome, FailureKind, MediaItem, MediaKind, OutcomeStatus, ProgressEvent,
    Provider, Quality, Task, TaskId,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use media_dl::{
///     Config, MediaDownloader, NoopPostProcessor, ProviderRegistry, TracingSink,
///     run_with_shutdown,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::new(
///         Config::default(),
///         ProviderRegistry::new(),
///         Arc::new(NoopPostProcessor),
///         Arc::new(TracingSink),
///     )
///     .await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
