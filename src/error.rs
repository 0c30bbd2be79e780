//! Error types for media-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] — top-level error for orchestrator-facing operations
//! - [`DatabaseError`] — store connection/migration/query failures
//! - [`FetchError`] — the closed provider-fetch taxonomy (auth, not
//!   found, rate limited, transient)
//! - [`PostProcessError`] — conversion/tagging collaborator failures
//!
//! Per-task errors never escape the worker pool — they are converted
//! into [`DownloadOutcome`](crate::types::DownloadOutcome) values.
//! Only orchestrator-level failures (store unavailable, invalid
//! configuration) surface as `Err` to the caller.

use crate::types::FailureKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
///
/// This is the primary error type used throughout the library. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.folder")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Provider fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Post-processing error (conversion, tag writing)
    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted failure record could not be rebuilt into a task
    #[error("invalid download record for task {task_id}: {reason}")]
    InvalidRecord {
        /// The task id of the unusable record
        task_id: String,
        /// Why the record could not be reconstructed
        reason: String,
    },

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Provider fetch errors
///
/// This is the closed taxonomy every [`ProviderFetch`](crate::provider::ProviderFetch)
/// implementation must map its transport errors into. The worker pool
/// dispatches on these variants: `Auth` trips the batch cancellation
/// token, `NotFound` is terminal for the task, `RateLimited` is
/// re-queued behind the rate limiter, and `Transient`/`Network`/`Io`
/// are retried with exponential backoff.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Authentication or authorization failure (expired token, bad credentials)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The item does not exist or is not streamable at the requested quality
    #[error("item not found: {0}")]
    NotFound(String),

    /// The provider rejected the request due to rate limiting
    #[error("rate limited by provider")]
    RateLimited {
        /// Server-suggested wait before retrying, if advertised
        retry_after: Option<Duration>,
    },

    /// Transient failure (connection reset, short read, server hiccup)
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// HTTP transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error while streaming the payload to disk
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Map this error to the [`FailureKind`] recorded in the store.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::Auth(_) => FailureKind::Auth,
            FetchError::NotFound(_) => FailureKind::NotFound,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::Transient(_) | FetchError::Network(_) | FetchError::Io(_) => {
                FailureKind::Transient
            }
        }
    }
}

/// Post-processing errors (conversion, tag writing)
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// Codec/container conversion failed
    #[error("conversion failed for {path}: {reason}")]
    Conversion {
        /// The file that failed to convert
        path: PathBuf,
        /// The reason conversion failed
        reason: String,
    },

    /// Metadata tag writing failed
    #[error("tagging failed for {path}: {reason}")]
    Tagging {
        /// The file that failed to tag
        path: PathBuf,
        /// The reason tagging failed
        reason: String,
    },

    /// I/O error during post-processing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
