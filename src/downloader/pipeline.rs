//! The six-step single-task download pipeline.
//!
//! Each worker runs one task through:
//! 1. dedup check against the completed ledger (and the filesystem)
//! 2. per-provider rate gate
//! 3. streaming fetch to a `.part` file with throttled progress events
//! 4. post-processing (conversion, tagging) on the temp file
//! 5. atomic promotion of the processed file to the final destination
//! 6. outcome recording and the `Finished` event
//!
//! A failed or interrupted task can leave at worst a `.part` file in
//! the temp directory — the final destination is only ever written by
//! the atomic rename in step 5, after post-processing succeeded.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::db::Store;
use crate::error::FetchError;
use crate::postprocess::PostProcessor;
use crate::progress::ProgressBus;
use crate::provider::{ProviderFetch, ProviderRegistry};
use crate::rate_limit::RateLimiter;
use crate::retry::{IsRetryable, fetch_with_retry};
use crate::types::{DownloadOutcome, FailureKind, OutcomeStatus, ProgressEvent, Task};

/// Shared context for a single download task, reducing parameter passing between helpers.
pub(crate) struct TaskContext {
    pub(crate) task: Task,
    pub(crate) store: Arc<Store>,
    pub(crate) bus: ProgressBus,
    pub(crate) limiter: RateLimiter,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) postprocessor: Arc<dyn PostProcessor>,
    pub(crate) config: Arc<Config>,
    pub(crate) cancel: tokio_util::sync::CancellationToken,
    pub(crate) force: bool,
}

/// Error surface of one streaming attempt
#[derive(Debug)]
enum StreamError {
    /// The batch was cancelled mid-stream
    Cancelled,
    /// The fetch itself failed
    Fetch(FetchError),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Cancelled => write!(f, "cancelled"),
            StreamError::Fetch(e) => write!(f, "{e}"),
        }
    }
}

impl IsRetryable for StreamError {
    fn is_retryable(&self) -> bool {
        match self {
            StreamError::Cancelled => false,
            StreamError::Fetch(e) => e.is_retryable(),
        }
    }
}

/// Run one task through the full pipeline.
///
/// Returns `None` when the task was abandoned by cancellation before
/// reaching a terminal status — nothing is recorded and the task stays
/// retryable. Every other path produces exactly one outcome.
pub(crate) async fn execute_task(ctx: TaskContext) -> Option<DownloadOutcome> {
    let started = Instant::now();
    let task = &ctx.task;

    // Step 1: skip work that is already done
    if !ctx.force {
        if let Some(outcome) = check_already_done(&ctx).await {
            return Some(outcome);
        }
    } else {
        // Forced re-fetch: drop the stale completion so the ledger
        // reflects reality if we crash mid-way
        if let Err(e) = ctx.store.forget_completed(&task.id).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to drop stale completion record");
        }
    }

    if ctx.cancel.is_cancelled() {
        return None;
    }

    let Some(fetcher) = ctx.providers.get(task.provider) else {
        tracing::error!(task_id = %task.id, provider = %task.provider, "No fetch capability registered");
        return Some(
            fail_task(
                &ctx,
                FailureKind::NotFound,
                format!("no fetch capability registered for provider {}", task.provider),
                started,
            )
            .await,
        );
    };

    // Steps 2+3: rate-gated streaming fetch with retry/re-queue
    let temp_path = ctx
        .config
        .download
        .temp_dir
        .join(format!("{}.part", task.id));

    let bytes = match gated_fetch(&ctx, fetcher.as_ref(), &temp_path).await {
        Ok(bytes) => bytes,
        Err(StreamError::Cancelled) => {
            tracing::debug!(task_id = %task.id, "Fetch cancelled, leaving temp file for cleanup");
            return None;
        }
        Err(StreamError::Fetch(err)) => {
            if matches!(err, FetchError::Auth(_)) {
                // Auth failures poison every task on this account; stop
                // the batch instead of burning through the whole list
                tracing::error!(task_id = %task.id, provider = %task.provider, error = %err, "Authentication failed, cancelling batch");
                ctx.cancel.cancel();
            }
            remove_quietly(&temp_path).await;
            return Some(fail_task(&ctx, err.failure_kind(), err.to_string(), started).await);
        }
    };

    if ctx.cancel.is_cancelled() {
        return None;
    }

    // Step 4: post-process (conversion, tagging) on the temp file
    let processed = match ctx.postprocessor.process(&temp_path, task).await {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "Post-processing failed");
            remove_quietly(&temp_path).await;
            return Some(fail_task(&ctx, FailureKind::Postprocess, e.to_string(), started).await);
        }
    };

    if ctx.cancel.is_cancelled() {
        remove_quietly(&processed).await;
        return None;
    }

    // Step 5: atomic promotion to the final destination
    if let Err(e) = promote(&processed, &task.destination).await {
        tracing::error!(task_id = %task.id, destination = %task.destination.display(), error = %e, "Failed to move file into place");
        remove_quietly(&processed).await;
        remove_quietly(&temp_path).await;
        return Some(
            fail_task(
                &ctx,
                FailureKind::Transient,
                format!("failed to move into place: {e}"),
                started,
            )
            .await,
        );
    }
    if processed != temp_path {
        remove_quietly(&temp_path).await;
    }

    // Step 6: durable success record, then the Finished event
    if let Err(e) = ctx.store.record_success(task, bytes).await {
        // The file is in place but the ledger write failed; report the
        // task failed so the caller knows dedup state is not durable
        tracing::error!(task_id = %task.id, error = %e, "Downloaded but failed to record success");
        let outcome = DownloadOutcome::failed(
            task.id.clone(),
            FailureKind::Transient,
            format!("downloaded but failed to record success: {e}"),
            started.elapsed(),
        );
        ctx.bus.publish(ProgressEvent::Finished {
            task_id: task.id.clone(),
            status: OutcomeStatus::Failed,
        });
        return Some(outcome);
    }

    // A success removes the task from the repair ledger. On forced
    // batches this is governed by an explicit configuration flag.
    if !ctx.force || ctx.config.database.clear_failure_on_force {
        if let Err(e) = ctx.store.clear_failure(&task.id).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to clear stale failure record");
        }
    }

    ctx.bus.publish(ProgressEvent::Finished {
        task_id: task.id.clone(),
        status: OutcomeStatus::Completed,
    });
    tracing::info!(
        task_id = %task.id,
        label = %task.label,
        bytes,
        elapsed_ms = started.elapsed().as_millis(),
        "Download complete"
    );

    Some(DownloadOutcome::completed(
        task.id.clone(),
        bytes,
        started.elapsed(),
    ))
}

/// Step 1: report the task skipped if the ledger or the filesystem
/// already has it. A file found on disk back-fills the ledger.
async fn check_already_done(ctx: &TaskContext) -> Option<DownloadOutcome> {
    let task = &ctx.task;

    let completed = match ctx.store.is_completed(&task.id).await {
        Ok(completed) => completed,
        Err(e) => {
            // Treat an unreadable ledger as "unknown" and fetch anyway;
            // re-downloading is safer than silently skipping
            tracing::warn!(task_id = %task.id, error = %e, "Completed-ledger read failed, not skipping");
            false
        }
    };

    if completed {
        tracing::debug!(task_id = %task.id, "Already in completed ledger, skipping");
        return Some(skip_task(ctx).await);
    }

    // The file may exist even when the ledger was wiped or disabled
    if tokio::fs::try_exists(&task.destination).await.unwrap_or(false) {
        tracing::debug!(task_id = %task.id, destination = %task.destination.display(), "Destination already exists, back-filling ledger");
        if let Err(e) = ctx.store.record_success(task, 0).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to back-fill completed record");
        }
        return Some(skip_task(ctx).await);
    }

    None
}

/// Emit and build a skipped outcome, clearing any stale failure row so
/// `repair` does not keep replaying a task that is already done.
async fn skip_task(ctx: &TaskContext) -> DownloadOutcome {
    let task = &ctx.task;
    if let Err(e) = ctx.store.clear_failure(&task.id).await {
        tracing::warn!(task_id = %task.id, error = %e, "Failed to clear stale failure record");
    }
    ctx.bus.publish(ProgressEvent::Finished {
        task_id: task.id.clone(),
        status: OutcomeStatus::Skipped,
    });
    DownloadOutcome::skipped(task.id.clone())
}

/// Steps 2+3: acquire the provider gate, then stream the payload to the
/// temp file. Transient failures retry with backoff inside one grant;
/// provider-side rate limiting goes back through the gate without
/// consuming the transient budget, up to its own bound.
async fn gated_fetch(
    ctx: &TaskContext,
    fetcher: &dyn ProviderFetch,
    temp_path: &Path,
) -> std::result::Result<u64, StreamError> {
    let task = &ctx.task;
    let mut rate_limited_attempts: u32 = 0;

    loop {
        // Step 2: the gate may suspend until the provider window refills
        tokio::select! {
            _ = ctx.limiter.acquire(task.provider) => {}
            _ = ctx.cancel.cancelled() => return Err(StreamError::Cancelled),
        }

        // Step 3: stream, retrying transient failures with backoff
        let attempt =
            fetch_with_retry(&ctx.config.retry, || stream_once(ctx, fetcher, temp_path)).await;

        match attempt {
            Ok(bytes) => return Ok(bytes),
            Err(StreamError::Fetch(FetchError::RateLimited { retry_after })) => {
                rate_limited_attempts += 1;
                if rate_limited_attempts > ctx.config.retry.rate_limited_max_attempts {
                    return Err(StreamError::Fetch(FetchError::RateLimited { retry_after }));
                }
                tracing::warn!(
                    task_id = %task.id,
                    provider = %task.provider,
                    attempt = rate_limited_attempts,
                    retry_after = ?retry_after,
                    "Provider rate limited the fetch, re-queueing behind the gate"
                );
                if let Some(wait) = retry_after {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = ctx.cancel.cancelled() => return Err(StreamError::Cancelled),
                    }
                }
            }
            Err(other) => return Err(other),
        }
    }
}

/// One streaming attempt: create (truncate) the temp file and write the
/// payload chunk by chunk, publishing throttled progress events.
async fn stream_once(
    ctx: &TaskContext,
    fetcher: &dyn ProviderFetch,
    temp_path: &Path,
) -> std::result::Result<u64, StreamError> {
    let task = &ctx.task;

    let handle = fetcher
        .fetch(&task.item_id, task.quality)
        .await
        .map_err(StreamError::Fetch)?;
    let total_bytes = handle.total_bytes;

    // Truncating create: a retried attempt restarts from a clean file
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| StreamError::Fetch(FetchError::Io(e)))?;

    ctx.bus.publish(ProgressEvent::Started {
        task_id: task.id.clone(),
        label: task.label.clone(),
        total_bytes,
    });

    let fetch_started = Instant::now();
    let mut last_emit = Instant::now();
    let mut bytes: u64 = 0;
    let mut stream = handle.stream;

    while let Some(chunk) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let chunk = chunk.map_err(StreamError::Fetch)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| StreamError::Fetch(FetchError::Io(e)))?;
        bytes += chunk.len() as u64;

        // Throttled, not per-chunk: a fast stream must not flood the bus
        if last_emit.elapsed() >= ctx.config.progress.min_event_interval {
            let elapsed = fetch_started.elapsed().as_secs_f64();
            let bytes_per_sec = if elapsed > 0.0 {
                (bytes as f64 / elapsed) as u64
            } else {
                0
            };
            ctx.bus.publish(ProgressEvent::Progress {
                task_id: task.id.clone(),
                bytes,
                total_bytes,
                bytes_per_sec,
            });
            last_emit = Instant::now();
        }
    }

    // The temp file must be durable before it can be promoted
    file.flush()
        .await
        .map_err(|e| StreamError::Fetch(FetchError::Io(e)))?;
    file.sync_all()
        .await
        .map_err(|e| StreamError::Fetch(FetchError::Io(e)))?;

    Ok(bytes)
}

/// Step 5: move the processed file onto its final path.
///
/// Plain rename when temp and destination share a filesystem. The
/// cross-device fallback copies to a staging sibling of the destination
/// and renames that, so the final path is only ever written atomically.
async fn promote(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            let file_name = destination
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("download");
            let staging = destination.with_file_name(format!("{file_name}.incoming"));

            tracing::debug!(
                source = %source.display(),
                error = %rename_err,
                "Rename failed, falling back to copy via staging file"
            );

            tokio::fs::copy(source, &staging).await?;
            let staged = tokio::fs::File::open(&staging).await?;
            staged.sync_all().await?;
            drop(staged);

            tokio::fs::rename(&staging, destination).await?;
            tokio::fs::remove_file(source).await.ok();
            Ok(())
        }
    }
}

/// Record a failure in the repair ledger and emit the Finished event.
async fn fail_task(
    ctx: &TaskContext,
    kind: FailureKind,
    message: String,
    started: Instant,
) -> DownloadOutcome {
    let task = &ctx.task;

    if let Err(e) = ctx.store.record_failure(task, kind, &message).await {
        tracing::error!(task_id = %task.id, error = %e, "Failed to record failure");
    }

    ctx.bus.publish(ProgressEvent::Finished {
        task_id: task.id.clone(),
        status: OutcomeStatus::Failed,
    });
    tracing::warn!(
        task_id = %task.id,
        label = %task.label,
        kind = %kind,
        message = %message,
        "Download failed"
    );

    DownloadOutcome::failed(task.id.clone(), kind, message, started.elapsed())
}

/// Best-effort removal of an intermediate file.
async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove intermediate file");
        }
    }
}
