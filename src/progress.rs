//! Progress bus decoupling download workers from rendering
//!
//! Workers never touch shared UI state. They publish
//! [`ProgressEvent`]s onto a bounded queue; a single background
//! consumer drains the queue, batches events, and forwards them to an
//! injected [`ProgressSink`]. Two invariants hold no matter what the
//! sink does:
//!
//! - `publish` never blocks a worker: a full queue drops the event and
//!   increments a counter instead.
//! - A failing or slow sink never propagates into the download path:
//!   delivery errors are logged and the consumer keeps going.
//!
//! [`ProgressBus::close`] stops publication, lets the consumer drain
//! everything already queued, and waits for it to exit — callers close
//! the bus before reporting final statistics so no event is lost on a
//! clean shutdown.

use crate::config::ProgressConfig;
use crate::error::Result;
use crate::types::ProgressEvent;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Consumer of batched progress events
///
/// Implementations render progress bars, push server-sent events,
/// forward to a logging pipeline — anything. The bus tolerates slow
/// and failing sinks; it never waits on one from a worker.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    /// Deliver one batch of events, in publication order
    async fn deliver(&self, batch: Vec<ProgressEvent>) -> Result<()>;
}

/// Sink that logs each event at debug level
///
/// The default choice for headless embedding and tests.
pub struct TracingSink;

#[async_trait::async_trait]
impl ProgressSink for TracingSink {
    async fn deliver(&self, batch: Vec<ProgressEvent>) -> Result<()> {
        for event in batch {
            tracing::debug!(event = ?event, "progress");
        }
        Ok(())
    }
}

struct BusInner {
    /// Publisher side of the queue; taken (and dropped) by `close`
    tx: StdMutex<Option<mpsc::Sender<ProgressEvent>>>,
    /// Events discarded because the queue was full or the bus closed
    dropped: AtomicU64,
    /// Consumer task handle, awaited once by `close`
    consumer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the progress bus (cloneable - all clones share one queue)
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl ProgressBus {
    /// Create the bus and spawn its consumer task
    pub fn new(config: &ProgressConfig, sink: Arc<dyn ProgressSink>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = spawn_consumer(rx, sink, config.flush_interval, config.flush_threshold);

        Self {
            inner: Arc::new(BusInner {
                tx: StdMutex::new(Some(tx)),
                dropped: AtomicU64::new(0),
                consumer: tokio::sync::Mutex::new(Some(handle)),
            }),
        }
    }

    /// Publish one event without blocking
    ///
    /// On a full queue (or after `close`) the event is dropped and
    /// counted; download correctness never depends on progress
    /// delivery.
    pub fn publish(&self, event: ProgressEvent) {
        let guard = match self.inner.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if let Err(e) = tx.try_send(event) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::trace!("Progress queue full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::trace!("Progress consumer gone, dropping event");
                }
            }
        }
    }

    /// Number of events dropped so far (full queue or closed bus)
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Stop publication, drain queued events to the sink, and wait for
    /// the consumer to exit
    ///
    /// Idempotent; later calls (and later `publish` calls) are no-ops
    /// apart from the drop counter.
    pub async fn close(&self) {
        // Dropping the only sender ends the consumer's recv loop once
        // the queue is drained. The std lock is released before any await.
        let tx = {
            let mut guard = match self.inner.tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        drop(tx);

        let handle = self.inner.consumer.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Progress consumer task failed");
            }
        }
    }
}

/// Spawn the single consumer task that batches events toward the sink
fn spawn_consumer(
    mut rx: mpsc::Receiver<ProgressEvent>,
    sink: Arc<dyn ProgressSink>,
    flush_interval: std::time::Duration,
    flush_threshold: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<ProgressEvent> = Vec::with_capacity(flush_threshold);
        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(event) = msg else {
                        // All publishers dropped — drain and exit
                        break;
                    };
                    buffer.push(event);

                    if buffer.len() >= flush_threshold {
                        flush(&sink, &mut buffer).await;
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        flush(&sink, &mut buffer).await;
                    }
                }
            }
        }

        // Final flush of anything still buffered after channel close
        while let Ok(event) = rx.try_recv() {
            buffer.push(event);
        }
        if !buffer.is_empty() {
            flush(&sink, &mut buffer).await;
        }
    })
}

/// Hand the buffered events to the sink; a sink failure is logged and
/// forgotten so the consumer keeps draining
async fn flush(sink: &Arc<dyn ProgressSink>, buffer: &mut Vec<ProgressEvent>) {
    let batch: Vec<ProgressEvent> = buffer.drain(..).collect();
    let batch_size = batch.len();
    if let Err(e) = sink.deliver(batch).await {
        tracing::warn!(batch_size, error = %e, "Progress sink failed, continuing");
    }
}
