//! Shared test helpers for driving MediaDownloader against scripted providers.

use crate::config::Config;
use crate::downloader::MediaDownloader;
use crate::error::{FetchError, PostProcessError, Result};
use crate::postprocess::{NoopPostProcessor, PostProcessor};
use crate::progress::ProgressSink;
use crate::provider::{FetchHandle, ProviderFetch, ProviderRegistry};
use crate::types::{MediaItem, MediaKind, ProgressEvent, Provider, Quality, Task};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tempfile::TempDir;

/// One scripted answer for a fetch call
#[derive(Clone, Debug)]
pub(crate) enum ScriptedResult {
    /// Succeed with this payload
    Payload(Vec<u8>),
    /// Fail with an auth error
    Auth,
    /// Fail with a not-found error
    NotFound,
    /// Fail with a provider-side rate limit
    RateLimited,
    /// Fail with a transient error
    Transient,
}

/// Scripted [`ProviderFetch`]: per-item answer queues, consumed front to
/// back with the last entry repeating. Unscripted items answer NotFound.
pub(crate) struct ScriptedFetch {
    provider: Provider,
    scripts: StdMutex<HashMap<String, Vec<ScriptedResult>>>,
    fetch_calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedFetch {
    pub(crate) fn new(provider: Provider) -> Self {
        Self {
            provider,
            scripts: StdMutex::new(HashMap::new()),
            fetch_calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Sleep this long inside every fetch call (to exercise cancellation)
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue answers for one item id
    pub(crate) fn script(&self, item_id: &str, results: Vec<ScriptedResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), results);
    }

    /// Total number of fetch calls issued against this provider
    pub(crate) fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn next_result(&self, item_id: &str) -> ScriptedResult {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(item_id) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => ScriptedResult::NotFound,
        }
    }
}

#[async_trait::async_trait]
impl ProviderFetch for ScriptedFetch {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(
        &self,
        item_id: &str,
        _quality: Quality,
    ) -> std::result::Result<FetchHandle, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_result(item_id) {
            ScriptedResult::Payload(data) => Ok(FetchHandle::from_bytes(data)),
            ScriptedResult::Auth => Err(FetchError::Auth("scripted auth failure".into())),
            ScriptedResult::NotFound => {
                Err(FetchError::NotFound(format!("scripted: {item_id} not found")))
            }
            ScriptedResult::RateLimited => Err(FetchError::RateLimited { retry_after: None }),
            ScriptedResult::Transient => {
                Err(FetchError::Transient("scripted transient failure".into()))
            }
        }
    }
}

/// Sink that records every delivered event, flattened in order
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: StdMutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProgressSink for RecordingSink {
    async fn deliver(&self, batch: Vec<ProgressEvent>) -> Result<()> {
        self.events.lock().unwrap().extend(batch);
        Ok(())
    }
}

/// Post-processor that always fails
pub(crate) struct FailingPostProcessor;

#[async_trait::async_trait]
impl PostProcessor for FailingPostProcessor {
    fn name(&self) -> &str {
        "failing"
    }

    async fn process(
        &self,
        temp_path: &Path,
        _task: &Task,
    ) -> std::result::Result<PathBuf, PostProcessError> {
        Err(PostProcessError::Conversion {
            path: temp_path.to_path_buf(),
            reason: "scripted conversion failure".into(),
        })
    }
}

/// Post-processor that "converts" by copying the temp file to a sibling
/// with a different extension — exercises promotion of a processed path
pub(crate) struct ExtensionSwapProcessor;

#[async_trait::async_trait]
impl PostProcessor for ExtensionSwapProcessor {
    fn name(&self) -> &str {
        "extension-swap"
    }

    async fn process(
        &self,
        temp_path: &Path,
        _task: &Task,
    ) -> std::result::Result<PathBuf, PostProcessError> {
        let out = temp_path.with_extension("converted");
        tokio::fs::copy(temp_path, &out).await?;
        Ok(out)
    }
}

/// A fully wired downloader over temp directories.
/// The `TempDir` must be kept alive for the duration of the test.
pub(crate) struct TestHarness {
    pub(crate) downloader: MediaDownloader,
    pub(crate) fetch: Arc<ScriptedFetch>,
    pub(crate) sink: Arc<RecordingSink>,
    #[allow(dead_code)]
    pub(crate) dir: TempDir,
}

/// Test configuration rooted in a temp directory, with fast retries
pub(crate) fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.folder = dir.path().join("downloads");
    config.download.temp_dir = dir.path().join("temp");
    config.database.path = dir.path().join("ledger.db");
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.progress.min_event_interval = Duration::from_millis(0);
    config.progress.flush_interval = Duration::from_millis(10);
    config
}

/// Build a harness with a custom post-processor and config tweaks
pub(crate) async fn harness_with(
    fetch: Arc<ScriptedFetch>,
    postprocessor: Arc<dyn PostProcessor>,
    mutate: impl FnOnce(&mut Config),
) -> TestHarness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    mutate(&mut config);

    let sink = Arc::new(RecordingSink::default());
    let registry = ProviderRegistry::new().with_provider(fetch.clone());
    let downloader = MediaDownloader::new(config, registry, postprocessor, sink.clone())
        .await
        .unwrap();

    TestHarness {
        downloader,
        fetch,
        sink,
        dir,
    }
}

/// Build a harness with default test config and no-op post-processing
pub(crate) async fn harness(fetch: Arc<ScriptedFetch>) -> TestHarness {
    harness_with(fetch, Arc::new(NoopPostProcessor), |_| {}).await
}

/// A resolved audio item for the given provider
pub(crate) fn audio_item(provider: Provider, item_id: &str) -> MediaItem {
    MediaItem {
        provider,
        item_id: item_id.to_string(),
        label: format!("Track {item_id}"),
        file_name: format!("{item_id}.flac"),
        quality: Quality(1),
        kind: MediaKind::Audio,
    }
}

/// Names of entries currently in a directory (empty if it is missing)
pub(crate) fn dir_entries(path: &Path) -> Vec<String> {
    match std::fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
