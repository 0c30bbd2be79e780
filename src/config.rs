//! Configuration types for media-dl
//!
//! Plain serde-derived structs with sensible defaults. The crate never
//! reads configuration files itself — parsing TOML/JSON and prompting
//! the user are the embedding application's job; it hands a [`Config`]
//! to [`MediaDownloader::new`](crate::downloader::MediaDownloader::new),
//! which validates it.

use crate::error::{Error, Result};
use crate::types::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Download behavior configuration (directories, concurrency, rate limits)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination directory for finished files (default: "./downloads")
    #[serde(default = "default_folder")]
    pub folder: PathBuf,

    /// Directory for in-flight `.part` files (default: "./temp")
    ///
    /// Keep this on the same filesystem as `folder` so the final move
    /// is a single atomic rename; a copy fallback is used otherwise.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum concurrently-executing tasks (default: 3, None = unlimited)
    #[serde(default = "default_concurrency")]
    pub concurrency: Option<usize>,

    /// Default outbound request budget per provider per minute (None = unlimited)
    ///
    /// `Some(0)` is a misconfiguration: the gate will suspend every
    /// caller forever rather than error.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Per-provider overrides of `requests_per_minute`
    #[serde(default)]
    pub provider_requests_per_minute: HashMap<Provider, u32>,

    /// Place finished files under a per-provider subdirectory (default: false)
    #[serde(default)]
    pub source_subdirectories: bool,

    /// Re-fetch items already present in the completed ledger (default: false)
    ///
    /// This is the batch-level default; it can be overridden per call
    /// via [`DownloadOptions`](crate::downloader::DownloadOptions).
    #[serde(default)]
    pub force_redownload: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            temp_dir: default_temp_dir(),
            concurrency: default_concurrency(),
            requests_per_minute: None,
            provider_requests_per_minute: HashMap::new(),
            source_subdirectories: false,
            force_redownload: false,
        }
    }
}

/// Store configuration (ledger location and table toggles)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path for the completed/failed ledgers
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Track completed downloads for dedup (default: true)
    ///
    /// When disabled, `is_completed` always reports false and nothing
    /// is written to the completed table.
    #[serde(default = "default_true")]
    pub completed_enabled: bool,

    /// Track failed downloads for repair (default: true)
    ///
    /// When disabled, failures are not persisted and `repair` has
    /// nothing to replay.
    #[serde(default = "default_true")]
    pub failed_enabled: bool,

    /// Whether a forced re-download also clears a stale failure record
    /// once it succeeds (default: true); when false the failed row is
    /// left for an explicit `repair` to claim
    #[serde(default = "default_true")]
    pub clear_failure_on_force: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            completed_enabled: true,
            failed_enabled: true,
            clear_failure_on_force: true,
        }
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts for transient errors (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// How many times a provider-side rate limit rejection is re-queued
    /// behind the limiter before the task is recorded as failed
    /// (default: 10). Re-queues never consume the transient budget.
    #[serde(default = "default_rate_limited_max_attempts")]
    pub rate_limited_max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            rate_limited_max_attempts: default_rate_limited_max_attempts(),
        }
    }
}

/// Progress bus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Bounded event queue capacity; a full queue drops events instead
    /// of blocking workers (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often the consumer flushes a partial batch to the sink
    /// (default: 500 ms)
    #[serde(default = "default_flush_interval", with = "duration_millis_serde")]
    pub flush_interval: Duration,

    /// Batch size that triggers an immediate flush (default: 64)
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Minimum spacing between `Progress` events for one task, so a
    /// fast stream does not flood the queue per-chunk (default: 500 ms)
    #[serde(default = "default_min_event_interval", with = "duration_millis_serde")]
    pub min_event_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_interval: default_flush_interval(),
            flush_threshold: default_flush_threshold(),
            min_event_interval: default_min_event_interval(),
        }
    }
}

/// Main configuration for [`MediaDownloader`](crate::downloader::MediaDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — directories, concurrency, rate limits
/// - [`database`](DatabaseConfig) — ledger path and table toggles
/// - [`retry`](RetryConfig) — transient failure backoff
/// - [`progress`](ProgressConfig) — event queue and batching
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Ledger persistence settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Transient failure retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Progress bus settings
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// Called by `MediaDownloader::new`; an invalid configuration is
    /// fatal to the whole batch, so it is rejected before any component
    /// is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.download.folder.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "download folder must not be empty".into(),
                key: Some("download.folder".into()),
            });
        }
        if self.download.temp_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "temp directory must not be empty".into(),
                key: Some("download.temp_dir".into()),
            });
        }
        if self.download.concurrency == Some(0) {
            return Err(Error::Config {
                message: "concurrency must be at least 1 (use None for unlimited)".into(),
                key: Some("download.concurrency".into()),
            });
        }
        if self.progress.queue_capacity == 0 {
            return Err(Error::Config {
                message: "progress queue capacity must be at least 1".into(),
                key: Some("progress.queue_capacity".into()),
            });
        }
        if self.progress.flush_threshold == 0 {
            return Err(Error::Config {
                message: "progress flush threshold must be at least 1".into(),
                key: Some("progress.flush_threshold".into()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier must be >= 1.0".into(),
                key: Some("retry.backoff_multiplier".into()),
            });
        }
        Ok(())
    }

    /// Effective requests-per-minute budget for a provider
    ///
    /// Per-provider overrides win over the global default; no entry
    /// anywhere means unlimited.
    pub fn requests_per_minute(&self, provider: Provider) -> Option<u32> {
        self.download
            .provider_requests_per_minute
            .get(&provider)
            .copied()
            .or(self.download.requests_per_minute)
    }
}

fn default_folder() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_concurrency() -> Option<usize> {
    Some(3)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limited_max_attempts() -> u32 {
    10
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_flush_threshold() -> usize {
    64
}

fn default_min_event_interval() -> Duration {
    Duration::from_millis(500)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second intervals)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.download.concurrency = Some(0);
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, Error::Config { key: Some(ref k), .. } if k == "download.concurrency"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn unlimited_concurrency_is_accepted() {
        let mut config = Config::default();
        config.download.concurrency = None;
        config.validate().unwrap();
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = Config::default();
        config.progress.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_flush_threshold_is_rejected() {
        let mut config = Config::default();
        config.progress.flush_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sub_one_backoff_multiplier_is_rejected() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_folder_is_rejected() {
        let mut config = Config::default();
        config.download.folder = PathBuf::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "download.folder"));
    }

    #[test]
    fn zero_requests_per_minute_is_accepted_as_documented_misconfiguration() {
        // The gate suspends forever on a zero quota; validation does not
        // reject it because the behavior is documented, not an error.
        let mut config = Config::default();
        config.download.requests_per_minute = Some(0);
        config.validate().unwrap();
    }

    #[test]
    fn provider_override_wins_over_global_default() {
        let mut config = Config::default();
        config.download.requests_per_minute = Some(60);
        config
            .download
            .provider_requests_per_minute
            .insert(Provider::Tidal, 10);

        assert_eq!(config.requests_per_minute(Provider::Tidal), Some(10));
        assert_eq!(config.requests_per_minute(Provider::Qobuz), Some(60));
    }

    #[test]
    fn no_limit_anywhere_means_unlimited() {
        let config = Config::default();
        assert_eq!(config.requests_per_minute(Provider::Deezer), None);
    }

    #[test]
    fn partial_json_deserializes_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"download": {"concurrency": 8}}"#).unwrap();
        assert_eq!(config.download.concurrency, Some(8));
        assert_eq!(config.download.folder, PathBuf::from("./downloads"));
        assert!(config.database.completed_enabled);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn durations_serialize_in_declared_units() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        // retry delays are whole seconds, progress intervals milliseconds
        assert_eq!(json["retry"]["initial_delay"], 1);
        assert_eq!(json["progress"]["flush_interval"], 500);

        let back: Config = serde_json::from_value(json).unwrap();
        assert_eq!(back.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(back.progress.flush_interval, Duration::from_millis(500));
    }
}
