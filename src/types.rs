//! Core types for media-dl

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// Unique identifier for a download task
///
/// A `TaskId` is the stable SHA-256 hash of `provider:item_id:quality`,
/// hex-encoded. The same item requested from the same provider at the
/// same quality always produces the same id, which is what makes the
/// completed/failed ledgers meaningful across process restarts.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an existing id (e.g., one read back from the store)
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the stable id for a provider/item/quality triple
    pub fn derive(provider: Provider, item_id: &str, quality: Quality) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(item_id.as_bytes());
        hasher.update(b":");
        hasher.update(quality.get().to_string().as_bytes());
        let hash = hasher.finalize();
        Self(format!("{:x}", hash))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Streaming provider a task fetches from
///
/// This is a closed set: new providers implement
/// [`ProviderFetch`](crate::provider::ProviderFetch) for one of these
/// variants without touching the core pipeline. `Generic` covers
/// direct-URL items with no provider-specific API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Qobuz
    Qobuz,
    /// Tidal
    Tidal,
    /// Deezer
    Deezer,
    /// SoundCloud
    Soundcloud,
    /// Direct-URL fetch with no provider API
    Generic,
}

impl Provider {
    /// All provider variants, in declaration order
    pub const ALL: [Provider; 5] = [
        Provider::Qobuz,
        Provider::Tidal,
        Provider::Deezer,
        Provider::Soundcloud,
        Provider::Generic,
    ];

    /// Stable lowercase name used in logs and the store
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Qobuz => "qobuz",
            Provider::Tidal => "tidal",
            Provider::Deezer => "deezer",
            Provider::Soundcloud => "soundcloud",
            Provider::Generic => "generic",
        }
    }

    /// Parse a stored provider name back into a variant
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "qobuz" => Some(Provider::Qobuz),
            "tidal" => Some(Provider::Tidal),
            "deezer" => Some(Provider::Deezer),
            "soundcloud" => Some(Provider::Soundcloud),
            "generic" => Some(Provider::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of media a task produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video
    Video,
}

impl MediaKind {
    /// Stable lowercase name used in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parse a stored kind name back into a variant
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Provider quality tier
///
/// The integer scale is provider-specific (e.g., 0 = lossy low up to
/// 4 = hi-res lossless on Qobuz); the core only treats it as part of
/// task identity and passes it through to the fetch capability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u8);

impl Quality {
    /// Get the raw quality tier
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved media item, as handed to the orchestrator by upstream code
///
/// URL parsing, search, and playlist expansion all happen outside the
/// core; by the time an item reaches [`download`](crate::downloader::MediaDownloader::download)
/// it is a flat description of one fetchable thing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaItem {
    /// Provider to fetch from
    pub provider: Provider,
    /// Provider-scoped item identifier (track id, video id, or URL for `Generic`)
    pub item_id: String,
    /// Human-readable label for progress display (e.g., "Artist - Title")
    pub label: String,
    /// Final file name including extension
    pub file_name: String,
    /// Requested quality tier
    pub quality: Quality,
    /// Audio or video
    pub kind: MediaKind,
}

/// The unit of work: one media item plus its destination
///
/// Tasks are immutable values. The orchestrator builds them from
/// [`MediaItem`]s (or reconstructs them from failure records during
/// repair) and each is consumed exactly once per batch by a worker.
#[derive(Clone, Debug)]
pub struct Task {
    /// Stable identity (see [`TaskId::derive`])
    pub id: TaskId,
    /// Provider to fetch from
    pub provider: Provider,
    /// Provider-scoped item identifier
    pub item_id: String,
    /// Human-readable label for progress display
    pub label: String,
    /// Final path the finished file must occupy
    pub destination: PathBuf,
    /// Requested quality tier
    pub quality: Quality,
    /// Audio or video
    pub kind: MediaKind,
}

impl Task {
    /// Build a task from a resolved item and its computed destination
    pub fn new(item: &MediaItem, destination: PathBuf) -> Self {
        Self {
            id: TaskId::derive(item.provider, &item.item_id, item.quality),
            provider: item.provider,
            item_id: item.item_id.clone(),
            label: item.label.clone(),
            destination,
            quality: item.quality,
            kind: item.kind,
        }
    }
}

/// Terminal status of one task execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Fetched, post-processed, and moved into place
    Completed,
    /// Already done — no fetch was issued
    Skipped,
    /// Recorded in the failed ledger
    Failed,
}

impl OutcomeStatus {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// Classification of a task failure, persisted alongside the failed record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Authentication/authorization failure — fatal to the batch
    Auth,
    /// Item does not exist or is not streamable — terminal, no retry
    NotFound,
    /// Provider-side rate limiting persisted past the re-queue budget
    RateLimited,
    /// Transient network/I-O failure that exhausted its retries
    Transient,
    /// Conversion or tagging failed after a successful fetch
    Postprocess,
}

impl FailureKind {
    /// Stable snake_case name used in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::NotFound => "not_found",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::Postprocess => "postprocess",
        }
    }

    /// Parse a stored kind name back into a variant
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auth" => Some(FailureKind::Auth),
            "not_found" => Some(FailureKind::NotFound),
            "rate_limited" => Some(FailureKind::RateLimited),
            "transient" => Some(FailureKind::Transient),
            "postprocess" => Some(FailureKind::Postprocess),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of executing a single task
///
/// Produced exactly once per task execution by the worker pool and
/// folded into the [`BatchSummary`]. Failures carry their
/// classification and message so the store can persist them.
#[derive(Clone, Debug)]
pub struct DownloadOutcome {
    /// The task this outcome belongs to
    pub task_id: TaskId,
    /// Terminal status
    pub status: OutcomeStatus,
    /// Failure classification (None unless status is Failed)
    pub failure: Option<FailureKind>,
    /// Failure message (None unless status is Failed)
    pub message: Option<String>,
    /// Bytes written to the temp file during the fetch
    pub bytes_transferred: u64,
    /// Wall-clock time spent on the task
    pub duration: Duration,
}

impl DownloadOutcome {
    /// Successful outcome
    pub fn completed(task_id: TaskId, bytes_transferred: u64, duration: Duration) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Completed,
            failure: None,
            message: None,
            bytes_transferred,
            duration,
        }
    }

    /// Skipped outcome (already downloaded, zero fetch calls)
    pub fn skipped(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Skipped,
            failure: None,
            message: None,
            bytes_transferred: 0,
            duration: Duration::ZERO,
        }
    }

    /// Failed outcome with its classification
    pub fn failed(
        task_id: TaskId,
        kind: FailureKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Failed,
            failure: Some(kind),
            message: Some(message.into()),
            bytes_transferred: 0,
            duration,
        }
    }
}

/// Event emitted on the progress bus during a batch
///
/// Ordering is causal within a single task (`Started` precedes
/// `Progress` precedes `Finished`) but events from different tasks
/// interleave arbitrarily — consumers must not assume global order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A worker began fetching a task
    Started {
        /// Task ID
        task_id: TaskId,
        /// Display label
        label: String,
        /// Total payload size, if the provider advertised one
        total_bytes: Option<u64>,
    },

    /// Throttled byte-count update for an in-flight fetch
    Progress {
        /// Task ID
        task_id: TaskId,
        /// Bytes written so far
        bytes: u64,
        /// Total payload size, if known
        total_bytes: Option<u64>,
        /// Mean transfer rate since the fetch started
        bytes_per_sec: u64,
    },

    /// A task reached a terminal status
    Finished {
        /// Task ID
        task_id: TaskId,
        /// Terminal status
        status: OutcomeStatus,
    },

    /// A whole batch finished
    BatchSummary {
        /// Tasks fetched and finalized
        completed: u64,
        /// Tasks skipped as already done
        skipped: u64,
        /// Tasks recorded as failed
        failed: u64,
    },
}

/// Aggregated counts for a finished batch
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Tasks fetched and finalized
    pub completed: u64,
    /// Tasks skipped as already done
    pub skipped: u64,
    /// Tasks recorded as failed
    pub failed: u64,
    /// Tasks abandoned by cancellation (not recorded, still retryable)
    pub cancelled: u64,
    /// Total bytes written across all completed fetches
    pub bytes_transferred: u64,
    /// Wall-clock duration of the batch
    pub elapsed: Duration,
    /// Ids of the tasks that failed, for display and exit-status mapping
    pub failed_tasks: Vec<TaskId>,
}

impl BatchSummary {
    /// True when no task failed (the embedder's exit-status 0 condition)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of tasks that reached a terminal status
    pub fn total(&self) -> u64 {
        self.completed + self.skipped + self.failed
    }

    /// Fold one task outcome into the summary
    pub(crate) fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome.status {
            OutcomeStatus::Completed => {
                self.completed += 1;
                self.bytes_transferred += outcome.bytes_transferred;
            }
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => {
                self.failed += 1;
                self.failed_tasks.push(outcome.task_id.clone());
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // --- TaskId derivation ---

    #[test]
    fn task_id_is_stable_for_identical_inputs() {
        let a = TaskId::derive(Provider::Qobuz, "12345", Quality(3));
        let b = TaskId::derive(Provider::Qobuz, "12345", Quality(3));
        assert_eq!(a, b, "same provider/item/quality must hash identically");
    }

    #[test]
    fn task_id_differs_when_any_component_differs() {
        let base = TaskId::derive(Provider::Qobuz, "12345", Quality(3));
        assert_ne!(base, TaskId::derive(Provider::Tidal, "12345", Quality(3)));
        assert_ne!(base, TaskId::derive(Provider::Qobuz, "12346", Quality(3)));
        assert_ne!(base, TaskId::derive(Provider::Qobuz, "12345", Quality(2)));
    }

    #[test]
    fn task_id_is_lowercase_hex_sha256() {
        let id = TaskId::derive(Provider::Deezer, "track", Quality(0));
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn task_id_components_do_not_collide_across_boundaries() {
        // "ab" + "c" vs "a" + "bc" must not hash the same thanks to the separator
        let a = TaskId::derive(Provider::Generic, "ab", Quality(1));
        let b = TaskId::derive(Provider::Generic, "a", Quality(1));
        assert_ne!(a, b);
    }

    // --- Provider / MediaKind / FailureKind name round-trips ---

    #[test]
    fn provider_names_round_trip_for_all_variants() {
        for provider in Provider::ALL {
            assert_eq!(
                Provider::from_name(provider.as_str()),
                Some(provider),
                "{provider:?} must round-trip through its stored name"
            );
        }
    }

    #[test]
    fn provider_from_unknown_name_is_none() {
        assert_eq!(Provider::from_name("napster"), None);
        assert_eq!(Provider::from_name(""), None);
        assert_eq!(Provider::from_name("Qobuz"), None, "names are lowercase");
    }

    #[test]
    fn media_kind_names_round_trip() {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            assert_eq!(MediaKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(MediaKind::from_name("image"), None);
    }

    #[test]
    fn failure_kind_names_round_trip_for_all_variants() {
        let all = [
            FailureKind::Auth,
            FailureKind::NotFound,
            FailureKind::RateLimited,
            FailureKind::Transient,
            FailureKind::Postprocess,
        ];
        for kind in all {
            assert_eq!(
                FailureKind::from_name(kind.as_str()),
                Some(kind),
                "{kind:?} must round-trip through its stored name"
            );
        }
        assert_eq!(FailureKind::from_name("disk_full"), None);
    }

    // --- Outcome constructors ---

    #[test]
    fn skipped_outcome_transfers_zero_bytes() {
        let outcome = DownloadOutcome::skipped(TaskId::new("abc"));
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.bytes_transferred, 0);
        assert!(outcome.failure.is_none());
        assert!(outcome.message.is_none());
    }

    #[test]
    fn failed_outcome_carries_kind_and_message() {
        let outcome = DownloadOutcome::failed(
            TaskId::new("abc"),
            FailureKind::NotFound,
            "track removed from catalog",
            Duration::from_millis(120),
        );
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::NotFound));
        assert_eq!(
            outcome.message.as_deref(),
            Some("track removed from catalog")
        );
    }

    // --- BatchSummary folding ---

    #[test]
    fn batch_summary_records_each_status_bucket() {
        let mut summary = BatchSummary::default();
        summary.record(&DownloadOutcome::completed(
            TaskId::new("a"),
            1_000,
            Duration::from_secs(1),
        ));
        summary.record(&DownloadOutcome::completed(
            TaskId::new("b"),
            2_000,
            Duration::from_secs(1),
        ));
        summary.record(&DownloadOutcome::skipped(TaskId::new("c")));
        summary.record(&DownloadOutcome::failed(
            TaskId::new("d"),
            FailureKind::Transient,
            "timeout",
            Duration::from_secs(3),
        ));

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes_transferred, 3_000);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.failed_tasks, vec![TaskId::new("d")]);
        assert!(!summary.is_success());
    }

    #[test]
    fn batch_summary_with_no_failures_is_success() {
        let mut summary = BatchSummary::default();
        summary.record(&DownloadOutcome::skipped(TaskId::new("a")));
        assert!(summary.is_success());
    }

    // --- Event serialization format ---

    #[test]
    fn progress_event_serializes_with_snake_case_tag() {
        let event = ProgressEvent::Started {
            task_id: TaskId::new("abc"),
            label: "Artist - Title".into(),
            total_bytes: Some(42),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["task_id"], "abc");
        assert_eq!(json["total_bytes"], 42);
    }

    #[test]
    fn batch_summary_event_round_trips_through_json() {
        let event = ProgressEvent::BatchSummary {
            completed: 2,
            skipped: 0,
            failed: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        match back {
            ProgressEvent::BatchSummary {
                completed,
                skipped,
                failed,
            } => {
                assert_eq!((completed, skipped, failed), (2, 0, 1));
            }
            other => panic!("expected BatchSummary, got {other:?}"),
        }
    }

    #[test]
    fn provider_serializes_as_lowercase_string() {
        let json = serde_json::to_string(&Provider::Soundcloud).unwrap();
        assert_eq!(json, "\"soundcloud\"");
    }

    #[test]
    fn task_new_derives_id_from_item() {
        let item = MediaItem {
            provider: Provider::Tidal,
            item_id: "99".into(),
            label: "Song".into(),
            file_name: "Song.flac".into(),
            quality: Quality(2),
            kind: MediaKind::Audio,
        };
        let task = Task::new(&item, PathBuf::from("/music/Song.flac"));
        assert_eq!(task.id, TaskId::derive(Provider::Tidal, "99", Quality(2)));
        assert_eq!(task.destination, PathBuf::from("/music/Song.flac"));
    }
}
