//! Post-processing capability (conversion, tag writing)
//!
//! Codec conversion and metadata tagging are delegated to an injected
//! [`PostProcessor`]. The pipeline calls it after the fetch completes
//! and before the atomic move, so a post-processing failure can never
//! leave a half-tagged file at the final destination — the temp file
//! simply never gets promoted.
//!
//! The processor may rewrite the file in place or produce a sibling
//! (e.g., a `.flac` transcoded to `.mp3`); it returns the path the
//! pipeline should move into place.

use crate::error::PostProcessError;
use crate::types::Task;
use std::path::{Path, PathBuf};

/// Conversion/tagging capability invoked between fetch and final move
#[async_trait::async_trait]
pub trait PostProcessor: Send + Sync {
    /// Implementation name, for logs
    fn name(&self) -> &str;

    /// Process the fetched temp file; returns the file to promote
    ///
    /// The returned path must stay inside the temp directory — the
    /// pipeline, not the processor, owns the move to `task.destination`.
    async fn process(
        &self,
        temp_path: &Path,
        task: &Task,
    ) -> std::result::Result<PathBuf, PostProcessError>;
}

/// Processor that passes the fetched file through untouched
///
/// Used when conversion is disabled and tagging is handled elsewhere,
/// and as the default in tests.
pub struct NoopPostProcessor;

#[async_trait::async_trait]
impl PostProcessor for NoopPostProcessor {
    fn name(&self) -> &str {
        "noop"
    }

    async fn process(
        &self,
        temp_path: &Path,
        _task: &Task,
    ) -> std::result::Result<PathBuf, PostProcessError> {
        Ok(temp_path.to_path_buf())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaItem, MediaKind, Provider, Quality};

    fn task() -> Task {
        let item = MediaItem {
            provider: Provider::Generic,
            item_id: "x".into(),
            label: "x".into(),
            file_name: "x.flac".into(),
            quality: Quality(0),
            kind: MediaKind::Audio,
        };
        Task::new(&item, PathBuf::from("/music/x.flac"))
    }

    #[tokio::test]
    async fn noop_returns_the_input_path() {
        let processor = NoopPostProcessor;
        let out = processor
            .process(Path::new("/tmp/x.part"), &task())
            .await
            .unwrap();
        assert_eq!(out, PathBuf::from("/tmp/x.part"));
        assert_eq!(processor.name(), "noop");
    }
}
