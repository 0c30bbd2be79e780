//! Provider fetch capability
//!
//! The core never implements provider APIs itself. Each streaming
//! service plugs in as a [`ProviderFetch`] implementation registered in
//! a [`ProviderRegistry`]; the worker pipeline looks the capability up
//! by [`Provider`] variant and treats "fetch bytes for item X" as a
//! black box that yields a sized byte stream or one of the closed
//! [`FetchError`] variants.
//!
//! A single transport ships in-crate: [`HttpFetch`], which serves
//! [`Provider::Generic`] items whose `item_id` is a direct URL. Real
//! provider integrations (API auth, manifest resolution, quality
//! negotiation) live in their own crates and implement the same trait.

use crate::error::FetchError;
use crate::types::{Provider, Quality};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Stream of payload chunks produced by a fetch
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, FetchError>>;

/// A started fetch: advertised size plus the chunk stream
pub struct FetchHandle {
    /// Total payload size, if the provider advertised one
    pub total_bytes: Option<u64>,
    /// The payload chunks, in order
    pub stream: ByteStream,
}

impl FetchHandle {
    /// Wrap an existing stream
    pub fn new(total_bytes: Option<u64>, stream: ByteStream) -> Self {
        Self {
            total_bytes,
            stream,
        }
    }

    /// Single-chunk handle over an in-memory payload
    ///
    /// Convenient for tests and for providers that buffer small
    /// payloads (cover art, short clips) before handing them over.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let total = data.len() as u64;
        let stream = futures::stream::once(async move { Ok(Bytes::from(data)) }).boxed();
        Self {
            total_bytes: Some(total),
            stream,
        }
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Abstraction over provider item fetching, enabling testability
///
/// Implementations must map every transport/API failure into one of
/// the [`FetchError`] variants — the worker pipeline's retry,
/// re-queue, and batch-cancellation decisions all dispatch on them.
#[async_trait::async_trait]
pub trait ProviderFetch: Send + Sync {
    /// The provider variant this capability serves
    fn provider(&self) -> Provider;

    /// Begin fetching one item at the requested quality
    async fn fetch(
        &self,
        item_id: &str,
        quality: Quality,
    ) -> std::result::Result<FetchHandle, FetchError>;
}

/// Registry mapping each provider variant to its fetch capability
///
/// Built once at startup and shared read-only by all workers. A task
/// whose provider has no registered capability fails with
/// [`FetchError::NotFound`] rather than panicking.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    map: HashMap<Provider, Arc<dyn ProviderFetch>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its own provider variant
    ///
    /// Registering a second capability for the same provider replaces
    /// the first.
    #[must_use]
    pub fn with_provider(mut self, fetcher: Arc<dyn ProviderFetch>) -> Self {
        self.map.insert(fetcher.provider(), fetcher);
        self
    }

    /// Look up the capability for a provider
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderFetch>> {
        self.map.get(&provider).cloned()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no provider is registered
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Direct-URL fetch over HTTP for [`Provider::Generic`] items
///
/// The `item_id` is the URL itself; the quality tier is ignored since
/// a direct URL has nothing to negotiate.
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    /// Build with a default HTTP client
    pub fn new() -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(FetchError::Network)?;
        Ok(Self { client })
    }

    /// Build with a caller-configured client (proxies, custom TLS, UA)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ProviderFetch for HttpFetch {
    fn provider(&self) -> Provider {
        Provider::Generic
    }

    async fn fetch(
        &self,
        item_id: &str,
        _quality: Quality,
    ) -> std::result::Result<FetchHandle, FetchError> {
        let url = url::Url::parse(item_id)
            .map_err(|e| FetchError::NotFound(format!("invalid URL '{item_id}': {e}")))?;

        let response = self.client.get(url).send().await?;

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        if let Some(err) = classify_status(response.status(), retry_after) {
            return Err(err);
        }

        let total_bytes = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::Network))
            .boxed();

        Ok(FetchHandle::new(total_bytes, stream))
    }
}

/// Map a non-success HTTP status onto the fetch error taxonomy
fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            FetchError::Auth(format!("server returned {status}"))
        }
        reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
            FetchError::NotFound(format!("server returned {status}"))
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        _ => FetchError::Transient(format!("server returned {status}")),
    })
}
