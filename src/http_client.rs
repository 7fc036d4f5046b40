//! Retrying upstream HTTP client
//!
//! Every network-facing component (provider adapters, the identifier
//! resolver, the mapping loader and the media proxy) goes through
//! [`RetryingFetcher::fetch_with_retry`]:
//! - Each attempt is bounded by a fixed timeout (30s by default)
//! - 2xx and 206 return immediately
//! - 4xx other than 429 return immediately (terminal)
//! - Network errors, timeouts, 5xx and 429 are retried with exponential
//!   backoff (`2^attempt * 500ms`)
//!
//! The wire is abstracted behind [`Transport`] so the retry policy can be
//! exercised without sockets.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Backoff unit; attempt `n` (zero-based) waits `2^n` of these.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Boxed body stream handed to the proxy for passthrough.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Errors surfaced by the fetcher after its retry budget is spent.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {0}")]
    Status(StatusCode),

    #[error("failed to read upstream body: {0}")]
    Body(String),

    #[error("invalid upstream payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status(status) => classify(*status) == Outcome::Retryable,
            Self::Body(_) | Self::Decode(_) => false,
        }
    }
}

/// What the retry loop should do with a received status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Terminal,
    Retryable,
}

/// Classify a response status for the retry loop.
pub fn classify(status: StatusCode) -> Outcome {
    if status.is_success() || status == StatusCode::PARTIAL_CONTENT {
        Outcome::Success
    } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Outcome::Terminal
    } else {
        Outcome::Retryable
    }
}

/// A GET request to an upstream host.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl UpstreamRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Upstream response with a lazily consumed body.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: BodyStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Build a response from an in-memory body.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(
            status,
            headers,
            Box::pin(futures::stream::once(async move { Ok::<_, std::io::Error>(body) })),
        )
    }

    /// Header value as a string, if present and ASCII.
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Lowercased content type, defaulting to `application/octet-stream`.
    pub fn content_type(&self) -> String {
        self.header_str(http::header::CONTENT_TYPE)
            .unwrap_or("application/octet-stream")
            .to_ascii_lowercase()
    }

    pub fn into_stream(self) -> BodyStream {
        self.body
    }

    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| FetchError::Body(e.to_string()))?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub async fn text(self) -> Result<String, FetchError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode a JSON body, treating any non-success status as an error.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        if classify(self.status) != Outcome::Success {
            return Err(FetchError::Status(self.status));
        }
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// One round trip to an upstream host, without retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, FetchError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            // Keep connections alive for segment bursts
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            // Bodies are forwarded byte-for-byte, Content-Length must stay valid
            .no_gzip()
            .no_brotli()
            .no_zstd()
            .no_deflate()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let resp = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(UpstreamResponse::new(status, headers, Box::pin(body)))
    }
}

/// Bounded-retry fetcher shared by every network-facing component.
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Fetcher over a fresh [`ReqwestTransport`].
    pub fn with_reqwest() -> Result<Self, FetchError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Fetch with the retry policy described in the module docs.
    ///
    /// Terminal 4xx responses are returned as `Ok` so callers can pass
    /// them through; only an exhausted retry budget yields `Err`.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn fetch_with_retry(
        &self,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, FetchError> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            debug!(attempt = attempt + 1, "Fetching upstream");

            match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
                Ok(Ok(resp)) => match classify(resp.status) {
                    Outcome::Success | Outcome::Terminal => return Ok(resp),
                    Outcome::Retryable => {
                        warn!(attempt = attempt + 1, status = %resp.status, "Retryable upstream status");
                        last_error = Some(FetchError::Status(resp.status));
                    }
                },
                Ok(Err(e)) => {
                    warn!(attempt = attempt + 1, error = %e, "Fetch attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(attempt = attempt + 1, "Fetch attempt timed out");
                    last_error = Some(FetchError::Timeout(self.timeout));
                }
            }

            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Transport("no attempts made".to_string())))
    }

    /// GET a URL and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        request: &UpstreamRequest,
    ) -> Result<T, FetchError> {
        self.fetch_with_retry(request).await?.json().await
    }
}
