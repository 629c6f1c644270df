//! Upstream fetches for cache misses.
//!
//! A thin wrapper over [`reqwest::Client`] that issues a plain GET with no
//! forwarded headers and reduces the reply to status, reason and body bytes.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::{Client, Url};
use thiserror::Error;

use crate::http::StatusCode;

/// Default upper bound on a single origin fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures talking to the origin. A non-200 reply is not an error here;
/// it comes back as an [`OriginResponse`].
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid origin URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("origin unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("origin at {url} did not answer within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Settings for the origin client.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// Per-request timeout. `None` waits forever.
    pub timeout: Option<Duration>,

    /// User agent sent to the origin.
    pub user_agent: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            user_agent: concat!("caching-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// What the origin answered.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// Status the origin answered with.
    pub status: StatusCode,
    /// Reason phrase to relay to the client.
    ///
    /// This is the canonical phrase for `status`, not the origin's own text:
    /// reqwest does not expose the reason phrase received on the wire.
    pub reason: String,
    /// The complete response body.
    pub body: Bytes,
}

impl OriginResponse {
    /// Only a `200` is cacheable; every other status is relayed as an error.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// HTTP client used to reach the origin.
#[derive(Debug, Clone)]
pub struct OriginClient {
    http: Client,
    config: OriginConfig,
}

impl OriginClient {
    /// Builds a client with the given configuration.
    pub fn new(config: OriginConfig) -> Result<Self, OriginError> {
        // Proxy environment variables are not honored; the origin is always dialed directly.
        let mut builder = Client::builder().user_agent(&config.user_agent).no_proxy();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(OriginError::Client)?;

        Ok(Self { http, config })
    }

    /// Returns the configuration the client was built with.
    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    /// Issues a GET for `url` and buffers the whole body.
    pub async fn fetch(&self, url: &str) -> Result<OriginResponse, OriginError> {
        let start = Instant::now();
        let parsed = Url::parse(url).map_err(|e| OriginError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let upstream = response.status();
        let status = StatusCode::from_u16(upstream.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let reason = upstream
            .canonical_reason()
            .or_else(|| status.canonical_reason())
            .unwrap_or("Unknown")
            .to_owned();

        let body = response.bytes().await.map_err(|e| self.classify(url, e))?;

        tracing::debug!(
            url,
            status = status.as_u16(),
            bytes = body.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "origin fetch finished"
        );

        Ok(OriginResponse {
            status,
            reason,
            body,
        })
    }

    fn classify(&self, url: &str, error: reqwest::Error) -> OriginError {
        match self.config.timeout {
            Some(timeout) if error.is_timeout() => OriginError::Timeout {
                url: url.to_owned(),
                timeout,
            },
            _ => OriginError::Unreachable {
                url: url.to_owned(),
                source: error,
            },
        }
    }
}

/// Checks that `origin` is an absolute http(s) URL.
///
/// The string itself is kept as given: cache keys are formed by plain
/// concatenation with the request path.
pub fn validate_origin(origin: &str) -> Result<(), OriginError> {
    let invalid = |reason: &str| OriginError::InvalidUrl {
        url: origin.to_owned(),
        reason: reason.to_owned(),
    };

    let url = Url::parse(origin).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}
