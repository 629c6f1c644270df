//! The caching request path: look up, fetch on miss, store, respond.
//!
//! Every successful response is sent as `Content-type: text/html`, whatever
//! the origin declared. This is a compatibility behavior: the origin's
//! content type is deliberately discarded.

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::{CacheStore, ResponseCache};
use crate::http::{Method, Request, Response, StatusCode};
use crate::origin::{OriginClient, OriginError, OriginResponse};
use crate::server::Service;

/// Header reporting whether the body came from the cache.
pub const X_CACHE: &str = "X-Cache";

/// Content type written on every proxied response.
pub const CONTENT_TYPE: &str = "text/html";

/// Value of the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Header value: `HIT` or `MISS`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Reasons a request could not be answered with a body.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("method {0} is not supported")]
    UnsupportedMethod(Method),

    #[error("origin answered {status} {reason}")]
    OriginStatus { status: StatusCode, reason: String },

    #[error("origin unreachable: {0}")]
    OriginUnreachable(#[source] OriginError),

    #[error("origin timed out: {0}")]
    OriginTimeout(#[source] OriginError),
}

impl ProxyError {
    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMethod(_) => StatusCode::NOT_IMPLEMENTED,
            Self::OriginStatus { status, .. } => *status,
            Self::OriginUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::OriginTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Reason phrase sent to the client for this error.
    pub fn reason(&self) -> &str {
        match self {
            Self::OriginStatus { reason, .. } => reason,
            other => other.status().canonical_reason().unwrap_or("Unknown"),
        }
    }

    /// Renders the error as a small HTML page.
    ///
    /// Statuses that must not carry a body (`1xx`, `204`, `304`) get only the
    /// status line and headers.
    pub fn into_response(self) -> Response {
        let status = self.status();
        let reason = self.reason().to_owned();
        if !status.allows_body() {
            return Response::new(status).reason(reason);
        }

        let page = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Error response</title></head>\n<body>\n\
             <h1>Error response</h1>\n<p>Error code: {code}</p>\n<p>Message: {reason}.</p>\n\
             </body>\n</html>\n",
            code = status.as_u16(),
        );

        Response::new(status)
            .reason(reason)
            .header("Content-Type", "text/html;charset=utf-8")
            .body(page)
    }
}

impl From<OriginError> for ProxyError {
    fn from(err: OriginError) -> Self {
        match err {
            OriginError::Timeout { .. } => Self::OriginTimeout(err),
            other => Self::OriginUnreachable(other),
        }
    }
}

/// Builds the cache key for `path`: the origin followed by the path.
///
/// `path` must already have its query string removed, so `/a?x=1` and
/// `/a?x=2` share one entry.
///
/// ```
/// use caching_proxy::proxy::cache_key;
///
/// assert_eq!(cache_key("http://localhost:9000", "/hello"), "http://localhost:9000/hello");
/// ```
pub fn cache_key(origin: &str, path: &str) -> String {
    format!("{origin}{path}")
}

/// Serves GET requests from a [`ResponseCache`], filling it from the origin.
#[derive(Debug)]
pub struct CachingProxy<S> {
    origin: String,
    cache: ResponseCache<S>,
    client: OriginClient,
}

impl<S: CacheStore> CachingProxy<S> {
    /// Creates a proxy for `origin`, e.g. `http://localhost:9000`, with no trailing slash.
    pub fn new(origin: impl Into<String>, cache: ResponseCache<S>, client: OriginClient) -> Self {
        Self {
            origin: origin.into(),
            cache,
            client,
        }
    }

    /// Returns the origin base URL.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the response cache.
    pub fn cache(&self) -> &ResponseCache<S> {
        &self.cache
    }

    /// Consumes the proxy and returns its cache.
    pub fn into_cache(self) -> ResponseCache<S> {
        self.cache
    }

    /// Resolves `request` to a body and where it came from.
    pub async fn resolve(&mut self, request: &Request) -> Result<(Bytes, CacheStatus), ProxyError> {
        if *request.method() != Method::Get {
            return Err(ProxyError::UnsupportedMethod(request.method().clone()));
        }

        let key = cache_key(&self.origin, request.path());
        if let Some(body) = self.cache.lookup(&key).await {
            info!(url = %key, "cache hit");
            return Ok((body, CacheStatus::Hit));
        }

        info!(url = %key, "cache miss, fetching from origin");
        let fetched = self.client.fetch(&key).await.map_err(|e| {
            error!(url = %key, error = %e, "origin fetch failed");
            ProxyError::from(e)
        })?;

        if !fetched.is_cacheable() {
            let OriginResponse { status, reason, .. } = fetched;
            warn!(url = %key, status = status.as_u16(), "origin returned an error status, not caching");
            return Err(ProxyError::OriginStatus { status, reason });
        }
        let body = fetched.body;

        if let Err(e) = self.cache.insert(key.clone(), body.clone()).await {
            error!(url = %key, error = %e, "failed to persist cache, entry kept in memory only");
        }
        Ok((body, CacheStatus::Miss))
    }
}

impl<S: CacheStore> Service for CachingProxy<S> {
    async fn call(&mut self, request: Request) -> Response {
        match self.resolve(&request).await {
            Ok((body, status)) => Response::new(StatusCode::OK)
                .header("Content-type", CONTENT_TYPE)
                .header(X_CACHE, status.as_str())
                .body(body),
            Err(e) => e.into_response(),
        }
    }
}
