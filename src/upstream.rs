//! Outbound fetch of the target URL

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use std::{pin::Pin, time::Duration};
use tracing::{debug, error};
use url::Url;

use crate::{
    config::Config,
    error::{FetchError, FetchErrorKind},
    headers::forward_request_headers,
};

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// One inbound call, validated and ready to forward.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub target_url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    /// Validate a decoded target and capture the inbound request.
    /// Returns `None` unless the target is an absolute http(s) URL with a host.
    pub fn new(method: Method, target: &str, headers: HeaderMap, body: Bytes) -> Option<Self> {
        let target_url = Url::parse(target).ok()?;
        if !matches!(target_url.scheme(), "http" | "https") || target_url.host_str().is_none() {
            return None;
        }
        Some(Self {
            method,
            target_url,
            headers,
            body,
        })
    }

    /// Only these methods carry a body upstream.
    fn sends_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH) && !self.body.is_empty()
    }
}

/// Response head plus a body not yet read. Consumed once, either as a stream
/// or fully collected.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL after redirects
    pub final_url: Url,
    inner: reqwest::Response,
    timeout: Duration,
}

impl UpstreamResponse {
    /// Body as an incremental byte stream. Only stalls are bounded, so long
    /// transfers run to completion.
    pub fn into_stream(self) -> BodyStream {
        Box::pin(self.inner.bytes_stream())
    }

    /// Body fully read and decoded to text using the declared charset,
    /// within the upstream timeout.
    pub async fn text(self) -> Result<String, FetchError> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.inner.text()).await {
            Ok(text) => text.map_err(|e| FetchError::from_reqwest(&e)),
            Err(_) => Err(timed_out(timeout)),
        }
    }
}

/// HTTP client for target sites. Cheap to clone.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    user_agent: HeaderValue,
    timeout: Duration,
}

fn timed_out(timeout: Duration) -> FetchError {
    FetchError::new(
        FetchErrorKind::Timeout,
        format!("Upstream did not respond within {}s", timeout.as_secs()),
    )
}

impl Upstream {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            // Idle bound per read; the whole exchange is bounded in fetch
            .read_timeout(config.upstream_timeout())
            .connect_timeout(config.connect_timeout())
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| FetchError::new(FetchErrorKind::Other, format!("Failed to build client: {}", e)))?;

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| FetchError::new(FetchErrorKind::Other, format!("Invalid User-Agent: {}", e)))?;

        Ok(Self {
            client,
            user_agent,
            timeout: config.upstream_timeout(),
        })
    }

    /// Issue the outbound request. Every HTTP status is a successful fetch;
    /// only transport failures produce an error.
    pub async fn fetch(&self, req: ProxyRequest) -> Result<UpstreamResponse, FetchError> {
        let headers = forward_request_headers(&req.headers, &self.user_agent);
        let sends_body = req.sends_body();

        let mut builder = self
            .client
            .request(req.method.clone(), req.target_url.clone())
            .headers(headers);
        if sends_body {
            builder = builder.body(req.body);
        }

        debug!(method = %req.method, url = %req.target_url, body = sends_body, "Fetching upstream");

        let sent = match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(sent) => sent.map_err(|e| FetchError::from_reqwest(&e)),
            Err(_) => Err(timed_out(self.timeout)),
        };
        let response = sent.map_err(|err| {
            error!(url = %req.target_url, kind = ?err.kind, error = %err, "Upstream request failed");
            err
        })?;

        debug!(url = %req.target_url, status = %response.status(), final_url = %response.url(), "Upstream responded");

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            final_url: response.url().clone(),
            inner: response,
            timeout: self.timeout,
        })
    }
}
