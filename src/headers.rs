//! Header policy shared by the fetch, relay and rewrite paths

use axum::http::{header, HeaderMap, HeaderValue};
use tracing::{debug, warn};

/// Inbound headers never forwarded upstream. Compression is negotiated by the
/// fetcher itself so both response paths see decoded bytes.
const EXCLUDED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "accept-encoding",
];

/// Upstream headers recomputed by our transport.
const HOP_RESPONSE_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection", "keep-alive"];

/// Upstream headers that would stop the page rendering inside our iframe.
const FRAMING_HEADERS: &[&str] = &[
    "x-frame-options",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-webkit-csp",
];

pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";
pub const CORS_MAX_AGE: &str = "86400";

/// True for header names (or `http-equiv` values) that control framing.
pub fn is_framing_directive(name: &str) -> bool {
    let name = name.trim();
    FRAMING_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy inbound headers for the upstream request and pin the User-Agent.
pub fn forward_request_headers(inbound: &HeaderMap, user_agent: &HeaderValue) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if EXCLUDED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out.insert(header::USER_AGENT, user_agent.clone());
    out
}

/// Copy upstream response headers for the client, minus transport and
/// framing headers.
pub fn forward_response_headers(upstream: &HeaderMap, url: &str) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        let key = name.as_str();
        if HOP_RESPONSE_HEADERS.contains(&key) {
            continue;
        }
        if is_framing_directive(key) {
            if key == "x-frame-options"
                && value
                    .to_str()
                    .map(|v| v.trim().eq_ignore_ascii_case("deny"))
                    .unwrap_or(false)
            {
                warn!(url = %url, "Dropped X-Frame-Options: DENY from upstream");
            } else {
                debug!(url = %url, header = %key, "Dropped framing header from upstream");
            }
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Add the CORS headers every router response carries.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
}

/// Origin (scheme + host) the browser uses to reach this proxy.
pub fn request_origin(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim())
        .filter(|v| !v.is_empty())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim())
        .filter(|v| *v == "http" || *v == "https")
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_directive_case_insensitive() {
        assert!(is_framing_directive("X-Frame-Options"));
        assert!(is_framing_directive(" Content-Security-Policy "));
        assert!(!is_framing_directive("refresh"));
    }

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_request_exclusions_and_user_agent() {
        let inbound = map(&[
            ("host", "proxy.test"),
            ("connection", "keep-alive"),
            ("content-length", "12"),
            ("transfer-encoding", "chunked"),
            ("accept-encoding", "gzip"),
            ("user-agent", "curl/8"),
            ("cookie", "a=1"),
            ("x-custom", "one"),
            ("x-custom", "two"),
        ]);
        let ua = HeaderValue::from_static("TestAgent/1.0");
        let out = forward_request_headers(&inbound, &ua);

        assert!(out.get("host").is_none());
        assert!(out.get("connection").is_none());
        assert!(out.get("content-length").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("accept-encoding").is_none());
        assert_eq!(out.get("user-agent").unwrap(), "TestAgent/1.0");
        assert_eq!(out.get_all("user-agent").iter().count(), 1);
        assert_eq!(out.get("cookie").unwrap(), "a=1");
        assert_eq!(out.get_all("x-custom").iter().count(), 2);
    }

    #[test]
    fn test_response_strips_framing_and_transport() {
        let upstream = map(&[
            ("content-type", "text/html"),
            ("content-length", "100"),
            ("transfer-encoding", "chunked"),
            ("x-frame-options", "DENY"),
            ("content-security-policy", "frame-ancestors 'none'"),
            ("content-security-policy-report-only", "default-src 'self'"),
            ("x-webkit-csp", "default-src 'self'"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
        ]);
        let out = forward_response_headers(&upstream, "https://example.com");

        for name in FRAMING_HEADERS.iter().chain(HOP_RESPONSE_HEADERS) {
            assert!(out.get(*name).is_none(), "{} leaked", name);
        }
        assert_eq!(out.get("content-type").unwrap(), "text/html");
        assert_eq!(out.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_cors_overrides_upstream_value() {
        let mut headers = map(&[("access-control-allow-origin", "https://only.example")]);
        apply_cors(&mut headers);
        assert_eq!(headers.get_all("access-control-allow-origin").iter().count(), 1);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(headers.get("access-control-allow-methods").unwrap(), CORS_ALLOW_METHODS);
    }

    #[test]
    fn test_request_origin() {
        assert_eq!(request_origin(&map(&[("host", "proxy.test:5000")])), "http://proxy.test:5000");
        assert_eq!(
            request_origin(&map(&[("host", "internal:5000"), ("x-forwarded-host", "proxy.example"), ("x-forwarded-proto", "https")])),
            "https://proxy.example"
        );
        assert_eq!(request_origin(&HeaderMap::new()), "http://localhost");
    }
}
