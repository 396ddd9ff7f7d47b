//! HTML rewriting so a proxied page keeps working from inside the iframe

mod html;
pub mod interceptor;
pub mod sanitize;

pub use html::rewrite_html;

use tracing::warn;
use url::Url;

use crate::{
    classify::is_video_url,
    codec::{proxied_url, ROUTER_PATH},
};

/// Values left exactly as written.
const INERT_PREFIXES: &[&str] = &["javascript:", "#", "data:", "mailto:", "blob:"];

/// Where the page came from and where the proxy is reachable.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Base for resolving relative references
    pub target_url: Url,
    /// e.g. `http://localhost:5000`, no trailing slash
    pub proxy_origin: String,
    /// Cap on the rewriter's parser buffers, in bytes
    pub memory_limit: usize,
}

impl RewriteContext {
    pub fn new(target_url: Url, proxy_origin: impl Into<String>) -> Self {
        let proxy_origin = proxy_origin.into().trim_end_matches('/').to_string();
        Self {
            target_url,
            proxy_origin,
            memory_limit: usize::MAX,
        }
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    fn is_proxied(&self, value: &str) -> bool {
        value.starts_with(ROUTER_PATH)
            || value
                .strip_prefix(self.proxy_origin.as_str())
                .is_some_and(|rest| rest.starts_with(ROUTER_PATH))
    }

    /// Absolute http(s) URL for an attribute value, or `None` if the value
    /// must stay as written.
    pub fn resolve(&self, value: &str) -> Option<Url> {
        let value = value.trim();
        if value.is_empty() || self.is_proxied(value) {
            return None;
        }
        let lower = value.to_ascii_lowercase();
        if INERT_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return None;
        }
        let url = self.target_url.join(value).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }

    /// Router URL for an attribute value.
    pub fn proxied(&self, value: &str) -> Option<String> {
        self.resolve(value)
            .map(|url| proxied_url(&self.proxy_origin, url.as_str()))
    }

    /// Like [`proxied`](Self::proxied), except video sources are made
    /// absolute and loaded straight from origin.
    pub fn media_source(&self, tag: &str, value: &str) -> Option<String> {
        let url = self.resolve(value)?;
        if tag.eq_ignore_ascii_case("video") || tag.eq_ignore_ascii_case("source") || is_video_url(&url) {
            Some(url.into())
        } else {
            Some(proxied_url(&self.proxy_origin, url.as_str()))
        }
    }

    /// Rewrite every candidate of a `srcset` list, keeping descriptors.
    pub fn srcset(&self, srcset: &str) -> String {
        srcset
            .split(',')
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
            .map(|candidate| {
                let (url, descriptor) = match candidate.split_once(char::is_whitespace) {
                    Some((url, descriptor)) => (url, descriptor.trim()),
                    None => (candidate, ""),
                };
                let url = self.proxied(url).unwrap_or_else(|| url.to_string());
                if descriptor.is_empty() {
                    url
                } else {
                    format!("{} {}", url, descriptor)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Rewrite the page, or hand back the raw HTML if the rewriter gives up.
pub fn rewrite_or_passthrough(raw: &str, ctx: &RewriteContext) -> String {
    match rewrite_html(raw, ctx) {
        Ok(html) => html,
        Err(e) => {
            warn!(url = %ctx.target_url, error = %e, "HTML rewrite failed, serving original markup");
            raw.to_string()
        }
    }
}
