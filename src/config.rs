//! Configuration loaded from environment variables

use std::{env, str::FromStr, time::Duration};

/// Outbound identity presented to upstream sites. Kept stable per deployment.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1";

/// Redirect chains shorter than this are never cut off.
pub const MIN_REDIRECTS: usize = 10;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 5000)
    pub port: u16,
    /// Log level used when RUST_LOG is unset (default: info)
    pub log_level: String,
    /// Upstream request timeout in seconds (default: 30)
    pub upstream_timeout: u64,
    /// Upstream connect timeout in seconds (default: 10)
    pub connect_timeout: u64,
    /// Maximum redirects followed per upstream fetch (default and floor: 10)
    pub max_redirects: usize,
    /// User-Agent sent on every upstream request
    pub user_agent: String,
    /// Externally visible origin of this proxy, e.g. `https://proxy.example.net`.
    /// When unset it is derived from each request's Host header.
    pub public_origin: Option<String>,
    /// Maximum inbound request body size in bytes (default: 50MB)
    pub max_request_body_size: usize,
    /// Number of request log entries kept in memory (default: 1000)
    pub request_log_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT").unwrap_or(defaults.port),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            upstream_timeout: parse_var("UPSTREAM_TIMEOUT").unwrap_or(defaults.upstream_timeout),
            connect_timeout: parse_var("CONNECT_TIMEOUT").unwrap_or(defaults.connect_timeout),
            max_redirects: parse_var::<usize>("MAX_REDIRECTS")
                .map(|n| n.max(MIN_REDIRECTS))
                .unwrap_or(defaults.max_redirects),
            user_agent: env::var("UPSTREAM_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            public_origin: env::var("PUBLIC_ORIGIN")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            max_request_body_size: parse_var("MAX_REQUEST_BODY_SIZE")
                .unwrap_or(defaults.max_request_body_size),
            request_log_capacity: parse_var("REQUEST_LOG_CAPACITY")
                .unwrap_or(defaults.request_log_capacity),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            log_level: "info".to_string(),
            upstream_timeout: 30,
            connect_timeout: 10,
            max_redirects: MIN_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            public_origin: None,
            max_request_body_size: 50 * 1024 * 1024, // 50MB
            request_log_capacity: 1000,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.upstream_timeout(), Duration::from_secs(30));
        assert!(config.max_redirects >= 10);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.public_origin.is_none());
    }
}
