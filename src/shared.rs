use axum::http::HeaderMap;
use std::sync::Arc;

use crate::{
    accounting::{MemoryStore, RequestRecorder},
    config::Config,
    error::FetchError,
    headers::request_origin,
    upstream::Upstream,
};

// Shared state for every handler: configuration, the upstream client and request accounting
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<Config>,
    pub upstream: Upstream,
    pub store: Arc<MemoryStore>,
}

impl ProxyState {
    pub fn new(config: Config) -> Result<Self, FetchError> {
        let upstream = Upstream::new(&config)?;
        let store = Arc::new(MemoryStore::new(config.request_log_capacity));
        Ok(Self {
            config: Arc::new(config),
            upstream,
            store,
        })
    }

    pub fn recorder(&self) -> Arc<dyn RequestRecorder> {
        self.store.clone()
    }

    /// Origin that rewritten URLs point at: the configured public origin, or
    /// whatever host the browser used to reach us.
    pub fn proxy_origin(&self, headers: &HeaderMap) -> String {
        match &self.config.public_origin {
            Some(origin) => origin.clone(),
            None => request_origin(headers),
        }
    }
}
