//! Frame Router - rewriting HTTP(S) proxy
//!
//! Serves third-party pages through `/api/router?url=<base64>` so they can be
//! browsed inside an iframe: HTML is rewritten to keep navigation, assets and
//! scripted requests on the proxy, everything else is streamed through.

pub mod accounting;
pub mod classify;
pub mod codec;
pub mod config;
pub mod error;
pub mod headers;
pub mod proxy;
pub mod relay;
pub mod rewrite;
pub mod shared;
pub mod upstream;

pub use proxy::build_router;
pub use shared::ProxyState;
