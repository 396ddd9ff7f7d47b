//! Error types for the router and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::error::Error as StdError;
use thiserror::Error;

use crate::{codec::CodecError, headers::apply_cors};

/// Network-level failure class of an upstream fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchErrorKind {
    Timeout,
    Dns,
    Connect,
    Tls,
    Other,
}

/// An upstream fetch that produced no response at all
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a reqwest error. The top-level message rarely names the cause,
    /// so the whole source chain is inspected.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let detail = error_chain(err);
        let lower = detail.to_lowercase();

        let kind = if err.is_timeout() || lower.contains("timed out") {
            FetchErrorKind::Timeout
        } else if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
            FetchErrorKind::Dns
        } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
            FetchErrorKind::Tls
        } else if err.is_connect() {
            FetchErrorKind::Connect
        } else {
            FetchErrorKind::Other
        };

        let message = match kind {
            FetchErrorKind::Timeout => format!("Upstream timeout: {}", detail),
            FetchErrorKind::Dns => format!("DNS resolution failed: {}", detail),
            FetchErrorKind::Tls => format!("TLS error: {}", detail),
            FetchErrorKind::Connect => format!("Connection error: {}", detail),
            FetchErrorKind::Other => detail,
        };
        Self::new(kind, message)
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.iter().any(|p| p == &text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// Failure while turning the upstream HTML into the rewritten document
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("HTML rewriting failed: {0}")]
    Rewriting(#[from] lol_html::errors::RewritingError),
}

/// Errors surfaced by the `/api/router` endpoint
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Missing url query parameter")]
    MissingUrl,

    #[error("Invalid base64 URL format")]
    InvalidTokenFormat(#[from] CodecError),

    #[error("Invalid URL format")]
    InvalidTargetUrl { target_url: String },

    #[error("Error fetching target URL")]
    Upstream(#[from] FetchError),

    #[error("Error fetching target URL")]
    StreamRead(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::MissingUrl
            | RouterError::InvalidTokenFormat(_)
            | RouterError::InvalidTargetUrl { .. } => StatusCode::BAD_REQUEST,
            RouterError::Upstream(_) | RouterError::StreamRead(_) | RouterError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            message: self.to_string(),
            error: None,
            target_url: None,
        };
        match self {
            RouterError::InvalidTargetUrl { target_url } => {
                body.target_url = Some(target_url.clone());
            }
            RouterError::Upstream(err) => body.error = Some(err.message.clone()),
            RouterError::StreamRead(message) => body.error = Some(message.clone()),
            _ => {}
        }
        body
    }
}

/// JSON body for proxy-level failures
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.body())).into_response();
        apply_cors(response.headers_mut());
        response
    }
}
