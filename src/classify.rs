//! Decides how an upstream response body is handled

use axum::http::{header, HeaderMap, HeaderValue};
use url::Url;

const BINARY_TYPES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/pdf",
    "application/zip",
    "application/x-zip-compressed",
    "application/octet-stream",
    "application/x-rar-compressed",
    "application/x-tar",
    "application/gzip",
    "font/",
    "application/font-",
    "application/x-font-",
];

const TEXT_TYPES: &[&str] = &["text/", "application/json", "application/xml"];

/// Extensions served straight from origin instead of through the proxy.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "m3u8", "mpd", "mov"];

const JAVASCRIPT_TYPE: &str = "application/javascript; charset=utf-8";
const WASM_TYPE: &str = "application/wasm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Buffered, parsed and rewritten
    Html,
    /// Streamed through untouched
    Binary,
    /// Streamed through untouched, logged as text
    TextPassthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ContentKind,
    /// Content-Type to send instead of the upstream one, if it was wrong or missing
    pub content_type_override: Option<HeaderValue>,
}

/// Classify an upstream response by its declared type and the request URL.
pub fn classify(headers: &HeaderMap, url: &Url) -> Classification {
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let ext = path_extension(url);

    let Some(declared) = declared else {
        // No declared type: guess from the path, otherwise opaque bytes.
        return match mime_guess::from_path(url.path()).first() {
            Some(mime) => {
                let guessed = mime.essence_str().to_string();
                Classification {
                    kind: kind_of(&guessed),
                    content_type_override: HeaderValue::from_str(&guessed).ok(),
                }
            }
            None => Classification {
                kind: ContentKind::Binary,
                content_type_override: None,
            },
        };
    };

    let lower = declared.to_ascii_lowercase();
    if lower.contains("text/html") {
        match ext.as_deref() {
            Some("js") | Some("mjs") => {
                return Classification {
                    kind: ContentKind::TextPassthrough,
                    content_type_override: Some(HeaderValue::from_static(JAVASCRIPT_TYPE)),
                }
            }
            Some("wasm") => {
                return Classification {
                    kind: ContentKind::Binary,
                    content_type_override: Some(HeaderValue::from_static(WASM_TYPE)),
                }
            }
            _ => {}
        }
    }

    Classification {
        kind: kind_of(&lower),
        content_type_override: None,
    }
}

fn kind_of(content_type: &str) -> ContentKind {
    let lower = content_type.to_ascii_lowercase();
    if lower.contains("text/html") {
        ContentKind::Html
    } else if BINARY_TYPES.iter().any(|t| lower.contains(t)) {
        ContentKind::Binary
    } else if TEXT_TYPES.iter().any(|t| lower.contains(t)) {
        ContentKind::TextPassthrough
    } else {
        ContentKind::Binary
    }
}

/// Lowercased extension of the last path segment, if any.
pub fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// True when the URL names a media file that bypasses the proxy.
pub fn is_video_url(url: &Url) -> bool {
    path_extension(url)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
