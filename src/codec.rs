//! Opaque target-URL token carried in `/api/router?url=<token>`.
//!
//! A token is standard base64 over the UTF-8 bytes of a string, and decoding
//! undoes one level of percent-encoding afterwards. [`token`] percent-encodes
//! the URL first so that decoding gives back exactly the URL that was encoded,
//! escapes like `%23` included. Decoding is lenient the way browsers and
//! query-string parsers mangle a token: a `+` that arrived as a space, the
//! URL-safe alphabet and missing padding are all accepted.

use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use thiserror::Error;

/// Path of the proxy entry point; rewritten links point here.
pub const ROUTER_PATH: &str = "/api/router";

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token does not decode to UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed percent escape at byte {0}")]
    Escape(usize),
}

/// Encode a string, exactly as given, into a token.
pub fn encode(url: &str) -> String {
    STANDARD.encode(url.as_bytes())
}

/// Token for an absolute URL: percent-encoded, then base64.
pub fn token(absolute_url: &str) -> String {
    encode(&urlencoding::encode(absolute_url))
}

/// Decode a token back to a URL string, applying one percent-decoding pass.
/// A `%` that does not start a two-digit hex escape is an error.
pub fn decode(token: &str) -> Result<String, CodecError> {
    let normalized: String = token
        .trim()
        .chars()
        .map(|c| match c {
            ' ' => '+',
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = LENIENT.decode(normalized.as_bytes())?;
    let raw = String::from_utf8(bytes)?;
    check_escapes(&raw)?;
    let decoded = urlencoding::decode(&raw)?;
    Ok(decoded.into_owned())
}

fn check_escapes(raw: &str) -> Result<(), CodecError> {
    let bytes = raw.as_bytes();
    for (i, _) in raw.match_indices('%') {
        let valid = bytes.get(i + 1..i + 3).is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(CodecError::Escape(i));
        }
    }
    Ok(())
}

/// Build the proxied form of an absolute URL, e.g.
/// `https://proxy.example/api/router?url=aHR0cHMlM0ElMkYlMkZleGFtcGxlLmNvbQ==`.
pub fn proxied_url(proxy_origin: &str, absolute_url: &str) -> String {
    format!("{}{}?url={}", proxy_origin, ROUTER_PATH, token(absolute_url))
}
