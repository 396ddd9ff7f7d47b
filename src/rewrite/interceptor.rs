//! Client-side script injected into every rewritten page.

use url::Url;

const INTERCEPTOR_JS: &str = include_str!("interceptor.js");

/// `<script>` element carrying the interceptor, bound to the page's target URL.
pub fn script_tag(target_url: &Url) -> String {
    // JSON string literal, with `</` escaped so a hostile URL cannot close the tag
    let literal = serde_json::Value::String(target_url.as_str().to_string())
        .to_string()
        .replace("</", "<\\/");
    format!(
        "<script data-frame-router>{}</script>",
        INTERCEPTOR_JS.replace("{{TARGET_URL}}", &literal)
    )
}
