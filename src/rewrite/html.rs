use lol_html::{element, html_content::ContentType, text, HtmlRewriter, MemorySettings, Settings};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::Cell;

use super::{interceptor::script_tag, sanitize::sanitize_inline_script, RewriteContext};
use crate::{error::RewriteError, headers::is_framing_directive};

static TARGET_BLANK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\btarget\s*=\s*(["']?)_blank\b"#).expect("target pattern"));
static DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*<!doctype[^>]*>").expect("doctype pattern"));

/// Rewrite an HTML document so every navigation, asset and form goes back
/// through the router, and inject the interceptor script.
pub fn rewrite_html(html: &str, ctx: &RewriteContext) -> Result<String, RewriteError> {
    // New windows would escape the frame
    let html = TARGET_BLANK.replace_all(html, "target=${1}_self");

    let script = script_tag(&ctx.target_url);
    let injected = Cell::new(false);
    let mut inline_script = String::new();
    let mut output = Vec::with_capacity(html.len() + script.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("meta[http-equiv]", |el| {
                    if el
                        .get_attribute("http-equiv")
                        .is_some_and(|v| is_framing_directive(&v))
                    {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("link[rel]", |el| {
                    let preload = el.get_attribute("rel").is_some_and(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|token| token.to_ascii_lowercase().contains("preload"))
                    });
                    if preload {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("a[href], link[href]", |el| {
                    if let Some(href) = el.get_attribute("href").and_then(|v| ctx.proxied(&v)) {
                        el.set_attribute("href", &href)?;
                    }
                    Ok(())
                }),
                element!("form[action]", |el| {
                    if let Some(action) = el.get_attribute("action").and_then(|v| ctx.proxied(&v)) {
                        el.set_attribute("action", &action)?;
                    }
                    Ok(())
                }),
                element!("*[src]", |el| {
                    let tag = el.tag_name();
                    if let Some(src) = el.get_attribute("src").and_then(|v| ctx.media_source(&tag, &v)) {
                        el.set_attribute("src", &src)?;
                    }
                    Ok(())
                }),
                element!("*[srcset]", |el| {
                    if let Some(srcset) = el.get_attribute("srcset") {
                        el.set_attribute("srcset", &ctx.srcset(&srcset))?;
                    }
                    Ok(())
                }),
                // Inline script text arrives in chunks; hold it until the last one.
                text!("script:not([src])", |chunk| {
                    inline_script.push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        chunk.replace(&sanitize_inline_script(&inline_script), ContentType::Html);
                        inline_script.clear();
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
                element!("head", |el| {
                    if !injected.get() {
                        el.prepend(&script, ContentType::Html);
                        injected.set(true);
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if !injected.get() {
                        el.prepend(&script, ContentType::Html);
                        injected.set(true);
                    }
                    Ok(())
                }),
            ],
            memory_settings: MemorySettings {
                max_allowed_memory_usage: ctx.memory_limit,
                preallocated_parsing_buffer_size: 0,
            },
            strict: false,
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    let mut out = String::from_utf8_lossy(&output).into_owned();
    if !injected.get() {
        // No head or body; the script goes right after any doctype
        let at = DOCTYPE.find(&out).map_or(0, |m| m.end());
        out.insert_str(at, &script);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use scraper::{Html, Selector};
    use url::Url;

    const PREFIX: &str = "http://proxy.test/api/router?url=";

    fn ctx(target: &str) -> RewriteContext {
        RewriteContext::new(Url::parse(target).unwrap(), "http://proxy.test")
    }

    fn attr(doc: &Html, selector: &str, name: &str) -> String {
        let parsed = Selector::parse(selector).unwrap();
        doc.select(&parsed)
            .next()
            .and_then(|el| el.value().attr(name))
            .unwrap_or_else(|| panic!("no {} on {}", name, selector))
            .to_string()
    }

    fn target_of(proxied: &str) -> String {
        decode(proxied.strip_prefix(PREFIX).expect("router url")).unwrap()
    }

    #[test]
    fn test_relative_link_proxied() {
        let out = rewrite_html(r#"<html><head></head><body><a href="/x">x</a></body></html>"#, &ctx("https://a.com/")).unwrap();
        let doc = Html::parse_document(&out);
        assert_eq!(target_of(&attr(&doc, "a", "href")), "https://a.com/x");
    }

    #[test]
    fn test_assets_and_forms_proxied() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="css/site.css">
            <script src="https://cdn.com/app.js"></script>
        </head><body>
            <img src="img/logo.png" srcset="a.png 1x, b.png 2x">
            <iframe src="/embed"></iframe>
            <form action="/search" method="get"></form>
        </body></html>"#;
        let out = rewrite_html(html, &ctx("https://a.com/dir/")).unwrap();
        let doc = Html::parse_document(&out);

        assert_eq!(target_of(&attr(&doc, "link", "href")), "https://a.com/dir/css/site.css");
        assert_eq!(target_of(&attr(&doc, "script[src]", "src")), "https://cdn.com/app.js");
        assert_eq!(target_of(&attr(&doc, "img", "src")), "https://a.com/dir/img/logo.png");
        assert_eq!(target_of(&attr(&doc, "iframe", "src")), "https://a.com/embed");
        assert_eq!(target_of(&attr(&doc, "form", "action")), "https://a.com/search");

        let srcset = attr(&doc, "img", "srcset");
        let candidates: Vec<&str> = srcset.split(", ").collect();
        assert_eq!(candidates.len(), 2);
        assert_eq!(target_of(candidates[0].trim_end_matches(" 1x")), "https://a.com/dir/a.png");
        assert_eq!(target_of(candidates[1].trim_end_matches(" 2x")), "https://a.com/dir/b.png");
    }

    #[test]
    fn test_inert_values_untouched() {
        let html = r##"<html><body>
            <a id="js" href="javascript:void(0)">a</a>
            <a id="hash" href="#section">b</a>
            <a id="mail" href="mailto:x@y.z">c</a>
            <img src="data:image/gif;base64,R0lGOD">
            <a id="done" href="/api/router?url=aHR0cHM6Ly9hLmNvbQ==">d</a>
        </body></html>"##;
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        let doc = Html::parse_document(&out);
        assert_eq!(attr(&doc, "#js", "href"), "javascript:void(0)");
        assert_eq!(attr(&doc, "#hash", "href"), "#section");
        assert_eq!(attr(&doc, "#mail", "href"), "mailto:x@y.z");
        assert_eq!(attr(&doc, "img", "src"), "data:image/gif;base64,R0lGOD");
        assert_eq!(attr(&doc, "#done", "href"), "/api/router?url=aHR0cHM6Ly9hLmNvbQ==");
    }

    #[test]
    fn test_video_sources_direct() {
        let html = r#"<html><body>
            <video src="/v/stream"><source src="clip.webm"></video>
            <img id="poster" src="/movie.mp4">
        </body></html>"#;
        let out = rewrite_html(html, &ctx("https://a.com/media/")).unwrap();
        let doc = Html::parse_document(&out);
        assert_eq!(attr(&doc, "video", "src"), "https://a.com/v/stream");
        assert_eq!(attr(&doc, "source", "src"), "https://a.com/media/clip.webm");
        assert_eq!(attr(&doc, "#poster", "src"), "https://a.com/movie.mp4");
    }

    #[test]
    fn test_target_blank_becomes_self() {
        let html = r#"<html><body><a href="/a" target="_blank">a</a><a href="/b" TARGET='_BLANK'>b</a></body></html>"#;
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        assert!(!out.to_ascii_lowercase().contains("_blank"));
        let doc = Html::parse_document(&out);
        let anchors = Selector::parse("a").unwrap();
        for a in doc.select(&anchors) {
            assert_eq!(a.value().attr("target"), Some("_self"));
        }
    }

    #[test]
    fn test_framing_meta_and_preload_removed() {
        let html = r#"<html><head>
            <meta http-equiv="X-Frame-Options" content="DENY">
            <meta http-equiv="Content-Security-Policy" content="frame-ancestors 'none'">
            <meta http-equiv="refresh" content="30">
            <link rel="preload" href="/font.woff2" as="font">
            <link rel="modulepreload" href="/m.js">
            <link rel="icon" href="/favicon.ico">
        </head><body></body></html>"#;
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        let lower = out.to_ascii_lowercase();
        assert!(!lower.contains("x-frame-options\""));
        assert!(!lower.contains("content-security-policy"));
        assert!(lower.contains("http-equiv=\"refresh\""));
        assert!(!lower.contains("preload"));
        assert!(out.contains("rel=\"icon\""));
    }

    #[test]
    fn test_inline_script_sanitized() {
        let html = "<html><head><script>if (top !== self) { top.location = '/blocked'; }</script></head><body></body></html>";
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        let doc = Html::parse_document(&out);
        let scripts = Selector::parse("script:not([data-frame-router])").unwrap();
        let inline: String = doc.select(&scripts).flat_map(|s| s.text()).collect();
        assert!(!inline.contains("top.location"));
        assert!(!inline.contains("top !== self"));
        assert!(inline.contains("if(false)"));
    }

    #[test]
    fn test_external_script_body_untouched() {
        let html = r#"<html><body><script src="/a.js">window.top</script></body></html>"#;
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        assert!(out.contains(">window.top</script>"));
    }

    #[test]
    fn test_interceptor_injected_once_into_head() {
        let html = "<html><head><title>t</title></head><body><p>hi</p></body></html>";
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        assert_eq!(out.matches("data-frame-router").count(), 1);
        let doc = Html::parse_document(&out);
        let first = Selector::parse("head > script:first-child").unwrap();
        let script = doc.select(&first).next().expect("script in head");
        assert!(script.value().attr("data-frame-router").is_some());
    }

    #[test]
    fn test_interceptor_fallbacks() {
        let out = rewrite_html("<body><p>no head</p></body>", &ctx("https://a.com/")).unwrap();
        assert!(out.starts_with("<body><script data-frame-router>"));

        let out = rewrite_html("<p>fragment</p>", &ctx("https://a.com/")).unwrap();
        assert!(out.starts_with("<script data-frame-router>"));
        assert!(out.ends_with("<p>fragment</p>"));
    }

    #[test]
    fn test_fallback_injection_follows_doctype() {
        let out = rewrite_html("<!DOCTYPE html>\n<p>fragment</p>", &ctx("https://a.com/")).unwrap();
        assert!(out.starts_with("<!DOCTYPE html><script data-frame-router>"));
        assert!(out.ends_with("</script>\n<p>fragment</p>"));
    }

    #[test]
    fn test_escaped_characters_survive_token() {
        let html = r#"<html><body><a href="/tag/c%23?q=a%26b">c#</a><img src="/img/caf%C3%A9%2B1.png"></body></html>"#;
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        let doc = Html::parse_document(&out);
        assert_eq!(target_of(&attr(&doc, "a", "href")), "https://a.com/tag/c%23?q=a%26b");
        assert_eq!(target_of(&attr(&doc, "img", "src")), "https://a.com/img/caf%C3%A9%2B1.png");
    }

    #[test]
    fn test_malformed_html_still_rewritten() {
        let html = r#"<div><a href="/x">unclosed <b>tags<table><tr><td><a href="y">"#;
        let out = rewrite_html(html, &ctx("https://a.com/")).unwrap();
        assert!(out.contains(PREFIX));
        assert!(out.contains("data-frame-router"));
    }
}
