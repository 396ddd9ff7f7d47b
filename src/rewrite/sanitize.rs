//! Textual neutralization of frame-busting idioms in inline scripts.
//!
//! Plain substitutions over the script text; nothing is parsed. Idioms
//! written differently (string concatenation, computed property access,
//! obfuscated code) pass through.

use once_cell::sync::Lazy;
use regex::Regex;

const FRAME: &str = r"(?:\bwindow\.)?\b(?:top|parent)";
const SELF: &str = r"(?:\bwindow\.self\b|\bself\b|\bwindow\b)";

/// `if (self !== top)`, `if (window.top != window.self)`, ...
static FRAME_CHECK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\bif\s*\(\s*(?:{frame}\s*!==?\s*{this}|{this}\s*!==?\s*{frame})\s*\)",
        frame = FRAME,
        this = SELF
    ))
    .expect("frame check pattern")
});

/// `top.location = ...`, `parent.location.href = ...`
static FRAME_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}\.location(?:\.href)?\s*=[^=;\n}}][^;\n}}]*", FRAME)).expect("frame assign pattern")
});

/// `top.location.replace(...)`, `top.location.assign(...)`
static FRAME_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}\.location\.(?:replace|assign)\s*\([^)]*\)", FRAME)).expect("frame call pattern")
});

/// Any other `top.location` / `parent.location` reference
static FRAME_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"{}\.location\b", FRAME)).expect("frame location pattern"));

static WINDOW_TOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bwindow\.top\b").expect("window.top pattern"));

static WINDOW_FRAME_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bwindow\.frameElement\b").expect("window.frameElement pattern"));

/// Bare `frameElement`, not a property of some other object
static BARE_FRAME_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^.\w$])frameElement\b").expect("frameElement pattern"));

const REMOVED_NAVIGATION: &str = "void 0 /* frame navigation removed */";

/// Neutralize common frame-detection and frame-busting code.
pub fn sanitize_inline_script(script: &str) -> String {
    let out = FRAME_CHECK.replace_all(script, "if(false)");
    let out = FRAME_ASSIGN.replace_all(&out, REMOVED_NAVIGATION);
    let out = FRAME_CALL.replace_all(&out, REMOVED_NAVIGATION);
    let out = FRAME_LOCATION.replace_all(&out, "self.location");
    let out = WINDOW_TOP.replace_all(&out, "window.self");
    let out = WINDOW_FRAME_ELEMENT.replace_all(&out, "null");
    let out = BARE_FRAME_ELEMENT.replace_all(&out, "${1}null");
    out.into_owned()
}
