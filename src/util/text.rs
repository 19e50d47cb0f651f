use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

static TAG_PATTERN: OnceLock<Regex> = OnceLock::new();
static SCRIPT_PATTERN: OnceLock<Regex> = OnceLock::new();

fn tag_pattern() -> &'static Regex {
    TAG_PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

fn script_pattern() -> &'static Regex {
    SCRIPT_PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("static regex")
    })
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && c != '\t' && c != '\n' && c != '\r'
}

/// Strip control characters other than tab, newline and carriage return.
///
/// Returns `Cow::Borrowed` when the input is already clean.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_stripped_control(c)).collect())
}

/// Reduce upstream text to a single plain-text line.
///
/// Removes markup (script and style blocks including their contents),
/// strips control characters, collapses runs of whitespace and trims.
pub fn sanitize_text_field(s: &str) -> String {
    let without_scripts = script_pattern().replace_all(s, "");
    let without_tags = tag_pattern().replace_all(&without_scripts, "");
    let clean = strip_control_chars(&without_tags);
    clean.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean an upstream description for storage as a record body.
///
/// Markup is kept apart from script and style blocks; control characters are
/// removed and the result trimmed.
pub fn sanitize_body(s: &str) -> String {
    let without_scripts = script_pattern().replace_all(s, "");
    strip_control_chars(&without_scripts).trim().to_string()
}
