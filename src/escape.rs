//! HTML sanitising for values that end up in rendered pages.
//!
//! This is not SQL escaping. Statements are protected by parameter binding;
//! [`escape_string`] only keeps user text from injecting markup.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--.*?(?:-->|$)|<[a-zA-Z/!?][^>]*(?:>|$)").expect("tag pattern is valid")
});

/// Strips markup tags, then HTML-escapes `& < > " '` in what remains.
///
/// A `<` not followed by a tag-like character is kept as text and escaped.
pub fn escape_string(value: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(value, "");
    let mut escaped = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
