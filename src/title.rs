//! Title pre-filtering.
//!
//! Titles carrying LaTeX markup, unicode math or punctuation rarely match on
//! Google Scholar, so they are rejected before spending lookup quota on them.

/// Returns `true` if `title` is non-empty and contains only ASCII letters,
/// digits, whitespace, hyphens and colons.
///
/// An absent title is invalid.
pub fn is_valid_title(title: Option<&str>) -> bool {
    match title {
        Some(t) if !t.is_empty() => t.chars().all(is_allowed_char),
        _ => false,
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || is_regex_space(c) || c == '-' || c == ':'
}

/// ASCII `\s`; unlike `char::is_ascii_whitespace` this includes vertical tab.
fn is_regex_space(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0B'
}

/// Collapse runs of whitespace (titles often wrap across lines) into single
/// spaces and trim the ends.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}
