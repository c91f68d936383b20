//! Utility functions for safe string handling.

const REASONING_OPEN: &str = "<think>";
const REASONING_CLOSE: &str = "</think>";

/// Find the largest byte index <= `i` that is on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    // Walk backwards while we're at a continuation byte (0b10xxxxxx)
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Truncate `&str` to at most `max_bytes`, never splitting a UTF-8 codepoint.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        s
    } else {
        &s[..floor_char_boundary(s, max_bytes)]
    }
}

/// Remove `<think>...</think>` reasoning blocks from model output.
///
/// A closing tag with no opener drops everything before it (some models omit
/// the opening tag); an opener with no closing tag drops the rest of the text.
/// The result is trimmed.
pub fn strip_reasoning(text: &str) -> String {
    let mut rest = text;
    if let Some(close) = rest.find(REASONING_CLOSE) {
        let open = rest.find(REASONING_OPEN);
        if open.is_none_or(|o| o > close) {
            rest = &rest[close + REASONING_CLOSE.len()..];
        }
    }

    let mut out = String::with_capacity(rest.len());
    while let Some(open) = rest.find(REASONING_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + REASONING_OPEN.len()..];
        match after_open.find(REASONING_CLOSE) {
            Some(close) => rest = &after_open[close + REASONING_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}
