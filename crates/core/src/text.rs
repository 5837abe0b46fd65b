//! Small text helpers shared by trace and prompt code.

/// Maximum characters of a payload kept in a trace row.
pub const PREVIEW_CHARS: usize = 300;

/// Return at most `max_chars` characters of `s`, never splitting a code point.
pub fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Estimate tokens for a piece of text at roughly four characters per token.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count() / 4
}
