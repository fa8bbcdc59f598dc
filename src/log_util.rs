//! Smol utilities for logging

use std::ascii;

/// Make an Ascii-safe string
pub fn ascii_escape(s: &[u8]) -> String {
    s.iter().flat_map(|&b| ascii::escape_default(b)).map(char::from).collect()
}

/// Like `ascii_escape`, but cut short after `limit` input bytes
pub fn ascii_escape_prefix(s: &[u8], limit: usize) -> String {
    if s.len() <= limit {
        ascii_escape(s)
    }
    else {
        format!("{}...", ascii_escape(&s[.. limit]))
    }
}

#[test]
fn escapes_control_bytes() {
    assert_eq!(ascii_escape(b"GET /\r\n"), "GET /\\r\\n");
    assert_eq!(ascii_escape(b"\x00\xff"), "\\x00\\xff");
    assert_eq!(ascii_escape_prefix(b"abcdef", 3), "abc...");
}
