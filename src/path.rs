//! Request-target safety checks
//!
//! The policy, applied to the path part of the entity (everything before
//! the first `'?'`):
//!
//! 1. The entity is `*` or starts with `'/'`. Anything else is rejected.
//! 2. Percent-encoded bytes are decoded. Bogus percent-encoding, like
//!    `b"%bo"`, is rejected.
//! 3. Encoded separators (`%2F`, `%5C`) are rejected outright; whether they
//!    mean a separator depends on who looks at the path next.
//! 4. A NUL byte, raw or decoded, is rejected.
//! 5. A `..` segment that climbs above the root is rejected.
//! 6. If the decoded path still contains `'%'`, its well-formed `%XX`
//!    triples are decoded a second time and checks 3–5 are repeated on the
//!    result, so doubly-encoded attacks (`%252e%252e`) are caught as well.
//!    Stray `'%'`s elsewhere in the path don't switch this off.
//! 7. The decoded path must be UTF-8.

use crate::errors::BadMessage;

/// A validated request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// Percent-decoded once
    pub path: String,
    /// Raw, without the leading `'?'`
    pub query: String
}

/// Validates an entity against the policy above
pub fn validate_entity(entity: &[u8]) -> Result<RequestPath, BadMessage> {
    if entity == b"*" {
        return Ok(RequestPath { path: String::from("*"), query: String::new() });
    }

    if entity.first() != Some(&b'/') {
        return Err(BadMessage::bad_request("request target not in origin form"));
    }

    if entity.contains(&0) {
        return Err(BadMessage::bad_request("NUL byte in request target"));
    }

    let (raw_path, query) = match entity.iter().position(|&b| b == b'?') {
        Some(i) => (&entity[.. i], &entity[i + 1 ..]),
        None => (entity, &b""[..])
    };

    let decoded = decode_percent(raw_path)
        .ok_or_else(|| BadMessage::bad_request("illegal percent-encoding"))?;
    check_decoded(raw_path, &decoded)?;

    if decoded.contains(&b'%') {
        check_decoded(&decoded, &decode_well_formed(&decoded))?;
    }

    let path = String::from_utf8(decoded)
        .map_err(|_| BadMessage::bad_request("request path is not UTF-8"))?;
    let query = String::from_utf8(Vec::from(query))
        .map_err(|_| BadMessage::bad_request("query string is not UTF-8"))?;

    Ok(RequestPath { path: path, query: query })
}

fn check_decoded(encoded: &[u8], decoded: &[u8]) -> Result<(), BadMessage> {
    if has_encoded_separator(encoded) {
        return Err(BadMessage::bad_request("encoded path separator"));
    }

    if decoded.contains(&0) {
        return Err(BadMessage::bad_request("NUL byte in request path"));
    }

    if escapes_root(decoded) {
        return Err(BadMessage::bad_request("request path escapes document root"));
    }

    Ok(())
}

fn has_encoded_separator(path: &[u8]) -> bool {
    path.windows(3).any(|w| {
        w[0] == b'%' && (w[1] == b'2' && (w[2] == b'f' || w[2] == b'F') ||
                         w[1] == b'5' && (w[2] == b'c' || w[2] == b'C'))
    })
}

/// Whether following the `..` segments of `path` ever climbs above `/`
fn escapes_root(path: &[u8]) -> bool {
    let mut depth: usize = 0;

    for segment in path.split(|&b| b == b'/' || b == b'\\') {
        match segment {
            b"" | b"." => (),
            b".." => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            },
            _ => depth += 1
        }
    }

    false
}

/// Decodes percent-encoded bytes, or `None` on bogus encoding
pub fn decode_percent(path: &[u8]) -> Option<Vec<u8>> {
    let mut buffer = Vec::with_capacity(path.len());

    let mut i = 0;
    while i < path.len() {
        match path[i] {
            // '%'
            0x25 => {
                if path.len() < i + 3 {
                    return None;
                }

                let high_nybble = path[i + 1];
                let low_nybble = path[i + 2];

                if !is_hexit(high_nybble) || !is_hexit(low_nybble) {
                    return None;
                }

                buffer.push(from_hexit(high_nybble) << 4 |
                            from_hexit(low_nybble));

                i += 3;
            },
            b => {
                buffer.push(b);
                i += 1;
            }
        }
    }

    Some(buffer)
}

/// Decodes the well-formed `%XX` triples and keeps any other `'%'` as is
fn decode_well_formed(path: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(path.len());

    let mut i = 0;
    while i < path.len() {
        if path[i] == b'%' && i + 2 < path.len() &&
            is_hexit(path[i + 1]) && is_hexit(path[i + 2])
        {
            buffer.push(from_hexit(path[i + 1]) << 4 | from_hexit(path[i + 2]));
            i += 3;
        }
        else {
            buffer.push(path[i]);
            i += 1;
        }
    }

    buffer
}

/// Returns `true` iff the byte is a hexadecimal digit according to ASCII
fn is_hexit(x: u8) -> bool {
    x.is_ascii_hexdigit()
}

/// Converts from a hexadecimal digit to its value
///
/// Callers check `is_hexit` first; anything else maps to 0.
fn from_hexit(x: u8) -> u8 {
    match x {
        b'0' ..= b'9' => x - b'0',
        b'A' ..= b'F' => x - b'A' + 10,
        b'a' ..= b'f' => x - b'a' + 10,
        _ => 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rejected(entity: &str) -> bool {
        validate_entity(entity.as_bytes()).is_err()
    }

    #[test]
    fn decodes_percents() {
        let target = validate_entity(b"/foo%20bar?x=%41").unwrap();
        assert_eq!(target.path, "/foo bar");
        assert_eq!(target.query, "x=%41");
    }

    #[test]
    fn handles_trailing_percents_correctly() {
        assert_eq!(decode_percent(b"/trail%20").unwrap(), b"/trail ");
        assert!(decode_percent(b"/trail%2").is_none());
    }

    #[test]
    fn errors_on_bogus_percent() {
        assert!(rejected("/bog%us"));
    }

    #[test]
    fn errors_without_leading_slash() {
        assert!(rejected("bogus"));
        assert!(!rejected("*"));
    }

    #[test]
    fn traversal_above_root() {
        assert!(rejected("/../../etc/passwd"));
        assert!(rejected("/foo/../../etc/passwd"));
        assert!(rejected("/%2e%2e/etc/passwd"));
        assert!(!rejected("/foo/../bar"));
        assert!(!rejected("/foo/./bar/.."));
    }

    #[test]
    fn encoded_separators() {
        assert!(rejected("/..%2f..%2fetc/passwd"));
        assert!(rejected("/foo%2Fbar"));
        assert!(rejected("/foo%5cbar"));
    }

    #[test]
    fn nul_bytes() {
        assert!(rejected("/foo%00"));
        assert!(rejected("/foo%00/bar"));
        assert!(rejected("/foo\0"));
    }

    #[test]
    fn double_encoding() {
        assert!(rejected("/%252e%252e/%252e%252e/etc/passwd"));
        assert!(rejected("/foo%2500"));
        assert!(rejected("/a%252fb"));
        // a literal percent sign that doesn't decode again is fine
        assert!(!rejected("/100%25"));
        assert!(!rejected("/100%25/and%2541"));
    }

    #[test]
    fn double_encoding_with_stray_percent() {
        assert!(rejected("/%252e%252e/etc/passwd%25"));
        assert!(rejected("/%252e%252e/%252e%252e/etc/passwd%25"));
        assert!(rejected("/foo%2500%25"));
        assert!(rejected("/a%252fb%25"));
    }

    #[test]
    fn well_formed_triples_only() {
        assert_eq!(decode_well_formed(b"/%2e%zz%"), b"/.%zz%");
        assert_eq!(decode_well_formed(b"%41%4"), b"A%4");
    }

    #[test]
    fn from_hexit_works() {
        for x in 0 .. 0x10 {
            let digit = std::char::from_digit(x, 16).unwrap() as u8;
            assert_eq!(from_hexit(digit), x as u8);
        }
    }
}
