//! HTTP protocol versions

use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum HttpVersion {
    Version0_9,
    Version1_0,
    Version1_1
}

impl HttpVersion {
    /// Parses the `HTTP/x.y` token of a start line
    pub fn from_bytes(token: &[u8]) -> Option<HttpVersion> {
        match token {
            b"HTTP/0.9" => Some(HttpVersion::Version0_9),
            b"HTTP/1.0" => Some(HttpVersion::Version1_0),
            b"HTTP/1.1" => Some(HttpVersion::Version1_1),
            _ => None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Version0_9 => "HTTP/0.9",
            HttpVersion::Version1_0 => "HTTP/1.0",
            HttpVersion::Version1_1 => "HTTP/1.1"
        }
    }

    /// Whether connections stay open after a message by default
    pub fn is_persistent_by_default(self) -> bool {
        self == HttpVersion::Version1_1
    }

    /// HTTP/1.1 is the only version that requires a `Host` header
    pub fn requires_host(self) -> bool {
        self == HttpVersion::Version1_1
    }

    /// Chunked transfer-coding is only understood from HTTP/1.1 on
    pub fn supports_chunked(self) -> bool {
        self == HttpVersion::Version1_1
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[test]
fn parse_versions() {
    assert_eq!(HttpVersion::from_bytes(b"HTTP/1.1"), Some(HttpVersion::Version1_1));
    assert_eq!(HttpVersion::from_bytes(b"HTTP/0.9"), Some(HttpVersion::Version0_9));
    assert_eq!(HttpVersion::from_bytes(b"HTTP/2.0"), None);
    assert_eq!(HttpVersion::from_bytes(b"http/1.1"), None);
}
