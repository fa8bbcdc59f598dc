//! HTTP status codes

use std::fmt;

/// A numeric HTTP status code
///
/// `HttpStatus::UNDEFINED` is what a fresh response starts with, before the
/// handler has picked a status.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct HttpStatus(pub u16);

impl HttpStatus {
    pub const UNDEFINED: HttpStatus = HttpStatus(0);

    pub const CONTINUE: HttpStatus = HttpStatus(100);
    pub const SWITCHING_PROTOCOLS: HttpStatus = HttpStatus(101);

    pub const OK: HttpStatus = HttpStatus(200);
    pub const CREATED: HttpStatus = HttpStatus(201);
    pub const ACCEPTED: HttpStatus = HttpStatus(202);
    pub const NO_CONTENT: HttpStatus = HttpStatus(204);
    pub const PARTIAL_CONTENT: HttpStatus = HttpStatus(206);

    pub const MOVED_PERMANENTLY: HttpStatus = HttpStatus(301);
    pub const FOUND: HttpStatus = HttpStatus(302);
    pub const NOT_MODIFIED: HttpStatus = HttpStatus(304);

    pub const BAD_REQUEST: HttpStatus = HttpStatus(400);
    pub const FORBIDDEN: HttpStatus = HttpStatus(403);
    pub const NOT_FOUND: HttpStatus = HttpStatus(404);
    pub const METHOD_NOT_ALLOWED: HttpStatus = HttpStatus(405);
    pub const REQUEST_TIMEOUT: HttpStatus = HttpStatus(408);
    pub const LENGTH_REQUIRED: HttpStatus = HttpStatus(411);
    pub const PAYLOAD_TOO_LARGE: HttpStatus = HttpStatus(413);
    pub const URI_TOO_LONG: HttpStatus = HttpStatus(414);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: HttpStatus = HttpStatus(431);

    pub const INTERNAL_SERVER_ERROR: HttpStatus = HttpStatus(500);
    pub const NOT_IMPLEMENTED: HttpStatus = HttpStatus(501);
    pub const BAD_GATEWAY: HttpStatus = HttpStatus(502);
    pub const SERVICE_UNAVAILABLE: HttpStatus = HttpStatus(503);
    pub const GATEWAY_TIMEOUT: HttpStatus = HttpStatus(504);
    pub const HTTP_VERSION_NOT_SUPPORTED: HttpStatus = HttpStatus(505);

    #[inline]
    pub fn code(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        self == HttpStatus::UNDEFINED
    }

    #[inline]
    pub fn is_informational(self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    #[inline]
    pub fn is_client_error(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    #[inline]
    pub fn is_server_error(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Whether a response with this status never carries a body
    pub fn is_content_forbidden(self) -> bool {
        self.is_informational() ||
            self == HttpStatus::NO_CONTENT ||
            self == HttpStatus::NOT_MODIFIED
    }

    /// The canonical reason phrase, or `""` for codes we don't know
    pub fn reason_phrase(self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => ""
        }
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

impl From<u16> for HttpStatus {
    fn from(code: u16) -> HttpStatus {
        HttpStatus(code)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reason_phrases() {
        assert_eq!(HttpStatus::OK.reason_phrase(), "OK");
        assert_eq!(HttpStatus::GATEWAY_TIMEOUT.reason_phrase(), "Gateway Timeout");
        assert_eq!(HttpStatus(299).reason_phrase(), "");
    }

    #[test]
    fn content_forbidden() {
        assert!(HttpStatus::NO_CONTENT.is_content_forbidden());
        assert!(HttpStatus::NOT_MODIFIED.is_content_forbidden());
        assert!(HttpStatus::CONTINUE.is_content_forbidden());
        assert!(!HttpStatus::OK.is_content_forbidden());
    }

    #[test]
    fn undefined_sentinel() {
        assert!(HttpStatus::UNDEFINED.is_undefined());
        assert!(!HttpStatus::OK.is_undefined());
    }
}
