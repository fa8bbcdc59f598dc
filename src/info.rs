//! Message metadata handed between channel, generator and transports

use crate::headers::HeaderFieldList;
use crate::status::HttpStatus;
use crate::version::HttpVersion;

/// The start line and header block of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub version: HttpVersion,
    pub method: String,
    pub entity: String,
    pub headers: HeaderFieldList,
    /// `None` when the length is not known up front (chunked)
    pub content_length: Option<u64>,
    pub trailers: HeaderFieldList
}

impl RequestInfo {
    pub fn new<M: Into<String>, E: Into<String>>(version: HttpVersion, method: M,
                                                 entity: E,
                                                 headers: HeaderFieldList)
                                                 -> RequestInfo
    {
        RequestInfo {
            version: version,
            method: method.into(),
            entity: entity.into(),
            headers: headers,
            content_length: None,
            trailers: HeaderFieldList::new()
        }
    }
}

/// The status line and header block of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub version: HttpVersion,
    pub status: HttpStatus,
    pub reason: String,
    pub headers: HeaderFieldList,
    /// `None` when the length is not known up front (chunked, or
    /// close-delimited for HTTP/1.0)
    pub content_length: Option<u64>,
    /// Trailer names declared up front; the transport learns the values when
    /// the response completes.
    pub trailers: HeaderFieldList,
    /// Answer to a `HEAD` request: framing headers go out, the body doesn't
    pub head_response: bool
}

impl ResponseInfo {
    pub fn new(version: HttpVersion, status: HttpStatus) -> ResponseInfo {
        ResponseInfo {
            version: version,
            status: status,
            reason: String::new(),
            headers: HeaderFieldList::new(),
            content_length: None,
            trailers: HeaderFieldList::new(),
            head_response: false
        }
    }

    /// The reason phrase to put on the wire
    pub fn reason_phrase(&self) -> &str {
        if self.reason.is_empty() {
            self.status.reason_phrase()
        }
        else {
            &self.reason
        }
    }

    /// Whether body bytes of this response are dropped rather than sent
    pub fn is_body_suppressed(&self) -> bool {
        self.head_response || self.status.is_content_forbidden()
    }
}

impl Default for ResponseInfo {
    fn default() -> ResponseInfo {
        ResponseInfo::new(HttpVersion::Version1_1, HttpStatus::UNDEFINED)
    }
}

#[test]
fn reason_falls_back_to_canonical() {
    let mut info = ResponseInfo::new(HttpVersion::Version1_1, HttpStatus::NOT_FOUND);
    assert_eq!(info.reason_phrase(), "Not Found");

    info.reason = String::from("Gone fishing");
    assert_eq!(info.reason_phrase(), "Gone fishing");
}
