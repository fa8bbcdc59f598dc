//! The sink every wire front-end feeds
//!
//! `Http1Parser` and the FastCGI `RequestParser` both turn bytes into calls
//! on a `MessageListener`; `HttpChannel` is the listener that matters, but
//! anything implementing the trait can sit behind a parser.
//!
//! Every event but the protocol error returns a `bool`. Returning `false`
//! asks the parser to stop at that point; it hands back the number of bytes
//! consumed so far and picks up from there on the next call.

use crate::status::HttpStatus;
use crate::version::HttpVersion;

use std::fmt;

/// Malformed input on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// The status a server should answer with, if it still can
    pub status: HttpStatus,
    pub message: String,
    /// Index into the fragment being parsed where the problem was noticed
    pub offset: usize
}

impl ProtocolError {
    pub fn new<S: Into<String>>(status: HttpStatus, message: S, offset: usize)
                                -> ProtocolError
    {
        ProtocolError { status: status, message: message.into(), offset: offset }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at offset {} ({})", self.message, self.offset, self.status)
    }
}

impl ::std::error::Error for ProtocolError {}

pub trait MessageListener {
    /// A request line was parsed
    fn on_message_begin_request(&mut self, method: &[u8], entity: &[u8],
                                version: HttpVersion) -> bool;

    /// A status line was parsed
    fn on_message_begin_response(&mut self, _version: HttpVersion,
                                 _status: HttpStatus, _reason: &[u8]) -> bool {
        true
    }

    /// A message without a start line begins
    fn on_message_begin(&mut self) -> bool {
        true
    }

    /// A header field; after the body of a chunked message, a trailer field
    fn on_message_header(&mut self, name: &[u8], value: &[u8]) -> bool;

    fn on_message_header_end(&mut self) -> bool;

    fn on_message_content(&mut self, chunk: &[u8]) -> bool;

    fn on_message_end(&mut self) -> bool;

    fn on_protocol_error(&mut self, error: ProtocolError);
}

impl<'a, L: MessageListener + ?Sized> MessageListener for &'a mut L {
    fn on_message_begin_request(&mut self, method: &[u8], entity: &[u8],
                                version: HttpVersion) -> bool {
        (**self).on_message_begin_request(method, entity, version)
    }

    fn on_message_begin_response(&mut self, version: HttpVersion,
                                 status: HttpStatus, reason: &[u8]) -> bool {
        (**self).on_message_begin_response(version, status, reason)
    }

    fn on_message_begin(&mut self) -> bool {
        (**self).on_message_begin()
    }

    fn on_message_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        (**self).on_message_header(name, value)
    }

    fn on_message_header_end(&mut self) -> bool {
        (**self).on_message_header_end()
    }

    fn on_message_content(&mut self, chunk: &[u8]) -> bool {
        (**self).on_message_content(chunk)
    }

    fn on_message_end(&mut self) -> bool {
        (**self).on_message_end()
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        (**self).on_protocol_error(error)
    }
}

impl<L: MessageListener + ?Sized> MessageListener for Box<L> {
    fn on_message_begin_request(&mut self, method: &[u8], entity: &[u8],
                                version: HttpVersion) -> bool {
        (**self).on_message_begin_request(method, entity, version)
    }

    fn on_message_begin_response(&mut self, version: HttpVersion,
                                 status: HttpStatus, reason: &[u8]) -> bool {
        (**self).on_message_begin_response(version, status, reason)
    }

    fn on_message_begin(&mut self) -> bool {
        (**self).on_message_begin()
    }

    fn on_message_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        (**self).on_message_header(name, value)
    }

    fn on_message_header_end(&mut self) -> bool {
        (**self).on_message_header_end()
    }

    fn on_message_content(&mut self, chunk: &[u8]) -> bool {
        (**self).on_message_content(chunk)
    }

    fn on_message_end(&mut self) -> bool {
        (**self).on_message_end()
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        (**self).on_protocol_error(error)
    }
}

/// A listener that writes down everything it hears; test scaffolding for
/// the parsers
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub method: String,
    pub entity: String,
    pub version: Option<HttpVersion>,
    pub status: Option<HttpStatus>,
    pub reason: String,
    pub request_begins: Vec<(String, String, HttpVersion)>,
    pub headers: Vec<(String, String)>,
    pub header_ends: usize,
    pub body: Vec<u8>,
    pub message_ends: usize,
    pub errors: Vec<ProtocolError>,
    pub events: Vec<String>
}

#[cfg(test)]
impl MessageListener for RecordingListener {
    fn on_message_begin_request(&mut self, method: &[u8], entity: &[u8],
                                version: HttpVersion) -> bool {
        self.method = String::from_utf8_lossy(method).into_owned();
        self.entity = String::from_utf8_lossy(entity).into_owned();
        self.version = Some(version);
        self.request_begins.push((self.method.clone(), self.entity.clone(), version));
        self.events.push(format!("begin {} {} {}", self.method, self.entity, version));
        true
    }

    fn on_message_begin_response(&mut self, version: HttpVersion,
                                 status: HttpStatus, reason: &[u8]) -> bool {
        self.version = Some(version);
        self.status = Some(status);
        self.reason = String::from_utf8_lossy(reason).into_owned();
        self.events.push(format!("begin {} {}", version, status.code()));
        true
    }

    fn on_message_begin(&mut self) -> bool {
        self.events.push(String::from("begin"));
        true
    }

    fn on_message_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        let name = String::from_utf8_lossy(name).into_owned();
        let value = String::from_utf8_lossy(value).into_owned();
        self.events.push(format!("header {}: {}", name, value));
        self.headers.push((name, value));
        true
    }

    fn on_message_header_end(&mut self) -> bool {
        self.header_ends += 1;
        self.events.push(String::from("header-end"));
        true
    }

    fn on_message_content(&mut self, chunk: &[u8]) -> bool {
        self.body.extend_from_slice(chunk);
        true
    }

    fn on_message_end(&mut self) -> bool {
        self.message_ends += 1;
        self.events.push(format!("end {}", String::from_utf8_lossy(&self.body)));
        true
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        self.events.push(format!("error {}", error.offset));
        self.errors.push(error);
    }
}
