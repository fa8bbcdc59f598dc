//! Incremental HTTP/1.x message parser
//!
//! Feed it fragments of any size; it keeps at most the current line (start
//! line, header line or chunk-size line) buffered between calls and
//! otherwise hands bytes straight to the listener. Once a message is
//! complete the parser starts on the next one, so several pipelined
//! messages can arrive in one fragment.

use crate::listener::{MessageListener, ProtocolError};
use crate::log_util::ascii_escape_prefix;
use crate::status::HttpStatus;
use crate::version::HttpVersion;

use std::mem;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

/// What kind of start line to expect
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParserMode {
    Request,
    Response,
    /// A bare header block and body, no start line
    Message
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParserState {
    Start,
    RequestOrStatusLine,
    Headers,
    BodyFixedLength,
    BodyChunkedSize,
    BodyChunkedData,
    BodyChunkedTrailer,
    BodyUntilClose,
    Complete,
    Error
}

/// Finer-grained than `ParserState`: the CRLF after each chunk gets its own
/// states so a missing byte is reported where it should have been.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    Start,
    StartLine,
    Headers,
    FixedBody,
    ChunkSize,
    ChunkData,
    ChunkDataCr,
    ChunkDataLf,
    ChunkTrailer,
    UntilClose,
    /// Everything is read but the listener paused before hearing the end
    EndPending,
    Complete,
    Error
}

enum LineRead {
    /// The line is buffered; the index is just past its LF
    Complete(usize),
    /// The fragment ran out first
    Partial,
    /// The line outgrew the limit at this index
    TooLong(usize)
}

pub struct Http1Parser {
    mode: ParserMode,
    state: State,
    max_line_length: usize,
    line: Vec<u8>,
    bytes_received: u64,

    // per message
    status: HttpStatus,
    content_length: Option<u64>,
    chunked: bool,
    transfer_encoded: bool,
    remaining: u64
}

impl Http1Parser {
    pub fn new(mode: ParserMode) -> Http1Parser {
        Http1Parser::with_max_line_length(mode, DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(mode: ParserMode, max_line_length: usize)
                                -> Http1Parser
    {
        Http1Parser {
            mode: mode,
            state: State::Start,
            max_line_length: max_line_length,
            line: Vec::new(),
            bytes_received: 0,
            status: HttpStatus::UNDEFINED,
            content_length: None,
            chunked: false,
            transfer_encoded: false,
            remaining: 0
        }
    }

    #[inline]
    pub fn mode(&self) -> ParserMode {
        self.mode
    }

    pub fn state(&self) -> ParserState {
        match self.state {
            State::Start => ParserState::Start,
            State::StartLine => ParserState::RequestOrStatusLine,
            State::Headers => ParserState::Headers,
            State::FixedBody | State::EndPending => ParserState::BodyFixedLength,
            State::ChunkSize => ParserState::BodyChunkedSize,
            State::ChunkData | State::ChunkDataCr | State::ChunkDataLf =>
                ParserState::BodyChunkedData,
            State::ChunkTrailer => ParserState::BodyChunkedTrailer,
            State::UntilClose => ParserState::BodyUntilClose,
            State::Complete => ParserState::Complete,
            State::Error => ParserState::Error
        }
    }

    /// Total number of bytes consumed since construction
    #[inline]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Whether the parser sits between messages
    pub fn is_idle(&self) -> bool {
        (self.state == State::Start && self.line.is_empty()) ||
            self.state == State::Complete
    }

    /// Forgets everything, including a previous protocol error
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.line.clear();
        self.reset_message();
    }

    fn reset_message(&mut self) {
        self.status = HttpStatus::UNDEFINED;
        self.content_length = None;
        self.chunked = false;
        self.transfer_encoded = false;
        self.remaining = 0;
    }

    /// Parses as much of `chunk` as possible
    ///
    /// Returns the number of bytes consumed. That is all of them, unless the
    /// listener asked to stop (the rest should be offered again later) or
    /// the input was malformed (the return value is then the offset the
    /// error was reported at).
    pub fn parse_fragment<L>(&mut self, chunk: &[u8], listener: &mut L) -> usize
        where L: MessageListener + ?Sized
    {
        let consumed = self.parse_inner(chunk, listener);
        self.bytes_received += consumed as u64;
        consumed
    }

    /// Tells the parser the input has ended
    ///
    /// That completes a body delimited by connection close. Ending anywhere
    /// else inside a message is a protocol error.
    pub fn finish<L>(&mut self, listener: &mut L)
        where L: MessageListener + ?Sized
    {
        match self.state {
            State::UntilClose | State::EndPending => {
                self.state = State::Complete;
                listener.on_message_end();
            },
            State::Start if self.line.is_empty() => (),
            State::Complete | State::Error => (),
            _ => {
                self.fail(listener, HttpStatus::BAD_REQUEST,
                          "unexpected end of input", 0);
            }
        }
    }

    fn parse_inner<L>(&mut self, chunk: &[u8], listener: &mut L) -> usize
        where L: MessageListener + ?Sized
    {
        let mut i = 0;

        loop {
            match self.state {
                State::Error => return i,
                State::Complete => {
                    self.reset_message();
                    self.state = State::Start;
                    continue;
                },
                State::EndPending => {
                    self.state = State::Complete;
                    if !listener.on_message_end() {
                        return i;
                    }
                    continue;
                },
                _ => ()
            }

            if i == chunk.len() {
                return i;
            }

            match self.state {
                State::Start => {
                    if self.mode == ParserMode::Message {
                        self.state = State::Headers;
                        if !listener.on_message_begin() {
                            return i;
                        }
                    }
                    else if chunk[i] == b'\r' || chunk[i] == b'\n' {
                        // stray empty lines ahead of a start line
                        i += 1;
                    }
                    else {
                        self.state = State::StartLine;
                    }
                },
                State::StartLine => {
                    let next = match self.read_line(chunk, i) {
                        LineRead::Complete(next) => next,
                        LineRead::Partial => return chunk.len(),
                        LineRead::TooLong(at) => {
                            let status = match self.mode {
                                ParserMode::Request => HttpStatus::URI_TOO_LONG,
                                _ => HttpStatus::BAD_REQUEST
                            };
                            return self.fail(listener, status,
                                             "start line too long", at);
                        }
                    };

                    let line = match self.take_line(listener, next - 1) {
                        Some(line) => line,
                        None => return next - 1
                    };
                    let result = match self.mode {
                        ParserMode::Request =>
                            self.parse_request_line(&line, next - 1, listener),
                        _ => self.parse_status_line(&line, next - 1, listener)
                    };
                    self.give_back(line);

                    match result {
                        Ok(true) => i = next,
                        Ok(false) => return next,
                        Err(offset) => return offset
                    }
                },
                State::Headers | State::ChunkTrailer => {
                    let next = match self.read_line(chunk, i) {
                        LineRead::Complete(next) => next,
                        LineRead::Partial => return chunk.len(),
                        LineRead::TooLong(at) => {
                            return self.fail(
                                listener,
                                HttpStatus::REQUEST_HEADER_FIELDS_TOO_LARGE,
                                "header line too long", at);
                        }
                    };

                    let line = match self.take_line(listener, next - 1) {
                        Some(line) => line,
                        None => return next - 1
                    };
                    let result = if line.is_empty() {
                        if self.state == State::Headers {
                            self.end_headers(next - 1, listener)
                        }
                        else {
                            self.state = State::Complete;
                            Ok(listener.on_message_end())
                        }
                    }
                    else {
                        self.parse_header_line(&line, next - 1, listener)
                    };
                    self.give_back(line);

                    match result {
                        Ok(true) => i = next,
                        Ok(false) => return next,
                        Err(offset) => return offset
                    }
                },
                State::FixedBody | State::ChunkData => {
                    let available = (chunk.len() - i) as u64;
                    let n = available.min(self.remaining) as usize;
                    let body = &chunk[i .. i + n];
                    i += n;
                    self.remaining -= n as u64;

                    if self.remaining == 0 {
                        self.state = match self.state {
                            State::ChunkData => State::ChunkDataCr,
                            _ => State::EndPending
                        };
                    }

                    if !listener.on_message_content(body) {
                        return i;
                    }
                },
                State::ChunkDataCr => {
                    if chunk[i] != b'\r' {
                        return self.fail(listener, HttpStatus::BAD_REQUEST,
                                         "missing CR after chunk data", i);
                    }
                    self.state = State::ChunkDataLf;
                    i += 1;
                },
                State::ChunkDataLf => {
                    if chunk[i] != b'\n' {
                        return self.fail(listener, HttpStatus::BAD_REQUEST,
                                         "missing LF after chunk data", i);
                    }
                    self.state = State::ChunkSize;
                    i += 1;
                },
                State::ChunkSize => {
                    if self.line.is_empty() && !chunk[i].is_ascii_hexdigit() {
                        return self.fail(listener, HttpStatus::BAD_REQUEST,
                                         "invalid chunk size", i);
                    }

                    let next = match self.read_line(chunk, i) {
                        LineRead::Complete(next) => next,
                        LineRead::Partial => return chunk.len(),
                        LineRead::TooLong(at) => {
                            return self.fail(listener, HttpStatus::BAD_REQUEST,
                                             "chunk size line too long", at);
                        }
                    };

                    let size = match httparse::parse_chunk_size(&self.line) {
                        Ok(httparse::Status::Complete((_, size))) => size,
                        _ => {
                            return self.fail(listener, HttpStatus::BAD_REQUEST,
                                             "invalid chunk size", next - 1);
                        }
                    };
                    self.line.clear();
                    i = next;

                    if size == 0 {
                        self.state = State::ChunkTrailer;
                    }
                    else {
                        self.remaining = size;
                        self.state = State::ChunkData;
                    }
                },
                State::UntilClose => {
                    let body = &chunk[i ..];
                    i = chunk.len();
                    if !listener.on_message_content(body) {
                        return i;
                    }
                },
                State::EndPending | State::Complete | State::Error => unreachable!()
            }
        }
    }

    fn read_line(&mut self, chunk: &[u8], i: usize) -> LineRead {
        let rest = &chunk[i ..];
        let (take, complete) = match rest.iter().position(|&b| b == b'\n') {
            Some(lf) => (lf + 1, true),
            None => (rest.len(), false)
        };

        // the limit covers the line itself; CRLF comes on top
        let limit = self.max_line_length + 2;
        if self.line.len() + take > limit {
            let over = limit.saturating_sub(self.line.len());
            return LineRead::TooLong(i + over.min(take - 1));
        }

        self.line.extend_from_slice(&rest[.. take]);

        if complete {
            LineRead::Complete(i + take)
        }
        else {
            LineRead::Partial
        }
    }

    /// Takes the buffered line, minus its CRLF; `None` (with the error
    /// reported) if the LF at `lf` wasn't preceded by a CR.
    fn take_line<L>(&mut self, listener: &mut L, lf: usize) -> Option<Vec<u8>>
        where L: MessageListener + ?Sized
    {
        let mut line = mem::take(&mut self.line);
        let len = line.len();
        if len < 2 || line[len - 2] != b'\r' {
            self.line = line;
            self.fail(listener, HttpStatus::BAD_REQUEST,
                      "line not terminated by CRLF", lf);
            return None;
        }

        line.truncate(len - 2);
        Some(line)
    }

    fn give_back(&mut self, mut line: Vec<u8>) {
        line.clear();
        self.line = line;
    }

    fn parse_request_line<L>(&mut self, line: &[u8], at: usize, listener: &mut L)
                             -> Result<bool, usize>
        where L: MessageListener + ?Sized
    {
        let first = line.iter().position(|&b| b == b' ');
        let last = line.iter().rposition(|&b| b == b' ');
        let (first, last) = match (first, last) {
            (Some(first), Some(last)) if first < last => (first, last),
            _ => return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                      "malformed request line", at))
        };

        let method = &line[.. first];
        let entity = &line[first + 1 .. last];
        let version = &line[last + 1 ..];

        if method.is_empty() || !method.iter().all(|&b| is_token(b)) {
            return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                 "invalid request method", at));
        }

        if entity.is_empty() || entity.contains(&b' ') {
            return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                 "invalid request target", at));
        }

        let version = self.parse_version(version, at, listener)?;

        debug!("request line: {} {} {}", ascii_escape_prefix(method, 16),
               ascii_escape_prefix(entity, 128), version);

        self.state = State::Headers;
        Ok(listener.on_message_begin_request(method, entity, version))
    }

    fn parse_status_line<L>(&mut self, line: &[u8], at: usize, listener: &mut L)
                            -> Result<bool, usize>
        where L: MessageListener + ?Sized
    {
        let mut parts = line.splitn(3, |&b| b == b' ');
        let version = parts.next().unwrap_or(&b""[..]);
        let code = parts.next().unwrap_or(&b""[..]);
        let reason = parts.next().unwrap_or(&b""[..]);

        let version = self.parse_version(version, at, listener)?;

        if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
            return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                 "invalid status code", at));
        }
        let code = code.iter().fold(0u16, |acc, &d| acc * 10 + (d - b'0') as u16);

        self.status = HttpStatus(code);
        self.state = State::Headers;
        Ok(listener.on_message_begin_response(version, self.status, reason))
    }

    fn parse_version<L>(&mut self, token: &[u8], at: usize, listener: &mut L)
                        -> Result<HttpVersion, usize>
        where L: MessageListener + ?Sized
    {
        match HttpVersion::from_bytes(token) {
            Some(version) => Ok(version),
            None if token.starts_with(b"HTTP/") => {
                Err(self.fail(listener, HttpStatus::HTTP_VERSION_NOT_SUPPORTED,
                              "unsupported HTTP version", at))
            },
            None => Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                  "malformed HTTP version", at))
        }
    }

    fn parse_header_line<L>(&mut self, line: &[u8], at: usize, listener: &mut L)
                            -> Result<bool, usize>
        where L: MessageListener + ?Sized
    {
        if line[0] == b' ' || line[0] == b'\t' {
            return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                 "obsolete header line folding", at));
        }

        let colon = match line.iter().position(|&b| b == b':') {
            Some(colon) => colon,
            None => return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                         "header line without ':'", at))
        };

        let name = &line[.. colon];
        if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
            return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                 "invalid header name", at));
        }
        let value = trim_ows(&line[colon + 1 ..]);

        if self.state == State::Headers {
            self.track_framing(name, value, at, listener)?;
        }

        Ok(listener.on_message_header(name, value))
    }

    /// Picks out the headers that decide how the body is framed
    fn track_framing<L>(&mut self, name: &[u8], value: &[u8], at: usize,
                        listener: &mut L) -> Result<(), usize>
        where L: MessageListener + ?Sized
    {
        if name.eq_ignore_ascii_case(b"Content-Length") {
            let length = match parse_decimal(value) {
                Some(length) => length,
                None => return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                             "invalid Content-Length", at))
            };

            match self.content_length {
                Some(previous) if previous != length => {
                    return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                         "conflicting Content-Length headers",
                                         at));
                },
                _ => self.content_length = Some(length)
            }
        }
        else if name.eq_ignore_ascii_case(b"Transfer-Encoding") {
            self.transfer_encoded = true;
            self.chunked = value.split(|&b| b == b',')
                .last()
                .map_or(false, |coding| trim_ows(coding).eq_ignore_ascii_case(b"chunked"));
        }

        Ok(())
    }

    fn end_headers<L>(&mut self, at: usize, listener: &mut L) -> Result<bool, usize>
        where L: MessageListener + ?Sized
    {
        if self.transfer_encoded && self.content_length.is_some() {
            return Err(self.fail(listener, HttpStatus::BAD_REQUEST,
                                 "both Transfer-Encoding and Content-Length given",
                                 at));
        }

        if self.mode == ParserMode::Request && self.transfer_encoded && !self.chunked {
            return Err(self.fail(listener, HttpStatus::NOT_IMPLEMENTED,
                                 "unsupported transfer coding", at));
        }

        self.state = if self.mode == ParserMode::Response &&
            self.status.is_content_forbidden() {
            State::EndPending
        }
        else if self.chunked {
            State::ChunkSize
        }
        else {
            match self.content_length {
                Some(0) => State::EndPending,
                Some(length) => {
                    self.remaining = length;
                    State::FixedBody
                },
                None if self.mode == ParserMode::Request => State::EndPending,
                None => State::UntilClose
            }
        };

        // a message without a body ends on the next trip round the loop
        Ok(listener.on_message_header_end())
    }

    fn fail<L>(&mut self, listener: &mut L, status: HttpStatus, message: &str,
               offset: usize) -> usize
        where L: MessageListener + ?Sized
    {
        warn!("HTTP/1 protocol error at offset {}: {}", offset, message);
        self.state = State::Error;
        self.line.clear();
        listener.on_protocol_error(ProtocolError::new(status, message, offset));
        offset
    }
}

/// tchar from RFC 7230
fn is_token(b: u8) -> bool {
    match b {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' => true,
        _ => b.is_ascii_alphanumeric()
    }
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = value.split_first() {
        if first != b' ' && first != b'\t' {
            break;
        }
        value = rest;
    }
    while let Some((&last, rest)) = value.split_last() {
        if last != b' ' && last != b'\t' {
            break;
        }
        value = rest;
    }
    value
}

fn parse_decimal(value: &[u8]) -> Option<u64> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return None;
    }

    value.iter().try_fold(0u64, |acc, &d| {
        acc.checked_mul(10).and_then(|acc| acc.checked_add((d - b'0') as u64))
    })
}
