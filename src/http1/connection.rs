//! An HTTP/1 connection without the socket
//!
//! Bytes go in through `on_fillable`, responses come out of `take_output`.
//! Whoever owns the socket decides when to read, when to write and, going
//! by `wants_close`, when to hang up.

use crate::body::BodyChunk;
use crate::channel::{ChannelState, HttpChannel, HttpHandler};
use crate::config::Limits;
use crate::date::{DateGenerator, SystemDateGenerator};
use crate::headers::HeaderFieldList;
use crate::info::ResponseInfo;
use crate::listener::{MessageListener, ProtocolError};
use crate::transport::{notify, CompletionHandler, HttpTransport};
use crate::version::HttpVersion;

use super::generator::{is_close_delimited, Http1Generator, OutputBuffer, Segment};
use super::parser::{Http1Parser, ParserMode, ParserState};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct OutputState {
    generator: Http1Generator,
    buffer: OutputBuffer,
    aborted: bool,
    /// A response is between `send_response` and `completed`
    in_flight: bool,
    /// The connection ends once the current response is out
    closing: bool
}

/// The connection's `HttpTransport`: serializes responses into a buffer
/// the socket side drains
pub struct Http1Output {
    state: RefCell<OutputState>,
    keep_alive: Cell<bool>,
    input_buffer_size: Cell<usize>,
    /// Requests begun on this connection so far
    requests: Cell<usize>,
    max_requests: usize
}

impl Http1Output {
    fn new(date: Box<dyn DateGenerator>, max_requests: usize) -> Http1Output {
        Http1Output {
            state: RefCell::new(OutputState {
                generator: Http1Generator::with_date_generator(date),
                buffer: OutputBuffer::new(),
                aborted: false,
                in_flight: false,
                closing: false
            }),
            keep_alive: Cell::new(true),
            input_buffer_size: Cell::new(0),
            requests: Cell::new(0),
            max_requests: max_requests
        }
    }

    fn take(&self) -> Vec<Segment> {
        self.state.borrow_mut().buffer.take()
    }

    fn is_aborted(&self) -> bool {
        self.state.borrow().aborted
    }

    fn is_in_flight(&self) -> bool {
        self.state.borrow().in_flight
    }

    fn is_closing(&self) -> bool {
        self.state.borrow().closing
    }

    /// Decides the `Connection` header and whether we hang up afterwards
    fn patch_connection(&self, info: &mut ResponseInfo) -> bool {
        let requested_close = info.headers.get("Connection")
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("close"));
        let close_delimited = is_close_delimited(info.version, info.content_length) &&
            !info.is_body_suppressed();
        let exhausted = self.requests.get() >= self.max_requests;
        if exhausted && self.keep_alive.get() {
            debug!("served {} requests; closing the connection", self.requests.get());
        }
        let keep_alive = self.keep_alive.get() && !requested_close && !close_delimited &&
            !exhausted;

        info.headers.remove("Connection");
        match (keep_alive, info.version) {
            (true, HttpVersion::Version1_0) => info.headers.append("Connection", "keep-alive"),
            (false, HttpVersion::Version1_0) | (false, HttpVersion::Version1_1) =>
                info.headers.append("Connection", "close"),
            _ => ()
        }

        keep_alive
    }

    fn fail(&self, what: &str, e: &dyn ::std::fmt::Display) {
        error!("could not {}: {}", what, e);
        self.state.borrow_mut().aborted = true;
    }
}

impl HttpTransport for Http1Output {
    fn send_response(&self, mut info: ResponseInfo, chunk: BodyChunk,
                     on_complete: Option<CompletionHandler>) {
        if self.is_aborted() {
            return notify(on_complete, false);
        }

        let keep_alive = self.patch_connection(&mut info);
        let result = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            state.in_flight = true;
            state.closing = !keep_alive;
            state.generator.generate_response(&info, chunk, &mut state.buffer)
        };

        match result {
            Ok(()) => notify(on_complete, true),
            Err(e) => {
                self.fail("generate response", &e);
                notify(on_complete, false);
            }
        }
    }

    fn send(&self, chunk: BodyChunk, on_complete: Option<CompletionHandler>) {
        if self.is_aborted() {
            return notify(on_complete, false);
        }

        let result = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            state.generator.generate_body(chunk, &mut state.buffer)
        };

        match result {
            Ok(()) => notify(on_complete, true),
            Err(e) => {
                self.fail("generate body", &e);
                notify(on_complete, false);
            }
        }
    }

    fn abort(&self) {
        warn!("aborting HTTP/1 connection");
        let mut state = self.state.borrow_mut();
        state.aborted = true;
        state.in_flight = false;
    }

    fn completed(&self, trailers: HeaderFieldList) {
        let result = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            state.in_flight = false;
            if state.aborted {
                return;
            }
            state.generator.generate_trailer(&trailers, &mut state.buffer)
        };

        if let Err(e) = result {
            self.fail("finish response", &e);
        }
    }

    fn set_input_buffer_size(&self, size: usize) {
        self.input_buffer_size.set(size);
    }
}

/// Feeds the channel while keeping the output informed about persistence
struct Dispatch<'a> {
    channel: &'a mut HttpChannel,
    output: &'a Http1Output
}

impl<'a> MessageListener for Dispatch<'a> {
    fn on_message_begin_request(&mut self, method: &[u8], entity: &[u8],
                                version: HttpVersion) -> bool {
        self.output.keep_alive.set(version.is_persistent_by_default());
        self.output.requests.set(self.output.requests.get() + 1);
        self.channel.on_message_begin_request(method, entity, version)
    }

    fn on_message_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        self.channel.on_message_header(name, value)
    }

    fn on_message_header_end(&mut self) -> bool {
        if self.channel.state() == ChannelState::ReceivingHeaders {
            self.output.keep_alive.set(self.channel.is_persistent());
        }
        self.channel.on_message_header_end()
    }

    fn on_message_content(&mut self, chunk: &[u8]) -> bool {
        self.channel.on_message_content(chunk)
    }

    fn on_message_end(&mut self) -> bool {
        // nothing past a message whose response closes the connection is read
        self.channel.on_message_end() && !self.output.is_closing()
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        self.output.keep_alive.set(false);
        self.channel.on_protocol_error(error)
    }
}

pub struct Connection {
    parser: Http1Parser,
    channel: HttpChannel,
    output: Rc<Http1Output>,
    input: Vec<u8>,
    eof: bool
}

impl Connection {
    pub fn new(handler: HttpHandler, limits: Limits) -> Connection {
        Connection::with_date_generator(handler, limits, Box::new(SystemDateGenerator))
    }

    pub fn with_date_generator(handler: HttpHandler, limits: Limits,
                               date: Box<dyn DateGenerator>) -> Connection
    {
        let output = Rc::new(Http1Output::new(date, limits.max_keep_alive_requests));
        let transport: Rc<dyn HttpTransport> = output.clone();

        Connection {
            parser: Http1Parser::with_max_line_length(ParserMode::Request,
                                                      limits.max_line_length),
            channel: HttpChannel::new(transport, handler, limits),
            output: output,
            input: Vec::new(),
            eof: false
        }
    }

    /// Takes freshly read bytes
    pub fn on_fillable(&mut self, data: &[u8]) {
        if self.eof {
            return;
        }
        self.input.extend_from_slice(data);
        self.process();
    }

    /// Picks parsing back up; call it once a response that was finished
    /// outside of the handler call has completed
    pub fn resume(&mut self) {
        self.process();
        if self.eof {
            self.finish_input();
        }
    }

    /// The peer is done sending
    pub fn on_eof(&mut self) {
        if self.eof {
            return;
        }
        self.eof = true;
        self.process();
        self.finish_input();
    }

    /// Output produced so far, in order
    pub fn take_output(&mut self) -> Vec<Segment> {
        self.output.take()
    }

    pub fn is_aborted(&self) -> bool {
        self.output.is_aborted()
    }

    /// Whether the socket should be closed once the output is written
    pub fn wants_close(&self) -> bool {
        if self.output.is_aborted() {
            return true;
        }

        if self.channel.state() == ChannelState::HandlerRunning ||
            self.output.is_in_flight() {
            return false;
        }

        self.output.is_closing() || self.parser.state() == ParserState::Error || self.eof
    }

    /// How much the channel would like to read next, if it has an opinion
    pub fn input_buffer_hint(&self) -> Option<usize> {
        match self.output.input_buffer_size.get() {
            0 => None,
            size => Some(size)
        }
    }

    fn process(&mut self) {
        loop {
            if self.output.is_aborted() || self.input.is_empty() {
                return;
            }

            match self.channel.update_state() {
                ChannelState::HandlerRunning | ChannelState::Aborted => return,
                _ => ()
            }

            if self.output.is_closing() || self.parser.state() == ParserState::Error {
                // nothing after this message will be answered
                self.input.clear();
                return;
            }

            let consumed = {
                let mut dispatch = Dispatch {
                    channel: &mut self.channel,
                    output: &self.output
                };
                self.parser.parse_fragment(&self.input, &mut dispatch)
            };
            self.input.drain(.. consumed);

            if consumed == 0 {
                return;
            }
        }
    }

    fn finish_input(&mut self) {
        if !self.input.is_empty() || self.channel.update_state() == ChannelState::HandlerRunning {
            return;
        }

        let mut dispatch = Dispatch {
            channel: &mut self.channel,
            output: &self.output
        };
        self.parser.finish(&mut dispatch);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::handler;
    use crate::date::FixedDateGenerator;
    use crate::status::HttpStatus;

    use std::cell::RefCell;

    const DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

    fn connection(handler: HttpHandler) -> Connection {
        Connection::with_date_generator(handler, Limits::default(),
                                        Box::new(FixedDateGenerator(String::from(DATE))))
    }

    fn hello() -> HttpHandler {
        handler(|request, response| {
            response.set_status(HttpStatus::OK)?;
            let body = format!("hello {}", request.path());
            response.set_content_length(body.len() as u64)?;
            response.write(body)?;
            response.completed()?;
            Ok(())
        })
    }

    fn output(connection: &mut Connection) -> String {
        let mut flat = Vec::new();
        for segment in connection.take_output() {
            match segment {
                Segment::Bytes(data) => flat.extend_from_slice(&data),
                Segment::File(file) => file.fill(&mut flat).unwrap()
            }
        }
        String::from_utf8(flat).unwrap()
    }

    #[test]
    fn simple_request() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(output(&mut connection),
                   "HTTP/1.1 200 OK\r\n\
                    Date: Thu, 01 Jan 1970 00:00:00 GMT\r\n\
                    Content-Length: 8\r\n\
                    \r\n\
                    hello /a");
        assert!(!connection.wants_close());
    }

    #[test]
    fn fragmented_request() {
        let mut connection = connection(hello());
        for byte in b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n".chunks(1) {
            connection.on_fillable(byte);
        }
        assert!(output(&mut connection).ends_with("\r\n\r\nhello /b"));
    }

    #[test]
    fn pipelined_requests() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n\
                                 GET /two HTTP/1.1\r\nHost: x\r\n\r\n");

        let text = output(&mut connection);
        let one = text.find("hello /one").unwrap();
        let two = text.find("hello /two").unwrap();
        assert!(one < two);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[test]
    fn keep_alive_request_limit() {
        let limits = Limits { max_keep_alive_requests: 2, ..Limits::default() };
        let mut connection = Connection::with_date_generator(
            hello(), limits, Box::new(FixedDateGenerator(String::from(DATE))));
        connection.on_fillable(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n\
                                 GET /two HTTP/1.1\r\nHost: x\r\n\r\n\
                                 GET /three HTTP/1.1\r\nHost: x\r\n\r\n");

        let text = output(&mut connection);
        let two = text.find("HTTP/1.1 200 OK\r\nDate").and_then(|one| {
            text[one + 1 ..].find("HTTP/1.1 200 OK").map(|two| one + 1 + two)
        }).unwrap();
        assert!(!text[.. two].contains("Connection: close"));
        assert!(text[two ..].contains("Connection: close\r\n"));
        assert!(text.ends_with("hello /two"));
        assert!(!text.contains("hello /three"));
        assert!(connection.wants_close());
    }

    #[test]
    fn keep_alive_request_limit_across_reads() {
        let limits = Limits { max_keep_alive_requests: 1, ..Limits::default() };
        let mut connection = Connection::with_date_generator(
            hello(), limits, Box::new(FixedDateGenerator(String::from(DATE))));
        connection.on_fillable(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("keep-alive"));
        assert!(connection.wants_close());
    }

    #[test]
    fn http10_closes_by_default() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET / HTTP/1.0\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(connection.wants_close());
    }

    #[test]
    fn http10_keep_alive() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");

        assert!(output(&mut connection).contains("Connection: keep-alive\r\n"));
        assert!(!connection.wants_close());
    }

    #[test]
    fn connection_close_stops_pipeline() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET /one HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n\
                                 GET /two HTTP/1.1\r\nHost: x\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.contains("hello /one"));
        assert!(!text.contains("hello /two"));
        assert!(connection.wants_close());
    }

    #[test]
    fn protocol_error_answers_then_closes() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET / HTTP/1.1\r\nBroken header\r\n\r\n");

        assert!(output(&mut connection).starts_with("HTTP/1.1 400 "));
        assert!(connection.wants_close());
        assert!(!connection.is_aborted());
    }

    #[test]
    fn unsupported_version() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET / HTTP/3.0\r\n\r\n");

        assert!(output(&mut connection).starts_with("HTTP/1.1 505 "));
        assert!(connection.wants_close());
    }

    #[test]
    fn validation_error_keeps_connection() {
        let mut connection = connection(hello());
        connection.on_fillable(b"GET /../etc HTTP/1.1\r\nHost: x\r\n\r\n\
                                 GET /fine HTTP/1.1\r\nHost: x\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.starts_with("HTTP/1.1 400 "));
        assert!(text.contains("hello /fine"));
        assert!(!connection.wants_close());
    }

    #[test]
    fn chunked_response_with_trailers() {
        let mut connection = connection(handler(|_, response| {
            response.register_trailer("Mood")?;
            response.write("Hi")?;
            response.set_trailer("Mood", "Happy")?;
            response.completed()?;
            Ok(())
        }));
        connection.on_fillable(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.contains("Transfer-Encoding: chunked\r\nTrailer: Mood\r\n"));
        assert!(text.ends_with("\r\n\r\n2\r\nHi\r\n0\r\nMood: Happy\r\n\r\n"));
    }

    #[test]
    fn http10_unknown_length_is_close_delimited() {
        let mut connection = connection(handler(|_, response| {
            response.write("raw")?;
            response.completed()?;
            Ok(())
        }));
        connection.on_fillable(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nraw"));
        assert!(connection.wants_close());
    }

    #[test]
    fn head_request() {
        let mut connection = connection(hello());
        connection.on_fillable(b"HEAD /h HTTP/1.1\r\nHost: x\r\n\r\n");

        let text = output(&mut connection);
        assert!(text.contains("Content-Length: 8\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn framing_violation_aborts() {
        let mut connection = connection(handler(|_, response| {
            response.set_content_length(10)?;
            response.write("12345")?;
            response.completed()?;
            Ok(())
        }));
        connection.on_fillable(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        assert!(connection.is_aborted());
        assert!(connection.wants_close());
    }

    #[test]
    fn asynchronous_completion_resumes_pipeline() {
        let parked = Rc::new(RefCell::new(Vec::new()));
        let stash = parked.clone();
        let mut connection = connection(handler(move |request, response| {
            stash.borrow_mut().push((request.path().to_owned(), response));
            Ok(())
        }));

        connection.on_fillable(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n\
                                 GET /two HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(output(&mut connection), "");
        assert_eq!(parked.borrow().len(), 1);
        assert!(!connection.wants_close());

        let (path, response) = parked.borrow_mut().remove(0);
        response.write(path).unwrap();
        response.completed().unwrap();
        connection.resume();

        assert_eq!(parked.borrow().len(), 1);
        assert!(output(&mut connection).contains("/one"));
        assert_eq!(parked.borrow()[0].0, "/two");
    }

    #[test]
    fn eof_mid_message() {
        let mut connection = connection(hello());
        connection.on_fillable(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 9\r\n\r\nabc");
        connection.on_eof();

        assert!(output(&mut connection).starts_with("HTTP/1.1 400 "));
        assert!(connection.wants_close());
    }
}
