//! A FastCGI connection from the web server, minus the socket
//!
//! Bytes from the web server go in through `on_fillable`; records for it
//! pile up until `take_output` collects them. Every request gets its own
//! `HttpChannel` whose transport frames the response as a CGI document
//! (`Status:` line, headers, blank line, body) on the request's stdout
//! stream and finishes it with an `EndRequest`.

use crate::body::BodyChunk;
use crate::channel::{HttpChannel, HttpHandler};
use crate::config::Limits;
use crate::errors;
use crate::fastcgi::{management_records, protocol_status, serializer, BeginRequest,
                     NameValuePair, RequestParser, Role};
use crate::headers::HeaderFieldList;
use crate::info::ResponseInfo;
use crate::transport::{notify, CompletionHandler, HttpTransport};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

/// What we tell a web server asking for `FCGI_MAX_CONNS`
const MAX_CONNS: &[u8] = b"100";

/// What we tell a web server asking for `FCGI_MAX_REQS`
const MAX_REQS: &[u8] = b"100";

/// Requests are multiplexed
const MPXS_CONNS: &[u8] = b"1";

/// Room for the CGI variables a web server sends beside the URI and headers
const CGI_VARIABLES_LENGTH: usize = 4096;

/// Per-request bookkeeping shared by the output and the request's transport
struct RequestState {
    keep_conn: bool,
    aborted: Cell<bool>
}

/// The record stream back to the web server
struct RecordOutput {
    buffer: RefCell<Vec<u8>>,
    requests: RefCell<HashMap<u16, Rc<RequestState>>>,
    /// A finished request didn't ask to keep the connection
    closing: Cell<bool>
}

impl RecordOutput {
    fn new() -> RecordOutput {
        RecordOutput {
            buffer: RefCell::new(Vec::new()),
            requests: RefCell::new(HashMap::new()),
            closing: Cell::new(false)
        }
    }

    fn write<F>(&self, what: &str, serialize: F)
        where F: FnOnce(&mut Vec<u8>) -> errors::Result<()>
    {
        let mut buffer = self.buffer.borrow_mut();
        let length = buffer.len();
        if let Err(e) = serialize(&mut *buffer) {
            error!("could not serialize {}: {}", what, e);
            buffer.truncate(length);
        }
    }

    /// Sets up the transport for a newly begun request
    fn open(self: &Rc<Self>, id: u16, keep_conn: bool) -> Rc<RequestTransport> {
        let state = Rc::new(RequestState { keep_conn: keep_conn, aborted: Cell::new(false) });
        self.requests.borrow_mut().insert(id, state.clone());

        Rc::new(RequestTransport {
            id: id,
            state: state,
            output: self.clone(),
            suppress_body: Cell::new(false)
        })
    }

    fn is_idle(&self) -> bool {
        self.requests.borrow().is_empty()
    }

    fn stdout(&self, id: u16, content: &[u8]) {
        if !content.is_empty() {
            self.write("stdout", |buffer| serializer::stdout(buffer, id, content));
        }
    }

    /// Ends the stdout stream of request `id` and the request itself
    fn finish_request(&self, id: u16, app_status: u32) {
        let state = self.requests.borrow_mut().remove(&id);
        let keep_conn = state.map_or(true, |state| state.keep_conn);

        self.write("end of request", |buffer| {
            serializer::stdout(&mut *buffer, id, &[])?;
            serializer::end_request(buffer, id, app_status, protocol_status::REQUEST_COMPLETE)
        });

        if !keep_conn {
            self.closing.set(true);
        }
    }

    fn refuse(&self, id: u16, keep_conn: bool) {
        self.write("refusal", |buffer| {
            serializer::end_request(buffer, id, 0, protocol_status::UNKNOWN_ROLE)
        });

        if !keep_conn {
            self.closing.set(true);
        }
    }

    /// The web server gave up on request `id`
    fn abort_request(&self, id: u16) {
        let state = self.requests.borrow_mut().remove(&id);
        match state {
            Some(state) => {
                state.aborted.set(true);
                self.write("end of aborted request", |buffer| {
                    serializer::end_request(buffer, id, 0, protocol_status::REQUEST_COMPLETE)
                });
                if !state.keep_conn {
                    self.closing.set(true);
                }
            },
            None => debug!("abort of request {} which isn't running", id)
        }
    }

    fn unknown_type(&self, kind: u8) {
        self.write("UnknownType", |buffer| serializer::unknown_type(buffer, kind));
    }

    fn get_values(&self, names: &[NameValuePair]) {
        let mut values: Vec<(&[u8], &[u8])> = Vec::new();
        for pair in names {
            let value = match &pair.name[..] {
                management_records::MAX_CONNS => MAX_CONNS,
                management_records::MAX_REQS => MAX_REQS,
                management_records::MPXS_CONNS => MPXS_CONNS,
                _ => continue
            };
            values.push((&pair.name[..], value));
        }

        self.write("GetValuesResult", |buffer| serializer::get_values_result(buffer, &values));
    }
}

/// Carries one request's response back as stdout records
struct RequestTransport {
    id: u16,
    state: Rc<RequestState>,
    output: Rc<RecordOutput>,
    suppress_body: Cell<bool>
}

impl RequestTransport {
    fn chunk_bytes(chunk: BodyChunk, bytes: &mut Vec<u8>) -> bool {
        match chunk {
            BodyChunk::Buffer(data) => {
                bytes.extend_from_slice(&data);
                true
            },
            BodyChunk::File(file) => {
                match file.fill(bytes) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("could not read response body file: {}", e);
                        false
                    }
                }
            }
        }
    }
}

impl HttpTransport for RequestTransport {
    fn send_response(&self, info: ResponseInfo, chunk: BodyChunk,
                     on_complete: Option<CompletionHandler>) {
        if self.state.aborted.get() {
            notify(on_complete, false);
            return;
        }

        let mut document = cgi_head(&info);
        self.suppress_body.set(info.is_body_suppressed());
        if !self.suppress_body.get() && !RequestTransport::chunk_bytes(chunk, &mut document) {
            notify(on_complete, false);
            return;
        }

        self.output.stdout(self.id, &document);
        notify(on_complete, true);
    }

    fn send(&self, chunk: BodyChunk, on_complete: Option<CompletionHandler>) {
        if self.state.aborted.get() {
            notify(on_complete, false);
            return;
        }
        if self.suppress_body.get() {
            notify(on_complete, true);
            return;
        }

        let mut bytes = Vec::new();
        if !RequestTransport::chunk_bytes(chunk, &mut bytes) {
            notify(on_complete, false);
            return;
        }

        self.output.stdout(self.id, &bytes);
        notify(on_complete, true);
    }

    fn abort(&self) {
        if !self.state.aborted.replace(true) {
            warn!("aborting FastCGI request {}", self.id);
            self.output.finish_request(self.id, 1);
        }
    }

    fn completed(&self, trailers: HeaderFieldList) {
        if self.state.aborted.get() {
            return;
        }
        if !trailers.is_empty() {
            debug!("dropping {} trailers of FastCGI request {}", trailers.len(), self.id);
        }

        self.output.finish_request(self.id, 0);
    }

    fn set_input_buffer_size(&self, _size: usize) {}
}

/// Head of the CGI document for a response
///
/// Framing is the web server's business, so transfer coding and
/// hop-by-hop headers are left out.
fn cgi_head(info: &ResponseInfo) -> Vec<u8> {
    let mut head = format!("Status: {} {}\r\n", info.status.code(), info.reason_phrase());
    for field in &info.headers {
        if field.is("Transfer-Encoding") || field.is("Trailer") || field.is("Connection") ||
            field.is("Content-Length")
        {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", field.name(), field.value()));
    }

    if let Some(length) = info.content_length {
        if !info.status.is_content_forbidden() {
            head.push_str(&format!("Content-Length: {}\r\n", length));
        }
    }

    head.push_str("\r\n");
    head.into_bytes()
}

pub struct Connection {
    parser: RequestParser<HttpChannel>,
    output: Rc<RecordOutput>
}

impl Connection {
    pub fn new(handler: HttpHandler, limits: Limits) -> Connection {
        let output = Rc::new(RecordOutput::new());

        let factory_output = output.clone();
        let unknown_output = output.clone();
        let abort_output = output.clone();
        let mut parser = RequestParser::new(
            Box::new(move |id, begin: &BeginRequest| {
                if begin.role != Role::Responder {
                    warn!("refusing FastCGI request {} in role {:?}", id, begin.role);
                    factory_output.refuse(id, begin.keep_conn());
                    return None;
                }

                let transport = factory_output.open(id, begin.keep_conn());
                Some(HttpChannel::new(transport, handler.clone(), limits))
            }),
            Box::new(move |id, kind| {
                debug!("unknown record type {} (request {})", kind, id);
                unknown_output.unknown_type(kind);
            }),
            Box::new(move |id| abort_output.abort_request(id)));

        // the URI and the headers, with room for the CGI variables around them
        parser.set_max_params_length(limits.max_request_uri_length
                                     .saturating_add(limits.max_header_block_length)
                                     .saturating_add(CGI_VARIABLES_LENGTH));

        let values_output = output.clone();
        parser.set_get_values_callback(Box::new(move |names: &[NameValuePair]| {
            values_output.get_values(names)
        }));

        Connection { parser: parser, output: output }
    }

    /// Feeds bytes read from the web server
    pub fn on_fillable(&mut self, data: &[u8]) {
        self.parser.parse_fragment(data);
    }

    /// Collects the records written since the last call
    pub fn take_output(&self) -> Vec<u8> {
        mem::replace(&mut *self.output.buffer.borrow_mut(), Vec::new())
    }

    /// Whether the connection should be closed once the output is flushed
    pub fn wants_close(&self) -> bool {
        if self.parser.is_failed() {
            return true;
        }

        self.output.closing.get() && self.output.is_idle() &&
            self.parser.active_requests() == 0
    }

    /// Requests begun but not yet answered
    pub fn pending_requests(&self) -> usize {
        self.output.requests.borrow().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::{handler, HttpResponse};
    use crate::fastcgi::parser::record;
    use crate::fastcgi::{Content, EndRequest};

    /// Splits output into the stdout text of `id` and everything else
    fn split_output(mut output: &[u8], id: u16) -> (String, Vec<Content>) {
        let mut stdout = Vec::new();
        let mut others = Vec::new();
        while !output.is_empty() {
            let (rest, parsed) = record(output).unwrap();
            match parsed.content {
                Content::Stdout(ref data) if parsed.id == id => stdout.extend_from_slice(data),
                content => others.push(content)
            }
            output = rest;
        }
        (String::from_utf8(stdout).unwrap(), others)
    }

    fn request(id: u16, keep_conn: bool, method: &str, uri: &str, body: &[u8]) -> Vec<u8> {
        let mut input = Vec::new();
        serializer::begin_request(&mut input, id, Role::Responder, keep_conn).unwrap();
        serializer::params(&mut input, id, &[
            (&b"REQUEST_METHOD"[..], method.as_bytes()),
            (&b"REQUEST_URI"[..], uri.as_bytes()),
            (&b"SERVER_PROTOCOL"[..], &b"HTTP/1.1"[..]),
            (&b"HTTP_HOST"[..], &b"example.com"[..])
        ]).unwrap();
        if !body.is_empty() {
            serializer::stdin(&mut input, id, body).unwrap();
        }
        serializer::stdin(&mut input, id, b"").unwrap();
        input
    }

    fn echo_connection() -> Connection {
        Connection::new(handler(|request, response| {
            response.set_content_type("text/plain")?;
            response.set_content_length(request.body().len() as u64 + 6)?;
            response.write("echo: ")?;
            response.write(request.body())?;
            response.completed()?;
            Ok(())
        }), Limits::default())
    }

    fn end(app_status: u32) -> Content {
        Content::EndRequest(EndRequest {
            app_status: app_status,
            protocol_status: protocol_status::REQUEST_COMPLETE
        })
    }

    #[test]
    fn responds_with_cgi_document() {
        let mut connection = echo_connection();
        connection.on_fillable(&request(1, true, "POST", "/echo", b"hi"));

        let (stdout, others) = split_output(&connection.take_output(), 1);
        assert_eq!(stdout, "Status: 200 OK\r\n\
                            Content-Type: text/plain\r\n\
                            Content-Length: 8\r\n\
                            \r\n\
                            echo: hi");
        assert_eq!(others, vec![end(0)]);
        assert!(!connection.wants_close());
        assert_eq!(connection.pending_requests(), 0);
    }

    #[test]
    fn closes_without_keep_conn() {
        let mut connection = echo_connection();
        connection.on_fillable(&request(1, false, "GET", "/", b""));

        let (stdout, _) = split_output(&connection.take_output(), 1);
        assert!(stdout.starts_with("Status: 200 OK\r\n"));
        assert!(connection.wants_close());
    }

    #[test]
    fn interleaved_requests_answer_separately() {
        let mut connection = echo_connection();
        let mut input = request(1, true, "POST", "/", b"one");
        input.extend_from_slice(&request(2, true, "POST", "/", b"two"));
        connection.on_fillable(&input);

        let output = connection.take_output();
        assert!(split_output(&output, 1).0.ends_with("echo: one"));
        assert!(split_output(&output, 2).0.ends_with("echo: two"));
    }

    #[test]
    fn bad_request_is_answered() {
        let mut connection = echo_connection();
        let mut input = Vec::new();
        serializer::start_request(&mut input, 1).unwrap();
        serializer::params(&mut input, 1, &[
            (&b"REQUEST_METHOD"[..], &b"GET"[..]),
            (&b"REQUEST_URI"[..], &b"/"[..])
        ]).unwrap();
        serializer::stdin(&mut input, 1, b"").unwrap();
        connection.on_fillable(&input);

        // HTTP/1.1 without a Host header
        let (stdout, others) = split_output(&connection.take_output(), 1);
        assert!(stdout.starts_with("Status: 400 "));
        assert_eq!(others, vec![end(0)]);
    }

    #[test]
    fn oversized_params_are_answered() {
        let limits = Limits {
            max_request_uri_length: 16,
            max_header_block_length: 16,
            ..Limits::default()
        };
        let mut connection = Connection::new(handler(|_, response| {
            response.completed()?;
            Ok(())
        }), limits);

        let cookie = vec![b'c'; CGI_VARIABLES_LENGTH];
        let mut input = Vec::new();
        serializer::start_request(&mut input, 1).unwrap();
        serializer::params(&mut input, 1, &[
            (&b"REQUEST_METHOD"[..], &b"GET"[..]),
            (&b"HTTP_COOKIE"[..], &cookie[..])
        ]).unwrap();
        serializer::stdin(&mut input, 1, b"").unwrap();
        connection.on_fillable(&input);

        let (stdout, others) = split_output(&connection.take_output(), 1);
        assert!(stdout.starts_with("Status: 400 "));
        assert_eq!(others, vec![end(0)]);
        assert!(!connection.wants_close());
    }

    #[test]
    fn head_response_has_no_body() {
        let mut connection = echo_connection();
        connection.on_fillable(&request(1, true, "HEAD", "/", b""));

        let (stdout, _) = split_output(&connection.take_output(), 1);
        assert!(stdout.ends_with("Content-Length: 6\r\n\r\n"));
    }

    #[test]
    fn unknown_role_is_refused() {
        let mut connection = echo_connection();
        let mut input = Vec::new();
        serializer::begin_request(&mut input, 3, Role::Authorizer, true).unwrap();
        connection.on_fillable(&input);

        let (_, others) = split_output(&connection.take_output(), 3);
        assert_eq!(others, vec![Content::EndRequest(EndRequest {
            app_status: 0,
            protocol_status: protocol_status::UNKNOWN_ROLE
        })]);
    }

    #[test]
    fn management_records() {
        let mut connection = echo_connection();
        let mut input = Vec::new();
        serializer::get_values(&mut input, &[&b"FCGI_MPXS_CONNS"[..],
                                             &b"FCGI_SOMETHING"[..]]).unwrap();
        input.extend_from_slice(&[1, 77, 0, 0, 0, 0, 0, 0]);
        connection.on_fillable(&input);

        let (_, others) = split_output(&connection.take_output(), 0);
        assert_eq!(others, vec![
            Content::GetValuesResult(vec![NameValuePair::new("FCGI_MPXS_CONNS", "1")]),
            Content::UnknownType(crate::fastcgi::UnknownType(77))
        ]);
    }

    #[test]
    fn abort_fails_later_writes() {
        let saved: Rc<RefCell<Option<HttpResponse>>> = Rc::new(RefCell::new(None));
        let handler_saved = saved.clone();
        let mut connection = Connection::new(handler(move |_, response| {
            *handler_saved.borrow_mut() = Some(response);
            Ok(())
        }), Limits::default());

        connection.on_fillable(&request(7, true, "GET", "/slow", b""));
        assert_eq!(connection.pending_requests(), 1);

        let mut input = Vec::new();
        serializer::abort_request(&mut input, 7).unwrap();
        connection.on_fillable(&input);
        assert_eq!(connection.pending_requests(), 0);

        let response = saved.borrow_mut().take().unwrap();
        let delivered = Rc::new(Cell::new(None));
        let seen = delivered.clone();
        response.write_with("too late", move |ok| seen.set(Some(ok))).unwrap();

        assert_eq!(delivered.get(), Some(false));
        let (stdout, others) = split_output(&connection.take_output(), 7);
        assert!(stdout.is_empty());
        assert_eq!(others, vec![end(0)]);
    }

    #[test]
    fn garbage_closes_connection() {
        let mut connection = echo_connection();
        connection.on_fillable(&[7, 7, 7, 7, 7, 7, 7, 7]);

        assert!(connection.wants_close());
    }
}
