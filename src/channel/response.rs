//! The handler's side of a response
//!
//! `HttpResponse` is a cheap handle; clones share the same response, so a
//! handler can stash one away and finish it later. The head is committed
//! with the first write, after which only trailers may still change.

use crate::body::{BodyChunk, FileRef};
use crate::errors::{BadMessage, Error, Result};
use crate::headers::HeaderFieldList;
use crate::info::ResponseInfo;
use crate::status::HttpStatus;
use crate::transport::{notify, CompletionHandler, HttpTransport};
use crate::version::HttpVersion;

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

/// A body transformation, like a compressor
///
/// Filters see body bytes in order. `last` is set on the final call, which
/// may have empty input; that's the filter's chance to flush.
pub trait OutputFilter {
    fn filter(&mut self, input: &[u8], output: &mut Vec<u8>, last: bool);
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Phase {
    Pending,
    Committed,
    Completed,
    Aborted
}

struct ResponseState {
    info: ResponseInfo,
    phase: Phase,
    bytes_written: u64,
    filters: Vec<Box<dyn OutputFilter>>
}

#[derive(Clone)]
pub struct HttpResponse {
    state: Rc<RefCell<ResponseState>>,
    transport: Rc<dyn HttpTransport>
}

impl HttpResponse {
    pub fn new(transport: Rc<dyn HttpTransport>, version: HttpVersion,
               head_response: bool) -> HttpResponse
    {
        let mut info = ResponseInfo::new(version, HttpStatus::UNDEFINED);
        info.head_response = head_response;

        HttpResponse {
            state: Rc::new(RefCell::new(ResponseState {
                info: info,
                phase: Phase::Pending,
                bytes_written: 0,
                filters: Vec::new()
            })),
            transport: transport
        }
    }

    pub fn version(&self) -> HttpVersion {
        self.state.borrow().info.version
    }

    pub fn status(&self) -> HttpStatus {
        self.state.borrow().info.status
    }

    pub fn set_status(&self, status: HttpStatus) -> Result<()> {
        self.modify_head(|info| info.status = status)
    }

    pub fn reason(&self) -> String {
        self.state.borrow().info.reason_phrase().to_owned()
    }

    pub fn set_reason<S: Into<String>>(&self, reason: S) -> Result<()> {
        let reason = sanitize_reason(&reason.into());
        self.modify_head(|info| info.reason = reason)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.state.borrow().info.content_length
    }

    pub fn set_content_length(&self, length: u64) -> Result<()> {
        self.modify_head(|info| info.content_length = Some(length))
    }

    /// Goes back to an unknown length (chunked on HTTP/1.1)
    pub fn reset_content_length(&self) -> Result<()> {
        self.modify_head(|info| info.content_length = None)
    }

    pub fn set_content_type<S: Into<String>>(&self, content_type: S) -> Result<()> {
        self.set_header("Content-Type", content_type)
    }

    pub fn add_header<N, V>(&self, name: N, value: V) -> Result<()>
        where N: Into<String>, V: Into<String>
    {
        let (name, value) = (name.into(), value.into());
        if name.eq_ignore_ascii_case("Content-Length") {
            return self.set_content_length(parse_length(&value)?);
        }
        self.modify_head(|info| info.headers.append(name, value))
    }

    pub fn set_header<N, V>(&self, name: N, value: V) -> Result<()>
        where N: Into<String>, V: Into<String>
    {
        let (name, value) = (name.into(), value.into());
        if name.eq_ignore_ascii_case("Content-Length") {
            return self.set_content_length(parse_length(&value)?);
        }
        self.modify_head(|info| info.headers.overwrite(name, value))
    }

    pub fn remove_header(&self, name: &str) -> Result<()> {
        if name.eq_ignore_ascii_case("Content-Length") {
            return self.reset_content_length();
        }
        self.modify_head(|info| info.headers.remove(name))
    }

    /// The value of the first header called `name`, or `""`
    pub fn header(&self, name: &str) -> String {
        self.state.borrow().info.headers.get(name).to_owned()
    }

    pub fn headers(&self) -> HeaderFieldList {
        self.state.borrow().info.headers.clone()
    }

    /// Announces a trailer; only announced trailers may be set later
    pub fn register_trailer<N: Into<String>>(&self, name: N) -> Result<()> {
        let name = name.into();
        self.modify_head(|info| {
            if !info.trailers.contains(&name) {
                info.trailers.append(name, "");
            }
        })
    }

    pub fn set_trailer<N: AsRef<str>, V: Into<String>>(&self, name: N, value: V)
                                                       -> Result<()>
    {
        let name = name.as_ref();
        let mut state = self.state.borrow_mut();
        let phase = state.phase;
        match phase {
            Phase::Completed => return Err(Error::AlreadyCompleted),
            Phase::Aborted => return Err(Error::Aborted),
            _ => ()
        }

        if !state.info.trailers.contains(name) {
            return Err(Error::TrailerNotRegistered(name.to_owned()));
        }

        state.info.trailers.overwrite(name, value);
        Ok(())
    }

    /// Registered trailers with their current values
    pub fn trailers(&self) -> HeaderFieldList {
        self.state.borrow().info.trailers.clone()
    }

    /// Puts a filter behind the ones already registered
    ///
    /// The final body size is unknown from here on, so a declared content
    /// length is dropped.
    pub fn add_output_filter<F: OutputFilter + 'static>(&self, filter: F) -> Result<()> {
        self.modify_head(|info| info.content_length = None)?;
        self.state.borrow_mut().filters.push(Box::new(filter));
        Ok(())
    }

    pub fn write<C: Into<BodyChunk>>(&self, chunk: C) -> Result<()> {
        self.send_chunk(chunk.into(), None)
    }

    /// Writes, then calls `on_complete` once the transport is done with
    /// the chunk (`false` if it never will be)
    pub fn write_with<C, F>(&self, chunk: C, on_complete: F) -> Result<()>
        where C: Into<BodyChunk>, F: FnOnce(bool) + 'static
    {
        self.send_chunk(chunk.into(), Some(Box::new(on_complete)))
    }

    pub fn write_file(&self, file: FileRef) -> Result<()> {
        self.send_chunk(BodyChunk::File(file), None)
    }

    /// Finishes the response
    ///
    /// A response nobody wrote to goes out now, with an empty body. If a
    /// content length was declared and the bytes written don't match it,
    /// the transport is aborted instead: there's no honest way to end that
    /// message on the wire.
    pub fn completed(&self) -> Result<()> {
        let (commit, tail, declared, written) = {
            let mut state = self.state.borrow_mut();
            let phase = state.phase;
            match phase {
                Phase::Completed => return Err(Error::AlreadyCompleted),
                Phase::Aborted => return Err(Error::Aborted),
                _ => ()
            }

            let tail = if state.filters.is_empty() {
                Vec::new()
            }
            else {
                run_filters(&mut state.filters, Vec::new(), true)
            };

            if state.phase == Phase::Pending && state.filters.is_empty() &&
                state.info.content_length.is_none() {
                state.info.content_length = Some(0);
            }

            state.bytes_written += tail.len() as u64;
            let declared = state.info.content_length
                .filter(|_| !state.info.is_body_suppressed());
            let written = state.bytes_written;

            if declared.map_or(false, |declared| declared != written) {
                state.phase = Phase::Aborted;
                (None, Vec::new(), declared, written)
            }
            else {
                let commit = match phase {
                    Phase::Pending => Some(self.commit_info(&mut state)),
                    _ => None
                };
                state.phase = Phase::Completed;
                (commit, tail, declared, written)
            }
        };

        if let Some(declared) = declared.filter(|&declared| declared != written) {
            error!("response declared {} bytes but {} were written; aborting",
                   declared, written);
            self.transport.abort();
            return Err(Error::ContentLengthMismatch {
                declared: declared,
                written: written
            });
        }

        match commit {
            Some(info) => self.transport.send_response(info, BodyChunk::from(tail), None),
            None if !tail.is_empty() => self.transport.send(BodyChunk::from(tail), None),
            None => ()
        }

        let trailers = self.trailers();
        self.transport.completed(trailers);
        Ok(())
    }

    /// Replaces whatever the response was going to be with an error page
    /// and completes it
    ///
    /// `message`, if given, becomes the reason phrase and is shown on the
    /// page.
    pub fn send_error(&self, status: HttpStatus, message: Option<&str>) -> Result<()> {
        let page = {
            let mut state = self.state.borrow_mut();
            let phase = state.phase;
            match phase {
                Phase::Pending => (),
                Phase::Committed => return Err(Error::AlreadyCommitted),
                Phase::Completed => return Err(Error::AlreadyCompleted),
                Phase::Aborted => return Err(Error::Aborted)
            }

            state.filters.clear();
            let info = &mut state.info;
            info.status = status;
            info.reason = message.map(sanitize_reason).unwrap_or_default();
            info.headers.reset();
            info.trailers.reset();

            if status.is_content_forbidden() {
                info.content_length = Some(0);
                None
            }
            else {
                let page = error_page(status, message);
                info.content_length = Some(page.len() as u64);
                info.headers.append("Content-Type", mime::TEXT_HTML.as_ref());
                info.headers.append("Cache-Control", "must-revalidate,no-cache,no-store");
                Some(page)
            }
        };

        debug!("sending error {} ({})", status, message.unwrap_or(""));

        if let Some(page) = page {
            self.write(page)?;
        }
        self.completed()
    }

    /// Tears down the connection underneath the response
    pub fn abort(&self) {
        let was_aborted = mem::replace(&mut self.state.borrow_mut().phase,
                                       Phase::Aborted) == Phase::Aborted;
        if !was_aborted {
            self.transport.abort();
        }
    }

    /// Marks the response aborted without touching the transport; for when
    /// the peer went away first
    pub fn cancel(&self) {
        self.state.borrow_mut().phase = Phase::Aborted;
    }

    pub fn is_committed(&self) -> bool {
        self.state.borrow().phase != Phase::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.state.borrow().phase == Phase::Completed
    }

    pub fn is_aborted(&self) -> bool {
        self.state.borrow().phase == Phase::Aborted
    }

    pub fn bytes_written(&self) -> u64 {
        self.state.borrow().bytes_written
    }

    /// A copy of the response head as it stands
    pub fn info(&self) -> ResponseInfo {
        self.state.borrow().info.clone()
    }

    fn modify_head<F: FnOnce(&mut ResponseInfo)>(&self, f: F) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let phase = state.phase;
        match phase {
            Phase::Pending => {
                f(&mut state.info);
                Ok(())
            },
            Phase::Committed => Err(Error::AlreadyCommitted),
            Phase::Completed => Err(Error::AlreadyCompleted),
            Phase::Aborted => Err(Error::Aborted)
        }
    }

    fn commit_info(&self, state: &mut ResponseState) -> ResponseInfo {
        if state.info.status.is_undefined() {
            state.info.status = HttpStatus::OK;
        }
        state.phase = Phase::Committed;
        state.info.clone()
    }

    fn send_chunk(&self, chunk: BodyChunk, on_complete: Option<CompletionHandler>)
                  -> Result<()>
    {
        let (commit, chunk) = {
            let mut state = self.state.borrow_mut();
            let phase = state.phase;
            match phase {
                Phase::Completed => {
                    drop(state);
                    notify(on_complete, false);
                    return Err(Error::AlreadyCompleted);
                },
                Phase::Aborted => {
                    drop(state);
                    notify(on_complete, false);
                    return Err(Error::Aborted);
                },
                _ => ()
            }

            let chunk = if state.filters.is_empty() {
                chunk
            }
            else {
                let input = match chunk {
                    BodyChunk::Buffer(data) => data,
                    BodyChunk::File(file) => {
                        let mut data = Vec::with_capacity(file.len() as usize);
                        if let Err(e) = file.fill(&mut data) {
                            drop(state);
                            notify(on_complete, false);
                            return Err(e.into());
                        }
                        data
                    }
                };
                BodyChunk::Buffer(run_filters(&mut state.filters, input, false))
            };

            let length = chunk.len();
            if let Some(declared) = state.info.content_length {
                if state.bytes_written + length > declared &&
                    !state.info.is_body_suppressed() {
                    let attempted = state.bytes_written + length;
                    drop(state);
                    notify(on_complete, false);
                    return Err(Error::ContentLengthExceeded {
                        declared: declared,
                        attempted: attempted
                    });
                }
            }
            state.bytes_written += length;

            let commit = match phase {
                Phase::Pending => Some(self.commit_info(&mut state)),
                _ => None
            };
            (commit, chunk)
        };

        let on_complete = self.watch(on_complete);
        match commit {
            Some(info) => self.transport.send_response(info, chunk, on_complete),
            None => self.transport.send(chunk, on_complete)
        }
        Ok(())
    }

    /// Wraps a completion handler so a failed send marks the response aborted
    fn watch(&self, on_complete: Option<CompletionHandler>) -> Option<CompletionHandler> {
        let state = Rc::downgrade(&self.state);
        Some(Box::new(move |success| {
            if !success {
                if let Some(state) = state.upgrade() {
                    state.borrow_mut().phase = Phase::Aborted;
                }
            }
            notify(on_complete, success);
        }))
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("HttpResponse")
            .field("info", &state.info)
            .field("phase", &state.phase)
            .field("bytes_written", &state.bytes_written)
            .finish()
    }
}

fn run_filters(filters: &mut [Box<dyn OutputFilter>], input: Vec<u8>, last: bool)
               -> Vec<u8>
{
    filters.iter_mut().fold(input, |input, filter| {
        let mut output = Vec::with_capacity(input.len());
        filter.filter(&input, &mut output, last);
        output
    })
}

fn parse_length(value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::from(BadMessage::new(HttpStatus::INTERNAL_SERVER_ERROR,
                                    format!("invalid Content-Length {:?}", value)))
    })
}

/// Reason phrases go on the status line; keep them on one line
fn sanitize_reason(reason: &str) -> String {
    reason.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

fn error_page(status: HttpStatus, message: Option<&str>) -> String {
    let title = format!("{} {}", status.code(), status.reason_phrase());
    let mut page = format!("<!DOCTYPE html>\r\n\
                            <html><head><title>{0}</title></head>\
                            <body><h1>{0}</h1>", html_escape(&title));
    if let Some(message) = message {
        page.push_str("<p>");
        page.push_str(&html_escape(message));
        page.push_str("</p>");
    }
    page.push_str("</body></html>\r\n");
    page
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c)
        }
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockTransport;

    use std::cell::Cell;

    fn response(transport: &Rc<MockTransport>) -> HttpResponse {
        let transport: Rc<dyn HttpTransport> = transport.clone();
        HttpResponse::new(transport, HttpVersion::Version1_1, false)
    }

    #[test]
    fn first_write_commits() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.set_status(HttpStatus::OK).unwrap();
        response.write("hello").unwrap();

        assert!(response.is_committed());
        assert_eq!(transport.response_info().status, HttpStatus::OK);
        match response.add_header("X-Late", "1") {
            Err(Error::AlreadyCommitted) => (),
            other => panic!("unexpected result {:?}", other)
        }

        response.completed().unwrap();
        assert!(transport.is_completed());
        assert_eq!(transport.response_body(), b"hello");
    }

    #[test]
    fn empty_response_gets_zero_length() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.set_status(HttpStatus::NO_CONTENT).unwrap();
        response.completed().unwrap();

        assert_eq!(transport.sends(), 1);
        assert_eq!(transport.response_info().content_length, Some(0));
        assert!(!transport.is_aborted());
    }

    #[test]
    fn content_length_header_sets_length() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.add_header("content-length", "3").unwrap();

        assert_eq!(response.content_length(), Some(3));
        assert!(!response.headers().contains("Content-Length"));
        assert!(response.add_header("Content-Length", "lots").is_err());
    }

    #[test]
    fn overrun_fails_the_write() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.set_content_length(2).unwrap();

        let failed = Rc::new(Cell::new(false));
        let flag = failed.clone();
        let result = response.write_with("abc", move |ok| flag.set(!ok));

        assert!(result.is_err());
        assert!(failed.get());
        assert!(transport.response_body().is_empty());
    }

    #[test]
    fn unregistered_trailer() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.register_trailer("Mood").unwrap();

        assert!(response.set_trailer("Mood", "Happy").is_ok());
        match response.set_trailer("Weather", "Rainy") {
            Err(Error::TrailerNotRegistered(name)) => assert_eq!(name, "Weather"),
            other => panic!("unexpected result {:?}", other)
        }
    }

    #[test]
    fn send_error_page() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.add_header("X-Dropped", "yes").unwrap();
        response.send_error(HttpStatus::NOT_FOUND, Some("no <such> thing")).unwrap();

        let info = transport.response_info();
        let body = String::from_utf8(transport.response_body()).unwrap();
        assert_eq!(info.status, HttpStatus::NOT_FOUND);
        assert_eq!(info.reason, "no <such> thing");
        assert_eq!(info.headers.get("Content-Type"), "text/html");
        assert!(!info.headers.contains("X-Dropped"));
        assert_eq!(info.content_length, Some(body.len() as u64));
        assert!(body.contains("404 Not Found"));
        assert!(body.contains("no &lt;such&gt; thing"));
        assert!(transport.is_completed());
    }

    #[test]
    fn writes_after_abort_fail_their_callbacks() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.abort();
        assert!(transport.is_aborted());

        let result = Rc::new(Cell::new(None));
        let seen = result.clone();
        assert!(response.write_with("late", move |ok| seen.set(Some(ok))).is_err());
        assert_eq!(result.get(), Some(false));
    }

    struct Upcase;

    impl OutputFilter for Upcase {
        fn filter(&mut self, input: &[u8], output: &mut Vec<u8>, last: bool) {
            output.extend(input.iter().map(u8::to_ascii_uppercase));
            if last {
                output.extend_from_slice(b"!");
            }
        }
    }

    #[test]
    fn output_filters() {
        let transport = MockTransport::new();
        let response = response(&transport);
        response.set_content_length(5).unwrap();
        response.add_output_filter(Upcase).unwrap();
        assert_eq!(response.content_length(), None);

        response.write("hello").unwrap();
        response.completed().unwrap();

        assert_eq!(transport.response_body(), b"HELLO!");
        assert!(!transport.is_aborted());
    }

    #[test]
    fn filtered_file_shorter_than_announced() {
        let path = ::std::env::temp_dir()
            .join(format!("http-engine-response-{}", ::std::process::id()));
        ::std::fs::write(&path, b"tiny").unwrap();
        let file = FileRef::new(::std::fs::File::open(&path).unwrap(), 0, 100);

        let transport = MockTransport::new();
        let response = response(&transport);
        response.add_output_filter(Upcase).unwrap();

        let result = Rc::new(Cell::new(None));
        let seen = result.clone();
        assert!(response.write_with(BodyChunk::File(file), move |ok| seen.set(Some(ok))).is_err());
        assert_eq!(result.get(), Some(false));
        assert!(!response.is_committed());

        ::std::fs::remove_file(&path).unwrap();
    }
}
