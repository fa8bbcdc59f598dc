//! A transport that remembers instead of sending; drives channels in tests

use crate::body::BodyChunk;
use crate::channel::{HttpChannel, HttpHandler};
use crate::config::Limits;
use crate::headers::HeaderFieldList;
use crate::info::ResponseInfo;
use crate::listener::MessageListener;
use crate::transport::{notify, CompletionHandler, HttpTransport};
use crate::version::HttpVersion;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Default)]
pub struct MockTransport {
    response_info: RefCell<ResponseInfo>,
    response_body: RefCell<Vec<u8>>,
    aborted: Cell<bool>,
    completed: Cell<bool>,
    sends: Cell<usize>
}

impl MockTransport {
    pub fn new() -> Rc<MockTransport> {
        Rc::new(MockTransport::default())
    }

    /// Pushes one request through a fresh channel
    pub fn run(self: &Rc<Self>, handler: HttpHandler, version: HttpVersion,
               method: &str, entity: &str, headers: &[(&str, &str)], body: &str)
               -> HttpChannel
    {
        let limits = Limits {
            max_request_uri_length: 64,
            max_request_body_length: 128,
            ..Limits::default()
        };
        self.run_with_limits(handler, limits, version, method, entity, headers, body)
    }

    pub fn run_with_limits(self: &Rc<Self>, handler: HttpHandler, limits: Limits,
                           version: HttpVersion, method: &str, entity: &str,
                           headers: &[(&str, &str)], body: &str) -> HttpChannel
    {
        self.reset();

        let transport: Rc<dyn HttpTransport> = self.clone();
        let mut channel = HttpChannel::new(transport, handler, limits);

        let _ = channel.on_message_begin_request(method.as_bytes(), entity.as_bytes(),
                                                 version) &&
            headers.iter().all(|&(name, value)| {
                channel.on_message_header(name.as_bytes(), value.as_bytes())
            }) &&
            channel.on_message_header_end() &&
            channel.on_message_content(body.as_bytes()) &&
            channel.on_message_end();

        channel
    }

    pub fn reset(&self) {
        *self.response_info.borrow_mut() = ResponseInfo::default();
        self.response_body.borrow_mut().clear();
        self.aborted.set(false);
        self.completed.set(false);
        self.sends.set(0);
    }

    pub fn response_info(&self) -> ResponseInfo {
        self.response_info.borrow().clone()
    }

    pub fn response_body(&self) -> Vec<u8> {
        self.response_body.borrow().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    /// Number of `send_response`/`send` calls seen
    pub fn sends(&self) -> usize {
        self.sends.get()
    }

    fn append(&self, chunk: BodyChunk) {
        let mut body = self.response_body.borrow_mut();
        match chunk {
            BodyChunk::Buffer(data) => body.extend_from_slice(&data),
            BodyChunk::File(file) => {
                if let Err(e) = file.fill(&mut body) {
                    panic!("mock transport could not read file chunk: {}", e);
                }
            }
        }
    }
}

impl HttpTransport for MockTransport {
    fn send_response(&self, info: ResponseInfo, chunk: BodyChunk,
                     on_complete: Option<CompletionHandler>) {
        self.sends.set(self.sends.get() + 1);
        *self.response_info.borrow_mut() = info;
        self.append(chunk);
        notify(on_complete, true);
    }

    fn send(&self, chunk: BodyChunk, on_complete: Option<CompletionHandler>) {
        self.sends.set(self.sends.get() + 1);
        self.append(chunk);
        notify(on_complete, true);
    }

    fn abort(&self) {
        self.aborted.set(true);
    }

    fn completed(&self, trailers: HeaderFieldList) {
        self.completed.set(true);
        self.response_info.borrow_mut().trailers = trailers;
    }

    fn set_input_buffer_size(&self, _size: usize) {}
}
