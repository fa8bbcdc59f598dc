//! Per-message request handling
//!
//! An `HttpChannel` sits behind a wire parser as its `MessageListener`. It
//! collects the request, checks it against the request-line and `Host`
//! rules, buffers the body, and hands the lot to the handler once the
//! message is complete. Validation failures and handler faults become error
//! responses here; nothing below the channel ever sees them.

pub mod request;
pub mod response;
pub mod service;

pub use self::request::HttpRequest;
pub use self::response::{HttpResponse, OutputFilter};
pub use self::service::{HandlerId, HttpService};

use crate::config::Limits;
use crate::errors::{self, BadMessage};
use crate::listener::{MessageListener, ProtocolError};
use crate::log_util::ascii_escape_prefix;
use crate::path;
use crate::status::HttpStatus;
use crate::transport::HttpTransport;
use crate::version::HttpVersion;

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// What a handler reports back; `Err` turns into a 500
pub type HandlerResult = ::std::result::Result<(), Box<dyn Error>>;

/// The application's request handler
///
/// Called once per request with the body already buffered. It may finish
/// the response before returning or keep a clone of it and finish later.
pub type HttpHandler = Rc<dyn Fn(&HttpRequest, HttpResponse) -> HandlerResult>;

/// Wraps a closure up as an `HttpHandler`
pub fn handler<F>(f: F) -> HttpHandler
    where F: Fn(&HttpRequest, HttpResponse) -> HandlerResult + 'static
{
    Rc::new(f)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChannelState {
    AwaitingMessage,
    ReceivingHeaders,
    ReceivingBody,
    HandlerRunning,
    Completed,
    Aborted
}

pub struct HttpChannel {
    transport: Rc<dyn HttpTransport>,
    handler: HttpHandler,
    limits: Limits,
    state: ChannelState,
    request: HttpRequest,
    response: HttpResponse,
    /// The request was refused; swallow the rest of it
    discarding: bool,
    /// Header and trailer bytes seen for the current request
    header_bytes: usize,
    /// Protocol trouble; the connection has to go after this message
    close_after: bool
}

impl HttpChannel {
    pub fn new(transport: Rc<dyn HttpTransport>, handler: HttpHandler,
               limits: Limits) -> HttpChannel
    {
        let response = HttpResponse::new(transport.clone(), HttpVersion::Version1_1,
                                         false);
        HttpChannel {
            transport: transport,
            handler: handler,
            limits: limits,
            state: ChannelState::AwaitingMessage,
            request: HttpRequest::new(HttpVersion::Version1_1, "", ""),
            response: response,
            discarding: false,
            header_bytes: 0,
            close_after: false
        }
    }

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[inline]
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// A handle on the current response
    pub fn response(&self) -> HttpResponse {
        self.response.clone()
    }

    /// Catches up with a response that finished after the handler returned
    pub fn update_state(&mut self) -> ChannelState {
        if self.state == ChannelState::HandlerRunning {
            if self.response.is_aborted() {
                self.state = ChannelState::Aborted;
            }
            else if self.response.is_completed() {
                self.state = ChannelState::Completed;
            }
        }
        self.state
    }

    /// Whether the connection may carry another message after this one
    pub fn is_persistent(&self) -> bool {
        if self.close_after || self.state == ChannelState::Aborted {
            return false;
        }

        if has_token(&self.response.header("Connection"), "close") {
            return false;
        }

        let connection = self.request.headers().get("Connection");
        match self.request.version() {
            HttpVersion::Version1_1 => !has_token(connection, "close"),
            HttpVersion::Version1_0 => has_token(connection, "keep-alive"),
            HttpVersion::Version0_9 => false
        }
    }

    /// Makes the channel ready for the next message
    ///
    /// Only a cleanly completed channel can be reused.
    pub fn reset(&mut self) -> errors::Result<()> {
        match self.state {
            ChannelState::AwaitingMessage => Ok(()),
            ChannelState::Completed => {
                self.recycle(HttpVersion::Version1_1, "", "");
                self.state = ChannelState::AwaitingMessage;
                Ok(())
            },
            ChannelState::Aborted => Err(errors::Error::Aborted),
            _ => Err(errors::Error::ChannelBusy)
        }
    }

    fn recycle(&mut self, version: HttpVersion, method: &str, entity: &str) {
        self.request = HttpRequest::new(version, method, entity);
        self.response = HttpResponse::new(self.transport.clone(), version,
                                          method == "HEAD");
        self.discarding = false;
        self.header_bytes = 0;
    }

    /// Answers with an error and ignores the remainder of the message
    fn reject(&mut self, error: BadMessage) {
        warn!("rejecting {} {}: {}", self.request.method(),
              ascii_escape_prefix(self.request.entity().as_bytes(), 128), error);

        self.discarding = true;
        if let Err(e) = self.response.send_error(error.status, Some(&error.message)) {
            warn!("could not send error response: {}", e);
            self.response.abort();
        }
    }

    fn run_handler(&mut self) {
        self.state = ChannelState::HandlerRunning;

        let handler = self.handler.clone();
        let request = &self.request;
        let response = self.response.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(request, response)));

        match outcome {
            Ok(Ok(())) => (),
            Ok(Err(e)) => {
                let (status, reason) = classify(&*e);
                self.handler_failed(status, Some(reason));
            },
            Err(payload) => {
                let reason = panic_reason(&*payload);
                self.handler_failed(HttpStatus::INTERNAL_SERVER_ERROR, reason);
            }
        }

        self.update_state();
    }

    fn handler_failed(&mut self, status: HttpStatus, reason: Option<String>) {
        error!("handler failed on {} {}: {}", self.request.method(),
               self.request.entity(), reason.as_deref().unwrap_or("(no message)"));

        if self.response.is_aborted() || self.response.is_completed() {
            return;
        }

        if self.response.is_committed() {
            // the head is out; the peer can't be told anything sensible now
            self.response.abort();
            return;
        }

        if let Err(e) = self.response.send_error(status, reason.as_deref()) {
            warn!("could not send error response: {}", e);
            self.response.abort();
        }
    }

    fn finish_discarding(&mut self) {
        self.discarding = false;
        self.state = if self.response.is_aborted() {
            ChannelState::Aborted
        }
        else {
            ChannelState::Completed
        };
    }
}

impl MessageListener for HttpChannel {
    fn on_message_begin_request(&mut self, method: &[u8], entity: &[u8],
                                version: HttpVersion) -> bool {
        match self.state {
            ChannelState::AwaitingMessage | ChannelState::Completed => (),
            state => {
                warn!("message begins while channel is {:?}", state);
                return false;
            }
        }

        let method = String::from_utf8_lossy(method);
        let entity_text = String::from_utf8_lossy(entity);
        self.recycle(version, &method, &entity_text);
        self.state = ChannelState::ReceivingHeaders;

        debug!("request: {} {} {}", method, ascii_escape_prefix(entity, 128), version);

        if entity.len() > self.limits.max_request_uri_length {
            self.reject(BadMessage::new(HttpStatus::URI_TOO_LONG, "request URI too long"));
            return true;
        }

        match path::validate_entity(entity) {
            Ok(target) => self.request.set_path(target),
            Err(e) => self.reject(e)
        }

        true
    }

    fn on_message_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        if self.discarding {
            return true;
        }

        self.header_bytes += name.len() + value.len();
        if self.header_bytes > self.limits.max_header_block_length {
            self.reject(BadMessage::new(HttpStatus::REQUEST_HEADER_FIELDS_TOO_LARGE,
                                        "request header fields too large"));
            return true;
        }

        let name = String::from_utf8_lossy(name).into_owned();
        let value = String::from_utf8_lossy(value).into_owned();
        match self.state {
            ChannelState::ReceivingHeaders => self.request.headers.append(name, value),
            _ => self.request.trailers.append(name, value)
        }
        true
    }

    fn on_message_header_end(&mut self) -> bool {
        self.state = ChannelState::ReceivingBody;
        if self.discarding {
            return true;
        }

        let hosts = self.request.headers().count("Host");
        if self.request.version().requires_host() && hosts != 1 {
            self.reject(BadMessage::bad_request(if hosts == 0 {
                "missing Host header"
            }
            else {
                "more than one Host header"
            }));
            return true;
        }

        let declared = self.request.headers().get("Content-Length").trim().parse::<u64>().ok();
        self.request.content_length = declared;
        if let Some(length) = declared {
            if length > self.limits.max_request_body_length {
                self.reject(BadMessage::new(HttpStatus::PAYLOAD_TOO_LARGE,
                                            "request body too large"));
                return true;
            }
            self.transport.set_input_buffer_size(length as usize);
        }

        true
    }

    fn on_message_content(&mut self, chunk: &[u8]) -> bool {
        if self.discarding || chunk.is_empty() {
            return true;
        }

        let length = (self.request.body.len() + chunk.len()) as u64;
        if length > self.limits.max_request_body_length {
            self.reject(BadMessage::new(HttpStatus::PAYLOAD_TOO_LARGE,
                                        "request body too large"));
            return true;
        }

        self.request.body.extend_from_slice(chunk);
        true
    }

    fn on_message_end(&mut self) -> bool {
        if self.discarding {
            self.finish_discarding();
        }
        else {
            self.run_handler();
        }

        self.state == ChannelState::Completed && self.is_persistent()
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        warn!("protocol error: {}", error);
        self.close_after = true;
        self.discarding = false;

        if let ChannelState::AwaitingMessage | ChannelState::Completed = self.state {
            self.response = HttpResponse::new(self.transport.clone(),
                                              HttpVersion::Version1_1, false);
        }

        if !self.response.is_committed() {
            if let Err(e) = self.response.send_error(error.status, Some(&error.message)) {
                warn!("could not send error response: {}", e);
                self.response.abort();
            }
        }
        else if !self.response.is_completed() {
            self.response.abort();
        }

        self.state = if self.response.is_aborted() {
            ChannelState::Aborted
        }
        else {
            ChannelState::Completed
        };
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Status and reason for a handler error; `BadMessage`s keep their status
fn classify(e: &(dyn Error + 'static)) -> (HttpStatus, String) {
    if let Some(bad) = e.downcast_ref::<BadMessage>() {
        return (bad.status, bad.message.clone());
    }

    if let Some(&errors::Error::BadMessage(ref bad)) = e.downcast_ref::<errors::Error>() {
        return (bad.status, bad.message.clone());
    }

    (HttpStatus::INTERNAL_SERVER_ERROR, e.to_string())
}

fn panic_reason(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(message) = payload.downcast_ref::<&str>() {
        Some((*message).to_owned())
    }
    else {
        payload.downcast_ref::<String>().cloned()
    }
}
