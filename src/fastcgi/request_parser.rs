//! FastCGI records to `MessageListener` events
//!
//! One connection from the web server carries many requests, told apart by
//! request id. Each `BeginRequest` asks the listener factory for a
//! listener; the params stream is collected and replayed as a request line
//! and headers once it ends, and stdin becomes the body. The end of stdin
//! ends the message and forgets the request.

use crate::fastcgi::{parser, BeginRequest, Content, NameValuePair, Record, Role, flags,
                     record_kind};
use crate::headers::canonicalize_header_name;
use crate::listener::{MessageListener, ProtocolError};
use crate::log_util::ascii_escape;
use crate::status::HttpStatus;
use crate::version::HttpVersion;

use std::collections::HashMap;

/// Makes the listener for a new request; `None` refuses it
pub type ListenerFactory<L> = Box<dyn FnMut(u16, &BeginRequest) -> Option<L>>;

/// Called with the request id and type of a record nobody handles
pub type UnknownPacketCallback = Box<dyn FnMut(u16, u8)>;

pub type AbortRequestCallback = Box<dyn FnMut(u16)>;

/// Called with the names a `GetValues` record asks about
pub type GetValuesCallback = Box<dyn FnMut(&[NameValuePair])>;

/// Most params bytes a request may send unless told otherwise
pub const DEFAULT_MAX_PARAMS_LENGTH: usize = 68 * 1024;

/// A request in progress
struct Stream<L> {
    listener: L,
    params: Vec<u8>,
    params_done: bool
}

pub struct RequestParser<L> {
    streams: HashMap<u16, Stream<L>>,
    /// Bytes of a record that hasn't fully arrived yet
    buffer: Vec<u8>,
    failed: bool,
    max_params_length: usize,
    new_listener: ListenerFactory<L>,
    on_unknown_packet: UnknownPacketCallback,
    on_abort_request: AbortRequestCallback,
    on_get_values: Option<GetValuesCallback>
}

impl<L: MessageListener> RequestParser<L> {
    pub fn new(new_listener: ListenerFactory<L>,
               on_unknown_packet: UnknownPacketCallback,
               on_abort_request: AbortRequestCallback)
               -> RequestParser<L>
    {
        RequestParser {
            streams: HashMap::new(),
            buffer: Vec::new(),
            failed: false,
            max_params_length: DEFAULT_MAX_PARAMS_LENGTH,
            new_listener: new_listener,
            on_unknown_packet: on_unknown_packet,
            on_abort_request: on_abort_request,
            on_get_values: None
        }
    }

    pub fn set_get_values_callback(&mut self, callback: GetValuesCallback) {
        self.on_get_values = Some(callback);
    }

    /// Caps the params stream of each request; a request sending more is
    /// answered with a protocol error
    pub fn set_max_params_length(&mut self, limit: usize) {
        self.max_params_length = limit;
    }

    /// Whether the record stream turned out to be garbage
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Number of requests between `BeginRequest` and the end of stdin
    #[inline]
    pub fn active_requests(&self) -> usize {
        self.streams.len()
    }

    /// Feeds bytes from the web server
    ///
    /// Everything is always consumed: partial records are kept until the
    /// rest of them arrives.
    pub fn parse_fragment(&mut self, chunk: &[u8]) -> usize {
        if self.failed {
            return chunk.len();
        }

        self.buffer.extend_from_slice(chunk);

        let mut offset = 0;
        loop {
            let parsed = match parser::record(&self.buffer[offset..]) {
                Ok((rest, record)) => Some((self.buffer.len() - rest.len(), record)),
                Err(nom::Err::Incomplete(_)) => break,
                Err(_) => None
            };

            match parsed {
                Some((end, record)) => {
                    offset = end;
                    self.process(record);
                },
                None => {
                    error!("malformed FastCGI record: {}",
                           ascii_escape(&self.buffer[offset..]));
                    self.fail();
                    break;
                }
            }
        }

        self.buffer.drain(..offset.min(self.buffer.len()));
        chunk.len()
    }

    /// Starts request `id` as if a `BeginRequest` record had arrived
    pub fn parse_begin_request(&mut self, role: Role, id: u16, keep_conn: bool) {
        let flags = if keep_conn { flags::KEEP_CONN } else { 0 };
        self.process(Record {
            id: id,
            content: Content::BeginRequest(BeginRequest { role: role, flags: flags })
        });
    }

    fn fail(&mut self) {
        self.failed = true;
        self.buffer.clear();
        for (_, mut stream) in self.streams.drain() {
            stream.listener.on_protocol_error(
                ProtocolError::new(HttpStatus::BAD_REQUEST, "malformed FastCGI record", 0));
        }
    }

    fn process(&mut self, record: Record) {
        let id = record.id;
        match record.content {
            Content::BeginRequest(begin) => {
                if id == 0 {
                    warn!("BeginRequest on the management id");
                    return;
                }
                if self.streams.contains_key(&id) {
                    warn!("BeginRequest for request {} which is already running", id);
                    return;
                }

                match (self.new_listener)(id, &begin) {
                    Some(listener) => {
                        self.streams.insert(id, Stream {
                            listener: listener,
                            params: Vec::new(),
                            params_done: false
                        });
                    },
                    None => debug!("request {} ({:?}) refused", id, begin.role)
                }
            },
            Content::Params(data) => {
                let limit = self.max_params_length;
                let (done, overflow) = match self.streams.get_mut(&id) {
                    Some(stream) if !stream.params_done => {
                        if data.is_empty() {
                            stream.params_done = true;
                            (true, false)
                        }
                        else if stream.params.len() + data.len() > limit {
                            (false, true)
                        }
                        else {
                            stream.params.extend_from_slice(&data);
                            (false, false)
                        }
                    },
                    Some(_) => {
                        warn!("params for request {} after the end of its params", id);
                        (false, false)
                    },
                    None => {
                        debug!("params for unknown request {}", id);
                        (false, false)
                    }
                };

                if overflow {
                    warn!("params of request {} exceed {} bytes", id, limit);
                    if let Some(mut stream) = self.streams.remove(&id) {
                        stream.listener.on_protocol_error(
                            ProtocolError::new(HttpStatus::BAD_REQUEST,
                                               "FastCGI params too large", 0));
                    }
                }
                else if done {
                    self.begin_message(id);
                }
            },
            Content::Stdin(data) => {
                let finished = match self.streams.get_mut(&id) {
                    Some(stream) if stream.params_done => {
                        if data.is_empty() {
                            stream.listener.on_message_end();
                            true
                        }
                        else {
                            stream.listener.on_message_content(&data);
                            false
                        }
                    },
                    Some(_) => {
                        warn!("stdin for request {} before its params ended", id);
                        false
                    },
                    None => {
                        debug!("stdin for unknown request {}", id);
                        false
                    }
                };

                if finished {
                    self.streams.remove(&id);
                }
            },
            Content::AbortRequest(_) => {
                debug!("request {} aborted by the web server", id);
                self.streams.remove(&id);
                (self.on_abort_request)(id);
            },
            Content::GetValues(names) => {
                match self.on_get_values {
                    Some(ref mut callback) => callback(&names),
                    None => (self.on_unknown_packet)(id, record_kind::GET_VALUES)
                }
            },
            other => {
                let kind = other.kind();
                debug!("unexpected record type {} for request {}", kind, id);
                (self.on_unknown_packet)(id, kind);
            }
        }
    }

    /// The params stream of request `id` ended; replay it as a request head
    fn begin_message(&mut self, id: u16) {
        let failure = match self.streams.get_mut(&id) {
            Some(stream) => {
                match parser::name_value_pairs(&stream.params) {
                    Ok((_, pairs)) => {
                        stream.params = Vec::new();
                        replay_params(&pairs, &mut stream.listener).err()
                    },
                    Err(_) => Some(ProtocolError::new(HttpStatus::BAD_REQUEST,
                                                      "malformed FastCGI params", 0))
                }
            },
            None => None
        };

        if let Some(error) = failure {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.listener.on_protocol_error(error);
            }
        }
    }
}

/// The HTTP version named by `SERVER_PROTOCOL`, which some servers send
/// without the `HTTP/` prefix
fn protocol_version(value: &[u8]) -> Option<HttpVersion> {
    if value.starts_with(b"HTTP/") {
        return HttpVersion::from_bytes(value);
    }

    let mut prefixed = b"HTTP/".to_vec();
    prefixed.extend_from_slice(value);
    HttpVersion::from_bytes(&prefixed)
}

/// `HTTP_ACCEPT_LANGUAGE` becomes `Accept-Language`
fn header_name(variable: &[u8]) -> String {
    let name = String::from_utf8_lossy(variable).replace('_', "-");
    canonicalize_header_name(&name)
}

fn replay_params<L: MessageListener>(pairs: &[NameValuePair], listener: &mut L)
                                     -> Result<(), ProtocolError>
{
    let mut method: Option<&[u8]> = None;
    let mut uri: Option<&[u8]> = None;
    let mut script_name: &[u8] = b"";
    let mut path_info: &[u8] = b"";
    let mut query_string: &[u8] = b"";
    let mut version = HttpVersion::Version1_1;
    let mut headers: Vec<(String, &[u8])> = Vec::new();
    let mut content_type: &[u8] = b"";
    let mut content_length: &[u8] = b"";

    for pair in pairs {
        let value = &pair.value[..];
        match &pair.name[..] {
            b"REQUEST_METHOD" => method = Some(value),
            b"REQUEST_URI" => uri = Some(value),
            b"SCRIPT_NAME" => script_name = value,
            b"PATH_INFO" => path_info = value,
            b"QUERY_STRING" => query_string = value,
            b"SERVER_PROTOCOL" => {
                match protocol_version(value) {
                    Some(v) => version = v,
                    None => warn!("unknown SERVER_PROTOCOL {}; assuming HTTP/1.1",
                                  ascii_escape(value))
                }
            },
            b"CONTENT_TYPE" => content_type = value,
            b"CONTENT_LENGTH" => content_length = value,
            name if name.starts_with(b"HTTP_") && name.len() > 5 =>
                headers.push((header_name(&name[5..]), value)),
            _ => ()
        }
    }

    let method = match method {
        Some(method) if !method.is_empty() => method,
        _ => return Err(ProtocolError::new(HttpStatus::BAD_REQUEST,
                                           "missing REQUEST_METHOD", 0))
    };

    let entity = match uri {
        Some(uri) => uri.to_vec(),
        None => {
            let mut entity = script_name.to_vec();
            entity.extend_from_slice(path_info);
            if !query_string.is_empty() {
                entity.push(b'?');
                entity.extend_from_slice(query_string);
            }
            entity
        }
    };

    if !content_type.is_empty() && !headers.iter().any(|h| h.0 == "Content-Type") {
        headers.push((String::from("Content-Type"), content_type));
    }
    if !content_length.is_empty() && !headers.iter().any(|h| h.0 == "Content-Length") {
        headers.push((String::from("Content-Length"), content_length));
    }

    listener.on_message_begin_request(method, &entity, version);
    for (name, value) in headers {
        listener.on_message_header(name.as_bytes(), value);
    }
    listener.on_message_header_end();

    Ok(())
}
