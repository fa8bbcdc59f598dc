//! The boundary between a channel and whatever moves its bytes
//!
//! A transport owns the connection-level output. Channels hand it a
//! `ResponseInfo` on the first write, body chunks after that, and the
//! trailers once the handler is done.
//!
//! Methods take `&self`: a transport is shared between the connection that
//! feeds the parser and the responses that write to it, so implementations
//! keep their state in `Cell`/`RefCell`. They must release any internal
//! borrow before invoking a completion handler, since the handler is free
//! to write again.

use crate::body::BodyChunk;
use crate::headers::HeaderFieldList;
use crate::info::ResponseInfo;

/// Invoked exactly once per send, with `true` on success
pub type CompletionHandler = Box<dyn FnOnce(bool)>;

pub trait HttpTransport {
    /// Commits the response head along with its first body chunk
    fn send_response(&self, info: ResponseInfo, chunk: BodyChunk,
                     on_complete: Option<CompletionHandler>);

    /// Sends a further body chunk of the committed response
    fn send(&self, chunk: BodyChunk, on_complete: Option<CompletionHandler>);

    /// Drops the connection; the message on the wire can't be finished
    fn abort(&self);

    /// The response is done; `trailers` carries the values of any trailers
    /// the response registered
    fn completed(&self, trailers: HeaderFieldList);

    /// Hint for how much input to buffer per read
    fn set_input_buffer_size(&self, size: usize);
}

/// Runs a completion handler if there is one
pub fn notify(on_complete: Option<CompletionHandler>, success: bool) {
    if let Some(callback) = on_complete {
        callback(success);
    }
}
