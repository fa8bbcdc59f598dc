//! Serializes HTTP/1.x message heads and bodies
//!
//! The generator owns the framing decisions. Whatever a handler put in its
//! header list, `Content-Length`, `Transfer-Encoding` and `Trailer` are
//! written by the generator alone, from the length and trailers the
//! `ResponseInfo` announces.

use crate::body::{BodyChunk, FileRef};
use crate::date::{DateGenerator, SystemDateGenerator};
use crate::errors::{Error, Result};
use crate::headers::HeaderFieldList;
use crate::info::{RequestInfo, ResponseInfo};
use crate::version::HttpVersion;

use std::io::{self, Write};

/// Somewhere for serialized output to go
pub trait OutputSink {
    fn write_bytes(&mut self, data: &[u8]);

    fn write_file(&mut self, file: FileRef);
}

#[derive(Debug, Clone)]
pub enum Segment {
    Bytes(Vec<u8>),
    File(FileRef)
}

impl Segment {
    pub fn len(&self) -> u64 {
        match *self {
            Segment::Bytes(ref data) => data.len() as u64,
            Segment::File(ref file) => file.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output waiting to be written to a socket
///
/// Adjacent byte writes are merged; file regions stay references until the
/// buffer is flushed.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    segments: Vec<Segment>
}

impl OutputBuffer {
    pub fn new() -> OutputBuffer {
        OutputBuffer { segments: Vec::new() }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(Segment::is_empty)
    }

    pub fn len(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Empties the buffer, handing back what was in it
    pub fn take(&mut self) -> Vec<Segment> {
        ::std::mem::take(&mut self.segments)
    }

    /// Writes everything out, in order, and empties the buffer
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> io::Result<()> {
        for segment in self.take() {
            match segment {
                Segment::Bytes(data) => sink.write_all(&data)?,
                Segment::File(file) => { file.copy_to(sink)?; }
            }
        }
        sink.flush()
    }

    /// The contents as one flat buffer, file regions read in
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut flat = Vec::with_capacity(self.len() as usize);
        for segment in &self.segments {
            match *segment {
                Segment::Bytes(ref data) => flat.extend_from_slice(data),
                Segment::File(ref file) => file.fill(&mut flat)?
            }
        }
        Ok(flat)
    }
}

impl OutputSink for OutputBuffer {
    fn write_bytes(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if let Some(&mut Segment::Bytes(ref mut last)) = self.segments.last_mut() {
            last.extend_from_slice(data);
            return;
        }

        self.segments.push(Segment::Bytes(Vec::from(data)));
    }

    fn write_file(&mut self, file: FileRef) {
        if !file.is_empty() {
            self.segments.push(Segment::File(file));
        }
    }
}

pub struct Http1Generator {
    date: Box<dyn DateGenerator>,

    // per message
    declared: Option<u64>,
    written: u64,
    chunked: bool,
    suppress_body: bool,

    bytes_transmitted: u64
}

impl Http1Generator {
    pub fn new() -> Http1Generator {
        Http1Generator::with_date_generator(Box::new(SystemDateGenerator))
    }

    pub fn with_date_generator(date: Box<dyn DateGenerator>) -> Http1Generator {
        Http1Generator {
            date: date,
            declared: None,
            written: 0,
            chunked: false,
            suppress_body: false,
            bytes_transmitted: 0
        }
    }

    /// Body bytes still owed to the current message, if its length was
    /// declared
    pub fn pending_content_length(&self) -> Option<u64> {
        self.declared.map(|declared| declared.saturating_sub(self.written))
    }

    #[inline]
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Every byte handed to a sink so far, file regions included
    #[inline]
    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted
    }

    /// Forgets the current message
    pub fn recycle(&mut self) {
        self.declared = None;
        self.written = 0;
        self.chunked = false;
        self.suppress_body = false;
    }

    pub fn generate_request<S>(&mut self, info: &RequestInfo, chunk: BodyChunk,
                               sink: &mut S) -> Result<()>
        where S: OutputSink + ?Sized
    {
        self.recycle();
        self.declared = info.content_length;
        self.chunked = info.content_length.is_none() &&
            info.version.supports_chunked();

        let mut head = Vec::with_capacity(256);
        write_line(&mut head, &[info.method.as_str(), " ", info.entity.as_str(), " ",
                                info.version.as_str()]);
        self.write_fields(&mut head, &info.headers);
        self.write_framing(&mut head, &info.trailers);
        head.extend_from_slice(b"\r\n");
        self.emit(sink, &head);

        self.generate_body(chunk, sink)
    }

    pub fn generate_response<S>(&mut self, info: &ResponseInfo, chunk: BodyChunk,
                                sink: &mut S) -> Result<()>
        where S: OutputSink + ?Sized
    {
        self.recycle();

        let forbidden = info.status.is_content_forbidden();
        if forbidden {
            self.declared = Some(0);
        }
        else {
            self.declared = info.content_length;
            self.chunked = info.version.supports_chunked() &&
                (info.content_length.is_none() || !info.trailers.is_empty());
        }
        self.suppress_body = info.is_body_suppressed();

        let code = info.status.code().to_string();
        let mut head = Vec::with_capacity(256);
        write_line(&mut head, &[info.version.as_str(), " ", code.as_str(), " ",
                                info.reason_phrase()]);

        if !info.headers.contains("Date") {
            write_line(&mut head, &["Date: ", self.date.date().as_str()]);
        }
        self.write_fields(&mut head, &info.headers);

        if !forbidden {
            self.write_framing(&mut head, &info.trailers);
        }
        else if info.content_length.is_some() && info.head_response {
            // not much point in hiding the length of what a GET would get
            write_content_length(&mut head, info.content_length);
        }
        head.extend_from_slice(b"\r\n");
        self.emit(sink, &head);

        debug!("generated response head: {} {}, length {:?}, chunked {}",
               info.version, code, self.declared, self.chunked);

        self.generate_body(chunk, sink)
    }

    /// Writes a piece of body, chunk-framed where the message is chunked
    ///
    /// Fails without writing anything if the piece would overrun the
    /// declared length. Messages with no body on the wire (answers to
    /// `HEAD`, 204, 304) swallow the bytes after counting them.
    pub fn generate_body<S>(&mut self, chunk: BodyChunk, sink: &mut S) -> Result<()>
        where S: OutputSink + ?Sized
    {
        let length = chunk.len();
        if length == 0 {
            return Ok(());
        }

        if let Some(declared) = self.declared {
            if self.written + length > declared && !self.suppress_body {
                return Err(Error::ContentLengthExceeded {
                    declared: declared,
                    attempted: self.written + length
                });
            }
        }
        self.written += length;

        if self.suppress_body {
            return Ok(());
        }

        if self.chunked {
            self.emit(sink, format!("{:x}\r\n", length).as_bytes());
        }

        match chunk {
            BodyChunk::Buffer(data) => self.emit(sink, &data),
            BodyChunk::File(file) => {
                self.bytes_transmitted += file.len();
                sink.write_file(file);
            }
        }

        if self.chunked {
            self.emit(sink, b"\r\n");
        }

        Ok(())
    }

    /// Ends the message; for chunked messages that's the last chunk plus
    /// the trailer fields
    pub fn generate_trailer<S>(&mut self, trailers: &HeaderFieldList, sink: &mut S)
                               -> Result<()>
        where S: OutputSink + ?Sized
    {
        if let Some(declared) = self.declared {
            if self.written < declared && !self.suppress_body {
                return Err(Error::ContentLengthMismatch {
                    declared: declared,
                    written: self.written
                });
            }
        }

        if self.chunked && !self.suppress_body {
            let mut tail = Vec::with_capacity(64);
            tail.extend_from_slice(b"0\r\n");
            for field in trailers {
                write_line(&mut tail, &[field.name(), ": ", field.value()]);
            }
            tail.extend_from_slice(b"\r\n");
            self.emit(sink, &tail);
        }

        self.recycle();
        Ok(())
    }

    fn write_fields(&self, head: &mut Vec<u8>, headers: &HeaderFieldList) {
        for field in headers {
            if is_framing_header(field.name()) {
                continue;
            }
            write_line(head, &[field.name(), ": ", field.value()]);
        }
    }

    fn write_framing(&self, head: &mut Vec<u8>, trailers: &HeaderFieldList) {
        if self.chunked {
            head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
            if !trailers.is_empty() {
                let names = trailers.iter()
                    .map(|field| field.name())
                    .collect::<Vec<_>>()
                    .join(", ");
                write_line(head, &["Trailer: ", names.as_str()]);
            }
        }
        else {
            write_content_length(head, self.declared);
        }
    }

    fn emit<S: OutputSink + ?Sized>(&mut self, sink: &mut S, data: &[u8]) {
        self.bytes_transmitted += data.len() as u64;
        sink.write_bytes(data);
    }
}

impl Default for Http1Generator {
    fn default() -> Http1Generator {
        Http1Generator::new()
    }
}

fn is_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("Content-Length") ||
        name.eq_ignore_ascii_case("Transfer-Encoding") ||
        name.eq_ignore_ascii_case("Trailer")
}

fn write_content_length(head: &mut Vec<u8>, length: Option<u64>) {
    if let Some(length) = length {
        write_line(head, &["Content-Length: ", length.to_string().as_str()]);
    }
}

fn write_line(out: &mut Vec<u8>, parts: &[&str]) {
    for part in parts {
        out.extend_from_slice(part.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
}

/// Whether a message of `version` with unknown length can only be delimited
/// by closing the connection
pub fn is_close_delimited(version: HttpVersion, content_length: Option<u64>) -> bool {
    content_length.is_none() && !version.supports_chunked()
}
