//! HTTP/1.x wire format

pub mod connection;
pub mod generator;
pub mod parser;

pub use self::connection::Connection;
pub use self::generator::{Http1Generator, OutputBuffer, OutputSink, Segment};
pub use self::parser::{Http1Parser, ParserMode, ParserState};
