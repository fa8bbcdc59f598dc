//! Error handling for the protocol engine

use crate::status::HttpStatus;

use std::fmt;
use std::io;

/// A Result for internal operations.
pub type Result<T> = ::std::result::Result<T, Error>;

/// All errors which might arise within the engine
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Serialization(SerializationError),
    BadMessage(BadMessage),
    /// A body chunk would carry the message past its declared length
    ContentLengthExceeded { declared: u64, attempted: u64 },
    /// The message was finished with bytes still owed to the peer
    ContentLengthMismatch { declared: u64, written: u64 },
    TrailerNotRegistered(String),
    /// The response head has gone out; it can't be changed any more
    AlreadyCommitted,
    AlreadyCompleted,
    /// The response was aborted, by us or by the peer
    Aborted,
    /// The channel is still busy with a message
    ChannelBusy
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SerializationError {
    TooLong
}

/// A well-formed request that violates policy
///
/// Raised by validation steps and turned into a 4xx response by the
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadMessage {
    pub status: HttpStatus,
    pub message: String
}

impl BadMessage {
    pub fn new<S: Into<String>>(status: HttpStatus, message: S) -> BadMessage {
        BadMessage { status: status, message: message.into() }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> BadMessage {
        BadMessage::new(HttpStatus::BAD_REQUEST, message)
    }
}

impl fmt::Display for BadMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl ::std::error::Error for BadMessage {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
            Error::Serialization(SerializationError::TooLong) =>
                write!(f, "value too long to serialize"),
            Error::BadMessage(ref e) => write!(f, "bad message: {}", e),
            Error::ContentLengthExceeded { declared, attempted } =>
                write!(f, "body of {} bytes exceeds declared content length {}",
                       attempted, declared),
            Error::ContentLengthMismatch { declared, written } =>
                write!(f, "declared content length {} but {} bytes written",
                       declared, written),
            Error::TrailerNotRegistered(ref name) =>
                write!(f, "trailer {:?} was not registered", name),
            Error::AlreadyCommitted => write!(f, "response already committed"),
            Error::AlreadyCompleted => write!(f, "response already completed"),
            Error::Aborted => write!(f, "response aborted"),
            Error::ChannelBusy => write!(f, "channel is in the middle of a message")
        }
    }
}

impl ::std::error::Error for Error {
    fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            Error::BadMessage(ref e) => Some(e),
            _ => None
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Error {
        Error::Serialization(e)
    }
}

impl From<BadMessage> for Error {
    fn from(e: BadMessage) -> Error {
        Error::BadMessage(e)
    }
}
