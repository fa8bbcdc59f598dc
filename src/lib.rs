//! An HTTP message protocol engine
//!
//! Wire parsers for HTTP/1.x and FastCGI feed a `MessageListener`; the
//! listener that matters is `HttpChannel`, which validates each request,
//! hands it to an `HttpHandler`, and keeps the response honest on its way
//! back out through an `HttpTransport`. None of it touches a socket: the
//! `http1::Connection` and `fastcgi::Connection` types take bytes in and
//! hand bytes back, and `server` is one way of wiring them to the network.

#[macro_use] extern crate log;

pub mod body;
pub mod channel;
pub mod config;
pub mod date;
pub mod errors;
pub mod fastcgi;
pub mod headers;
pub mod http1;
pub mod info;
pub mod listener;
pub mod log_util;
pub mod path;
pub mod server;
pub mod status;
pub mod transport;
pub mod version;

#[cfg(test)]
mod mock;
