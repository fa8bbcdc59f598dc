//! A small Web server on top of the `http_engine` protocol engine.
//!
//! Call it like this:
//!
//!     http-engine -f config.toml
//!
//! The config file is in the [TOML format][toml] because it’s commonly used in
//! the Rust ecosystem. Here is an example:
//!
//! ```toml
//! [listen]
//! port = 8000
//!
//! [fastcgi]
//! port = 9000
//!
//! [limits]
//! max_request_uri_length = 4096
//! max_request_body_length = 4194304
//! max_line_length = 8192
//! max_header_block_length = 65536
//! max_keep_alive_requests = 100
//! ```
//!
//! Apart from the FastCGI port, which is off unless given, this example also
//! serves as the defaults if no config file is provided, or any given key is
//! not present. If a key is of the wrong type, the server will bail, so don’t
//! do that.
//!
//! `http-engine` answers plain HTTP/1.x on the listen port from any address,
//! and FastCGI from a local web server on the FastCGI port. It greets `GET`
//! requests and echoes `POST` and `PUT` bodies.
//!
//! [toml]: https://github.com/toml-lang/toml

#[macro_use] extern crate log;

use http_engine::config::parser::{self, parse_file};
use http_engine::config::Config;
use http_engine::server::{echo_handler, serve};

use clap::{value_parser, Arg, Command};

use std::env;
use std::io::{self, stderr, Write};
use std::path::PathBuf;
use std::process::exit;

const DEFAULT_CONFIG_FILE: &str = "/etc/http-engine/config.toml";

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(log::LevelFilter::Info);

    if let Ok(var) = env::var("SERVER_LOG") {
        log_builder.parse_filters(&var);
    }

    if let Err(e) = log_builder.try_init() {
        let _ = writeln!(stderr(), "http-engine: Error when initializing logging: {}", e);
        exit(1);
    }

    let matches = Command::new("http-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Alex Hill <alexander.d.hill.89@gmail.com>")
        .arg(Arg::new("config_file")
             .short('f')
             .value_name("FILE")
             .help("The TOML file with server configuration")
             .value_parser(value_parser!(PathBuf)))
        .get_matches();

    let explicit = matches.get_one::<PathBuf>("config_file").cloned();
    let config_file = explicit.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = match parse_file(&config_file) {
        Ok(c) => c,
        Err(parser::Error::Io(ref e))
            if explicit.is_none() && e.kind() == io::ErrorKind::NotFound =>
        {
            info!("No config file at {:?}; using defaults", config_file);
            Config::default()
        },
        Err(parser::Error::Io(e)) => {
            error!("Error opening config file {:?}: {}", config_file, e);
            exit(1);
        },
        Err(parser::Error::Parse(e)) => {
            error!("Errors parsing config file {:?}", config_file);
            for error in e {
                error!("Config file error at line {} column {}: {}",
                       error.line + 1, error.column + 1, error.desc);
            }
            exit(1);
        },
        Err(parser::Error::Validation(message)) => {
            error!("Error in config file: {}", message);
            exit(1);
        }
    };

    info!("Starting server on port {}", config.port);
    if let Err(e) = serve(config, echo_handler) {
        error!("Server failed: {}", e);
        exit(1);
    }
}
