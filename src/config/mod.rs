pub mod parser;

/// A holder for app configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Port number the HTTP/1 listener binds to
    pub port: u16,
    pub fastcgi: FastCgiConfig,
    pub limits: Limits
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 8000,
            fastcgi: Default::default(),
            limits: Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastCgiConfig {
    /// Port for the FastCGI responder; no listener when unset
    pub port: Option<u16>
}

/// Bounds on what a peer may make us buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_request_uri_length: usize,
    pub max_request_body_length: u64,
    /// Longest start line, header line or chunk-size line the HTTP/1 parser
    /// holds on to
    pub max_line_length: usize,
    /// Total bytes of header names and values a request may carry
    pub max_header_block_length: usize,
    /// Requests served on one HTTP/1 connection before it is closed
    pub max_keep_alive_requests: usize
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_request_uri_length: 4096,
            max_request_body_length: 4 * 1024 * 1024,
            max_line_length: 8192,
            max_header_block_length: 64 * 1024,
            max_keep_alive_requests: 100
        }
    }
}
