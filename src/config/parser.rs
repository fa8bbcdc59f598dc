use super::*;
use toml::{Table, Value};

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    parse_str(&toml)
}

pub fn parse_str(toml: &str) -> Result<Config, Error> {
    match toml.parse::<Table>() {
        Ok(table) => config_from_table(&table),
        Err(e) => Err(Error::Parse(vec![message_from_error(toml, &e)]))
    }
}

fn config_from_table(table: &Table) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    if let Some(port) = port_at(table, "listen.port", "port")? {
        config.port = port;
    }

    config.fastcgi.port = port_at(table, "fastcgi.port", "FastCGI port")?;

    if let Some(n) = positive_at(table, "limits.max_request_uri_length",
                                 "maximum request URI length")? {
        config.limits.max_request_uri_length = n as usize;
    }

    if let Some(n) = positive_at(table, "limits.max_request_body_length",
                                 "maximum request body length")? {
        config.limits.max_request_body_length = n;
    }

    if let Some(n) = positive_at(table, "limits.max_line_length",
                                 "maximum line length")? {
        config.limits.max_line_length = n as usize;
    }

    if let Some(n) = positive_at(table, "limits.max_header_block_length",
                                 "maximum header block length")? {
        config.limits.max_header_block_length = n as usize;
    }

    if let Some(n) = positive_at(table, "limits.max_keep_alive_requests",
                                 "maximum number of requests per connection")? {
        config.limits.max_keep_alive_requests = n as usize;
    }

    Ok(config)
}

/// Follows a dotted path like `"listen.port"` through nested tables
fn lookup<'a>(table: &'a Table, path: &str) -> Option<&'a Value> {
    let mut keys = path.split('.');
    let mut value = table.get(keys.next()?)?;
    for key in keys {
        value = value.get(key)?;
    }
    Some(value)
}

fn port_at(table: &Table, path: &str, what: &str) -> Result<Option<u16>, Error> {
    match lookup(table, path) {
        Some(&Value::Integer(p))
            if p <= u16::MAX as i64 &&
            p > 0 => Ok(Some(p as u16)),
        Some(&Value::Integer(p)) => Err(Error::Validation(
            format!("The given {} {} is out of range", what, p)
        )),
        Some(val) => Err(Error::Validation(
            format!("Expected the {} to be an integer, got a {}",
                    what, val.type_str())
        )),
        None => Ok(None)
    }
}

fn positive_at(table: &Table, path: &str, what: &str) -> Result<Option<u64>, Error> {
    match lookup(table, path) {
        Some(&Value::Integer(n)) if n > 0 => Ok(Some(n as u64)),
        Some(&Value::Integer(n)) => Err(Error::Validation(
            format!("The {} must be positive, got {}", what, n)
        )),
        Some(val) => Err(Error::Validation(
            format!("Expected the {} to be an integer, got a {}",
                    what, val.type_str())
        )),
        None => Ok(None)
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(Vec<ErrorMessage>),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "could not read config: {}", e),
            Error::Parse(ref messages) => {
                for (i, m) in messages.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}:{}: {}", m.line, m.column, m.desc)?;
                }
                Ok(())
            },
            Error::Validation(ref message) => f.write_str(message)
        }
    }
}

impl ::std::error::Error for Error {}

/// An owned, rendered version of a TOML parse error
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub desc: String,
    pub line: usize,
    pub column: usize
}

/// Convert a `toml::de::Error` into an `ErrorMessage`
fn message_from_error(toml: &str, error: &toml::de::Error) -> ErrorMessage {
    let offset = error.span().map_or(0, |span| span.start);
    let (line, column) = to_linecol(toml, offset);

    ErrorMessage {
        desc: String::from(error.message()),
        line: line,
        column: column
    }
}

/// Zero-based line and column of a byte offset
fn to_linecol(text: &str, offset: usize) -> (usize, usize) {
    let before = &text.as_bytes()[.. offset.min(text.len())];
    let line = before.iter().filter(|&&b| b == b'\n').count();
    let column = match before.iter().rposition(|&b| b == b'\n') {
        Some(lf) => before.len() - lf - 1,
        None => before.len()
    };
    (line, column)
}
