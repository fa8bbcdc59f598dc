//! Server functionality
//!
//! Blocking sockets, one thread per connection. Each thread builds its own
//! handler, since handlers and channels are tied to the thread that made
//! them.

use crate::channel::{HttpHandler, HttpService};
use crate::config::{Config, Limits};
use crate::errors::Result;
use crate::fastcgi;
use crate::http1::{self, Segment};
use crate::status::HttpStatus;

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Makes the handler for a connection
pub type HandlerFactory = fn() -> HttpHandler;

/// Smallest read buffer; what we use when nobody asks for more
const READ_BUFFER_SIZE: usize = 8192;

/// Cap on the read buffer, however large a body is announced
const MAX_READ_BUFFER_SIZE: usize = 256 * 1024;

/// How long a quiet peer is tolerated
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type ConnectionLoop = fn(TcpStream, Limits, HttpHandler) -> io::Result<()>;

/// Binds the configured ports and serves until the HTTP/1 listener fails
pub fn serve(config: Config, new_handler: HandlerFactory) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    let limits = config.limits;

    if let Some(port) = config.fastcgi.port {
        let fastcgi_listener = TcpListener::bind(("127.0.0.1", port))?;
        info!("Accepting FastCGI connections on port {}", port);
        thread::spawn(move || {
            accept_loop(fastcgi_listener, limits, new_handler, serve_fastcgi)
        });
    }

    accept_loop(listener, limits, new_handler, serve_http);
    Ok(())
}

fn accept_loop(listener: TcpListener, limits: Limits, new_handler: HandlerFactory,
               serve_connection: ConnectionLoop) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                thread::spawn(move || {
                    let peer = stream.peer_addr().ok();
                    if let Err(e) = serve_connection(stream, limits, new_handler()) {
                        debug!("connection from {:?} ended: {}", peer, e);
                    }
                });
            },
            Err(e) => {
                warn!("Failed connection: {}", e);
            }
        }
    }
}

fn set_timeouts(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
    stream.set_write_timeout(Some(IDLE_TIMEOUT))
}

fn write_segments<W: Write>(output: &mut W, segments: Vec<Segment>) -> io::Result<()> {
    for segment in segments {
        match segment {
            Segment::Bytes(data) => output.write_all(&data)?,
            Segment::File(file) => {
                file.copy_to(output)?;
            }
        }
    }
    output.flush()
}

/// Runs one HTTP/1 connection to completion
pub fn serve_http(mut stream: TcpStream, limits: Limits, handler: HttpHandler)
                  -> io::Result<()>
{
    set_timeouts(&stream)?;

    let mut connection = http1::Connection::new(handler, limits);
    let mut buffer = vec![0; READ_BUFFER_SIZE];

    loop {
        write_segments(&mut stream, connection.take_output())?;
        if connection.wants_close() {
            break;
        }

        let wanted = connection.input_buffer_hint()
            .map_or(READ_BUFFER_SIZE,
                    |size| size.max(READ_BUFFER_SIZE).min(MAX_READ_BUFFER_SIZE));
        buffer.resize(wanted, 0);

        let read = stream.read(&mut buffer)?;
        if read == 0 {
            connection.on_eof();
            write_segments(&mut stream, connection.take_output())?;
            break;
        }
        connection.on_fillable(&buffer[..read]);
    }

    if connection.is_aborted() {
        warn!("dropping connection after an aborted response");
    }
    stream.shutdown(Shutdown::Both).or_else(ignore_not_connected)
}

/// Runs one FastCGI connection from the web server to completion
pub fn serve_fastcgi(mut stream: TcpStream, limits: Limits, handler: HttpHandler)
                     -> io::Result<()>
{
    set_timeouts(&stream)?;

    let mut connection = fastcgi::Connection::new(handler, limits);
    let mut buffer = vec![0; READ_BUFFER_SIZE];

    loop {
        let output = connection.take_output();
        if !output.is_empty() {
            stream.write_all(&output)?;
        }
        if connection.wants_close() {
            break;
        }

        let read = stream.read(&mut buffer)?;
        if read == 0 {
            if connection.pending_requests() > 0 {
                debug!("web server hung up with {} requests pending",
                       connection.pending_requests());
            }
            break;
        }
        connection.on_fillable(&buffer[..read]);
    }

    stream.shutdown(Shutdown::Both).or_else(ignore_not_connected)
}

fn ignore_not_connected(e: io::Error) -> io::Result<()> {
    match e.kind() {
        io::ErrorKind::NotConnected => Ok(()),
        _ => Err(e)
    }
}

/// The handler the binary serves with: a greeting for `GET`, the request
/// body back for `POST` and `PUT`, 405 for anything else
pub fn echo_handler() -> HttpHandler {
    let mut service = HttpService::new();

    service.add_handler(|request, response| {
        if request.method() != "GET" && request.method() != "HEAD" {
            return Ok(false);
        }

        let greeting = format!("Hello from http-engine; you asked for {}\n",
                               request.path());
        response.set_content_type(mime::TEXT_PLAIN_UTF_8.as_ref())?;
        response.set_content_length(greeting.len() as u64)?;
        response.write(greeting)?;
        response.completed()?;
        Ok(true)
    });

    service.add_handler(|request, response| {
        if request.method() != "POST" && request.method() != "PUT" {
            return Ok(false);
        }

        match request.header("Content-Type") {
            "" => response.set_content_type(mime::APPLICATION_OCTET_STREAM.as_ref())?,
            content_type => response.set_content_type(content_type)?
        }
        response.set_content_length(request.body().len() as u64)?;
        response.write(request.body())?;
        response.completed()?;
        Ok(true)
    });

    service.add_handler(|_, response| {
        response.set_status(HttpStatus::METHOD_NOT_ALLOWED)?;
        response.set_header("Allow", "GET, HEAD, POST, PUT")?;
        response.set_content_length(0)?;
        response.completed()?;
        Ok(true)
    });

    service.to_handler()
}
