//! Connection lifecycle.
//!
//! A [`ConnectionManager`] opens connections to a fixed [`Endpoint`] through
//! a [`Transport`]. Every [`Connection`] it hands out is owned by exactly one
//! caller and closed exactly once, when it is dropped.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::Endpoint;
use crate::protocol::Ack;

/// A way of reaching the lock server.
///
/// [`TcpTransport`] is used in production; tests plug in scripted
/// in-memory streams.
pub trait Transport: Send + Sync {
    /// Byte stream of one connection.
    type Stream: Read + Write + Send;

    /// Open a new connection to `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Stream>;

    /// Tear down a stream that is about to be dropped.
    fn close(&self, _stream: &mut Self::Stream) {}
}

/// TCP transport with optional connect and I/O timeouts.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Create a transport. `None` disables the respective timeout.
    pub fn new(connect_timeout: Option<Duration>, io_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (endpoint.host(), endpoint.port()).to_socket_addrs()? {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.io_timeout)?;
                    stream.set_write_timeout(self.io_timeout)?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{endpoint} resolved to no addresses"),
            )
        }))
    }

    fn close(&self, stream: &mut TcpStream) {
        // The peer may already be gone, in which case there is nothing to do.
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// Opens connections to the configured endpoint.
pub struct ConnectionManager<T: Transport> {
    endpoint: Endpoint,
    transport: T,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager for `endpoint`. No connection is made yet.
    pub fn new(endpoint: Endpoint, transport: T) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    /// The endpoint connections go to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The transport connections are opened through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open a connection. Refusals, timeouts and resolution failures all come
    /// back as the `Err` value.
    pub fn connect(&self) -> io::Result<Connection<'_, T>> {
        let stream = self.transport.connect(&self.endpoint)?;
        log::debug!("connected to {}", self.endpoint);
        Ok(Connection {
            stream,
            transport: &self.transport,
            peer_closed: false,
        })
    }

    /// Open and immediately close a connection.
    pub fn try_probe(&self) -> io::Result<()> {
        self.connect().map(drop)
    }

    /// Whether the endpoint currently accepts connections.
    pub fn probe(&self) -> bool {
        self.try_probe().is_ok()
    }
}

/// One open connection, closed on drop.
pub struct Connection<'a, T: Transport> {
    stream: T::Stream,
    transport: &'a T,
    peer_closed: bool,
}

impl<T: Transport> Connection<'_, T> {
    /// Send an encoded request and read the single-byte acknowledgment.
    ///
    /// A connection closed before the byte arrives decodes as
    /// [`Ack::Failure`] and marks the connection as not reusable.
    pub fn exchange(&mut self, request: &[u8]) -> io::Result<Ack> {
        self.stream.write_all(request)?;
        self.stream.flush()?;
        let mut buf = [0u8; 1];
        let n = loop {
            match self.stream.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.peer_closed = true;
        }
        Ok(Ack::decode(&buf[..n]))
    }

    /// Whether another request can be sent on this connection.
    pub fn is_reusable(&self) -> bool {
        !self.peer_closed
    }
}

impl<T: Transport> Drop for Connection<'_, T> {
    fn drop(&mut self) {
        self.transport.close(&mut self.stream);
        log::debug!("connection closed");
    }
}
