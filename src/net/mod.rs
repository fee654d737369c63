//! TCP connection handle consumed by the TLS engine.

pub mod poll;

use std::io;
use std::net::TcpStream;

/// An established TCP connection waiting to be upgraded to TLS.
///
/// The caller owns the stream and keeps owning it: closing the TLS tunnel
/// later never closes the socket. The stream is switched to non-blocking
/// mode on construction because the engine only ever combines readiness
/// waits with non-blocking reads and writes.
pub struct TcpConn {
    stream: TcpStream,
    hostname: String,
    connect_timeout_ms: i32,
}

impl TcpConn {
    /// Wrap a connected stream together with the host name used for SNI,
    /// certificate verification, pinning and session-cache lookups.
    pub fn new(stream: TcpStream, hostname: impl Into<String>) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(TcpConn {
            stream,
            hostname: hostname.into(),
            connect_timeout_ms: 0,
        })
    }

    /// Bound for the handshake readiness waits, in milliseconds.
    /// Zero (the default) means the handshake may wait indefinitely.
    pub fn set_connect_timeout(&mut self, timeout_ms: i32) {
        self.connect_timeout_ms = timeout_ms;
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn connect_timeout(&self) -> i32 {
        self.connect_timeout_ms
    }
}
