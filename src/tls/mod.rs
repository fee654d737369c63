//! Client-side TLS engine.
//!
//! The engine upgrades an already-connected, non-blocking TCP socket to a
//! TLS tunnel. It owns one process-wide TLS context, built on first use from
//! the configuration store and shared by every connection:
//!
//! 1. Configure with [`set_config_str`], [`set_config_int`] and
//!    [`set_config_object`]. Values are snapshotted by the next `init`.
//! 2. [`init`] builds the shared context (trust store, protocol priorities,
//!    revocation machinery). Calls are reference counted and paired with
//!    [`deinit`].
//! 3. [`open`] runs the handshake over a [`TcpConn`] and returns the
//!    [`TlsSession`]; the caller stores it and later passes it to [`close`].
//!
//! Peer validation composes the back-end's X.509 path and host-name checks
//! with OCSP queries (through the host's HTTP client) and HPKP pin lookups.
//! Negotiated sessions are serialized into the host's session cache and
//! reinstalled on the next connection to the same host.
//!
//! Two back-ends exist: the real engine over the `openssl` crate (cargo
//! feature `openssl-tls`, enabled by default) and a disabled stub whose
//! `open` reports TLS as unavailable.

mod backend;
mod config;

#[cfg(feature = "openssl-tls")]
mod cert;
#[cfg(feature = "openssl-tls")]
mod engine;
#[cfg(feature = "openssl-tls")]
mod ocsp;
#[cfg(feature = "openssl-tls")]
mod resume;
#[cfg(feature = "openssl-tls")]
mod session;
#[cfg(feature = "openssl-tls")]
mod truststore;
#[cfg(feature = "openssl-tls")]
mod verify;

pub use config::{
    set_config_int, set_config_object, set_config_str, ConfigKey, ConfigObject, X509FileType,
};

use backend::{ActiveBackend, TlsBackend};
use crate::net::TcpConn;

/// Result type for TLS operations.
pub type Result<T> = std::result::Result<T, TlsError>;

/// Error sentinels surfaced to callers.
///
/// Details (back-end reason strings, file names, responder status codes)
/// are logged where the failure happens; the sentinel only classifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TlsError {
    /// Caller-supplied arguments or configuration violate an invariant.
    #[error("invalid argument or configuration")]
    Invalid,

    /// A readiness wait exceeded its bound.
    #[error("operation timed out")]
    Timeout,

    /// Chain validation, host-name match, CRL, OCSP or pinning failed.
    #[error("certificate verification failed")]
    Certificate,

    /// Any other handshake-level failure.
    #[error("TLS handshake failed")]
    Handshake,

    /// The crate was built without a TLS back-end.
    #[error("TLS support is disabled")]
    Disabled,

    /// Everything else.
    #[error("unknown TLS error")]
    Unknown,
}

/// An established TLS tunnel over a caller-owned TCP connection.
#[derive(Debug)]
pub struct TlsSession(pub(crate) <ActiveBackend as TlsBackend>::Session);

impl TlsSession {
    /// Read at most `buf.len()` bytes from the tunnel.
    ///
    /// `timeout_ms` bounds the readiness wait: `0` returns immediately with
    /// `Ok(0)` when no data is available, negative waits indefinitely.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        ActiveBackend::read(&mut self.0, buf, timeout_ms)
    }

    /// Write at most `buf.len()` bytes to the tunnel. Short writes are
    /// normal; the return value is the byte count actually sent.
    pub fn write_timeout(&mut self, buf: &[u8], timeout_ms: i32) -> Result<usize> {
        ActiveBackend::write(&mut self.0, buf, timeout_ms)
    }

    /// Whether the handshake reused a cached session.
    pub fn resumed(&self) -> bool {
        ActiveBackend::resumed(&self.0)
    }
}

/// Initialize the shared TLS engine.
///
/// The first call builds the context from the current configuration; later
/// calls only bump a reference count. Every successful `init` must be paired
/// with one [`deinit`]. A failed `init` leaves the engine uninitialized.
pub fn init() -> Result<()> {
    ActiveBackend::init()
}

/// Release one reference to the shared engine; the last release drops the
/// shared context.
pub fn deinit() {
    ActiveBackend::deinit()
}

/// Run a TLS handshake over `conn` and return the established session.
///
/// Initializes the engine lazily if [`init`] has not been called. The
/// handshake is bounded by the connection's `connect_timeout`.
pub fn open(conn: &TcpConn) -> Result<TlsSession> {
    ActiveBackend::open(conn).map(TlsSession)
}

/// Close a TLS session, sending a close-notify where possible.
///
/// The slot is emptied, so calling this twice is a no-op the second time.
/// The underlying TCP socket stays open; the caller closes it independently.
pub fn close(session: &mut Option<TlsSession>) {
    if let Some(session) = session.take() {
        ActiveBackend::close(session.0);
    }
}
