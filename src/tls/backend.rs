//! Back-end capability seam.
//!
//! The engine compiles against exactly one back-end, chosen at build time:
//! the real one over the `openssl` crate, or a stub that reports TLS as
//! unavailable. Both implement the same capability trait, so the public
//! functions in the parent module do not care which one is active.

use super::{Result, TlsError};
use crate::net::TcpConn;

pub(crate) trait TlsBackend {
    type Session;

    fn init() -> Result<()>;
    fn deinit();
    fn open(conn: &TcpConn) -> Result<Self::Session>;
    fn close(session: Self::Session);
    fn read(session: &mut Self::Session, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
    fn write(session: &mut Self::Session, buf: &[u8], timeout_ms: i32) -> Result<usize>;
    fn resumed(session: &Self::Session) -> bool;
}

/// Stub back-end compiled when TLS support is switched off.
#[cfg_attr(feature = "openssl-tls", allow(dead_code))]
pub(crate) struct DisabledTls;

/// Session type of the stub; never actually constructed because `open`
/// always fails.
#[derive(Debug)]
#[cfg_attr(feature = "openssl-tls", allow(dead_code))]
pub struct DisabledSession {
    _private: (),
}

#[cfg_attr(feature = "openssl-tls", allow(dead_code))]
impl TlsBackend for DisabledTls {
    type Session = DisabledSession;

    fn init() -> Result<()> {
        Ok(())
    }

    fn deinit() {}

    fn open(_conn: &TcpConn) -> Result<DisabledSession> {
        Err(TlsError::Disabled)
    }

    fn close(_session: DisabledSession) {}

    fn read(_session: &mut DisabledSession, _buf: &mut [u8], _timeout_ms: i32) -> Result<usize> {
        Ok(0)
    }

    fn write(_session: &mut DisabledSession, _buf: &[u8], _timeout_ms: i32) -> Result<usize> {
        Ok(0)
    }

    fn resumed(_session: &DisabledSession) -> bool {
        false
    }
}

#[cfg(feature = "openssl-tls")]
pub(crate) type ActiveBackend = super::session::OpensslTls;

#[cfg(not(feature = "openssl-tls"))]
pub(crate) type ActiveBackend = DisabledTls;
