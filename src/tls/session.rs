//! Per-connection TLS sessions: handshake driver, framed I/O, shutdown.
//!
//! The handshake runs over the connection's non-blocking socket: every
//! want-read/want-write from the back-end loops through a readiness wait
//! bounded by the connection's `connect_timeout`. I/O after the handshake
//! follows the same pattern with the caller-supplied per-call timeout.

use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::os::raw::c_int;

use openssl::ssl::{
    ErrorCode, HandshakeError, ShutdownResult, Ssl, SslRef, SslStream, SslVerifyMode, StatusType,
};
use openssl::x509::verify::X509CheckFlags;
use openssl::x509::X509VerifyResult;
use tracing::{debug, error, info, warn};

use crate::net::poll::{wait_ready, PollEvents};
use crate::net::TcpConn;
use super::backend::TlsBackend;
use super::cert::CertSummary;
use super::engine;
use super::resume::{self, Resume};
use super::verify;
use super::{Result, TlsError};

/// The engine over the `openssl` crate.
pub(crate) struct OpensslTls;

/// State of one established TLS tunnel. The stream holds a dup of the
/// caller's socket, so dropping it never closes the TCP connection.
#[derive(Debug)]
pub struct Session {
    stream: SslStream<TcpStream>,
    resumed: bool,
}

impl TlsBackend for OpensslTls {
    type Session = Session;

    fn init() -> Result<()> {
        engine::init()
    }

    fn deinit() {
        engine::deinit()
    }

    fn open(conn: &TcpConn) -> Result<Session> {
        handshake(conn)
    }

    fn close(mut session: Session) {
        // Keep stepping the shutdown while only our close-notify went out.
        while let Ok(ShutdownResult::Sent) = session.stream.shutdown() {}
    }

    fn read(session: &mut Session, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        match transfer(session, Io::Read(buf), timeout_ms) {
            Err(TlsError::Handshake) => Err(TlsError::Unknown),
            other => other,
        }
    }

    fn write(session: &mut Session, buf: &[u8], timeout_ms: i32) -> Result<usize> {
        match transfer(session, Io::Write(buf), timeout_ms) {
            Err(TlsError::Handshake) => Err(TlsError::Unknown),
            other => other,
        }
    }

    fn resumed(session: &Session) -> bool {
        session.resumed
    }
}

fn handshake(conn: &TcpConn) -> Result<Session> {
    let engine = engine::instance()?;
    let cfg = &engine.cfg;
    let host = conn.hostname().to_string();

    let mut ssl = Ssl::new(&engine.ctx).map_err(|err| {
        error!("could not create TLS state: {err}");
        TlsError::Unknown
    })?;

    // Revocation and pinning run from the verify callback; the closure
    // carries this connection's host name to it.
    if let Some(state) = engine.verify.clone() {
        let callback_host = host.clone();
        ssl.set_verify_callback(
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
            move |preverified, ctx| {
                if !preverified {
                    return false;
                }
                if ctx.error_depth() != 0 {
                    return true;
                }
                if verify::revocation_check(&callback_host, ctx, &state) {
                    true
                } else {
                    ctx.set_error(X509VerifyResult::APPLICATION_VERIFICATION);
                    false
                }
            },
        );
    }

    if cfg.check_hostname {
        let param = ssl.param_mut();
        param.set_hostflags(X509CheckFlags::NO_PARTIAL_WILDCARDS);
        param.set_host(&host).map_err(|err| {
            error!("could not set expected host name: {err}");
            TlsError::Unknown
        })?;
    } else {
        ssl.param_mut()
            .set_hostflags(X509CheckFlags::NEVER_CHECK_SUBJECT);
        warn!("host name check disabled; the certificate's subject will not be checked");
    }

    if !host.is_empty() && ssl.set_hostname(&host).is_err() {
        error!("SNI could not be sent");
    }

    if cfg.ocsp_stapling {
        if let Err(err) = ssl.set_status_type(StatusType::OCSP) {
            debug!("could not request an OCSP staple: {err}");
        }
    }

    match resume::resume(&mut ssl, &host, cfg.session_cache.as_deref()) {
        Resume::Resumed => debug!("will try to resume cached TLS session"),
        Resume::NotCached => debug!("no cached TLS session available, will run a full handshake"),
        Resume::Corrupt => error!("could not use cached TLS session"),
    }

    let stream = conn.stream().try_clone().map_err(|err| {
        error!("could not duplicate the socket: {err}");
        TlsError::Unknown
    })?;
    let fd = stream.as_raw_fd();
    let timeout = match conn.connect_timeout() {
        0 => -1,
        t => t,
    };

    let mut attempt = ssl.connect(stream);
    let stream = loop {
        match attempt {
            Ok(stream) => break stream,
            Err(HandshakeError::WouldBlock(mid)) => {
                match wait_ready(fd, timeout, PollEvents::Both) {
                    Ok(true) => {}
                    Ok(false) => return Err(TlsError::Timeout),
                    Err(err) => {
                        error!("readiness wait failed: {err}");
                        return Err(TlsError::Unknown);
                    }
                }
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(mid)) => {
                error!("could not complete TLS handshake: {}", mid.error());
                let certificate_failure = mid.ssl().verify_result() != X509VerifyResult::OK;
                return Err(if certificate_failure {
                    TlsError::Certificate
                } else {
                    TlsError::Handshake
                });
            }
            Err(HandshakeError::SetupFailure(err)) => {
                error!("could not start TLS handshake: {err}");
                return Err(TlsError::Unknown);
            }
        }
    };

    let resumed = stream.ssl().session_reused();
    debug!(
        "handshake completed{}",
        if resumed {
            " (resumed session)"
        } else {
            " (full handshake)"
        }
    );

    if cfg.print_info {
        log_session_info(stream.ssl());
    }

    if resume::save(stream.ssl(), &host, cfg.session_cache.as_deref()) {
        debug!("TLS session saved in cache");
    } else {
        debug!("TLS session discarded");
    }

    Ok(Session { stream, resumed })
}

enum Io<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// Framed transfer with readiness polling and want-read/want-write retry.
///
/// `timeout_ms == 0` probes readiness without blocking and returns 0 when
/// the socket is not ready; negative values wait indefinitely.
fn transfer(session: &mut Session, mut io: Io<'_>, timeout_ms: i32) -> Result<usize> {
    let len = match &io {
        Io::Read(buf) => buf.len(),
        Io::Write(buf) => buf.len(),
    };
    if len == 0 {
        return Ok(0);
    }
    // SSL_read/SSL_write take an int.
    let len = len.min(c_int::MAX as usize);

    let timeout = timeout_ms.max(-1);
    let mut ops = match io {
        Io::Read(_) => PollEvents::Read,
        Io::Write(_) => PollEvents::Write,
    };
    let fd = session.stream.get_ref().as_raw_fd();

    loop {
        // Plaintext already buffered in the TLS layer never needs a wait.
        let buffered = matches!(io, Io::Read(_)) && session.stream.ssl().pending() > 0;
        if !buffered {
            match wait_ready(fd, timeout, ops) {
                Ok(true) => {}
                Ok(false) if timeout == 0 => return Ok(0),
                Ok(false) => return Err(TlsError::Timeout),
                Err(err) => {
                    error!("readiness wait failed: {err}");
                    return Err(TlsError::Unknown);
                }
            }
        }

        let result = match &mut io {
            Io::Read(buf) => session.stream.ssl_read(&mut buf[..len]),
            Io::Write(buf) => session.stream.ssl_write(&buf[..len]),
        };

        match result {
            Ok(n) => return Ok(n),
            Err(err) => {
                let code = err.code();
                if code == ErrorCode::ZERO_RETURN {
                    // Peer sent close-notify.
                    return Ok(0);
                } else if code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE {
                    if timeout == 0 {
                        return Ok(0);
                    }
                    ops = PollEvents::Both;
                } else {
                    match io {
                        Io::Read(_) => error!("TLS read error: {err}"),
                        Io::Write(_) => error!("TLS write error: {err}"),
                    }
                    return Err(TlsError::Handshake);
                }
            }
        }
    }
}

fn log_session_info(ssl: &SslRef) {
    info!(
        "TLS connection established: {} {}",
        ssl.version_str(),
        ssl.current_cipher().map(|c| c.name()).unwrap_or("<unknown>")
    );

    if let Some(proto) = ssl.selected_alpn_protocol() {
        info!("ALPN protocol: {}", String::from_utf8_lossy(proto));
    }

    if let Some(cert) = ssl.peer_certificate() {
        let summary = CertSummary::from_x509(&cert);
        info!(
            "peer certificate: subject '{}', issuer '{}'",
            summary.subject, summary.issuer
        );
        if !summary.subject_alt_names.is_empty() {
            debug!(
                "peer certificate names: {}",
                summary.subject_alt_names.join(", ")
            );
        }
    }
}
