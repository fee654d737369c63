//! Engine lifecycle: one shared client TLS context per process.
//!
//! The context is built on the first `init` from a snapshot of the
//! configuration store and dropped by the matching last `deinit`. A mutex
//! guards the reference count and the context slot; connections grab an
//! `Arc` to the engine and keep it for their lifetime, so teardown never
//! races an in-flight handshake.

use std::sync::{Arc, Mutex, MutexGuard};

use openssl::ssl::{SslContext, SslContextBuilder, SslFiletype, SslMethod, SslVerifyMode, SslVersion};
use tracing::{debug, error, info, warn};

use super::config::{self, TlsConfig, X509FileType};
use super::truststore;
use super::verify::{self, VerifyState};
use super::{Result, TlsError};

/// Default cipher selection when the protocol selector is "AUTO".
const DEFAULT_CIPHERS: &str = "HIGH:!aNULL:!RC4:!MD5:!SRP:!PSK";

/// "PFS" additionally forbids RSA key exchange.
const PFS_CIPHERS: &str = "HIGH:!aNULL:!RC4:!MD5:!SRP:!PSK:!kRSA";

pub(crate) struct Engine {
    pub ctx: SslContext,
    pub cfg: TlsConfig,
    /// Present only while certificate checking is enabled.
    pub verify: Option<Arc<VerifyState>>,
}

struct Slot {
    refs: usize,
    engine: Option<Arc<Engine>>,
}

static ENGINE: Mutex<Slot> = Mutex::new(Slot {
    refs: 0,
    engine: None,
});

fn slot() -> MutexGuard<'static, Slot> {
    match ENGINE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Reference-counted engine initialization.
///
/// The first call snapshots the configuration and builds the shared
/// context; later calls only increment the count. On failure the count
/// stays at zero.
pub(crate) fn init() -> Result<()> {
    let mut slot = slot();

    if slot.refs == 0 {
        match build(&config::snapshot()) {
            Ok(engine) => {
                slot.engine = Some(Arc::new(engine));
                slot.refs = 1;
                debug!("TLS engine initialized");
            }
            Err(err) => {
                error!("could not initialize the TLS engine");
                return Err(err);
            }
        }
    } else {
        slot.refs += 1;
    }

    Ok(())
}

/// Drop one reference; the last one releases the shared context.
pub(crate) fn deinit() {
    let mut slot = slot();

    if slot.refs == 1 {
        slot.engine = None;
        debug!("TLS engine released");
    }
    if slot.refs > 0 {
        slot.refs -= 1;
    }
}

/// Engine handle for a new connection, initializing lazily on first use.
pub(crate) fn instance() -> Result<Arc<Engine>> {
    if let Some(engine) = slot().engine.clone() {
        return Ok(engine);
    }

    init()?;
    slot().engine.clone().ok_or(TlsError::Unknown)
}

fn build(cfg: &TlsConfig) -> Result<Engine> {
    let mut builder = SslContextBuilder::new(SslMethod::tls_client()).map_err(|err| {
        error!("could not create the TLS context: {err}");
        TlsError::Unknown
    })?;

    let verify = if cfg.check_certificate {
        truststore::install(&mut builder, cfg)?;
        builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);

        let state = Arc::new(VerifyState::build(cfg)?);
        if cfg.ocsp_stapling {
            install_staple_check(&mut builder, state.clone())?;
        }
        Some(state)
    } else {
        builder.set_verify(SslVerifyMode::NONE);
        warn!("certificate check disabled; the peer's certificate will NOT be verified");
        None
    };

    load_client_identity(&mut builder, cfg);

    if let Some(alpn) = &cfg.alpn {
        set_alpn(&mut builder, alpn);
    }

    set_priorities(&mut builder, &cfg.secure_protocol)?;

    Ok(Engine {
        ctx: builder.build(),
        cfg: cfg.clone(),
        verify,
    })
}

/// Client-authentication material. When only one of certificate and key is
/// configured, the other is expected in the same file.
fn load_client_identity(builder: &mut SslContextBuilder, cfg: &TlsConfig) {
    let (cert, cert_type, key, key_type) = match (&cfg.cert_file, &cfg.key_file) {
        (None, None) => return,
        (Some(cert), Some(key)) => (cert, cfg.cert_type, key, cfg.key_type),
        (Some(cert), None) => (cert, cfg.cert_type, cert, cfg.cert_type),
        (None, Some(key)) => (key, cfg.key_type, key, cfg.key_type),
    };

    if let Err(err) = builder.set_certificate_file(cert, filetype(cert_type)) {
        error!("could not load client certificate from '{cert}': {err}");
        return;
    }
    if let Err(err) = builder.set_private_key_file(key, filetype(key_type)) {
        error!("could not load client private key from '{key}': {err}");
    }
}

fn filetype(t: X509FileType) -> SslFiletype {
    match t {
        X509FileType::Pem => SslFiletype::PEM,
        X509FileType::Der => SslFiletype::ASN1,
    }
}

/// Encode the comma-separated ALPN list into the length-prefixed wire format.
fn set_alpn(builder: &mut SslContextBuilder, alpn: &str) {
    let mut wire = Vec::new();

    for proto in alpn.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if proto.len() > 255 {
            warn!("ALPN identifier '{proto}' is too long, skipping");
            continue;
        }
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
        debug!("ALPN offering {proto}");
    }

    if wire.is_empty() {
        return;
    }
    if let Err(err) = builder.set_alpn_protos(&wire) {
        error!("could not set ALPN protocol list: {err}");
    }
}

/// Translate the protocol selector into minimum version plus cipher set.
///
/// "TLSv1_2" and "AUTO" keep the defaults (minimum TLS 1.2, maximum
/// whatever the library supports). Any unrecognized non-empty value is
/// passed to the library verbatim as the cipher list.
fn set_priorities(builder: &mut SslContextBuilder, prio: &str) -> Result<()> {
    let mut ciphers = DEFAULT_CIPHERS;

    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(|_| TlsError::Unknown)?;
    builder
        .set_max_proto_version(None)
        .map_err(|_| TlsError::Unknown)?;

    if prio.eq_ignore_ascii_case("SSL") {
        builder
            .set_min_proto_version(Some(SslVersion::SSL3))
            .map_err(|_| TlsError::Unknown)?;
    } else if prio.eq_ignore_ascii_case("TLSv1") {
        builder
            .set_min_proto_version(Some(SslVersion::TLS1))
            .map_err(|_| TlsError::Unknown)?;
    } else if prio.eq_ignore_ascii_case("TLSv1_1") {
        builder
            .set_min_proto_version(Some(SslVersion::TLS1_1))
            .map_err(|_| TlsError::Unknown)?;
    } else if prio.eq_ignore_ascii_case("TLSv1_3") {
        if builder
            .set_min_proto_version(Some(SslVersion::TLS1_3))
            .is_err()
        {
            info!("TLS 1.3 is not supported by this OpenSSL build, using TLS 1.2 instead");
            builder
                .set_min_proto_version(Some(SslVersion::TLS1_2))
                .map_err(|_| TlsError::Unknown)?;
        }
    } else if prio.eq_ignore_ascii_case("PFS") {
        ciphers = PFS_CIPHERS;
    } else if !prio.is_empty()
        && !prio.eq_ignore_ascii_case("AUTO")
        && !prio.eq_ignore_ascii_case("TLSv1_2")
    {
        ciphers = prio;
    }

    if builder.set_cipher_list(ciphers).is_err() {
        error!("invalid priority string '{prio}'");
        return Err(TlsError::Invalid);
    }

    Ok(())
}

/// Verify a stapled OCSP response when the server sends one.
fn install_staple_check(builder: &mut SslContextBuilder, state: Arc<VerifyState>) -> Result<()> {
    builder
        .set_status_callback(move |ssl| Ok(verify::check_staple(ssl, &state)))
        .map_err(|err| {
            error!("could not install the OCSP staple callback: {err}");
            TlsError::Unknown
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_builder() -> SslContextBuilder {
        SslContextBuilder::new(SslMethod::tls_client()).unwrap()
    }

    #[test]
    fn test_symbolic_priorities_accepted() {
        for prio in ["AUTO", "auto", "SSL", "TLSv1", "TLSv1_1", "TLSv1_2", "TLSv1_3", "PFS", "pfs"] {
            let mut builder = client_builder();
            assert!(
                set_priorities(&mut builder, prio).is_ok(),
                "priority '{prio}' should be accepted"
            );
        }
    }

    #[test]
    fn test_verbatim_cipher_string_accepted() {
        let mut builder = client_builder();
        assert!(set_priorities(&mut builder, "HIGH:!aNULL").is_ok());
    }

    #[test]
    fn test_nonsense_priority_rejected() {
        let mut builder = client_builder();
        assert_eq!(
            set_priorities(&mut builder, "this-is-not-a-cipher-spec").unwrap_err(),
            TlsError::Invalid
        );
    }

    #[test]
    fn test_alpn_wire_encoding() {
        // Encoding errors would be logged, not returned; this only checks
        // that well-formed input is accepted.
        let mut builder = client_builder();
        set_alpn(&mut builder, "h2, http/1.1");
        set_alpn(&mut builder, "");
    }
}
