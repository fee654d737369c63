//! Process-wide TLS configuration store.
//!
//! One flat key space served by three typed setters; there is no getter.
//! Setters may be called at any time, but the engine snapshots the store
//! when it initializes, so changes made afterwards only apply to the next
//! init cycle. A key handed to a setter of the wrong value class is logged
//! as an error and ignored.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use tracing::error;

use crate::cache::{HpkpCache, OcspResponseCache, SessionCache};
use crate::fetch::HttpFetch;

/// Identifier for a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// Protocol selector: a symbolic name ("AUTO", "PFS", "TLSv1_2", ...)
    /// or a raw cipher priority string. String-valued.
    SecureProtocol,
    /// Directory of trust anchors, or "system" for the default paths.
    CaDirectory,
    /// Single-file trust anchor, used together with `CaDirectory`.
    CaFile,
    /// Client-authentication certificate. If `KeyFile` is unset the private
    /// key is expected in the same file.
    CertFile,
    /// Client-authentication private key. If `CertFile` is unset the
    /// certificate is expected in the same file.
    KeyFile,
    /// Certificate revocation list, PEM format.
    CrlFile,
    /// Fallback OCSP responder for certificates without an AIA extension.
    OcspServer,
    /// Comma-separated ALPN protocol identifiers, e.g. "h2,http/1.1".
    Alpn,
    /// Whether peer certificates are verified at all. Integer-valued (0/1).
    CheckCertificate,
    /// Whether the certificate's subject must match the host name.
    CheckHostname,
    /// Whether to log details of established handshakes.
    PrintInfo,
    /// Encoding of `CaFile`: 0 = PEM, 1 = DER.
    CaType,
    /// Encoding of `CertFile`: 0 = PEM, 1 = DER.
    CertType,
    /// Encoding of `KeyFile`: 0 = PEM, 1 = DER.
    KeyType,
    /// Whether OCSP queries run during chain validation.
    Ocsp,
    /// Whether a stapled OCSP response is requested and checked.
    OcspStapling,
    /// OCSP response cache handle. Object-valued.
    OcspCache,
    /// TLS session cache handle used for resumption.
    SessionCache,
    /// HPKP pin store handle.
    HpkpCache,
    /// HTTP client used to reach OCSP responders.
    HttpClient,
}

/// Encoding of certificate and key files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum X509FileType {
    #[default]
    Pem,
    Der,
}

/// Opaque collaborator handles accepted by [`set_config_object`].
#[derive(Clone)]
pub enum ConfigObject {
    OcspCache(Arc<dyn OcspResponseCache>),
    SessionCache(Arc<dyn SessionCache>),
    HpkpCache(Arc<dyn HpkpCache>),
    HttpClient(Arc<dyn HttpFetch>),
}

#[derive(Clone)]
pub(crate) struct TlsConfig {
    pub secure_protocol: String,
    pub ca_directory: String,
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub crl_file: Option<String>,
    pub ocsp_server: Option<String>,
    pub alpn: Option<String>,
    pub ca_type: X509FileType,
    pub cert_type: X509FileType,
    pub key_type: X509FileType,
    pub check_certificate: bool,
    pub check_hostname: bool,
    pub print_info: bool,
    pub ocsp: bool,
    pub ocsp_stapling: bool,
    pub ocsp_cache: Option<Arc<dyn OcspResponseCache>>,
    pub session_cache: Option<Arc<dyn SessionCache>>,
    pub hpkp_cache: Option<Arc<dyn HpkpCache>>,
    pub http_client: Option<Arc<dyn HttpFetch>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            secure_protocol: "AUTO".to_string(),
            ca_directory: "system".to_string(),
            ca_file: None,
            cert_file: None,
            key_file: None,
            crl_file: None,
            ocsp_server: None,
            alpn: None,
            ca_type: X509FileType::Pem,
            cert_type: X509FileType::Pem,
            key_type: X509FileType::Pem,
            check_certificate: true,
            check_hostname: true,
            print_info: false,
            // OCSP defaults to on only when a real back-end is compiled in.
            ocsp: cfg!(feature = "openssl-tls"),
            ocsp_stapling: cfg!(feature = "openssl-tls"),
            ocsp_cache: None,
            session_cache: None,
            hpkp_cache: None,
            http_client: None,
        }
    }
}

static CONFIG: LazyLock<Mutex<TlsConfig>> = LazyLock::new(|| Mutex::new(TlsConfig::default()));

fn config() -> MutexGuard<'static, TlsConfig> {
    match CONFIG.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Snapshot of the current configuration, taken by engine init.
#[cfg_attr(not(feature = "openssl-tls"), allow(dead_code))]
pub(crate) fn snapshot() -> TlsConfig {
    config().clone()
}

/// Set a string-valued parameter.
///
/// An empty `value` clears optional parameters. Values are not validated
/// here; a nonsense priority string, for example, is only diagnosed when the
/// engine initializes.
pub fn set_config_str(key: ConfigKey, value: &str) {
    let owned = (!value.is_empty()).then(|| value.to_string());
    let mut cfg = config();

    match key {
        ConfigKey::SecureProtocol => cfg.secure_protocol = value.to_string(),
        ConfigKey::CaDirectory => cfg.ca_directory = value.to_string(),
        ConfigKey::CaFile => cfg.ca_file = owned,
        ConfigKey::CertFile => cfg.cert_file = owned,
        ConfigKey::KeyFile => cfg.key_file = owned,
        ConfigKey::CrlFile => cfg.crl_file = owned,
        ConfigKey::OcspServer => cfg.ocsp_server = owned,
        ConfigKey::Alpn => cfg.alpn = owned,
        _ => error!(
            "unknown configuration key {key:?} (maybe this value should be of another type?)"
        ),
    }
}

/// Set an integer-valued parameter. Booleans are `value != 0`.
pub fn set_config_int(key: ConfigKey, value: i32) {
    let mut cfg = config();

    match key {
        ConfigKey::CheckCertificate => cfg.check_certificate = value != 0,
        ConfigKey::CheckHostname => cfg.check_hostname = value != 0,
        ConfigKey::PrintInfo => cfg.print_info = value != 0,
        ConfigKey::Ocsp => cfg.ocsp = value != 0,
        ConfigKey::OcspStapling => cfg.ocsp_stapling = value != 0,
        ConfigKey::CaType => match file_type(value) {
            Some(t) => cfg.ca_type = t,
            None => error!("invalid certificate format {value}"),
        },
        ConfigKey::CertType => match file_type(value) {
            Some(t) => cfg.cert_type = t,
            None => error!("invalid certificate format {value}"),
        },
        ConfigKey::KeyType => match file_type(value) {
            Some(t) => cfg.key_type = t,
            None => error!("invalid certificate format {value}"),
        },
        _ => error!(
            "unknown configuration key {key:?} (maybe this value should be of another type?)"
        ),
    }
}

/// Set an opaque collaborator handle. The engine keeps a non-owning clone of
/// the `Arc`; the host program remains the owner.
pub fn set_config_object(key: ConfigKey, value: ConfigObject) {
    let mut cfg = config();

    match (key, value) {
        (ConfigKey::OcspCache, ConfigObject::OcspCache(db)) => cfg.ocsp_cache = Some(db),
        (ConfigKey::SessionCache, ConfigObject::SessionCache(db)) => cfg.session_cache = Some(db),
        (ConfigKey::HpkpCache, ConfigObject::HpkpCache(db)) => cfg.hpkp_cache = Some(db),
        (ConfigKey::HttpClient, ConfigObject::HttpClient(client)) => {
            cfg.http_client = Some(client)
        }
        (key, _) => error!(
            "unknown configuration key {key:?} (maybe this value should be of another type?)"
        ),
    }
}

fn file_type(value: i32) -> Option<X509FileType> {
    match value {
        0 => Some(X509FileType::Pem),
        1 => Some(X509FileType::Der),
        _ => None,
    }
}
