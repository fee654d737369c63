//! Shared helpers for the TLS integration tests: throwaway PKI material, a
//! minimal TLS echo server, an in-process OCSP responder, and log capture.

#![allow(dead_code)]

use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use der::asn1::{BitString, GeneralizedTime, Null, ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::ssl::{Ssl, SslContextBuilder, SslMethod, SslVersion};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use netfetch::cache::{HpkpCache, PinCheck};
use netfetch::fetch::{FetchRequest, HttpFetch};
use netfetch::tls::{set_config_int, set_config_str, ConfigKey};

/// Serializes tests that touch the process-wide TLS configuration.
pub fn config_guard() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    match LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Put every scalar configuration key back to a known state. Tests layer
/// their own settings on top of this.
pub fn reset_tls_config() {
    set_config_str(ConfigKey::SecureProtocol, "AUTO");
    set_config_str(ConfigKey::CaDirectory, "system");
    set_config_str(ConfigKey::CaFile, "");
    set_config_str(ConfigKey::CertFile, "");
    set_config_str(ConfigKey::KeyFile, "");
    set_config_str(ConfigKey::CrlFile, "");
    set_config_str(ConfigKey::OcspServer, "");
    set_config_str(ConfigKey::Alpn, "");
    set_config_int(ConfigKey::CheckCertificate, 1);
    set_config_int(ConfigKey::CheckHostname, 1);
    set_config_int(ConfigKey::PrintInfo, 0);
    set_config_int(ConfigKey::Ocsp, 0);
    set_config_int(ConfigKey::OcspStapling, 0);
}

// --- log capture ---------------------------------------------------------

#[derive(Clone, Default)]
pub struct LogSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogSink {
    pub fn contents(&self) -> String {
        let buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

pub struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut guard) => guard.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> LogWriter {
        LogWriter(self.buffer.clone())
    }
}

/// Install a capturing subscriber as the default for the current thread.
pub fn capture_logs() -> (LogSink, tracing::subscriber::DefaultGuard) {
    let sink = LogSink::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(sink.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (sink, guard)
}

// --- throwaway PKI -------------------------------------------------------

pub struct TestCa {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub struct TestLeaf {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub fn make_ca(cn: &str) -> TestCa {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let name = name_with_cn(cn);

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    set_validity(&mut builder);
    set_serial(&mut builder, 1);
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    TestCa {
        cert: builder.build(),
        key,
    }
}

pub fn make_leaf(ca: &TestCa, host: &str, serial: u32) -> TestLeaf {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let name = name_with_cn(host);

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder
        .set_issuer_name(ca.cert.subject_name())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    set_validity(&mut builder);
    set_serial(&mut builder, serial);

    let san = SubjectAlternativeName::new()
        .dns(host)
        .build(&builder.x509v3_context(Some(&ca.cert), None))
        .unwrap();
    builder.append_extension(san).unwrap();

    builder.sign(&ca.key, MessageDigest::sha256()).unwrap();

    TestLeaf {
        cert: builder.build(),
        key,
    }
}

fn name_with_cn(cn: &str) -> openssl::x509::X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    name.build()
}

fn set_validity(builder: &mut X509Builder) {
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(7).unwrap())
        .unwrap();
}

fn set_serial(builder: &mut X509Builder, serial: u32) {
    let bn = BigNum::from_u32(serial).unwrap();
    builder
        .set_serial_number(&bn.to_asn1_integer().unwrap())
        .unwrap();
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("netfetch-{label}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

pub fn write_cert_pem(dir: &Path, name: &str, cert: &X509) -> PathBuf {
    write_file(dir, name, &cert.to_pem().unwrap())
}

// --- TLS echo server -----------------------------------------------------

pub struct TestServer {
    pub addr: SocketAddr,
    // Dropping the handle detaches the thread; it exits on its own after
    // serving its allotted connections.
    _handle: JoinHandle<()>,
}

/// Spawn a TLS server presenting a leaf for `host` signed by `ca`, serving
/// up to `conns` connections. Each accepted connection reads one 4-byte
/// message and answers "pong".
///
/// `max_tls12` caps the server at TLS 1.2 so session tickets are issued
/// inside the handshake, which makes resumption observable immediately
/// after `open` returns.
pub fn spawn_tls_server(ca: &TestCa, host: &str, max_tls12: bool, conns: usize) -> TestServer {
    let leaf = make_leaf(ca, host, 2);

    let mut ctx = SslContextBuilder::new(SslMethod::tls_server()).unwrap();
    ctx.set_certificate(&leaf.cert).unwrap();
    ctx.set_private_key(&leaf.key).unwrap();
    ctx.add_extra_chain_cert(ca.cert.clone()).unwrap();
    if max_tls12 {
        ctx.set_max_proto_version(Some(SslVersion::TLS1_2)).unwrap();
    }
    let ctx = ctx.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        for _ in 0..conns {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let ssl = Ssl::new(&ctx).unwrap();
            let Ok(mut tls) = ssl.accept(stream) else {
                // Client aborted the handshake; move on.
                continue;
            };

            let mut buf = [0u8; 4];
            if tls.read_exact(&mut buf).is_ok() {
                let _ = tls.write_all(b"pong");
            }
            let _ = tls.shutdown();
        }
    });

    TestServer {
        addr,
        _handle: handle,
    }
}

/// Accepts TCP connections but never speaks TLS, so handshakes stall.
pub fn spawn_silent_server(hold: Duration) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        thread::sleep(hold);
        drop(stream);
    });

    TestServer {
        addr,
        _handle: handle,
    }
}

// --- mock collaborators --------------------------------------------------

/// Pin store that answers every lookup with one fixed verdict.
pub struct FixedVerdictPins(pub PinCheck);

impl HpkpCache for FixedVerdictPins {
    fn check(&self, _host: &str, _spki_der: &[u8]) -> PinCheck {
        self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum OcspVerdict {
    Good,
    Revoked,
}

const ID_PKIX_OCSP_NONCE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.2");
const ID_PKIX_OCSP_BASIC: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");
const ID_SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// In-process OCSP responder standing in for the HTTP client. It parses the
/// engine's request, echoes the CertID and nonce, and signs the answer with
/// the test CA key.
pub struct OcspResponder {
    ca_der: Vec<u8>,
    ca_key: PKey<Private>,
    verdict: OcspVerdict,
}

impl OcspResponder {
    pub fn new(ca: &TestCa, verdict: OcspVerdict) -> Self {
        OcspResponder {
            ca_der: ca.cert.to_der().unwrap(),
            ca_key: ca.key.clone(),
            verdict,
        }
    }

    fn respond(&self, request_der: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        use x509_cert::ext::pkix::CrlReason;
        use x509_ocsp::{
            BasicOcspResponse, CertStatus, OcspGeneralizedTime, OcspRequest, OcspResponse,
            OcspResponseStatus, ResponderId, ResponseBytes, ResponseData, RevokedInfo,
            SingleResponse, Version,
        };

        let request = OcspRequest::from_der(request_der)?;
        let cert_id = request.tbs_request.request_list[0].req_cert.clone();
        let nonce_ext = request
            .tbs_request
            .request_extensions
            .as_ref()
            .and_then(|exts| exts.iter().find(|ext| ext.extn_id == ID_PKIX_OCSP_NONCE))
            .cloned();

        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let stamp = |offset: i64| -> Result<OcspGeneralizedTime, Box<dyn std::error::Error>> {
            let seconds = (now.as_secs() as i64 + offset) as u64;
            Ok(OcspGeneralizedTime(GeneralizedTime::from_unix_duration(
                Duration::from_secs(seconds),
            )?))
        };

        let cert_status = match self.verdict {
            OcspVerdict::Good => CertStatus::Good(Null),
            OcspVerdict::Revoked => CertStatus::Revoked(RevokedInfo {
                revocation_time: stamp(-600)?,
                revocation_reason: Some(CrlReason::KeyCompromise),
            }),
        };

        let ca = Certificate::from_der(&self.ca_der)?;
        let tbs = ResponseData {
            version: Version::V1,
            responder_id: ResponderId::ByName(ca.tbs_certificate.subject.clone()),
            produced_at: stamp(0)?,
            responses: vec![SingleResponse {
                cert_id,
                cert_status,
                this_update: stamp(-300)?,
                next_update: Some(stamp(3600)?),
                single_extensions: None,
            }],
            response_extensions: nonce_ext.map(|ext| vec![ext]),
        };

        let tbs_der = tbs.to_der()?;
        let mut signer = Signer::new(MessageDigest::sha256(), &self.ca_key)?;
        let signature = signer.sign_oneshot_to_vec(&tbs_der)?;

        let basic = BasicOcspResponse {
            tbs_response_data: tbs,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: ID_SHA256_WITH_RSA,
                parameters: Some(der::AnyRef::NULL.into()),
            },
            signature: BitString::from_bytes(&signature)?,
            certs: Some(vec![ca]),
        };

        let response = OcspResponse {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: ID_PKIX_OCSP_BASIC,
                response: OctetString::new(basic.to_der()?)?,
            }),
        };

        Ok(response.to_der()?)
    }
}

impl HttpFetch for OcspResponder {
    fn fetch(&self, request: &FetchRequest<'_>) -> io::Result<Vec<u8>> {
        self.respond(request.body)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}
