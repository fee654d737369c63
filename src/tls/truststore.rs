//! Trust store assembly.
//!
//! Root certificates come from a directory of `.pem` files (or the system
//! default paths), optionally augmented by a single CA file and a CRL. The
//! same material is also loaded into a standalone `X509Store`, which OCSP
//! signature checks use: the context's own store cannot be reached from the
//! verification callbacks.

use std::fs;
use std::path::Path;

use openssl::ssl::{SslContextBuilder, SslFiletype};
use openssl::x509::store::{X509Lookup, X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::X509;
use tracing::{debug, error, info};

use super::config::TlsConfig;
use super::{Result, TlsError};

/// Sentinel directory value meaning "use the back-end's default paths".
const SYSTEM_CA_SENTINEL: &str = "system";

/// Fallback when the default paths cannot be loaded.
const SYSTEM_CA_FALLBACK: &str = "/etc/ssl/certs";

/// Load CA material and the optional CRL into the TLS context.
pub(crate) fn install(builder: &mut SslContextBuilder, cfg: &TlsConfig) -> Result<()> {
    if !cfg.ca_directory.is_empty() {
        load_ca_directory(builder, &cfg.ca_directory)?;

        if let Some(crl) = &cfg.crl_file {
            load_crl(builder, crl).map_err(|err| {
                error!("could not load CRL from '{crl}'");
                err
            })?;
        }
    }

    // An individual CA file failing to load is not fatal.
    if let Some(file) = &cfg.ca_file {
        if builder.set_ca_file(file).is_err() {
            error!("could not load CA certificate from file '{file}'");
        }
    }

    Ok(())
}

fn load_ca_directory(builder: &mut SslContextBuilder, directory: &str) -> Result<()> {
    let mut dir = directory;

    if dir == SYSTEM_CA_SENTINEL {
        if builder.set_default_verify_paths().is_ok() {
            return Ok(());
        }
        dir = SYSTEM_CA_FALLBACK;
        info!("could not load certificates from the default paths, falling back to '{dir}'");
    }

    let loaded = load_pem_entries(builder, dir)?;
    if loaded == 0 {
        error!("no certificates could be loaded from directory '{dir}'");
    } else {
        debug!("loaded {loaded} certificates from '{dir}'");
    }

    Ok(())
}

/// Register every `.pem` entry of `dir` as a verify location, returning the
/// number of files that loaded. An unreadable directory is an error.
fn load_pem_entries(builder: &mut SslContextBuilder, dir: &str) -> Result<u32> {
    let entries = fs::read_dir(dir).map_err(|err| {
        error!("could not open directory '{dir}': {err}");
        TlsError::Unknown
    })?;

    let mut loaded = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_pem_name(name) {
            continue;
        }

        let path = Path::new(dir).join(name);
        match builder.set_ca_file(&path) {
            Ok(()) => loaded += 1,
            Err(err) => debug!("skipping '{}': {err}", path.display()),
        }
    }

    Ok(loaded)
}

/// Case-insensitive `.pem` check on the final four bytes of the file name.
fn is_pem_name(name: &str) -> bool {
    let name = name.as_bytes();
    name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(b".pem")
}

/// Add a CRL lookup to the context store and enforce full-chain CRL checks
/// with delta CRLs. Any failure here aborts engine initialization.
fn load_crl(builder: &mut SslContextBuilder, crl_file: &str) -> Result<()> {
    let store = builder.cert_store_mut();

    let lookup = store
        .add_lookup(X509Lookup::file())
        .map_err(|_| TlsError::Unknown)?;
    lookup
        .load_crl_file(crl_file, SslFiletype::PEM)
        .map_err(|_| TlsError::Unknown)?;

    store
        .set_flags(X509VerifyFlags::CRL_CHECK_ALL | X509VerifyFlags::USE_DELTAS)
        .map_err(|_| TlsError::Unknown)?;

    Ok(())
}

/// A standalone store holding the same trust anchors as the context, for
/// verifying OCSP response and staple signatures.
pub(crate) fn build_side_store(cfg: &TlsConfig) -> Result<X509Store> {
    let mut builder = X509StoreBuilder::new().map_err(|_| TlsError::Unknown)?;

    if cfg.ca_directory == SYSTEM_CA_SENTINEL {
        if builder.set_default_paths().is_err() {
            add_directory_certs(&mut builder, SYSTEM_CA_FALLBACK);
        }
    } else if !cfg.ca_directory.is_empty() {
        add_directory_certs(&mut builder, &cfg.ca_directory);
    }

    if let Some(file) = &cfg.ca_file {
        if let Ok(pem) = fs::read(file) {
            add_pem_certs(&mut builder, &pem);
        }
    }

    Ok(builder.build())
}

fn add_directory_certs(builder: &mut X509StoreBuilder, dir: &str) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_pem_name(name) {
            continue;
        }
        if let Ok(pem) = fs::read(entry.path()) {
            add_pem_certs(builder, &pem);
        }
    }
}

fn add_pem_certs(builder: &mut X509StoreBuilder, pem: &[u8]) {
    let Ok(certs) = X509::stack_from_pem(pem) else {
        return;
    };
    for cert in certs {
        let _ = builder.add_cert(cert);
    }
}
