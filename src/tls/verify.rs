//! Revocation and pinning checks.
//!
//! The back-end validates the certificate path; once the chain is green we
//! additionally decide revocation via OCSP and key pinning via the HPKP
//! store, and the chain only passes when both agree. The per-connection
//! verify callback carries the host name in its closure, so no out-of-band
//! state is needed to reach it from here.

use std::sync::Arc;

use openssl::ssl::SslRef;
use openssl::stack::StackRef;
use openssl::x509::store::X509Store;
use openssl::x509::{X509Ref, X509StoreContextRef, X509};
use tracing::{debug, error, warn};

use crate::cache::{HpkpCache, PinCheck};
use crate::fetch::HttpFetch;
use super::config::TlsConfig;
use super::ocsp;
use super::truststore;
use super::Result;

/// State shared by every connection's revocation callback.
pub(crate) struct VerifyState {
    pub ocsp: bool,
    pub ocsp_server: Option<String>,
    pub http: Option<Arc<dyn HttpFetch>>,
    pub hpkp: Option<Arc<dyn HpkpCache>>,
    /// Trust anchors for OCSP and staple signature verification.
    pub store: X509Store,
}

impl VerifyState {
    pub fn build(cfg: &TlsConfig) -> Result<Self> {
        Ok(VerifyState {
            ocsp: cfg.ocsp,
            ocsp_server: cfg.ocsp_server.clone(),
            http: cfg.http_client.clone(),
            hpkp: cfg.hpkp_cache.clone(),
            store: truststore::build_side_store(cfg)?,
        })
    }
}

/// Revocation decision for a fully validated chain: the OCSP verdict AND the
/// HPKP verdict. Either subsystem is skipped when it is disabled or has no
/// backing collaborator.
pub(crate) fn revocation_check(
    host: &str,
    ctx: &mut X509StoreContextRef,
    state: &VerifyState,
) -> bool {
    let Some(chain) = ctx.chain() else {
        error!("no certificate chain available for revocation checks");
        return false;
    };

    let ocsp_ok = if state.ocsp {
        ocsp::verify_chain(chain, state)
    } else {
        true
    };

    let hpkp_ok = match &state.hpkp {
        Some(store) => check_chain_pins(host, chain, store.as_ref()),
        None => true,
    };

    ocsp_ok && hpkp_ok
}

/// Check every chain certificate against the pin store. A single mismatch
/// fails the chain; match, no-pin and lookup-error outcomes pass.
fn check_chain_pins(host: &str, chain: &StackRef<X509>, store: &dyn HpkpCache) -> bool {
    for cert in chain {
        match check_one_pin(host, cert, store) {
            PinCheck::Match => {
                debug!("matching public key pinning found for host '{host}'");
            }
            PinCheck::NoPin => {
                debug!("no public key pinning found for host '{host}'");
            }
            PinCheck::Error => {
                debug!("could not check public key pinning for host '{host}'");
            }
            PinCheck::Mismatch => {
                error!("public key pinning mismatch for host '{host}'");
                return false;
            }
        }
    }

    true
}

fn check_one_pin(host: &str, cert: &X509Ref, store: &dyn HpkpCache) -> PinCheck {
    let spki = match cert.public_key().and_then(|key| key.public_key_to_der()) {
        Ok(der) => der,
        Err(_) => return PinCheck::Error,
    };

    store.check(host, &spki)
}

/// Validate a stapled OCSP response delivered inside the handshake.
/// An absent staple is accepted; a present one must check out.
pub(crate) fn check_staple(ssl: &mut SslRef, state: &VerifyState) -> bool {
    let Some(staple) = ssl.ocsp_status() else {
        debug!("no OCSP staple received");
        return true;
    };

    if !ocsp::check_stapled_response(staple, ssl.peer_cert_chain(), &state.store) {
        warn!("rejecting stapled OCSP response");
        return false;
    }

    true
}
