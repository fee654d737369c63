//! OCSP queries and response checking.
//!
//! Requests are assembled with the RustCrypto DER stack, which gives full
//! control over the nonce extension; responses are checked with the
//! back-end, which carries CertID matching, the validity window and
//! signature verification against the trust store. The nonce echoed by the
//! responder is read back out of the raw DER.

use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use openssl::hash::MessageDigest;
use openssl::ocsp::{
    OcspCertId, OcspCertStatus, OcspFlag, OcspResponse, OcspResponseStatus, OcspRevokedStatus,
};
use openssl::stack::{Stack, StackRef};
use openssl::x509::store::X509StoreRef;
use openssl::x509::{X509Ref, X509};
use rand::Rng;
use tracing::{debug, warn};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::AuthorityInfoAccessSyntax;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::fetch::{FetchRequest, HttpFetch};
use super::verify::VerifyState;

const ID_PE_AUTHORITY_INFO_ACCESS: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.1.1");
const ID_AD_OCSP: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1");
const ID_PKIX_OCSP_NONCE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.2");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

const OCSP_MAX_REDIRECTS: u32 = 5;
const NONCE_LEN: usize = 16;

/// OCSP decision over a validated chain, leaf first: every (certificate,
/// issuer) adjacent pair must come back `good`. The first failing pair
/// fails the whole chain.
pub(crate) fn verify_chain(chain: &StackRef<X509>, state: &VerifyState) -> bool {
    let Some(http) = &state.http else {
        warn!("OCSP is enabled but no HTTP client is configured, skipping OCSP checks");
        return true;
    };

    for (cert, issuer) in chain.iter().zip(chain.iter().skip(1)) {
        let uri = match responder_uri(cert) {
            Some(uri) => uri,
            None => match &state.ocsp_server {
                Some(server) => server.clone(),
                None => {
                    debug!("no OCSP responder known for certificate");
                    return false;
                }
            },
        };

        if !verify_one(&uri, cert, issuer, chain, state, http.as_ref()) {
            return false;
        }
    }

    true
}

/// OCSP responder URI from the certificate's Authority Information Access
/// extension, if it carries one.
fn responder_uri(cert: &X509Ref) -> Option<String> {
    let der = cert.to_der().ok()?;
    let parsed = Certificate::from_der(&der).ok()?;
    let extensions = parsed.tbs_certificate.extensions.as_ref()?;

    for ext in extensions {
        if ext.extn_id != ID_PE_AUTHORITY_INFO_ACCESS {
            continue;
        }
        let Ok(aia) = AuthorityInfoAccessSyntax::from_der(ext.extn_value.as_bytes()) else {
            continue;
        };
        for access in aia.0 {
            if access.access_method != ID_AD_OCSP {
                continue;
            }
            if let GeneralName::UniformResourceIdentifier(uri) = access.access_location {
                return Some(uri.as_str().to_string());
            }
        }
    }

    None
}

fn verify_one(
    uri: &str,
    cert: &X509Ref,
    issuer: &X509Ref,
    chain: &StackRef<X509>,
    state: &VerifyState,
    http: &dyn HttpFetch,
) -> bool {
    debug!(
        "checking OCSP status for certificate serial {} at '{uri}'",
        serial_hex(cert)
    );

    let (request, nonce) = match build_request(cert, issuer) {
        Ok(pair) => pair,
        Err(err) => {
            debug!("could not build OCSP request: {err}");
            return false;
        }
    };

    let fetch = FetchRequest {
        url: uri,
        headers: &[
            ("Accept-Encoding", "identity"),
            ("Accept", "*/*"),
            ("Content-Type", "application/ocsp-request"),
        ],
        body: &request,
        max_redirects: OCSP_MAX_REDIRECTS,
    };

    let body = match http.fetch(&fetch) {
        Ok(body) => body,
        Err(err) => {
            debug!("OCSP query to '{uri}' failed: {err}");
            return false;
        }
    };

    check_response(&body, &nonce, cert, issuer, chain, state)
}

fn serial_hex(cert: &X509Ref) -> String {
    match cert.serial_number().to_bn() {
        Ok(bn) => hex::encode(bn.to_vec()),
        Err(_) => "<unknown>".to_string(),
    }
}

/// Build a DER-encoded OCSP request for (cert, issuer): a SHA-256 CertID
/// plus a fresh nonce. Returns the request bytes and the nonce.
fn build_request(
    cert: &X509Ref,
    issuer: &X509Ref,
) -> Result<(Vec<u8>, Vec<u8>), Box<dyn std::error::Error>> {
    use x509_ocsp::{OcspRequest, Request, TbsRequest, Version};

    let issuer_parsed = Certificate::from_der(&issuer.to_der()?)?;
    let subject_parsed = Certificate::from_der(&cert.to_der()?)?;

    let name_hash = openssl::hash::hash(
        MessageDigest::sha256(),
        &issuer_parsed.tbs_certificate.subject.to_der()?,
    )?;
    let key_hash = openssl::hash::hash(
        MessageDigest::sha256(),
        issuer_parsed
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes(),
    )?;

    let cert_id = x509_ocsp::CertId {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: ID_SHA256,
            parameters: None,
        },
        issuer_name_hash: OctetString::new(name_hash.as_ref())?,
        issuer_key_hash: OctetString::new(key_hash.as_ref())?,
        serial_number: subject_parsed.tbs_certificate.serial_number.clone(),
    };

    let mut nonce = vec![0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce[..]);

    let nonce_ext = x509_cert::ext::Extension {
        extn_id: ID_PKIX_OCSP_NONCE,
        critical: false,
        extn_value: OctetString::new(nonce.as_slice())?,
    };

    let request = OcspRequest {
        tbs_request: TbsRequest {
            version: Version::V1,
            requestor_name: None,
            request_list: vec![Request {
                req_cert: cert_id,
                single_request_extensions: None,
            }],
            request_extensions: Some(vec![nonce_ext]),
        },
        optional_signature: None,
    };

    Ok((request.to_der()?, nonce))
}

/// Check a responder's answer for (cert, issuer): overall status, nonce
/// echo, certificate status, validity window and response signature, in
/// that order. Any failure fails the check.
fn check_response(
    body: &[u8],
    nonce: &[u8],
    cert: &X509Ref,
    issuer: &X509Ref,
    chain: &StackRef<X509>,
    state: &VerifyState,
) -> bool {
    let response = match OcspResponse::from_der(body) {
        Ok(response) => response,
        Err(err) => {
            debug!("could not parse OCSP response: {err}");
            return false;
        }
    };

    let status = response.status();
    debug!("OCSP response status: {}", response_status_name(status));
    if status != OcspResponseStatus::SUCCESSFUL {
        return false;
    }

    let basic = match response.basic() {
        Ok(basic) => basic,
        Err(err) => {
            debug!("could not extract basic OCSP response: {err}");
            return false;
        }
    };

    if !nonce_matches(body, nonce) {
        debug!("OCSP verification error: nonces do not match");
        return false;
    }

    let cert_id = match OcspCertId::from_cert(MessageDigest::sha256(), cert, issuer) {
        Ok(id) => id,
        Err(err) => {
            debug!("could not compute OCSP CertID: {err}");
            return false;
        }
    };

    let Some(single) = basic.find_status(&cert_id) else {
        debug!("certificate not found in OCSP response");
        return false;
    };

    if single.status == OcspCertStatus::REVOKED {
        match single.revocation_time {
            Some(time) => debug!(
                "OCSP certificate status: revoked at {time} (reason: {})",
                reason_name(single.reason)
            ),
            None => debug!(
                "OCSP certificate status: revoked (reason: {})",
                reason_name(single.reason)
            ),
        }
        return false;
    }
    if single.status != OcspCertStatus::GOOD {
        debug!("OCSP certificate status: unknown");
        return false;
    }
    debug!("OCSP certificate status: good");

    if single.check_validity(0, None).is_err() {
        debug!("OCSP verification error: response is out of date");
        return false;
    }

    if basic.verify(chain, &state.store, OcspFlag::empty()).is_err() {
        debug!("OCSP verification error: response signature could not be verified");
        return false;
    }

    true
}

/// Compare the nonce echoed in the basic response with the one we sent.
/// Responders without nonce support simply omit the extension.
fn nonce_matches(body: &[u8], nonce: &[u8]) -> bool {
    let Ok(parsed) = x509_ocsp::OcspResponse::from_der(body) else {
        return false;
    };
    let Some(bytes) = parsed.response_bytes else {
        return false;
    };
    let Ok(basic) = x509_ocsp::BasicOcspResponse::from_der(bytes.response.as_bytes()) else {
        return false;
    };

    let echoed = basic
        .tbs_response_data
        .response_extensions
        .as_ref()
        .and_then(|exts| exts.iter().find(|ext| ext.extn_id == ID_PKIX_OCSP_NONCE));

    match echoed {
        Some(ext) => ext.extn_value.as_bytes() == nonce,
        None => {
            debug!("OCSP response carries no nonce");
            true
        }
    }
}

/// Validate a stapled OCSP response: overall status, signature, and - when
/// the peer chain exposes the (leaf, issuer) pair - the leaf's status and
/// validity window.
pub(crate) fn check_stapled_response(
    staple: &[u8],
    chain: Option<&StackRef<X509>>,
    store: &X509StoreRef,
) -> bool {
    let response = match OcspResponse::from_der(staple) {
        Ok(response) => response,
        Err(err) => {
            debug!("could not parse stapled OCSP response: {err}");
            return false;
        }
    };

    let status = response.status();
    if status != OcspResponseStatus::SUCCESSFUL {
        debug!(
            "stapled OCSP response status: {}",
            response_status_name(status)
        );
        return false;
    }

    let basic = match response.basic() {
        Ok(basic) => basic,
        Err(err) => {
            debug!("could not extract stapled basic response: {err}");
            return false;
        }
    };

    let empty;
    let certs = match chain {
        Some(chain) => chain,
        None => {
            let Ok(stack) = Stack::new() else {
                return false;
            };
            empty = stack;
            &*empty
        }
    };

    if basic.verify(certs, store, OcspFlag::empty()).is_err() {
        debug!("stapled OCSP response signature could not be verified");
        return false;
    }

    if let Some(chain) = chain {
        let mut iter = chain.iter();
        if let (Some(leaf), Some(issuer)) = (iter.next(), iter.next()) {
            if let Ok(cert_id) = OcspCertId::from_cert(MessageDigest::sha256(), leaf, issuer) {
                if let Some(single) = basic.find_status(&cert_id) {
                    if single.status == OcspCertStatus::REVOKED {
                        debug!(
                            "stapled OCSP response reports revocation (reason: {})",
                            reason_name(single.reason)
                        );
                        return false;
                    }
                    if single.check_validity(0, None).is_err() {
                        debug!("stapled OCSP response is out of date");
                        return false;
                    }
                }
            }
        }
    }

    true
}

fn response_status_name(status: OcspResponseStatus) -> &'static str {
    if status == OcspResponseStatus::SUCCESSFUL {
        "successful"
    } else if status == OcspResponseStatus::MALFORMED_REQUEST {
        "malformed request"
    } else if status == OcspResponseStatus::INTERNAL_ERROR {
        "internal error"
    } else if status == OcspResponseStatus::TRY_LATER {
        "try later"
    } else if status == OcspResponseStatus::SIG_REQUIRED {
        "signature required"
    } else if status == OcspResponseStatus::UNAUTHORIZED {
        "unauthorized"
    } else {
        "unknown status code"
    }
}

fn reason_name(reason: OcspRevokedStatus) -> &'static str {
    if reason == OcspRevokedStatus::NO_STATUS {
        "not given"
    } else if reason == OcspRevokedStatus::UNSPECIFIED {
        "unspecified"
    } else if reason == OcspRevokedStatus::KEY_COMPROMISE {
        "key compromise"
    } else if reason == OcspRevokedStatus::CA_COMPROMISE {
        "CA compromise"
    } else if reason == OcspRevokedStatus::AFFILIATION_CHANGED {
        "affiliation changed"
    } else if reason == OcspRevokedStatus::STATUS_SUPERSEDED {
        "superseded"
    } else if reason == OcspRevokedStatus::STATUS_CESSATION_OF_OPERATION {
        "cessation of operation"
    } else if reason == OcspRevokedStatus::STATUS_CERTIFICATE_HOLD {
        "certificate hold"
    } else if reason == OcspRevokedStatus::REMOVE_FROM_CRL {
        "remove from CRL"
    } else {
        "unknown reason"
    }
}
