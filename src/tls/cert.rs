//! Peer certificate summaries for handshake-info logging.

use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};

/// Human-readable summary of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSummary {
    /// Subject Common Name.
    pub subject: String,
    /// Issuer Common Name.
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses).
    pub subject_alt_names: Vec<String>,
}

impl CertSummary {
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertSummary {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: alt_names(cert),
        }
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(sans) = cert.subject_alt_names() {
        for name in sans {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{dns}"));
            } else if let Some(ip) = name.ipaddress() {
                match ip.len() {
                    4 => names.push(format!("IP:{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])),
                    16 => {
                        let mut parts = Vec::with_capacity(8);
                        for pair in ip.chunks(2) {
                            parts.push(format!("{:02x}{:02x}", pair[0], pair[1]));
                        }
                        names.push(format!("IP:{}", parts.join(":")));
                    }
                    _ => {}
                }
            }
        }
    }

    names
}
