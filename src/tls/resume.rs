//! Session-resumption bridge.
//!
//! Negotiated sessions are serialized with the back-end's native encoder
//! and stored in the host's session cache as opaque blobs keyed by host
//! name; a later connection to the same host deserializes the blob and
//! installs it before the handshake.

use std::time::Duration;

use openssl::ssl::{SslRef, SslSession};
use tracing::{debug, error};

use crate::cache::SessionCache;

/// Cached sessions stay fresh for 18 hours.
const SESSION_TTL: Duration = Duration::from_secs(18 * 3600);

pub(crate) enum Resume {
    /// A cached session was installed on the connection.
    Resumed,
    /// Nothing cached for this host (or no cache configured).
    NotCached,
    /// The cached blob could not be used.
    Corrupt,
}

/// Install a cached session for `host` on a fresh connection, if one exists.
pub(crate) fn resume(ssl: &mut SslRef, host: &str, cache: Option<&dyn SessionCache>) -> Resume {
    let Some(cache) = cache else {
        return Resume::NotCached;
    };
    let Some(blob) = cache.get(host) else {
        return Resume::NotCached;
    };

    debug!("found cached session data for host '{host}'");

    let session = match SslSession::from_der(&blob) {
        Ok(session) => session,
        Err(_) => {
            error!("could not parse cached session data");
            return Resume::Corrupt;
        }
    };

    // Blobs only enter the cache through `save` below, so the session
    // belongs to a context compatible with this one.
    if unsafe { ssl.set_session(&session) }.is_err() {
        error!("could not set session data");
        return Resume::Corrupt;
    }

    Resume::Resumed
}

/// Serialize the negotiated session and store it under `host`. Returns
/// false when there is nothing to store.
pub(crate) fn save(ssl: &SslRef, host: &str, cache: Option<&dyn SessionCache>) -> bool {
    let Some(cache) = cache else {
        return false;
    };
    let Some(session) = ssl.session() else {
        return false;
    };

    match session.to_der() {
        Ok(blob) => {
            cache.add(host, blob, SESSION_TTL);
            true
        }
        Err(_) => false,
    }
}
