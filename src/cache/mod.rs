//! Cache collaborator contracts.
//!
//! The TLS engine borrows three caches owned by the host program: a TLS
//! session cache for resumption, an OCSP response cache, and an HPKP pin
//! store. All three hold opaque values the engine is forbidden from
//! interpreting beyond their contracts. In-memory reference implementations
//! are provided for hosts that do not bring their own and for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TLS session cache: opaque session blobs keyed by host name.
pub trait SessionCache: Send + Sync {
    /// Look up the blob stored for `host`, if any.
    fn get(&self, host: &str) -> Option<Vec<u8>>;

    /// Store `blob` under `host` for at most `ttl`.
    fn add(&self, host: &str, blob: Vec<u8>, ttl: Duration);
}

/// OCSP response cache.
///
/// Reserved: the engine currently queries the responder on every validation
/// and does not consult this cache.
pub trait OcspResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn add(&self, key: &str, response: Vec<u8>, ttl: Duration);
}

/// Outcome of an HPKP pin lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    /// The public key matches a pin on file for the host.
    Match,
    /// No pins are recorded for the host.
    NoPin,
    /// The lookup itself failed.
    Error,
    /// Pins exist for the host and none of them match.
    Mismatch,
}

/// HPKP pin store keyed by host name.
///
/// `spki_der` is the DER-encoded SubjectPublicKeyInfo of one certificate in
/// the peer's chain; how pins are stored (raw or hashed) is up to the store.
pub trait HpkpCache: Send + Sync {
    fn check(&self, host: &str, spki_der: &[u8]) -> PinCheck;
}

struct TtlEntry {
    value: Vec<u8>,
    expires: Instant,
}

/// Session cache backed by a mutex-guarded TTL map.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: Mutex<HashMap<String, TtlEntry>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.entries)
            .values()
            .filter(|entry| entry.expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionCache for MemorySessionCache {
    fn get(&self, host: &str) -> Option<Vec<u8>> {
        let entries = lock(&self.entries);
        let entry = entries.get(host)?;
        if entry.expires <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn add(&self, host: &str, blob: Vec<u8>, ttl: Duration) {
        let entry = TtlEntry {
            value: blob,
            expires: Instant::now() + ttl,
        };
        lock(&self.entries).insert(host.to_string(), entry);
    }
}

/// OCSP response cache backed by the same TTL map shape.
#[derive(Default)]
pub struct MemoryOcspCache {
    entries: Mutex<HashMap<String, TtlEntry>>,
}

impl MemoryOcspCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OcspResponseCache for MemoryOcspCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = lock(&self.entries);
        let entry = entries.get(key)?;
        if entry.expires <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn add(&self, key: &str, response: Vec<u8>, ttl: Duration) {
        let entry = TtlEntry {
            value: response,
            expires: Instant::now() + ttl,
        };
        lock(&self.entries).insert(key.to_string(), entry);
    }
}

/// Pin store comparing raw SubjectPublicKeyInfo bytes.
#[derive(Default)]
pub struct MemoryHpkpStore {
    pins: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryHpkpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `spki_der` as acceptable for `host`.
    pub fn pin(&self, host: &str, spki_der: Vec<u8>) {
        lock(&self.pins)
            .entry(host.to_string())
            .or_default()
            .push(spki_der);
    }
}

impl HpkpCache for MemoryHpkpStore {
    fn check(&self, host: &str, spki_der: &[u8]) -> PinCheck {
        let pins = lock(&self.pins);
        match pins.get(host) {
            None => PinCheck::NoPin,
            Some(list) if list.iter().any(|pin| pin == spki_der) => PinCheck::Match,
            Some(_) => PinCheck::Mismatch,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
