//! netfetch - transport pieces of an HTTP/download client library.
//!
//! The crate centers on a client-side TLS engine (the `tls` module) that
//! drives handshakes over already-connected, non-blocking sockets, validates
//! peers against a configurable trust store (CRLs, OCSP, public key
//! pinning), and caches TLS sessions for resumption. Services owned by the
//! host program - the HTTP client used for OCSP queries and the various
//! caches - are borrowed through the traits in `fetch` and `cache`.

pub mod cache;
pub mod fetch;
pub mod net;
pub mod tls;
