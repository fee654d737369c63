//! HTTP fetch contract consumed by the TLS engine.
//!
//! The engine never speaks HTTP itself; OCSP queries go through a client
//! owned by the host program. The contract is a single "post a body, give me
//! the response body back" operation with a redirect cap.

use std::io;

/// One outgoing HTTP request.
pub struct FetchRequest<'a> {
    /// Absolute URL of the responder.
    pub url: &'a str,
    /// Header name/value pairs sent verbatim.
    pub headers: &'a [(&'a str, &'a str)],
    /// Request body. An empty body means a plain GET-style fetch.
    pub body: &'a [u8],
    /// How many redirects the client may follow before giving up.
    pub max_redirects: u32,
}

/// Borrowed HTTP client.
///
/// Implementations must be callable from whichever thread is currently
/// driving a handshake.
pub trait HttpFetch: Send + Sync {
    /// Execute the request and return the raw response body.
    fn fetch(&self, request: &FetchRequest<'_>) -> io::Result<Vec<u8>>;
}
