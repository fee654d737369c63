//! Socket readiness waiting.
//!
//! A thin wrapper over `poll(2)` used by the handshake driver and the TLS
//! transfer loop. Timeouts are in milliseconds: `0` probes and returns
//! immediately, negative values wait indefinitely.

use std::io;
use std::os::fd::RawFd;

/// Readiness directions to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Wait until `fd` becomes ready for the requested events.
///
/// Returns `Ok(true)` when the descriptor is ready, `Ok(false)` on timeout.
/// Values below `-1` are clamped to `-1` (infinite).
pub fn wait_ready(fd: RawFd, timeout_ms: i32, events: PollEvents) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let timeout = timeout_ms.max(-1);

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(result > 0)
}
