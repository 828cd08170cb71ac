//! Epoll-based readiness multiplexer.
//!
//! Thin wrapper over `epoll(7)`: each capture socket registers once with
//! its socket-table index as the event token, so the capture loop recovers
//! the owning handle from a readiness event in O(1) without a reverse
//! lookup.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::error::{CaptureError, Result};

/// One readiness multiplexer shared by all capture sockets.
pub(crate) struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(CaptureError::Wait { source: io::Error::last_os_error() });
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Register `fd` for read readiness under `token`.
    pub fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events: libc::EPOLLIN as u32, u64: token };
        let ret =
            unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) };
        if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
    }

    /// Block until at least one registered socket is readable or `timeout`
    /// elapses. Returns the number of ready events written to `events`.
    ///
    /// An `EINTR` result is surfaced to the caller; interruption by a
    /// non-termination signal is not an error there.
    pub fn wait(&self, events: &mut [libc::epoll_event], timeout: Duration) -> io::Result<usize> {
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout.as_millis() as libc::c_int,
            )
        };
        if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) }
    }
}
