//! Exclusive ownership of one OS socket descriptor.
//!
//! All socket operations are thin wrappers around `libc` calls returning the
//! platform's raw success/failure signal; the [`socket`](crate::socket)
//! layer decides how to classify failures. This module is the only place in
//! the crate that touches platform descriptor types, so platform divergence
//! stays contained here.
//!
//! A handle value is either valid and owned by exactly one place, or the
//! canonical invalid sentinel. Close is idempotent and runs unconditionally
//! on drop; no two live handles ever share a valid descriptor.

use std::ffi::{c_int, c_void};
use std::io;
use std::mem;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;

/// Sentinel for a descriptor that owns nothing.
const INVALID_FD: RawFd = -1;

/// `MSG_NOSIGNAL` keeps a write to a dead peer from raising `SIGPIPE`; the
/// failure surfaces as `EPIPE` on the call instead.
#[cfg(target_os = "linux")]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: c_int = 0;

/// Exclusively-owned native socket descriptor.
///
/// Neither `Clone` nor `Copy`: ownership moves, and [`take`](Self::take)
/// is the explicit move-out that leaves the source invalid.
#[derive(Debug)]
pub struct NativeHandle {
    fd: RawFd,
}

impl NativeHandle {
    /// The canonical empty handle.
    pub fn invalid() -> Self {
        NativeHandle { fd: INVALID_FD }
    }

    /// Allocates a fresh IPv6 stream socket.
    pub fn create() -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(NativeHandle { fd })
    }

    /// Wraps a descriptor produced elsewhere (the accept path). A negative
    /// value yields the invalid handle.
    fn from_raw(fd: RawFd) -> Self {
        if fd < 0 {
            NativeHandle::invalid()
        } else {
            NativeHandle { fd }
        }
    }

    /// Pure validity predicate.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.fd != INVALID_FD
    }

    /// The raw descriptor value. Callers must not close it.
    #[inline]
    pub fn raw(&self) -> RawFd {
        self.fd
    }

    /// Moves the descriptor out, leaving `self` invalid.
    pub fn take(&mut self) -> NativeHandle {
        mem::replace(self, NativeHandle::invalid())
    }

    /// Releases the descriptor. Idempotent: a second call (or a call on an
    /// invalid handle) is a no-op. Best-effort; a failing `close` is not
    /// observable.
    pub fn close(&mut self) {
        if self.fd != INVALID_FD {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = INVALID_FD;
        }
    }

    // -----------------------------------------------------------------------
    // Raw socket operations (classification happens in the socket layer)
    // -----------------------------------------------------------------------

    /// `bind(2)` to an IPv6 address and port. Port 0 requests an ephemeral
    /// port from the OS.
    pub(crate) fn bind(&self, addr: Ipv6Addr, port: u16) -> c_int {
        let sa = sockaddr_v6(addr, port);
        unsafe {
            libc::bind(
                self.fd,
                &sa as *const libc::sockaddr_in6 as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }

    /// `listen(2)`.
    pub(crate) fn listen(&self, backlog: c_int) -> c_int {
        unsafe { libc::listen(self.fd, backlog) }
    }

    /// `accept(2)`. Blocks until a peer connects; returns the invalid handle
    /// on failure (the caller reads the OS error).
    pub(crate) fn accept(&self) -> NativeHandle {
        let fd = unsafe { libc::accept(self.fd, ptr::null_mut(), ptr::null_mut()) };
        NativeHandle::from_raw(fd)
    }

    /// `getsockname(2)`, so a port-0 bind can report its ephemeral port.
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddrV6> {
        let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                self.fd,
                &mut sa as *mut libc::sockaddr_in6 as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(SocketAddrV6::new(
            Ipv6Addr::from(sa.sin6_addr.s6_addr),
            u16::from_be(sa.sin6_port),
            sa.sin6_flowinfo,
            sa.sin6_scope_id,
        ))
    }

    /// Toggles `SO_REUSEADDR`.
    pub(crate) fn set_reuse_address(&self, enable: bool) -> c_int {
        self.set_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, c_int::from(enable))
    }

    /// Toggles `SO_KEEPALIVE`.
    pub(crate) fn set_keep_alive(&self, enable: bool) -> c_int {
        self.set_option(libc::SOL_SOCKET, libc::SO_KEEPALIVE, c_int::from(enable))
    }

    /// `setsockopt(2)` with an `int` payload.
    fn set_option(&self, level: c_int, name: c_int, value: c_int) -> c_int {
        unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                &value as *const c_int as *const c_void,
                mem::size_of::<c_int>() as libc::socklen_t,
            )
        }
    }

    /// Toggles `O_NONBLOCK` via `fcntl(2)`.
    pub(crate) fn set_nonblocking(&self, enable: bool) -> c_int {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL, 0) };
        if flags < 0 {
            return flags;
        }
        let flags = if enable {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) }
    }

    /// Applies `SO_SNDTIMEO` so subsequent sends fail instead of blocking
    /// past the deadline.
    pub(crate) fn set_send_timeout(&self, timeout: Duration) -> c_int {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_SNDTIMEO,
                &tv as *const libc::timeval as *const c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        }
    }

    /// One `send(2)` call; may accept fewer bytes than offered.
    pub(crate) fn send(&self, buf: &[u8]) -> isize {
        unsafe { libc::send(self.fd, buf.as_ptr() as *const c_void, buf.len(), SEND_FLAGS) }
    }

    /// One `recv(2)` call; may deliver fewer bytes than requested.
    pub(crate) fn recv(&self, buf: &mut [u8]) -> isize {
        unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) }
    }

    /// One `sendfile(2)` call: kernel-to-kernel copy from `file_fd` into this
    /// socket, advancing `offset` by the number of bytes transferred.
    #[cfg(target_os = "linux")]
    pub(crate) fn sendfile(&self, file_fd: RawFd, offset: &mut u64, count: usize) -> isize {
        let mut off = *offset as libc::off_t;
        let n = unsafe { libc::sendfile(self.fd, file_fd, &mut off as *mut libc::off_t, count) };
        *offset = off as u64;
        n
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds a `sockaddr_in6` for `bind`. Zero-initialized so the fields this
/// platform adds beyond the POSIX set stay zeroed.
fn sockaddr_v6(addr: Ipv6Addr, port: u16) -> libc::sockaddr_in6 {
    let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sa.sin6_port = port.to_be();
    sa.sin6_addr = libc::in6_addr {
        s6_addr: addr.octets(),
    };
    sa
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_reports_invalid() {
        let h = NativeHandle::invalid();
        assert!(!h.is_valid());
        assert_eq!(h.raw(), INVALID_FD);
    }

    #[test]
    fn create_yields_valid_descriptor() {
        let h = NativeHandle::create().expect("socket allocation");
        assert!(h.is_valid());
        assert!(h.raw() >= 0);
    }

    #[test]
    fn take_moves_ownership_out() {
        let mut src = NativeHandle::create().expect("socket allocation");
        let fd = src.raw();
        let dst = src.take();
        assert!(!src.is_valid());
        assert!(dst.is_valid());
        assert_eq!(dst.raw(), fd);
    }

    #[test]
    fn close_is_idempotent() {
        let mut h = NativeHandle::create().expect("socket allocation");
        h.close();
        assert!(!h.is_valid());
        // Second close and drop are both no-ops on the sentinel.
        h.close();
        assert!(!h.is_valid());
    }

    #[test]
    fn from_raw_maps_negative_to_invalid() {
        assert!(!NativeHandle::from_raw(-1).is_valid());
        assert!(!NativeHandle::from_raw(-7).is_valid());
    }

    #[test]
    fn sockaddr_encodes_port_in_network_order() {
        let sa = sockaddr_v6(Ipv6Addr::LOCALHOST, 0x1234);
        assert_eq!(sa.sin6_family, libc::AF_INET6 as libc::sa_family_t);
        assert_eq!(u16::from_be(sa.sin6_port), 0x1234);
        assert_eq!(sa.sin6_addr.s6_addr, Ipv6Addr::LOCALHOST.octets());
    }

    #[test]
    fn sockaddr_wildcard_is_all_zero() {
        let sa = sockaddr_v6(Ipv6Addr::UNSPECIFIED, 0);
        assert_eq!(sa.sin6_addr.s6_addr, [0u8; 16]);
        assert_eq!(sa.sin6_port, 0);
    }
}
