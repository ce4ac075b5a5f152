//! The public server-side socket.
//!
//! A [`Socket`] owns exactly one [`NativeHandle`] for its whole lifetime and
//! layers the bind/listen/accept progression, the partial-I/O send and
//! receive loops, the length-prefixed framing protocol, and whole-file
//! transfer on top of it. Every operation blocks the calling thread; the
//! crate spawns nothing. Callers wanting concurrency accept a connection
//! and hand the returned `Socket` to their own workers.
//!
//! Sequential calls from one thread observe a consistent byte stream.
//! Nothing here protects two threads driving the same direction of the same
//! socket at once; callers must serialize per-direction access themselves.

use std::ffi::c_int;
use std::fs::File;
use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::path::Path;
use std::time::Duration;

use crate::error::NetError;
use crate::frame;
use crate::handle::NativeHandle;

/// Default pending-connection queue length handed to `listen(2)`.
const LISTEN_BACKLOG: c_int = 128;

/// Ceiling the backlog is clamped to before reaching the kernel.
const BACKLOG_CAP: c_int = 4096;

/// Chunk size for the portable read+send file-transfer fallback.
#[cfg(not(target_os = "linux"))]
const FILE_CHUNK: usize = 64 * 1024;

/// Clamps `backlog` into `[0, BACKLOG_CAP]`.
#[inline]
fn clamp_backlog(backlog: c_int) -> c_int {
    backlog.clamp(0, BACKLOG_CAP)
}

/// Where a socket sits in its lifecycle.
///
/// `Closed` is terminal and reachable from every other state via
/// [`Socket::close`] or drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Freshly created, not yet bound.
    Created,
    /// Bound and listening; produces children via [`Socket::accept_client`].
    Listening,
    /// An established connection (the accept path).
    Connected,
    /// Handle released; every data-plane call fails `InvalidHandle`.
    Closed,
}

/// Blocking IPv6 TCP socket with exclusive handle ownership.
///
/// Move-only: the borrow checker enforces single ownership of the
/// underlying descriptor, so no two live sockets can double-release it.
/// The three option flags record the last value requested, not the value
/// the OS would report back.
#[derive(Debug)]
pub struct Socket {
    handle: NativeHandle,
    state: SocketState,
    reuse_address: bool,
    keep_alive: bool,
    non_blocking: bool,
    listen_backlog: c_int,
}

impl Socket {
    /// Creates a socket backed by a fresh IPv6 stream descriptor.
    pub fn new() -> Result<Self, NetError> {
        let handle = NativeHandle::create()
            .map_err(|source| NetError::System { op: "socket", source })?;
        Ok(Socket {
            handle,
            state: SocketState::Created,
            reuse_address: false,
            keep_alive: false,
            non_blocking: false,
            listen_backlog: LISTEN_BACKLOG,
        })
    }

    /// Wraps an already-accepted handle as a connected peer.
    pub fn from_handle(handle: NativeHandle) -> Self {
        let state = if handle.is_valid() {
            SocketState::Connected
        } else {
            SocketState::Closed
        };
        Socket {
            handle,
            state,
            reuse_address: false,
            keep_alive: false,
            non_blocking: false,
            listen_backlog: LISTEN_BACKLOG,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Whether the underlying handle is still owned and open.
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Releases the handle now instead of at drop. Idempotent; every
    /// subsequent operation on this socket fails with `InvalidHandle`.
    pub fn close(&mut self) {
        self.handle.close();
        self.state = SocketState::Closed;
    }

    #[inline]
    fn require_valid(&self) -> Result<(), NetError> {
        if self.handle.is_valid() {
            Ok(())
        } else {
            Err(NetError::InvalidHandle)
        }
    }

    // -----------------------------------------------------------------------
    // Options
    // -----------------------------------------------------------------------

    /// Toggles `SO_REUSEADDR`.
    pub fn set_reuse_address(&mut self, enable: bool) -> Result<(), NetError> {
        self.require_valid()?;
        if self.handle.set_reuse_address(enable) < 0 {
            return Err(NetError::last_os("setsockopt(SO_REUSEADDR)"));
        }
        self.reuse_address = enable;
        Ok(())
    }

    /// Toggles `SO_KEEPALIVE`.
    pub fn set_keep_alive(&mut self, enable: bool) -> Result<(), NetError> {
        self.require_valid()?;
        if self.handle.set_keep_alive(enable) < 0 {
            return Err(NetError::last_os("setsockopt(SO_KEEPALIVE)"));
        }
        self.keep_alive = enable;
        Ok(())
    }

    /// Toggles `O_NONBLOCK`. The send/receive loops here assume a blocking
    /// socket; flipping this is an extension point for callers bringing
    /// their own readiness handling.
    pub fn set_non_blocking(&mut self, enable: bool) -> Result<(), NetError> {
        self.require_valid()?;
        if self.handle.set_nonblocking(enable) < 0 {
            return Err(NetError::last_os("fcntl(O_NONBLOCK)"));
        }
        self.non_blocking = enable;
        Ok(())
    }

    /// Last value requested via [`set_reuse_address`](Self::set_reuse_address).
    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    /// Last value requested via [`set_keep_alive`](Self::set_keep_alive).
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Last value requested via [`set_non_blocking`](Self::set_non_blocking).
    pub fn non_blocking(&self) -> bool {
        self.non_blocking
    }

    /// Overrides the pending-connection queue length used by the next
    /// [`bind_and_listen`](Self::bind_and_listen). Out-of-range values are
    /// clamped into `[0, BACKLOG_CAP]` before reaching the kernel.
    pub fn set_listen_backlog(&mut self, backlog: i32) {
        self.listen_backlog = backlog;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Binds to `port` and starts listening.
    ///
    /// `address` of `None` binds the IPv6 wildcard (all interfaces); a
    /// literal that fails to parse is `InvalidArgument`. Port 0 requests an
    /// OS-assigned ephemeral port (readable afterwards via
    /// [`local_addr`](Self::local_addr)). Valid only from `Created`; a
    /// second call is rejected without touching the listening state.
    pub fn bind_and_listen(&mut self, port: u16, address: Option<&str>) -> Result<(), NetError> {
        self.require_valid()?;
        if self.state != SocketState::Created {
            return Err(NetError::InvalidArgument(format!(
                "bind_and_listen on a socket in state {:?}",
                self.state
            )));
        }

        let addr = match address {
            None => Ipv6Addr::UNSPECIFIED,
            Some(text) => text.parse::<Ipv6Addr>().map_err(|_| {
                NetError::InvalidArgument(format!("invalid IPv6 address literal: {text:?}"))
            })?,
        };

        if self.handle.bind(addr, port) < 0 {
            return Err(NetError::last_os("bind"));
        }
        if self.handle.listen(clamp_backlog(self.listen_backlog)) < 0 {
            return Err(NetError::last_os("listen"));
        }
        self.state = SocketState::Listening;
        Ok(())
    }

    /// The locally bound address, including the OS-assigned port after a
    /// port-0 bind.
    pub fn local_addr(&self) -> Result<SocketAddrV6, NetError> {
        self.require_valid()?;
        self.handle
            .local_addr()
            .map_err(|source| NetError::System { op: "getsockname", source })
    }

    /// Blocks until a peer connects, returning a new `Socket` that owns the
    /// accepted descriptor.
    ///
    /// Acceptance is a factory operation: the child is independent and the
    /// listener is not mutated. Fails with `InvalidHandle` unless this
    /// socket is listening on a valid handle.
    pub fn accept_client(&self) -> Result<Socket, NetError> {
        if !self.handle.is_valid() || self.state != SocketState::Listening {
            return Err(NetError::InvalidHandle);
        }
        let peer = self.handle.accept();
        if !peer.is_valid() {
            return Err(NetError::last_os("accept"));
        }
        Ok(Socket::from_handle(peer))
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Sends all of `buf`, looping across partial writes.
    ///
    /// An empty buffer is a silent no-op. Zero bytes accepted by the kernel
    /// means the peer closed (`PeerClosed`); a negative return is
    /// `SystemError`. With `timeout` set, `SO_SNDTIMEO` is applied for this
    /// call only, so a stalled peer surfaces as a `SystemError` (timed out /
    /// would block) instead of blocking forever; the deadline is cleared
    /// again before returning. `None` is the fully blocking baseline.
    pub fn send_data(&self, buf: &[u8], timeout: Option<Duration>) -> Result<(), NetError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.require_valid()?;
        let Some(t) = timeout else {
            return self.send_all(buf);
        };

        if self.handle.set_send_timeout(t) < 0 {
            return Err(NetError::last_os("setsockopt(SO_SNDTIMEO)"));
        }
        let result = self.send_all(buf);
        // A zero timeout restores the fully blocking baseline; later calls
        // must not inherit this call's deadline.
        let restore = self.handle.set_send_timeout(Duration::ZERO);
        match result {
            Ok(()) if restore < 0 => Err(NetError::last_os("setsockopt(SO_SNDTIMEO)")),
            other => other,
        }
    }

    /// Partial-write accumulation loop shared by the send paths.
    fn send_all(&self, buf: &[u8]) -> Result<(), NetError> {
        let mut sent = 0usize;
        while sent < buf.len() {
            let n = self.handle.send(&buf[sent..]);
            if n > 0 {
                sent += n as usize;
            } else if n == 0 {
                return Err(NetError::PeerClosed { during: "send" });
            } else {
                return Err(NetError::last_os("send"));
            }
        }
        Ok(())
    }

    /// Receives exactly `len` bytes, accumulating across partial reads.
    ///
    /// The connection closing before `len` bytes arrive is `PeerClosed`.
    pub fn recv_exact(&self, len: usize) -> Result<Vec<u8>, NetError> {
        self.require_valid()?;
        let mut buf = vec![0u8; len];
        self.recv_full(&mut buf, "fixed-size read")?;
        Ok(buf)
    }

    /// Receives one length-prefixed frame and returns its payload.
    ///
    /// Reads the 4-byte network-order header first; a decoded length of
    /// zero returns an empty buffer with no further read. The peer closing
    /// during the header and during the payload are reported as distinct
    /// `PeerClosed` phases. Lengths above
    /// [`MAX_FRAME_LEN`](crate::frame::MAX_FRAME_LEN) are rejected before
    /// any allocation.
    pub fn recv_frame(&self) -> Result<Vec<u8>, NetError> {
        self.require_valid()?;

        let mut header = [0u8; frame::HEADER_LEN];
        self.recv_full(&mut header, "frame header read")?;
        let len = frame::decode_header(header);

        if len == 0 {
            return Ok(Vec::new());
        }
        let len = frame::check_len(len as usize).ok_or_else(|| {
            NetError::InvalidArgument(format!(
                "frame length {len} exceeds maximum {}",
                frame::MAX_FRAME_LEN
            ))
        })?;

        let mut payload = vec![0u8; len as usize];
        self.recv_full(&mut payload, "frame payload read")?;
        Ok(payload)
    }

    /// Sends `payload` as one length-prefixed frame. An empty payload is a
    /// legal empty frame (header only).
    pub fn send_frame(&self, payload: &[u8]) -> Result<(), NetError> {
        self.require_valid()?;
        let len = frame::check_len(payload.len()).ok_or_else(|| {
            NetError::InvalidArgument(format!(
                "payload of {} bytes exceeds maximum frame length {}",
                payload.len(),
                frame::MAX_FRAME_LEN
            ))
        })?;
        self.send_all(&frame::encode_header(len))?;
        if !payload.is_empty() {
            self.send_all(payload)?;
        }
        Ok(())
    }

    /// Partial-read accumulation loop shared by the receive paths.
    fn recv_full(&self, buf: &mut [u8], during: &'static str) -> Result<(), NetError> {
        let mut received = 0usize;
        while received < buf.len() {
            let n = self.handle.recv(&mut buf[received..]);
            if n > 0 {
                received += n as usize;
            } else if n == 0 {
                return Err(NetError::PeerClosed { during });
            } else {
                return Err(NetError::last_os("recv"));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // File transfer
    // -----------------------------------------------------------------------

    /// Sends the whole current length of the file at `path` to the peer.
    ///
    /// On Linux this is `sendfile(2)`: a kernel-to-kernel copy from the
    /// file descriptor into the socket that never stages bytes through
    /// user space, looping on partial completions and transparently
    /// retrying `EAGAIN`. Other platforms fall back to a read+send loop.
    /// The file descriptor is released on every exit path. Returns the
    /// number of bytes transferred; a zero-length file sends nothing.
    pub fn send_file(&self, path: &Path) -> Result<u64, NetError> {
        self.require_valid()?;
        let file = File::open(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                NetError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                NetError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let len = file
            .metadata()
            .map_err(|source| NetError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        self.transfer_file(file, len, path)
    }

    #[cfg(target_os = "linux")]
    fn transfer_file(&self, file: File, len: u64, path: &Path) -> Result<u64, NetError> {
        use std::os::fd::AsRawFd;

        let file_fd = file.as_raw_fd();
        let mut offset: u64 = 0;
        while offset < len {
            let remaining = (len - offset).min(usize::MAX as u64) as usize;
            let n = self.handle.sendfile(file_fd, &mut offset, remaining);
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    continue;
                }
                return Err(NetError::System {
                    op: "sendfile",
                    source: err,
                });
            }
            if n == 0 {
                // The file shrank under us; the transfer cannot complete.
                return Err(NetError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file truncated during transfer",
                    ),
                });
            }
            // offset was advanced by the kernel.
        }
        Ok(len)
    }

    #[cfg(not(target_os = "linux"))]
    fn transfer_file(&self, mut file: File, len: u64, path: &Path) -> Result<u64, NetError> {
        use std::io::Read;

        let mut chunk = [0u8; FILE_CHUNK];
        let mut sent = 0u64;
        while sent < len {
            let n = file.read(&mut chunk).map_err(|source| NetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if n == 0 {
                return Err(NetError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file truncated during transfer",
                    ),
                });
            }
            self.send_all(&chunk[..n])?;
            sent += n as u64;
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Backlog clamping ---------------------------------------------------

    #[test]
    fn backlog_clamp_normal() {
        assert_eq!(clamp_backlog(0), 0);
        assert_eq!(clamp_backlog(1), 1);
        assert_eq!(clamp_backlog(LISTEN_BACKLOG), LISTEN_BACKLOG);
        assert_eq!(clamp_backlog(BACKLOG_CAP), BACKLOG_CAP);
    }

    #[test]
    fn backlog_clamp_out_of_range() {
        assert_eq!(clamp_backlog(-1), 0);
        assert_eq!(clamp_backlog(c_int::MIN), 0);
        assert_eq!(clamp_backlog(BACKLOG_CAP + 1), BACKLOG_CAP);
        assert_eq!(clamp_backlog(c_int::MAX), BACKLOG_CAP);
    }

    // -- State gating -------------------------------------------------------

    #[test]
    fn accept_before_listen_is_rejected() {
        let sock = Socket::new().expect("socket");
        assert!(matches!(
            sock.accept_client(),
            Err(NetError::InvalidHandle)
        ));
    }

    #[test]
    fn bind_and_listen_twice_is_rejected() {
        let mut sock = Socket::new().expect("socket");
        sock.bind_and_listen(0, Some("::1")).expect("first bind");
        assert_eq!(sock.state(), SocketState::Listening);

        let err = sock.bind_and_listen(0, Some("::1")).unwrap_err();
        assert!(matches!(err, NetError::InvalidArgument(_)));
        // The listener must survive the rejected call intact.
        assert_eq!(sock.state(), SocketState::Listening);
        assert!(sock.is_valid());
    }

    #[test]
    fn bad_address_literal_is_invalid_argument() {
        let mut sock = Socket::new().expect("socket");
        let err = sock.bind_and_listen(0, Some("not-an-address")).unwrap_err();
        assert!(matches!(err, NetError::InvalidArgument(_)));
        assert_eq!(sock.state(), SocketState::Created);
    }

    #[test]
    fn out_of_range_backlog_is_clamped_before_listen() {
        // listen(2) would reject a negative backlog on some platforms; the
        // clamp must make both extremes safe to pass through.
        let mut sock = Socket::new().expect("socket");
        sock.set_listen_backlog(-5);
        sock.bind_and_listen(0, Some("::1")).expect("bind with clamped backlog");
        assert_eq!(sock.state(), SocketState::Listening);

        let mut sock = Socket::new().expect("socket");
        sock.set_listen_backlog(c_int::MAX);
        sock.bind_and_listen(0, Some("::1")).expect("bind with capped backlog");
        assert_eq!(sock.state(), SocketState::Listening);
    }

    #[test]
    fn ephemeral_port_is_reported() {
        let mut sock = Socket::new().expect("socket");
        sock.bind_and_listen(0, Some("::1")).expect("bind");
        let addr = sock.local_addr().expect("local_addr");
        assert_ne!(addr.port(), 0);
        assert_eq!(*addr.ip(), Ipv6Addr::LOCALHOST);
    }

    // -- Invalid-handle gating ----------------------------------------------

    #[test]
    fn closed_socket_rejects_every_data_op() {
        let mut sock = Socket::new().expect("socket");
        sock.close();
        assert_eq!(sock.state(), SocketState::Closed);
        assert!(!sock.is_valid());

        assert!(matches!(
            sock.send_data(b"x", None),
            Err(NetError::InvalidHandle)
        ));
        assert!(matches!(sock.recv_exact(1), Err(NetError::InvalidHandle)));
        assert!(matches!(sock.recv_frame(), Err(NetError::InvalidHandle)));
        assert!(matches!(
            sock.send_frame(b"x"),
            Err(NetError::InvalidHandle)
        ));
        assert!(matches!(
            sock.send_file(Path::new("/etc/hostname")),
            Err(NetError::InvalidHandle)
        ));
        assert!(matches!(
            sock.set_reuse_address(true),
            Err(NetError::InvalidHandle)
        ));
        assert!(matches!(sock.local_addr(), Err(NetError::InvalidHandle)));

        // Close again and drop: both no-ops, no double release.
        sock.close();
    }

    #[test]
    fn empty_send_is_a_no_op_even_when_closed() {
        let mut sock = Socket::new().expect("socket");
        sock.close();
        // Matches the original contract: nothing to send, nothing to fail.
        assert!(sock.send_data(&[], None).is_ok());
    }

    // -- Options ------------------------------------------------------------

    #[test]
    fn option_setters_record_requested_values() {
        let mut sock = Socket::new().expect("socket");
        assert!(!sock.reuse_address());
        sock.set_reuse_address(true).expect("SO_REUSEADDR");
        assert!(sock.reuse_address());

        sock.set_keep_alive(true).expect("SO_KEEPALIVE");
        assert!(sock.keep_alive());

        sock.set_non_blocking(true).expect("O_NONBLOCK");
        assert!(sock.non_blocking());
        sock.set_non_blocking(false).expect("O_NONBLOCK off");
        assert!(!sock.non_blocking());
    }
}
