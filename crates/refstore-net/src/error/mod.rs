//! Transport error taxonomy.
//!
//! Five failure kinds, checked at every call site rather than caught
//! opportunistically. `System` always carries the originating `io::Error`,
//! so the raw OS code stays available via
//! [`raw_os_error`](std::io::Error::raw_os_error). The crate performs no
//! retries of its own (partial-I/O accumulation and the `EAGAIN` loop inside
//! the zero-copy transfer are continuations, not retries) and never logs or
//! downgrades a failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// Operation attempted on a socket whose handle was never created,
    /// already moved out, or already closed.
    #[error("invalid socket handle")]
    InvalidHandle,

    /// Malformed input, e.g. an IPv6 literal that does not parse or a frame
    /// length above [`MAX_FRAME_LEN`](crate::frame::MAX_FRAME_LEN).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying OS call failed. `op` names the call so that, e.g.,
    /// a bind failure and a listen failure are distinguishable.
    #[error("{op} failed: {source}")]
    System {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The remote end closed the connection while more data was still
    /// expected. `during` names the phase (header read, payload read, send)
    /// so a truncated frame is reportable as such.
    #[error("connection closed by peer during {during}")]
    PeerClosed { during: &'static str },

    /// `send_file` could not find the file.
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// `send_file` failed against the local file for a reason other than
    /// absence.
    #[error("file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl NetError {
    /// Wraps the thread's last OS error as a `System` failure for `op`.
    pub(crate) fn last_os(op: &'static str) -> Self {
        NetError::System {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// The raw OS error code, when this failure carries one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            NetError::System { source, .. } | NetError::Io { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_error_keeps_os_code() {
        let err = NetError::System {
            op: "bind",
            source: io::Error::from_raw_os_error(libc::EADDRINUSE),
        };
        assert_eq!(err.os_code(), Some(libc::EADDRINUSE));
        assert!(err.to_string().starts_with("bind failed"));
    }

    #[test]
    fn peer_closed_names_the_phase() {
        let err = NetError::PeerClosed {
            during: "frame header read",
        };
        assert_eq!(
            err.to_string(),
            "connection closed by peer during frame header read"
        );
    }

    #[test]
    fn non_system_kinds_have_no_os_code() {
        assert_eq!(NetError::InvalidHandle.os_code(), None);
        assert_eq!(
            NetError::InvalidArgument("bad address".into()).os_code(),
            None
        );
    }
}
