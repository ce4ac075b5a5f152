//! # refstore-net
//!
//! Server-side blocking TCP transport for refstore. One [`Socket`] owns one
//! kernel descriptor for its whole lifetime; on top of the raw byte stream it
//! speaks a length-prefixed framing protocol so callers exchange discrete
//! messages, and it ships whole files through the kernel's zero-copy path.
//!
//! The crate is deliberately synchronous: every operation blocks the calling
//! thread until it completes or fails. Concurrency (one worker per accepted
//! connection, for instance) is the caller's business.
//!
//! All platform-specific descriptor handling is confined to the [`handle`]
//! module; nothing else in the crate issues a syscall directly.

pub mod error;
pub mod frame;
pub mod handle;
pub mod socket;

pub use error::NetError;
pub use handle::NativeHandle;
pub use socket::{Socket, SocketState};
