//! Error taxonomy for zsurface
//!
//! Errors fall into four groups:
//! - **Fatal construction errors** ([`Error::Connect`], [`Error::CompositorNotSupported`]):
//!   the session is unusable and must be dropped.
//! - **Transient I/O conditions** ([`Error::WouldBlock`]): expected during the
//!   readiness protocol, the caller retries.
//! - **Resource errors** ([`Error::AllocFailed`], [`Error::BufferResizeFailed`]):
//!   reported to the operation that triggered them, prior state stays valid.
//! - **Usage errors** ([`Error::InvalidPixelData`], [`Error::Destroyed`], ...).
//!
//! Protocol races never surface here; they are dropped where they are detected.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The compositor socket could not be reached
    #[error("failed to connect to compositor socket {socket:?}")]
    Connect {
        socket: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The initial round-trip did not advertise every required global
    #[error("compositor does not support required globals: {}", missing.join(", "))]
    CompositorNotSupported { missing: Vec<&'static str> },

    /// The operation cannot make progress right now; follow the readiness protocol and retry
    #[error("operation would block")]
    WouldBlock,

    /// `read_events` was called without a successful `prepare_read`
    #[error("read_events called without a prepared read")]
    ReadNotPrepared,

    #[error("connection I/O error")]
    Io(#[from] io::Error),

    /// The connection reported a protocol error and is no longer usable
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Anonymous shared memory could not be created or mapped
    #[error("failed to allocate {size} bytes of shared memory")]
    AllocFailed {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// Growing a view's shared memory region failed; the view is unchanged
    #[error("failed to resize shared buffer to {size} bytes")]
    BufferResizeFailed {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// Pixel slice length does not match `width * height * 4`
    #[error("pixel data has {actual} bytes, expected {expected} for {width}x{height} BGRA")]
    InvalidPixelData {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// The object was already destroyed
    #[error("{0} has already been destroyed")]
    Destroyed(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller should retry after draining events or waiting on the fd
    pub fn is_transient(&self) -> bool {
        match self {
            Error::WouldBlock => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Whether this error can only happen while constructing a session
    pub fn is_fatal_construction(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::CompositorNotSupported { .. }
        )
    }
}
