//! Client error type.

use sigma_core::{ProfileError, ProtocolError};
use thiserror::Error;

/// Errors returned by [`crate::SigmaClient`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection and auto-connect is disabled.
    #[error("not connected")]
    NotConnected,

    /// The TCP connection to the bridge could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// A local file could not be resolved, or the established connection
    /// failed (the client is then disconnected).
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// The bridge answered with a frame of the wrong kind.
    #[error("unexpected response opcode 0x{0:02X}")]
    UnexpectedResponse(u8),

    /// A read length does not fit the 32-bit length field.
    #[error("request of {0} bytes is too large")]
    RequestTooLarge(usize),
}
