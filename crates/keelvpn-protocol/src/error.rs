//! Protocol error types

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol errors
///
/// Errors fall into two disciplines. Fatal errors ([`ProtocolError::Ssl`],
/// [`ProtocolError::Encapsulation`]) terminate the session: the stack records
/// a statistic, invalidates itself, and propagates the error. Everything else
/// is a per-packet error: it propagates to the caller of `net_recv` but the
/// session stays usable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// SSL engine failure on either the cleartext or ciphertext side
    #[error("SSL error: {0}")]
    Ssl(String),

    /// Outer-protocol framing failed while wrapping an outgoing packet
    #[error("encapsulation error: {0}")]
    Encapsulation(String),

    /// Invalid packet format
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Packet too short
    #[error("packet too short: expected at least {expected}, got {got}")]
    PacketTooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        got: usize,
    },

    /// Replayed packet detected
    #[error("replay detected")]
    ReplayDetected,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error terminates the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Ssl(_) | ProtocolError::Encapsulation(_))
    }
}
