//! SSL Engine Contract
//!
//! The stack treats the SSL engine as an opaque byte pump with four
//! directional streams: cleartext in, ciphertext out, ciphertext in,
//! cleartext out. Whether the engine operates in packet or stream mode is
//! its own business; each [`SslEngine::read_ciphertext`] result is one
//! outgoing packet.

use bytes::Bytes;

use crate::Result;

/// Outcome of a non-blocking SSL read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslStatus {
    /// Bytes moved; for writes the whole buffer was accepted
    Ready(usize),
    /// Backpressured; try again later (not an error)
    WouldBlock,
}

/// A streaming TLS engine endpoint
///
/// Any `Err` returned from these methods is fatal to the session;
/// [`SslStatus::WouldBlock`] is the non-fatal retry sentinel.
pub trait SslEngine {
    /// Begin the handshake; traffic on the ciphertext side drives it forward
    fn start_handshake(&mut self) -> Result<()>;

    /// Offer application cleartext for encryption
    ///
    /// Either the whole buffer is accepted (`Ready(buf.len())`) or the engine
    /// signals backpressure; partial acceptance is not part of the contract.
    fn write_cleartext(&mut self, buf: &[u8]) -> Result<SslStatus>;

    /// Whether the engine has ciphertext waiting to go out
    fn ciphertext_ready(&self) -> bool;

    /// Pull the next outgoing ciphertext packet, if any
    fn read_ciphertext(&mut self) -> Result<Option<Bytes>>;

    /// Feed one received ciphertext packet into the engine
    fn write_ciphertext(&mut self, buf: &[u8]) -> Result<()>;

    /// Read decrypted cleartext into `buf`
    fn read_cleartext(&mut self, buf: &mut [u8]) -> Result<SslStatus>;
}
