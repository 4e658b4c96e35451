//! Packet Abstraction
//!
//! Opaque carrier of a byte buffer plus routing metadata. The stack engine
//! never looks inside the buffer; framing is the outer protocol's business.

use bytes::Bytes;

/// Packet ID (4 bytes) used by the reliability layer
///
/// Monotonically increasing within a session; wraparound is not expected
/// before the session is torn down.
pub type PacketId = u32;

/// A packet moving through the stack
///
/// A packet is either *defined* (carries a buffer, possibly empty) or
/// *undefined* (default state, and the state after [`Packet::reset`]).
/// The `raw` flag marks sequenced control packets that bypass the SSL
/// engine; it is authoritative for routing on the receive side.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    buf: Option<Bytes>,
    raw: bool,
}

impl Packet {
    /// Create an undefined packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet carrying SSL ciphertext
    pub fn from_bytes(buf: Bytes) -> Self {
        Self {
            buf: Some(buf),
            raw: false,
        }
    }

    /// Create a raw (non-SSL, but still sequenced) packet
    pub fn raw_from_bytes(buf: Bytes) -> Self {
        Self {
            buf: Some(buf),
            raw: true,
        }
    }

    /// Whether the packet carries a buffer
    pub fn is_defined(&self) -> bool {
        self.buf.is_some()
    }

    /// Whether the packet bypasses the SSL engine
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Mark the packet raw or non-raw
    pub fn set_raw(&mut self, raw: bool) {
        self.raw = raw;
    }

    /// Borrow the payload; empty slice when undefined
    pub fn bytes(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Replace the payload, leaving the raw flag untouched
    pub fn set_bytes(&mut self, buf: Bytes) {
        self.buf = Some(buf);
    }

    /// Move the payload out, leaving the packet undefined
    pub fn take_bytes(&mut self) -> Bytes {
        self.buf.take().unwrap_or_default()
    }

    /// Consume the packet, yielding its payload
    pub fn into_bytes(self) -> Bytes {
        self.buf.unwrap_or_default()
    }

    /// Return to the undefined state
    pub fn reset(&mut self) {
        self.buf = None;
        self.raw = false;
    }

    /// Payload length in bytes; zero when undefined
    pub fn len(&self) -> usize {
        self.buf.as_ref().map(Bytes::len).unwrap_or(0)
    }

    /// Whether the payload is empty or undefined
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
