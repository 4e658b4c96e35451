//! Frame Descriptor
//!
//! Buffer sizing for the named allocation contexts the stack goes through.
//! The outer protocol dictates how much headroom its framing needs; the
//! stack only asks for a correctly sized buffer.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Named buffer allocation contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContext {
    /// Wrapping an outgoing sequenced packet with outer-protocol framing
    Encapsulate,
    /// Building a standalone ACK packet
    WriteAckStandalone,
    /// Reading decrypted cleartext out of the SSL engine
    ReadSslCleartext,
}

/// Buffer sizing for one context
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BufferSpec {
    /// Bytes reserved in front of the payload for framing
    pub headroom: usize,
    /// Maximum payload size
    pub payload: usize,
    /// Bytes reserved behind the payload
    pub tailroom: usize,
}

impl BufferSpec {
    /// Total capacity a buffer for this context needs
    pub fn capacity(&self) -> usize {
        self.headroom + self.payload + self.tailroom
    }
}

/// Per-context buffer sizing for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sizing for outgoing encapsulation
    pub encapsulate: BufferSpec,
    /// Sizing for standalone ACK packets
    pub write_ack_standalone: BufferSpec,
    /// Sizing for SSL cleartext reads
    pub read_ssl_cleartext: BufferSpec,
}

impl Default for Frame {
    fn default() -> Self {
        // Sized for a typical 1500-byte MTU link
        Self {
            encapsulate: BufferSpec {
                headroom: 64,
                payload: 1500,
                tailroom: 16,
            },
            write_ack_standalone: BufferSpec {
                headroom: 64,
                payload: 128,
                tailroom: 16,
            },
            read_ssl_cleartext: BufferSpec {
                headroom: 0,
                payload: 1500,
                tailroom: 0,
            },
        }
    }
}

impl Frame {
    /// Sizing for a context
    pub fn spec(&self, ctx: FrameContext) -> &BufferSpec {
        match ctx {
            FrameContext::Encapsulate => &self.encapsulate,
            FrameContext::WriteAckStandalone => &self.write_ack_standalone,
            FrameContext::ReadSslCleartext => &self.read_ssl_cleartext,
        }
    }

    /// Allocate a buffer sized for a context
    pub fn prepare(&self, ctx: FrameContext) -> BytesMut {
        BytesMut::with_capacity(self.spec(ctx).capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_capacity() {
        let frame = Frame::default();
        let buf = frame.prepare(FrameContext::Encapsulate);
        assert!(buf.capacity() >= frame.encapsulate.capacity());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_spec_lookup() {
        let frame = Frame::default();
        assert_eq!(
            frame.spec(FrameContext::ReadSslCleartext).payload,
            frame.read_ssl_cleartext.payload
        );
    }
}
