//! Protocol Stack Engine
//!
//! Runs a TLS-like byte-stream session over a datagram transport that may
//! drop, duplicate, or reorder, while multiplexing a second stream of raw
//! (non-encrypted but sequenced) control packets onto the same ID space.
//!
//! The engine coordinates four event sources through one non-reentrant
//! state: network input (`net_recv`), application output (`app_send` /
//! `raw_send` followed by `flush`), SSL handshake progress, and the
//! retransmission timer (`next_retransmit` / `retransmit`). It never parses
//! packet bytes itself; the concrete wire framing lives behind
//! [`StackHooks`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::frame::{Frame, FrameContext};
use crate::packet::{Packet, PacketId};
use crate::reliable::{AckTracker, RecvWindow, ReliableConfig, SendWindow};
use crate::ssl::{SslEngine, SslStatus};
use crate::stats::{StatEvent, StatsSink};
use crate::{ProtocolError, Result};

/// Outer-protocol capability surface
///
/// Four inward behaviors (framing and transmission) plus the upward
/// delivery pair and an invalidation hook. All callbacks run synchronously
/// on the caller's stack.
pub trait StackHooks {
    /// Wrap an outgoing packet with framing carrying `id`
    ///
    /// As many pending ACKs as fit should be drained from `acks` and
    /// piggybacked onto the frame. Errors are fatal to the session.
    fn encapsulate(&mut self, id: PacketId, pkt: &mut Packet, acks: &mut AckTracker)
    -> Result<()>;

    /// Unwrap one received packet
    ///
    /// Expected to verify integrity, absorb peer ACKs into `send`, record
    /// the incoming sequence ID in `acks`, offer the payload to `recv`, and
    /// return whether it was accepted. Errors are per-packet: they propagate
    /// to the `net_recv` caller but leave the session usable.
    fn decapsulate(
        &mut self,
        pkt: Packet,
        now: Instant,
        send: &mut SendWindow,
        recv: &mut RecvWindow,
        acks: &mut AckTracker,
    ) -> Result<bool>;

    /// Build a standalone ACK packet from tracker contents
    ///
    /// Must drain at least one ID so forced emission makes progress.
    /// Errors are fatal to the session.
    fn generate_ack(&mut self, pkt: &mut Packet, acks: &mut AckTracker) -> Result<()>;

    /// Transmit a packet to the peer
    fn net_send(&mut self, pkt: &Packet);

    /// Deliver decrypted application bytes, in peer send order
    fn app_recv(&mut self, data: Bytes);

    /// Deliver a raw packet, in peer send order
    fn raw_recv(&mut self, pkt: Packet);

    /// Called exactly once when the session invalidates
    fn on_invalidate(&mut self) {}
}

/// Reliable SSL-over-datagram protocol stack
///
/// Single-threaded and cooperative: no operation blocks, and the host is
/// responsible for serialized invocation and for arming a timer at
/// [`ProtocolStack::next_retransmit`]. Once invalidated, every entry point
/// is a no-op.
pub struct ProtocolStack<S: SslEngine, H: StackHooks> {
    ssl: S,
    hooks: H,
    frame: Frame,
    stats: Arc<dyn StatsSink>,
    /// Outgoing sequenced window
    rel_send: SendWindow,
    /// Incoming reorder window
    rel_recv: RecvWindow,
    /// IDs owed to the peer
    acks: AckTracker,
    /// Cleartext queued for SSL ingestion
    app_queue: VecDeque<Bytes>,
    /// Raw packets queued for sequencing
    raw_queue: VecDeque<Packet>,
    /// Holding buffer for cleartext coming out of the SSL engine
    to_app_buf: BytesMut,
    ssl_started: bool,
    invalidated: bool,
    next_retransmit: Option<Instant>,
}

impl<S: SslEngine, H: StackHooks> ProtocolStack<S, H> {
    /// Create a stack around an SSL engine and an outer-protocol hook set
    pub fn new(
        ssl: S,
        hooks: H,
        frame: Frame,
        config: &ReliableConfig,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        let to_app_buf = frame.prepare(FrameContext::ReadSslCleartext);
        Self {
            ssl,
            hooks,
            frame,
            stats,
            rel_send: SendWindow::new(config),
            rel_recv: RecvWindow::new(config),
            acks: AckTracker::new(config.max_ack_list),
            app_queue: VecDeque::new(),
            raw_queue: VecDeque::new(),
            to_app_buf,
            ssl_started: false,
            invalidated: false,
            next_retransmit: None,
        }
    }

    /// Begin the SSL handshake
    ///
    /// Ciphertext that arrived and was sequenced before the handshake
    /// started is fed to the SSL engine now.
    pub fn start_handshake(&mut self) -> Result<()> {
        if self.invalidated {
            return Ok(());
        }
        self.ssl_started = true;
        if let Err(e) = self.ssl.start_handshake() {
            return Err(self.fatal(StatEvent::SslError, e));
        }
        self.up_sequenced()
    }

    /// Push one received packet up the stack
    ///
    /// Takes ownership of `pkt`. A decapsulation error propagates to the
    /// caller without invalidating the session; SSL errors encountered
    /// while draining the reorder window are fatal.
    pub fn net_recv(&mut self, pkt: Packet, now: Instant) -> Result<()> {
        if self.invalidated {
            return Ok(());
        }
        self.up_stack(pkt, now)
    }

    /// Queue application cleartext for the next `flush`
    pub fn app_send(&mut self, buf: Bytes) {
        if self.invalidated {
            return;
        }
        self.app_queue.push_back(buf);
    }

    /// Queue a raw packet for the next `flush`
    pub fn raw_send(&mut self, mut pkt: Packet) {
        if self.invalidated {
            return;
        }
        pkt.set_raw(true);
        self.raw_queue.push_back(pkt);
    }

    /// Drain the down path: raw queue first, then app traffic through SSL
    ///
    /// Raw packets go first so control traffic is never head-of-line
    /// blocked behind bulk data waiting on SSL acceptance. Idempotent when
    /// there is nothing to do.
    pub fn flush(&mut self, now: Instant) -> Result<()> {
        if self.invalidated {
            return Ok(());
        }
        self.down_stack_raw(now)?;
        self.down_stack_app(now)?;
        self.update_retransmit(now);
        Ok(())
    }

    /// Emit standalone ACK packets until the tracker is drained
    pub fn send_pending_acks(&mut self) -> Result<()> {
        if self.invalidated {
            return Ok(());
        }
        while !self.acks.is_empty() {
            let mut pkt = Packet::new();
            if let Err(e) = self.hooks.generate_ack(&mut pkt, &mut self.acks) {
                return Err(self.fatal(StatEvent::EncapsulationError, e));
            }
            trace!(remaining = self.acks.len(), "standalone ACK emitted");
            self.hooks.net_send(&pkt);
        }
        Ok(())
    }

    /// Retransmit every message whose timer has expired, in ID order
    ///
    /// The stored post-encapsulation packet is re-emitted verbatim; the
    /// per-message timer backs off per the window's policy.
    pub fn retransmit(&mut self, now: Instant) {
        if self.invalidated {
            return;
        }
        for id in self.rel_send.due_ids(now) {
            if let Some(pkt) = self.rel_send.packet(id) {
                trace!(id, "retransmitting");
                self.hooks.net_send(pkt);
            }
            self.rel_send.mark_retransmitted(id, now);
        }
        self.update_retransmit(now);
    }

    /// When the earliest retransmission is due
    ///
    /// `None` means never: the send window is empty or the session is
    /// invalidated.
    pub fn next_retransmit(&self) -> Option<Instant> {
        if self.invalidated || self.rel_send.is_empty() {
            None
        } else {
            self.next_retransmit
        }
    }

    /// Terminate the session
    ///
    /// Sticky and idempotent; fires [`StackHooks::on_invalidate`] exactly
    /// once. Every public operation becomes a no-op afterwards.
    pub fn invalidate(&mut self) {
        if self.invalidated {
            return;
        }
        self.invalidated = true;
        self.next_retransmit = None;
        warn!("protocol stack invalidated");
        self.hooks.on_invalidate();
    }

    /// Whether the handshake has been started
    pub fn ssl_started(&self) -> bool {
        self.ssl_started
    }

    /// Whether the session has been terminated
    pub fn invalidated(&self) -> bool {
        self.invalidated
    }

    /// Number of ACKs currently owed to the peer
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Cleartext buffers queued and not yet accepted by SSL
    pub fn pending_app(&self) -> usize {
        self.app_queue.len()
    }

    /// Raw packets queued and not yet sequenced
    pub fn pending_raw(&self) -> usize {
        self.raw_queue.len()
    }

    /// Borrow the SSL engine
    pub fn ssl(&self) -> &S {
        &self.ssl
    }

    /// Mutably borrow the SSL engine
    pub fn ssl_mut(&mut self) -> &mut S {
        &mut self.ssl
    }

    /// Borrow the hook set
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Mutably borrow the hook set
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    fn up_stack(&mut self, pkt: Packet, now: Instant) -> Result<()> {
        let accepted = self.hooks.decapsulate(
            pkt,
            now,
            &mut self.rel_send,
            &mut self.rel_recv,
            &mut self.acks,
        )?;
        if accepted {
            self.up_sequenced()?;
        }
        // A tracker at capacity forces standalone emission so the bound
        // holds without any outgoing data traffic to piggyback on
        if self.acks.is_full() {
            debug!(owed = self.acks.len(), "ACK tracker full, forcing standalone ACKs");
            self.send_pending_acks()?;
        }
        Ok(())
    }

    /// Drain the reorder window and the SSL cleartext side
    fn up_sequenced(&mut self) -> Result<()> {
        loop {
            let Some(head) = self.rel_recv.next_sequenced() else {
                break;
            };
            if head.is_raw() {
                let pkt = std::mem::take(head);
                self.rel_recv.advance();
                self.hooks.raw_recv(pkt);
            } else if self.ssl_started {
                let buf = head.take_bytes();
                self.rel_recv.advance();
                if let Err(e) = self.ssl.write_ciphertext(&buf) {
                    return Err(self.fatal(StatEvent::SslError, e));
                }
            } else {
                // Ciphertext stays sequenced in the window until the
                // handshake starts; later packets must not overtake it
                break;
            }
        }
        if self.ssl_started {
            self.drain_ssl_cleartext()?;
        }
        Ok(())
    }

    fn drain_ssl_cleartext(&mut self) -> Result<()> {
        let payload = self.frame.spec(FrameContext::ReadSslCleartext).payload;
        loop {
            self.to_app_buf.resize(payload, 0);
            match self.ssl.read_cleartext(&mut self.to_app_buf) {
                Ok(SslStatus::Ready(0)) => break,
                Ok(SslStatus::Ready(n)) => {
                    let out = self.to_app_buf.split_to(n).freeze();
                    self.hooks.app_recv(out);
                }
                Ok(SslStatus::WouldBlock) => break,
                Err(e) => return Err(self.fatal(StatEvent::SslError, e)),
            }
        }
        self.to_app_buf.clear();
        Ok(())
    }

    fn down_stack_raw(&mut self, now: Instant) -> Result<()> {
        while self.rel_send.ready() {
            let Some(pkt) = self.raw_queue.pop_front() else {
                break;
            };
            self.send_sequenced(pkt, now)?;
        }
        Ok(())
    }

    fn down_stack_app(&mut self, now: Instant) -> Result<()> {
        if !self.ssl_started {
            return Ok(());
        }

        // Offer queued cleartext to the SSL engine; on backpressure the
        // head buffer stays queued for the next flush
        while let Some(buf) = self.app_queue.front() {
            match self.ssl.write_cleartext(buf) {
                Ok(SslStatus::Ready(_)) => {
                    self.app_queue.pop_front();
                }
                Ok(SslStatus::WouldBlock) => break,
                Err(e) => return Err(self.fatal(StatEvent::SslError, e)),
            }
        }

        // Pull produced ciphertext through the send window
        while self.rel_send.ready() && self.ssl.ciphertext_ready() {
            let buf = match self.ssl.read_ciphertext() {
                Ok(Some(buf)) => buf,
                Ok(None) => break,
                Err(e) => return Err(self.fatal(StatEvent::SslError, e)),
            };
            self.send_sequenced(Packet::from_bytes(buf), now)?;
        }
        Ok(())
    }

    /// Allocate a window slot, encapsulate, and transmit one packet
    fn send_sequenced(&mut self, pkt: Packet, now: Instant) -> Result<()> {
        let msg = self.rel_send.send(now);
        msg.packet = pkt;
        let id = msg.id;
        match self.hooks.encapsulate(id, &mut msg.packet, &mut self.acks) {
            Ok(()) => {
                self.hooks.net_send(&msg.packet);
                Ok(())
            }
            Err(e) => Err(self.fatal(StatEvent::EncapsulationError, e)),
        }
    }

    fn update_retransmit(&mut self, now: Instant) {
        self.next_retransmit = self.rel_send.until_retransmit(now).map(|d| now + d);
    }

    /// Record the statistic, terminate the session, and hand the error back
    fn fatal(&mut self, event: StatEvent, err: ProtocolError) -> ProtocolError {
        debug!(error = %err, "fatal protocol error");
        self.stats.record(event);
        self.invalidate();
        err
    }
}
