//! Reliability Layer
//!
//! Sliding send/receive windows and ACK bookkeeping for a sequenced message
//! stream over a datagram transport that may drop, duplicate, or reorder.
//! All time-dependent operations take the current instant as an argument so
//! hosts and tests control the clock.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::packet::{Packet, PacketId};

/// Configuration for the reliability layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliableConfig {
    /// Initial retransmit timeout
    pub initial_rto: Duration,
    /// Maximum retransmit timeout
    pub max_rto: Duration,
    /// RTO backoff multiplier
    pub rto_backoff: f64,
    /// Window size (max outstanding packets in each direction)
    pub window_size: u32,
    /// Capacity of the outstanding-ACK queue
    pub max_ack_list: usize,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_secs(2),
            max_rto: Duration::from_secs(60),
            rto_backoff: 2.0,
            window_size: 8,
            max_ack_list: 4,
        }
    }
}

/// Outgoing sequenced message awaiting acknowledgment
#[derive(Debug)]
pub struct SendMessage {
    /// Sequence ID
    pub id: PacketId,
    /// Encapsulated packet, re-emitted verbatim on retransmission
    pub packet: Packet,
    /// Time of first transmission
    sent_at: Instant,
    /// Next retransmit time
    next_retransmit: Instant,
    /// Current RTO
    rto: Duration,
    /// Retransmit count
    retransmits: u32,
}

impl SendMessage {
    /// Whether the retransmit timer has expired
    pub fn ready_retransmit(&self, now: Instant) -> bool {
        now >= self.next_retransmit
    }
}

/// Outgoing sliding window of sequenced messages
///
/// IDs are strictly increasing and never reused. A message stays in the
/// window until its ID is acknowledged; the window slides forward only when
/// the head is removed.
pub struct SendWindow {
    config: ReliableConfig,
    /// Next sequence ID to assign
    next_id: PacketId,
    /// Outstanding messages, keyed (and iterated) in ID order
    messages: BTreeMap<PacketId, SendMessage>,
    /// Smoothed RTT (for RTO calculation)
    srtt: Option<Duration>,
    /// RTT variation
    rttvar: Duration,
}

impl SendWindow {
    /// Create an empty window
    pub fn new(config: &ReliableConfig) -> Self {
        Self {
            config: config.clone(),
            next_id: 0,
            messages: BTreeMap::new(),
            srtt: None,
            rttvar: Duration::from_millis(500),
        }
    }

    /// Whether the window has room for another message
    pub fn ready(&self) -> bool {
        self.messages.len() < self.config.window_size as usize
    }

    /// Allocate the next slot and return it for filling
    ///
    /// The caller is expected to check [`SendWindow::ready`] first; sending
    /// into a full window still allocates (the span bound is the caller's
    /// contract, not a hard limit here).
    pub fn send(&mut self, now: Instant) -> &mut SendMessage {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let rto = self.calculate_rto();
        match self.messages.entry(id) {
            Entry::Vacant(slot) => slot.insert(SendMessage {
                id,
                packet: Packet::new(),
                sent_at: now,
                next_retransmit: now + rto,
                rto,
                retransmits: 0,
            }),
            // IDs are never reused, so the slot is always vacant
            Entry::Occupied(slot) => slot.into_mut(),
        }
    }

    /// Remove an acknowledged message; out-of-order ACKs are fine
    pub fn ack(&mut self, id: PacketId, now: Instant) {
        if let Some(msg) = self.messages.remove(&id) {
            // Only first-transmission ACKs feed the RTT estimate (Karn)
            if msg.retransmits == 0 {
                self.update_rtt(now.saturating_duration_since(msg.sent_at));
            }
        }
    }

    /// Time until the earliest retransmit is due; `None` when empty
    pub fn until_retransmit(&self, now: Instant) -> Option<Duration> {
        self.messages
            .values()
            .map(|m| m.next_retransmit)
            .min()
            .map(|t| t.saturating_duration_since(now))
    }

    /// IDs whose retransmit timer has expired, in ID order
    pub fn due_ids(&self, now: Instant) -> Vec<PacketId> {
        self.messages
            .values()
            .filter(|m| m.ready_retransmit(now))
            .map(|m| m.id)
            .collect()
    }

    /// Borrow the stored packet for a message
    pub fn packet(&self, id: PacketId) -> Option<&Packet> {
        self.messages.get(&id).map(|m| &m.packet)
    }

    /// Back off and re-arm a message's retransmit timer
    pub fn mark_retransmitted(&mut self, id: PacketId, now: Instant) {
        let max_rto = self.config.max_rto;
        let backoff = self.config.rto_backoff;
        if let Some(msg) = self.messages.get_mut(&id) {
            msg.retransmits += 1;
            msg.rto = Duration::from_secs_f64(
                (msg.rto.as_secs_f64() * backoff).min(max_rto.as_secs_f64()),
            );
            msg.next_retransmit = now + msg.rto;
        }
    }

    /// Whether any messages are outstanding
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of outstanding messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    fn calculate_rto(&self) -> Duration {
        match self.srtt {
            Some(srtt) => {
                // RTO = SRTT + 4 * RTTVAR (RFC 6298)
                let rto = srtt + self.rttvar * 4;
                rto.max(self.config.initial_rto).min(self.config.max_rto)
            }
            None => self.config.initial_rto,
        }
    }

    fn update_rtt(&mut self, rtt: Duration) {
        match self.srtt {
            Some(srtt) => {
                // RTTVAR = (1 - beta) * RTTVAR + beta * |SRTT - R|
                // SRTT = (1 - alpha) * SRTT + alpha * R
                // where alpha = 1/8, beta = 1/4
                let diff = if rtt > srtt { rtt - srtt } else { srtt - rtt };
                self.rttvar = Duration::from_secs_f64(
                    0.75 * self.rttvar.as_secs_f64() + 0.25 * diff.as_secs_f64(),
                );
                self.srtt = Some(Duration::from_secs_f64(
                    0.875 * srtt.as_secs_f64() + 0.125 * rtt.as_secs_f64(),
                ));
            }
            None => {
                // First RTT measurement
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
        }
    }
}

/// Incoming reorder buffer
///
/// Accepts packets with IDs in `[expected, expected + window_size)`, buffers
/// them, and releases them strictly in ID order, each at most once.
pub struct RecvWindow {
    /// Next ID to deliver
    expected: PacketId,
    /// Window span
    window_size: u32,
    /// Out-of-order buffer
    buffer: BTreeMap<PacketId, Packet>,
}

impl RecvWindow {
    /// Create a window expecting ID 0
    pub fn new(config: &ReliableConfig) -> Self {
        Self {
            expected: 0,
            window_size: config.window_size,
            buffer: BTreeMap::new(),
        }
    }

    /// Offer a received packet
    ///
    /// Returns whether it was accepted. Packets below the window (already
    /// delivered), beyond it, or already buffered are dropped.
    pub fn accept(&mut self, id: PacketId, packet: Packet) -> bool {
        // Relative distance also rejects IDs below the window (huge wrapped
        // offsets fall outside the span)
        if id.wrapping_sub(self.expected) >= self.window_size {
            return false;
        }
        match self.buffer.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(packet);
                true
            }
        }
    }

    /// Whether the next in-order packet is present
    pub fn ready(&self) -> bool {
        self.buffer.contains_key(&self.expected)
    }

    /// Borrow the next in-order packet, if present
    pub fn next_sequenced(&mut self) -> Option<&mut Packet> {
        let expected = self.expected;
        self.buffer.get_mut(&expected)
    }

    /// Slide the window forward past the current head
    pub fn advance(&mut self) {
        self.buffer.remove(&self.expected);
        self.expected = self.expected.wrapping_add(1);
    }

    /// ID the window will deliver next
    pub fn expected_id(&self) -> PacketId {
        self.expected
    }
}

/// Bounded FIFO of received IDs owed back to the peer as ACKs
pub struct AckTracker {
    ids: VecDeque<PacketId>,
    capacity: usize,
}

impl AckTracker {
    /// Create a tracker with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue an ID for acknowledgment
    pub fn push(&mut self, id: PacketId) {
        self.ids.push_back(id);
    }

    /// Whether any ACKs are owed
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the tracker has reached capacity
    ///
    /// The stack engine reacts by forcing standalone ACK emission.
    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    /// Number of ACKs owed
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Drain up to `max` IDs from the front, oldest first
    pub fn take(&mut self, max: usize) -> Vec<PacketId> {
        let n = max.min(self.ids.len());
        self.ids.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn config() -> ReliableConfig {
        ReliableConfig::default()
    }

    #[test]
    fn test_send_window_basic() {
        let now = Instant::now();
        let mut window = SendWindow::new(&config());

        let msg = window.send(now);
        assert_eq!(msg.id, 0);
        msg.packet = Packet::from_bytes(Bytes::from_static(b"hello"));
        assert!(!window.is_empty());

        window.ack(0, now + Duration::from_millis(30));
        assert!(window.is_empty());
        assert_eq!(window.until_retransmit(now), None);
    }

    #[test]
    fn test_send_window_ids_strictly_increase() {
        let now = Instant::now();
        let mut window = SendWindow::new(&config());
        for expected in 0..5u32 {
            assert_eq!(window.send(now).id, expected);
        }
    }

    #[test]
    fn test_send_window_fills_at_span() {
        let now = Instant::now();
        let mut window = SendWindow::new(&config());
        for _ in 0..config().window_size {
            assert!(window.ready());
            window.send(now);
        }
        assert!(!window.ready());

        // ACKing the head makes room again
        window.ack(0, now);
        assert!(window.ready());
    }

    #[test]
    fn test_out_of_order_ack_does_not_slide_past_head() {
        let now = Instant::now();
        let mut window = SendWindow::new(&config());
        window.send(now);
        window.send(now);
        window.send(now);

        window.ack(1, now);
        assert_eq!(window.len(), 2);
        assert!(window.packet(0).is_some());
        assert!(window.packet(1).is_none());
        assert!(window.packet(2).is_some());
    }

    #[test]
    fn test_retransmit_backoff() {
        let now = Instant::now();
        let cfg = config();
        let mut window = SendWindow::new(&cfg);
        window.send(now);

        assert_eq!(window.until_retransmit(now), Some(cfg.initial_rto));
        assert!(window.due_ids(now).is_empty());

        let due = now + cfg.initial_rto;
        assert_eq!(window.due_ids(due), vec![0]);

        window.mark_retransmitted(0, due);
        // Timer doubled
        assert_eq!(window.until_retransmit(due), Some(cfg.initial_rto * 2));
    }

    #[test]
    fn test_due_ids_in_id_order() {
        let now = Instant::now();
        let cfg = config();
        let mut window = SendWindow::new(&cfg);
        for _ in 0..4 {
            window.send(now);
        }
        assert_eq!(window.due_ids(now + cfg.initial_rto), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_recv_window_reorder() {
        let mut window = RecvWindow::new(&config());

        assert!(window.accept(2, Packet::from_bytes(Bytes::from_static(b"third"))));
        assert!(!window.ready());

        assert!(window.accept(0, Packet::from_bytes(Bytes::from_static(b"first"))));
        assert!(window.ready());
        assert_eq!(window.next_sequenced().unwrap().bytes(), b"first");
        window.advance();

        // Gap at 1
        assert!(!window.ready());
        assert!(window.accept(1, Packet::from_bytes(Bytes::from_static(b"second"))));
        assert_eq!(window.next_sequenced().unwrap().bytes(), b"second");
        window.advance();
        assert_eq!(window.next_sequenced().unwrap().bytes(), b"third");
        window.advance();
        assert_eq!(window.expected_id(), 3);
    }

    #[test]
    fn test_recv_window_rejects_duplicates_and_out_of_window() {
        let mut window = RecvWindow::new(&config());

        assert!(window.accept(0, Packet::from_bytes(Bytes::from_static(b"a"))));
        // Duplicate while still buffered
        assert!(!window.accept(0, Packet::from_bytes(Bytes::from_static(b"a"))));

        window.advance();
        // Replay of a delivered ID
        assert!(!window.accept(0, Packet::from_bytes(Bytes::from_static(b"a"))));
        // Beyond the window span
        let beyond = 1 + config().window_size;
        assert!(!window.accept(beyond, Packet::from_bytes(Bytes::from_static(b"b"))));
    }

    #[test]
    fn test_ack_tracker_fifo_drain() {
        let mut tracker = AckTracker::new(4);
        for id in 0..4 {
            tracker.push(id);
        }
        assert!(tracker.is_full());

        assert_eq!(tracker.take(2), vec![0, 1]);
        assert!(!tracker.is_full());
        assert_eq!(tracker.take(10), vec![2, 3]);
        assert!(tracker.is_empty());
    }
}
