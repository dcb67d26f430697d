use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use byteorder::{BigEndian, ByteOrder};
use tether_core::{
    config::Config,
    constants::{
        ACK_FRAME_SIZE, ACK_MASK_BITS, RESEND_ESCALATION_CAP_MS, RESEND_INITIAL_CAP_MS,
        RTT_FLOOR_MS, RTT_INITIAL_MS,
    },
    error::{DisconnectReason, ErrorKind, Result},
};

use crate::{
    novelty::{Novelty, NoveltyWindow},
    send_option::{EnumConverter, SendOption},
};

const DEFAULT_OUTSTANDING_CAPACITY: usize = 64;

/// A reliable packet that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct OutstandingPacket {
    /// The encoded datagram, including header and stamped ID
    bytes: Box<[u8]>,
    /// When the packet was first transmitted; total age decides disconnect,
    /// and the gap to the ack decides the round-trip sample
    sent_at: Instant,
    /// When the packet was last transmitted
    last_action: Instant,
    /// Silence tolerated before the next retransmission
    next_timeout: Duration,
    /// How often the packet has been retransmitted
    retransmissions: u32,
}

impl OutstandingPacket {
    /// The encoded datagram bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of retransmissions so far.
    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }
}

/// Outcome of one retransmission pass.
#[derive(Debug, Default)]
pub struct ResendPass {
    /// Datagrams to put back on the wire
    pub frames: Vec<Vec<u8>>,
    /// Set when a packet exhausted its age or retransmission budget; the
    /// connection must be terminated with this reason
    pub failure: Option<DisconnectReason>,
}

/// Per-peer reliability state: ID allocation, the retransmit queue, the
/// novelty window for inbound IDs, and the round-trip estimate.
///
/// The engine owns no I/O. Callers stage outbound frames through it, feed it
/// every inbound reliable ID and ack frame, and drive
/// [`resend_pass`](ReliabilityEngine::resend_pass) from a periodic tick.
#[derive(Debug)]
pub struct ReliabilityEngine {
    next_id: u16,
    outstanding: HashMap<u16, OutstandingPacket>,
    novelty: NoveltyWindow,
    avg_ping_ms: f32,
    resend_timeout: Option<Duration>,
    resend_limit: u32,
    resend_ping_multiplier: f32,
    disconnect_timeout: Duration,
}

impl ReliabilityEngine {
    /// Creates an engine with the connection's retransmission tunables.
    pub fn new(config: &Config) -> Self {
        Self {
            next_id: 0,
            outstanding: HashMap::with_capacity(DEFAULT_OUTSTANDING_CAPACITY),
            novelty: NoveltyWindow::new(),
            avg_ping_ms: RTT_INITIAL_MS,
            resend_timeout: config.resend_timeout,
            resend_limit: config.resend_limit,
            resend_ping_multiplier: config.resend_ping_multiplier,
            disconnect_timeout: config.disconnect_timeout,
        }
    }

    /// Allocates the next reliable ID. Post-increments, so a fresh
    /// connection puts 0 on the wire first.
    pub fn next_reliable_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Current round-trip estimate in milliseconds.
    pub fn rtt_estimate_ms(&self) -> f32 {
        self.avg_ping_ms
    }

    /// Number of sent packets not yet acknowledged.
    pub fn packets_in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Read access to the inbound novelty window.
    pub fn novelty(&self) -> &NoveltyWindow {
        &self.novelty
    }

    /// Stamps a fresh reliable ID into bytes 1..3 of the frame, records the
    /// packet for retransmission and returns the ID with the finished frame.
    ///
    /// The frame's first byte must be a header that carries a reliable ID
    /// (reliable, hello or ping) with two reserved bytes after it.
    pub fn stage_outbound(&mut self, mut frame: Vec<u8>, now: Instant) -> (u16, Vec<u8>) {
        debug_assert!(frame.len() >= 3, "reliable frames reserve two ID bytes");
        let id = self.next_reliable_id();
        BigEndian::write_u16(&mut frame[1..3], id);
        self.outstanding.insert(id, OutstandingPacket {
            bytes: frame.clone().into_boxed_slice(),
            sent_at: now,
            last_action: now,
            next_timeout: self.initial_timeout(),
            retransmissions: 0,
        });
        (id, frame)
    }

    fn initial_timeout(&self) -> Duration {
        match self.resend_timeout {
            Some(timeout) => timeout,
            None => {
                let adaptive = self.avg_ping_ms * self.resend_ping_multiplier;
                Duration::from_millis((adaptive as u64).min(RESEND_INITIAL_CAP_MS))
            }
        }
    }

    /// Walks the outstanding packets, escalating timeouts and collecting the
    /// frames due for retransmission. Packets past the age budget or the
    /// retransmission budget are dropped and reported as a failure.
    pub fn resend_pass(&mut self, now: Instant) -> ResendPass {
        let mut pass = ResendPass::default();
        let mut expired = Vec::new();

        for (id, packet) in self.outstanding.iter_mut() {
            if now.duration_since(packet.sent_at) >= self.disconnect_timeout {
                expired.push(*id);
                pass.failure = Some(DisconnectReason::ReliablePacketWithoutResponse);
                continue;
            }
            if now.duration_since(packet.last_action) >= packet.next_timeout {
                packet.retransmissions += 1;
                if self.resend_limit != 0 && packet.retransmissions > self.resend_limit {
                    expired.push(*id);
                    pass.failure = Some(DisconnectReason::ReliablePacketWithoutResponse);
                    continue;
                }
                let escalated = packet.next_timeout.mul_f32(self.resend_ping_multiplier);
                packet.next_timeout =
                    escalated.min(Duration::from_millis(RESEND_ESCALATION_CAP_MS));
                packet.last_action = now;
                pass.frames.push(packet.bytes.to_vec());
            }
        }

        for id in expired {
            self.outstanding.remove(&id);
        }
        pass
    }

    /// Classifies an inbound reliable ID and builds the matching ack frame.
    ///
    /// The window is advanced before the mask is built, so the mask's
    /// assertions about the eight prior IDs reflect the gaps this very
    /// packet revealed.
    pub fn process_inbound_id(&mut self, id: u16) -> (Novelty, [u8; ACK_FRAME_SIZE]) {
        let novelty = self.novelty.classify(id);
        (novelty, self.ack_frame(id))
    }

    /// Builds the four-byte ack frame for an ID: header, big-endian ID, and
    /// the recent bitmask. Bit `i` asserts receipt of `id - (i + 1)`.
    pub fn ack_frame(&self, id: u16) -> [u8; ACK_FRAME_SIZE] {
        let mut mask = 0u8;
        for i in 0..ACK_MASK_BITS {
            let prior = id.wrapping_sub(u16::from(i) + 1);
            if !self.novelty.is_missing(prior) {
                mask |= 1 << i;
            }
        }
        let mut frame = [SendOption::Ack.to_u8(), 0, 0, mask];
        BigEndian::write_u16(&mut frame[1..3], id);
        frame
    }

    /// Processes an inbound ack frame (header byte included). Both the
    /// three-byte form and the standard four-byte form are accepted; the
    /// short form carries no mask.
    ///
    /// Returns the IDs that were still outstanding, newest first.
    pub fn process_ack(&mut self, frame: &[u8], now: Instant) -> Result<Vec<u16>> {
        if frame.len() < ACK_FRAME_SIZE - 1 {
            return Err(ErrorKind::ReceivedDataTooShort);
        }
        let id = BigEndian::read_u16(&frame[1..3]);
        let mask = frame.get(3).copied().unwrap_or(0);

        let mut acked = Vec::new();
        self.acknowledge(id, now, &mut acked);
        for i in 0..ACK_MASK_BITS {
            if mask & (1 << i) != 0 {
                self.acknowledge(id.wrapping_sub(u16::from(i) + 1), now, &mut acked);
            }
        }
        Ok(acked)
    }

    fn acknowledge(&mut self, id: u16, now: Instant, acked: &mut Vec<u16>) {
        if let Some(packet) = self.outstanding.remove(&id) {
            let sample_ms = now.duration_since(packet.sent_at).as_secs_f32() * 1000.0;
            self.record_rtt(sample_ms);
            acked.push(id);
        }
    }

    fn record_rtt(&mut self, sample_ms: f32) {
        self.avg_ping_ms = (0.7 * self.avg_ping_ms + 0.3 * sample_ms).max(RTT_FLOOR_MS);
    }

    /// Clears all reliability state back to fresh-connection defaults.
    pub fn reset(&mut self) {
        self.next_id = 0;
        self.outstanding.clear();
        self.novelty.reset();
        self.avg_ping_ms = RTT_INITIAL_MS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ReliabilityEngine {
        ReliabilityEngine::new(&Config::default())
    }

    fn engine_with(config: Config) -> ReliabilityEngine {
        ReliabilityEngine::new(&config)
    }

    fn reliable_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![SendOption::Reliable.to_u8(), 0, 0];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn ids_allocate_from_zero_and_wrap() {
        let mut engine = engine();
        assert_eq!(engine.next_reliable_id(), 0);
        assert_eq!(engine.next_reliable_id(), 1);
        engine.next_id = u16::MAX;
        assert_eq!(engine.next_reliable_id(), u16::MAX);
        assert_eq!(engine.next_reliable_id(), 0);
    }

    #[test]
    fn stage_stamps_big_endian_id() {
        let mut engine = engine();
        engine.next_id = 0x1234;
        let (id, frame) = engine.stage_outbound(reliable_frame(b"hi"), Instant::now());
        assert_eq!(id, 0x1234);
        assert_eq!(&frame[..3], &[0x01, 0x12, 0x34]);
        assert_eq!(&frame[3..], b"hi");
        assert_eq!(engine.packets_in_flight(), 1);
    }

    #[test]
    fn ack_removes_and_updates_rtt() {
        let mut engine = engine();
        let start = Instant::now();
        let (id, frame) = engine.stage_outbound(reliable_frame(b"x"), start);
        assert_eq!(engine.rtt_estimate_ms(), RTT_INITIAL_MS);

        // peer acks 100ms later
        let ack = [SendOption::Ack.to_u8(), frame[1], frame[2], 0];
        let acked = engine.process_ack(&ack, start + Duration::from_millis(100)).unwrap();
        assert_eq!(acked, vec![id]);
        assert_eq!(engine.packets_in_flight(), 0);

        // 0.7 * 500 + 0.3 * 100 = 380
        assert!((engine.rtt_estimate_ms() - 380.0).abs() < 1.0);
    }

    #[test]
    fn rtt_is_floored() {
        let mut engine = engine();
        let start = Instant::now();
        for _ in 0..32 {
            let (_, frame) = engine.stage_outbound(reliable_frame(b"x"), start);
            let ack = [SendOption::Ack.to_u8(), frame[1], frame[2], 0];
            engine.process_ack(&ack, start).unwrap();
        }
        assert_eq!(engine.rtt_estimate_ms(), RTT_FLOOR_MS);
    }

    #[test]
    fn ack_bitmask_acknowledges_prior_ids() {
        let mut engine = engine();
        let start = Instant::now();
        let mut last_frame = Vec::new();
        for _ in 0..4 {
            let (_, frame) = engine.stage_outbound(reliable_frame(b"x"), start);
            last_frame = frame;
        }
        assert_eq!(engine.packets_in_flight(), 4);

        // ack for id 3 with bits asserting 2, 1 and 0
        let ack = [SendOption::Ack.to_u8(), last_frame[1], last_frame[2], 0b0000_0111];
        let acked = engine.process_ack(&ack, start).unwrap();
        assert_eq!(acked.len(), 4);
        assert_eq!(engine.packets_in_flight(), 0);
    }

    #[test]
    fn three_byte_ack_is_accepted() {
        let mut engine = engine();
        let start = Instant::now();
        let (id, frame) = engine.stage_outbound(reliable_frame(b"x"), start);
        let short_ack = [SendOption::Ack.to_u8(), frame[1], frame[2]];
        assert_eq!(engine.process_ack(&short_ack, start).unwrap(), vec![id]);
    }

    #[test]
    fn truncated_ack_is_rejected() {
        let mut engine = engine();
        assert!(matches!(
            engine.process_ack(&[SendOption::Ack.to_u8(), 0], Instant::now()),
            Err(ErrorKind::ReceivedDataTooShort)
        ));
    }

    #[test]
    fn duplicate_ack_is_harmless() {
        let mut engine = engine();
        let start = Instant::now();
        let (_, frame) = engine.stage_outbound(reliable_frame(b"x"), start);
        let ack = [SendOption::Ack.to_u8(), frame[1], frame[2], 0];
        assert_eq!(engine.process_ack(&ack, start).unwrap().len(), 1);
        assert_eq!(engine.process_ack(&ack, start).unwrap().len(), 0);
    }

    #[test]
    fn resend_timeouts_escalate_and_clamp() {
        let mut engine = engine();
        engine.avg_ping_ms = 100.0;
        let start = Instant::now();
        engine.stage_outbound(reliable_frame(b"x"), start);

        // initial timeout: min(100 * 2, 300) = 200
        let packet = engine.outstanding.values().next().unwrap();
        assert_eq!(packet.next_timeout, Duration::from_millis(200));

        // expiry escalates: 400, 800, then clamped at 1000
        let mut at = start;
        for expected_ms in [400u64, 800, 1000, 1000] {
            let current = engine.outstanding.values().next().unwrap().next_timeout;
            at += current;
            let pass = engine.resend_pass(at);
            assert_eq!(pass.frames.len(), 1);
            assert!(pass.failure.is_none());
            let packet = engine.outstanding.values().next().unwrap();
            assert_eq!(packet.next_timeout, Duration::from_millis(expected_ms));
        }
    }

    #[test]
    fn fixed_resend_timeout_overrides_adaptive() {
        let mut config = Config::default();
        config.resend_timeout = Some(Duration::from_millis(50));
        let mut engine = engine_with(config);
        let start = Instant::now();
        engine.stage_outbound(reliable_frame(b"x"), start);

        assert!(engine.resend_pass(start + Duration::from_millis(40)).frames.is_empty());
        assert_eq!(engine.resend_pass(start + Duration::from_millis(50)).frames.len(), 1);
    }

    #[test]
    fn age_budget_terminates() {
        let mut engine = engine();
        let start = Instant::now();
        engine.stage_outbound(reliable_frame(b"x"), start);

        let pass = engine.resend_pass(start + Duration::from_secs(5));
        assert_eq!(pass.failure, Some(DisconnectReason::ReliablePacketWithoutResponse));
        assert_eq!(engine.packets_in_flight(), 0);
    }

    #[test]
    fn retransmission_budget_terminates() {
        let mut config = Config::default();
        config.resend_limit = 2;
        config.resend_timeout = Some(Duration::from_millis(10));
        let mut engine = engine_with(config);
        let start = Instant::now();
        engine.stage_outbound(reliable_frame(b"x"), start);

        let mut at = start;
        for _ in 0..2 {
            at += Duration::from_millis(20);
            let pass = engine.resend_pass(at);
            assert_eq!(pass.frames.len(), 1);
            assert!(pass.failure.is_none());
        }
        // after two escalations the packet waits 40ms between attempts
        at += Duration::from_millis(45);
        let pass = engine.resend_pass(at);
        assert_eq!(pass.failure, Some(DisconnectReason::ReliablePacketWithoutResponse));
        assert_eq!(engine.packets_in_flight(), 0);
    }

    #[test]
    fn inbound_ids_build_mask_from_revealed_gaps() {
        let mut engine = engine();
        for id in [10u16, 11, 13] {
            engine.process_inbound_id(id);
        }
        let (novelty, ack) = engine.process_inbound_id(14);
        assert_eq!(novelty, Novelty::New);
        assert_eq!(ack[0], SendOption::Ack.to_u8());
        assert_eq!(BigEndian::read_u16(&ack[1..3]), 14);
        // ids 0..=9 and 12 were skipped, so of the eight prior ids only
        // 13 (bit 0), 11 (bit 2) and 10 (bit 3) are asserted
        assert_eq!(ack[3], 0b0000_1101);
    }

    #[test]
    fn recovered_gap_flips_its_mask_bit() {
        let mut engine = engine();
        for id in [10u16, 11, 13, 14] {
            engine.process_inbound_id(id);
        }
        let (novelty, _) = engine.process_inbound_id(12);
        assert_eq!(novelty, Novelty::Recovered);
        // the next ack no longer reports 12 as missing
        assert_eq!(engine.ack_frame(14)[3] & 0b0000_0010, 0b0000_0010);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut engine = engine();
        let start = Instant::now();
        engine.stage_outbound(reliable_frame(b"x"), start);
        engine.process_inbound_id(5);
        engine.record_rtt(40.0);

        engine.reset();
        assert_eq!(engine.packets_in_flight(), 0);
        assert_eq!(engine.next_reliable_id(), 0);
        assert_eq!(engine.rtt_estimate_ms(), RTT_INITIAL_MS);
        assert_eq!(engine.novelty().last_received_id(), u16::MAX);
    }
}
