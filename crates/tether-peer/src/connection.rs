use std::{fmt, net::SocketAddr, time::Instant};

use byteorder::{BigEndian, ByteOrder};
use tether_core::{
    config::Config,
    constants::{HELLO_HEADER_SIZE, PROTOCOL_VERSION, RELIABLE_HEADER_SIZE},
    error::{DisconnectReason, ErrorKind, Result},
    hooks::DisconnectPolicy,
};
use tether_protocol::{
    message_buffer::MessageBuffer,
    novelty::Novelty,
    reliability::ReliabilityEngine,
    send_option::{EnumConverter, SendMode, SendOption},
};
use tracing::{trace, warn};

use crate::{
    keep_alive::{KeepAlive, KeepAliveDecision},
    state::ConnectionState,
};

/// Something a connection wants the application to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake completed. On the server the handshake payload the
    /// remote sent; on the client empty.
    Connected {
        /// Hello payload past the version byte
        handshake: Vec<u8>,
    },
    /// An application message arrived and passed the novelty check.
    Message {
        /// Bytes past the wire header
        payload: Vec<u8>,
        /// How the remote sent it
        mode: SendMode,
    },
    /// The session ended.
    Disconnected {
        /// Why the session ended
        reason: DisconnectReason,
        /// A farewell payload, when the remote attached one
        payload: Option<Vec<u8>>,
    },
}

/// One remote endpoint's session: dispatcher, reliability and keep-alive.
///
/// The connection owns no socket. Datagrams are pushed in through
/// [`process_datagram`](Connection::process_datagram), frames to put on the
/// wire accumulate until [`drain_outgoing`](Connection::drain_outgoing), and
/// [`update`](Connection::update) drives the retransmission and liveness
/// deadlines. All calls for one connection must stay on one thread; the
/// reliability state is not guarded.
pub struct Connection {
    remote_address: SocketAddr,
    state: ConnectionState,
    reliability: ReliabilityEngine,
    keep_alive: KeepAlive,
    outgoing: Vec<Vec<u8>>,
    hello_id: Option<u16>,
    policy: Option<Box<dyn DisconnectPolicy>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_address", &self.remote_address)
            .field("state", &self.state)
            .field("packets_in_flight", &self.reliability.packets_in_flight())
            .finish()
    }
}

impl Connection {
    /// Creates a connection in the `NotConnected` state.
    pub fn new(remote_address: SocketAddr, config: &Config) -> Self {
        Self {
            remote_address,
            state: ConnectionState::NotConnected,
            reliability: ReliabilityEngine::new(config),
            keep_alive: KeepAlive::new(config),
            outgoing: Vec::new(),
            hello_id: None,
            policy: None,
        }
    }

    /// The remote endpoint this connection talks to.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current round-trip estimate in milliseconds.
    pub fn rtt_estimate_ms(&self) -> f32 {
        self.reliability.rtt_estimate_ms()
    }

    /// Installs the policy consulted before an internal disconnect.
    pub fn set_disconnect_policy(&mut self, policy: Box<dyn DisconnectPolicy>) {
        self.policy = Some(policy);
    }

    /// Changes the keep-alive interval; assignment restarts the timer.
    pub fn set_keep_alive_interval(
        &mut self,
        interval: Option<std::time::Duration>,
        now: Instant,
    ) {
        self.keep_alive.set_interval(interval, now);
    }

    /// Client side: queues the hello and starts waiting for its ack.
    ///
    /// The hello payload is the protocol version byte followed by the
    /// caller's bytes. The connection reports `Connected` through an event
    /// once the hello is acknowledged.
    pub fn begin_connect(&mut self, payload: &[u8], now: Instant) -> Result<()> {
        if self.state != ConnectionState::NotConnected {
            return Err(ErrorKind::AlreadyConnected);
        }
        self.state = ConnectionState::Connecting;

        let mut frame = Vec::with_capacity(HELLO_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&[SendOption::Hello.to_u8(), 0, 0, PROTOCOL_VERSION]);
        frame.extend_from_slice(payload);
        let (id, frame) = self.reliability.stage_outbound(frame, now);
        self.hello_id = Some(id);
        self.keep_alive.on_reliable_activity(now);
        self.outgoing.push(frame);
        Ok(())
    }

    /// Server side: the listener admitted this peer, so the session starts
    /// out established.
    pub fn accept(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.keep_alive.on_reliable_activity(now);
    }

    /// Parses one inbound datagram and routes it by its header byte.
    ///
    /// Malformed datagrams are dropped silently; they cannot be told apart
    /// from adversarial noise.
    pub fn process_datagram(&mut self, bytes: &[u8], now: Instant) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        if bytes.is_empty() {
            warn!("dropping empty datagram from {}", self.remote_address);
            return events;
        }

        match SendOption::from_header_byte(bytes[0]) {
            Some(SendOption::Reliable) => {
                if let Some(id) = read_reliable_id(bytes) {
                    if self.reliable_inbound(id).is_deliverable() {
                        events.push(ConnectionEvent::Message {
                            payload: bytes[RELIABLE_HEADER_SIZE..].to_vec(),
                            mode: SendMode::Reliable,
                        });
                    }
                }
            }
            Some(SendOption::Hello) | Some(SendOption::Ping) => {
                // acknowledged and deduplicated, never delivered
                if let Some(id) = read_reliable_id(bytes) {
                    self.reliable_inbound(id);
                }
            }
            Some(SendOption::Disconnect) => {
                events.extend(self.remote_disconnect(bytes[1..].to_vec()));
            }
            Some(SendOption::Ack) => match self.reliability.process_ack(bytes, now) {
                Ok(acked) => {
                    self.keep_alive.on_ack(&acked, now);
                    events.extend(self.check_hello_acked(&acked));
                }
                Err(err) => trace!("dropping malformed ack from {}: {}", self.remote_address, err),
            },
            // Fragment is reserved; its payload falls through as unreliable,
            // as does any unknown header byte
            Some(SendOption::Fragment) | Some(SendOption::Unreliable) | None => {
                events.push(ConnectionEvent::Message {
                    payload: bytes[1..].to_vec(),
                    mode: SendMode::Unreliable,
                });
            }
        }
        events
    }

    fn reliable_inbound(&mut self, id: u16) -> Novelty {
        let (novelty, ack) = self.reliability.process_inbound_id(id);
        self.outgoing.push(ack.to_vec());
        novelty
    }

    fn check_hello_acked(&mut self, acked: &[u16]) -> Option<ConnectionEvent> {
        let hello_id = self.hello_id?;
        if self.state == ConnectionState::Connecting && acked.contains(&hello_id) {
            self.state = ConnectionState::Connected;
            Some(ConnectionEvent::Connected { handshake: Vec::new() })
        } else {
            None
        }
    }

    /// Sends a composed buffer using its send-mode preamble.
    pub fn send(&mut self, buffer: &MessageBuffer, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(ErrorKind::NotConnected);
        }
        let datagram = buffer.as_datagram()?;
        match buffer.send_mode() {
            Some(SendMode::Reliable) => {
                let (_, frame) = self.reliability.stage_outbound(datagram.to_vec(), now);
                self.keep_alive.on_reliable_activity(now);
                self.outgoing.push(frame);
            }
            Some(SendMode::Unreliable) => self.outgoing.push(datagram.to_vec()),
            None => return Err(ErrorKind::InvalidSendMode),
        }
        Ok(())
    }

    /// Frames raw bytes with the given header and sends them. Options that
    /// carry a reliable ID go through retransmission tracking.
    pub fn send_bytes(&mut self, payload: &[u8], option: SendOption, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(ErrorKind::NotConnected);
        }
        if option.carries_reliable_id() {
            let mut frame = Vec::with_capacity(RELIABLE_HEADER_SIZE + payload.len());
            frame.extend_from_slice(&[option.to_u8(), 0, 0]);
            frame.extend_from_slice(payload);
            let (_, frame) = self.reliability.stage_outbound(frame, now);
            self.keep_alive.on_reliable_activity(now);
            self.outgoing.push(frame);
        } else {
            let mut frame = Vec::with_capacity(1 + payload.len());
            frame.push(option.to_u8());
            frame.extend_from_slice(payload);
            self.outgoing.push(frame);
        }
        Ok(())
    }

    /// Gracefully tears the session down: one unreliable disconnect
    /// datagram, then the session closes locally with a disconnect event.
    ///
    /// A payload buffer with a reliable preamble is rejected; disconnects
    /// are never retransmitted.
    pub fn disconnect(
        &mut self,
        payload: Option<&MessageBuffer>,
    ) -> Result<Option<ConnectionEvent>> {
        if self.state == ConnectionState::NotConnected {
            return Ok(None);
        }
        let mut frame = vec![SendOption::Disconnect.to_u8()];
        if let Some(buffer) = payload {
            if buffer.send_mode() == Some(SendMode::Reliable) {
                return Err(ErrorKind::InvalidSendMode);
            }
            frame.extend_from_slice(buffer.payload());
        }
        self.outgoing.push(frame);
        self.teardown();
        Ok(Some(ConnectionEvent::Disconnected {
            reason: DisconnectReason::Graceful,
            payload: None,
        }))
    }

    /// Ungracefully closes the session. Sends nothing and fires no
    /// disconnect event. A no-op when already closed.
    pub fn close(&mut self) {
        if self.state == ConnectionState::NotConnected {
            return;
        }
        self.teardown();
    }

    /// Drives the retransmission pass and the keep-alive deadline.
    pub fn update(&mut self, now: Instant) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        if self.state == ConnectionState::NotConnected {
            return events;
        }

        let pass = self.reliability.resend_pass(now);
        self.outgoing.extend(pass.frames);
        if let Some(reason) = pass.failure {
            events.extend(self.internal_disconnect(reason));
            return events;
        }

        match self.keep_alive.poll(self.state, now) {
            KeepAliveDecision::Idle => {}
            KeepAliveDecision::SendPing => {
                let frame = vec![SendOption::Ping.to_u8(), 0, 0];
                let (id, frame) = self.reliability.stage_outbound(frame, now);
                self.keep_alive.track_ping(id, now);
                self.outgoing.push(frame);
            }
            KeepAliveDecision::GiveUp => {
                events.extend(self.internal_disconnect(DisconnectReason::PingsWithoutResponse));
            }
        }
        events
    }

    /// Tears the session down for a transport-internal reason, consulting
    /// the disconnect policy for an optional farewell payload.
    pub fn internal_disconnect(&mut self, reason: DisconnectReason) -> Option<ConnectionEvent> {
        if self.state == ConnectionState::NotConnected {
            return None;
        }
        if let Some(policy) = self.policy.as_mut() {
            if let Some(farewell) = policy.on_internal_disconnect(reason) {
                let mut frame = Vec::with_capacity(1 + farewell.len());
                frame.push(SendOption::Disconnect.to_u8());
                frame.extend_from_slice(&farewell);
                self.outgoing.push(frame);
            }
        }
        self.teardown();
        Some(ConnectionEvent::Disconnected { reason, payload: None })
    }

    fn remote_disconnect(&mut self, payload: Vec<u8>) -> Option<ConnectionEvent> {
        if self.state == ConnectionState::NotConnected {
            return None;
        }
        self.teardown();
        Some(ConnectionEvent::Disconnected {
            reason: DisconnectReason::RemoteRequested,
            payload: Some(payload),
        })
    }

    fn teardown(&mut self) {
        self.state = ConnectionState::NotConnected;
        self.reliability.reset();
        self.keep_alive.reset();
        self.hello_id = None;
    }

    /// Takes every frame queued for the wire, oldest first.
    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    /// True when frames are waiting to be flushed.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Number of reliable packets awaiting acknowledgement.
    pub fn packets_in_flight(&self) -> usize {
        self.reliability.packets_in_flight()
    }
}

fn read_reliable_id(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < RELIABLE_HEADER_SIZE {
        None
    } else {
        Some(BigEndian::read_u16(&bytes[1..3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn connected_pair(now: Instant) -> (Connection, Connection) {
        let config = Config::default();
        let mut client = Connection::new(fake_addr(), &config);
        let mut server = Connection::new(fake_addr(), &config);
        server.accept(now);

        client.begin_connect(b"handshake", now).unwrap();
        for frame in client.drain_outgoing() {
            server.process_datagram(&frame, now);
        }
        for frame in server.drain_outgoing() {
            client.process_datagram(&frame, now);
        }
        assert_eq!(client.state(), ConnectionState::Connected);
        (client, server)
    }

    #[test]
    fn hello_carries_version_and_payload() {
        let mut client = Connection::new(fake_addr(), &Config::default());
        let now = Instant::now();
        client.begin_connect(b"abc", now).unwrap();

        let frames = client.drain_outgoing();
        assert_eq!(frames.len(), 1);
        let hello = &frames[0];
        assert_eq!(hello[0], SendOption::Hello.to_u8());
        assert_eq!(&hello[1..3], &[0, 0]); // first allocated id
        assert_eq!(hello[3], PROTOCOL_VERSION);
        assert_eq!(&hello[4..], b"abc");
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn hello_ack_completes_the_handshake() {
        let now = Instant::now();
        let (client, server) = connected_pair(now);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(server.state(), ConnectionState::Connected);
        assert_eq!(client.packets_in_flight(), 0);
    }

    #[test]
    fn reliable_message_is_delivered_once() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(now);

        client.send_bytes(b"state", SendOption::Reliable, now).unwrap();
        let frames = client.drain_outgoing();
        assert_eq!(frames.len(), 1);

        let events = server.process_datagram(&frames[0], now);
        assert_eq!(events, vec![ConnectionEvent::Message {
            payload: b"state".to_vec(),
            mode: SendMode::Reliable,
        }]);

        // the duplicate is re-acked but not re-delivered
        let events = server.process_datagram(&frames[0], now);
        assert!(events.is_empty());
        assert!(server.has_outgoing());
    }

    #[test]
    fn unreliable_and_unknown_headers_deliver_as_unreliable() {
        let now = Instant::now();
        let (_, mut server) = connected_pair(now);

        let events = server.process_datagram(&[0x00, 0xAA], now);
        assert_eq!(events, vec![ConnectionEvent::Message {
            payload: vec![0xAA],
            mode: SendMode::Unreliable,
        }]);

        let events = server.process_datagram(&[0x2F, 0xBB], now);
        assert_eq!(events, vec![ConnectionEvent::Message {
            payload: vec![0xBB],
            mode: SendMode::Unreliable,
        }]);

        // reserved fragment header falls back to unreliable delivery
        let events = server.process_datagram(&[0x0B, 0xCC], now);
        assert_eq!(events, vec![ConnectionEvent::Message {
            payload: vec![0xCC],
            mode: SendMode::Unreliable,
        }]);
    }

    #[test]
    fn send_requires_connected_state() {
        let mut connection = Connection::new(fake_addr(), &Config::default());
        let now = Instant::now();
        assert!(matches!(
            connection.send_bytes(b"x", SendOption::Reliable, now),
            Err(ErrorKind::NotConnected)
        ));

        let buffer = MessageBuffer::with_send_mode(SendMode::Unreliable, 8);
        assert!(matches!(connection.send(&buffer, now), Err(ErrorKind::NotConnected)));
    }

    #[test]
    fn buffer_send_uses_its_preamble() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(now);

        let mut buffer = MessageBuffer::with_send_mode(SendMode::Reliable, 32);
        buffer.write_string("hi").unwrap();
        client.send(&buffer, now).unwrap();

        let frames = client.drain_outgoing();
        assert_eq!(frames[0][0], SendOption::Reliable.to_u8());
        let events = server.process_datagram(&frames[0], now);
        assert!(matches!(
            &events[0],
            ConnectionEvent::Message { mode: SendMode::Reliable, .. }
        ));
    }

    #[test]
    fn reliable_disconnect_payload_is_rejected() {
        let now = Instant::now();
        let (mut client, _) = connected_pair(now);
        let buffer = MessageBuffer::with_send_mode(SendMode::Reliable, 8);
        assert!(matches!(
            client.disconnect(Some(&buffer)),
            Err(ErrorKind::InvalidSendMode)
        ));
        // the session is still up
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn graceful_disconnect_sends_frame_and_fires_event() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(now);

        let mut farewell = MessageBuffer::with_send_mode(SendMode::Unreliable, 16);
        farewell.write_string("bye").unwrap();
        let event = client.disconnect(Some(&farewell)).unwrap();
        assert_eq!(
            event,
            Some(ConnectionEvent::Disconnected {
                reason: DisconnectReason::Graceful,
                payload: None,
            })
        );
        assert_eq!(client.state(), ConnectionState::NotConnected);

        let frames = client.drain_outgoing();
        let disconnect = frames.last().unwrap();
        assert_eq!(disconnect[0], SendOption::Disconnect.to_u8());

        let events = server.process_datagram(disconnect, now);
        assert!(matches!(
            &events[0],
            ConnectionEvent::Disconnected {
                reason: DisconnectReason::RemoteRequested,
                payload: Some(_),
            }
        ));
        assert_eq!(server.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn disconnect_when_not_connected_is_a_no_op() {
        let mut connection = Connection::new(fake_addr(), &Config::default());
        assert_eq!(connection.disconnect(None).unwrap(), None);
        connection.close();
        assert_eq!(connection.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn close_fires_no_event_and_sends_nothing() {
        let now = Instant::now();
        let (mut client, _) = connected_pair(now);
        client.drain_outgoing();
        client.close();
        assert_eq!(client.state(), ConnectionState::NotConnected);
        assert!(!client.has_outgoing());
    }

    #[test]
    fn update_resends_unacked_frames() {
        let now = Instant::now();
        let (mut client, _) = connected_pair(now);
        client.send_bytes(b"lost", SendOption::Reliable, now).unwrap();
        let original = client.drain_outgoing().remove(0);

        // nothing due yet at +100ms (adaptive timeout is 300ms here)
        assert!(client.update(now + std::time::Duration::from_millis(100)).is_empty());
        assert!(!client.has_outgoing());

        client.update(now + std::time::Duration::from_millis(300));
        let resent = client.drain_outgoing();
        assert!(resent.contains(&original));
    }

    #[test]
    fn internal_disconnect_consults_policy() {
        struct Farewell;
        impl DisconnectPolicy for Farewell {
            fn on_internal_disconnect(&mut self, _reason: DisconnectReason) -> Option<Vec<u8>> {
                Some(b"gone".to_vec())
            }
        }

        let now = Instant::now();
        let (mut client, mut server) = connected_pair(now);
        client.set_disconnect_policy(Box::new(Farewell));
        client.send_bytes(b"x", SendOption::Reliable, now).unwrap();
        client.drain_outgoing();

        // the reliable packet ages past the disconnect budget
        let later = now + Config::default().disconnect_timeout;
        let events = client.update(later);
        assert_eq!(
            events,
            vec![ConnectionEvent::Disconnected {
                reason: DisconnectReason::ReliablePacketWithoutResponse,
                payload: None,
            }]
        );

        let frames = client.drain_outgoing();
        let farewell = frames.last().unwrap();
        assert_eq!(farewell[0], SendOption::Disconnect.to_u8());
        assert_eq!(&farewell[1..], b"gone");

        let events = server.process_datagram(farewell, now);
        assert!(matches!(events[0], ConnectionEvent::Disconnected { .. }));
    }

    #[test]
    fn keep_alive_ping_flows_through_reliability() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(now);

        let due = now + std::time::Duration::from_millis(1500);
        assert!(client.update(due).is_empty());
        let frames = client.drain_outgoing();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], SendOption::Ping.to_u8());
        assert_eq!(client.packets_in_flight(), 1);

        // the server acks the ping without delivering it
        let events = server.process_datagram(&frames[0], due);
        assert!(events.is_empty());
        let acks = server.drain_outgoing();
        assert_eq!(acks.len(), 1);

        client.process_datagram(&acks[0], due);
        assert_eq!(client.packets_in_flight(), 0);
    }

    #[test]
    fn silence_eventually_disconnects() {
        let mut config = Config::default();
        // keep the reliable hello out of the picture
        config.resend_timeout = Some(std::time::Duration::from_secs(3600));
        config.disconnect_timeout = std::time::Duration::from_secs(3600);
        let now = Instant::now();

        let mut server = Connection::new(fake_addr(), &config);
        server.accept(now);

        let mut at = now;
        let mut disconnected = Vec::new();
        for _ in 0..8 {
            at += std::time::Duration::from_millis(1500);
            disconnected.extend(server.update(at));
        }
        assert_eq!(
            disconnected,
            vec![ConnectionEvent::Disconnected {
                reason: DisconnectReason::PingsWithoutResponse,
                payload: None,
            }]
        );
        assert_eq!(server.state(), ConnectionState::NotConnected);
    }
}
