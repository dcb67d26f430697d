use std::{net::SocketAddr, time::Instant};

use tether_core::{
    config::Config,
    constants::HELLO_HEADER_SIZE,
    error::DisconnectReason,
};
use tether_peer::{Connection, ConnectionEvent, ConnectionState};
use tether_protocol::send_option::{EnumConverter, SendOption};
use tracing::warn;

use crate::{
    event_types::{Action, OutboundMessage, SocketEvent},
    session::{Session, SessionEventAddress},
};

/// Required by `Listener` to properly route session events.
impl SessionEventAddress for SocketEvent {
    /// Returns event address.
    fn address(&self) -> SocketAddr {
        SocketEvent::address(self)
    }
}

/// Required by `Listener` to properly route user send requests.
impl SessionEventAddress for OutboundMessage {
    /// Returns event address.
    fn address(&self) -> SocketAddr {
        OutboundMessage::address(self)
    }
}

fn to_socket_event(address: SocketAddr, event: ConnectionEvent) -> SocketEvent {
    match event {
        ConnectionEvent::Connected { handshake } => SocketEvent::Connect { address, handshake },
        ConnectionEvent::Message { payload, mode } => {
            SocketEvent::Message { address, payload, mode }
        }
        ConnectionEvent::Disconnected { reason, payload } => {
            SocketEvent::Disconnect { address, reason, payload }
        }
    }
}

/// Converts a connection's pending events and wire frames into listener
/// actions.
fn collect_actions(
    connection: &mut Connection,
    events: Vec<ConnectionEvent>,
) -> Vec<Action<SocketEvent>> {
    let address = connection.remote_address();
    let mut actions: Vec<Action<SocketEvent>> = events
        .into_iter()
        .map(|event| Action::Emit(to_socket_event(address, event)))
        .collect();
    actions.extend(connection.drain_outgoing().into_iter().map(Action::Send));
    actions
}

impl Session for Connection {
    type SendEvent = OutboundMessage;
    type ReceiveEvent = SocketEvent;

    fn create_session(config: &Config, address: SocketAddr, _time: Instant) -> Connection {
        Connection::new(address, config)
    }

    fn opening_payload(datagram: &[u8]) -> Option<&[u8]> {
        if datagram.len() >= HELLO_HEADER_SIZE && datagram[0] == SendOption::Hello.to_u8() {
            Some(&datagram[HELLO_HEADER_SIZE..])
        } else {
            None
        }
    }

    fn rejection_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(SendOption::Disconnect.to_u8());
        frame.extend_from_slice(payload);
        frame
    }

    fn admit(&mut self, handshake: &[u8], time: Instant) -> Vec<Action<SocketEvent>> {
        self.accept(time);
        vec![Action::Emit(SocketEvent::Connect {
            address: self.remote_address(),
            handshake: handshake.to_vec(),
        })]
    }

    fn is_established(&self) -> bool {
        self.state().is_connected()
    }

    fn should_drop(&mut self, _time: Instant) -> bool {
        self.state() == ConnectionState::NotConnected && !self.has_outgoing()
    }

    fn process_packet(&mut self, payload: &[u8], time: Instant) -> Vec<Action<SocketEvent>> {
        let events = self.process_datagram(payload, time);
        collect_actions(self, events)
    }

    fn process_event(&mut self, event: OutboundMessage, time: Instant) -> Vec<Action<SocketEvent>> {
        if let Err(err) = self.send_bytes(event.payload(), event.option(), time) {
            warn!("dropping send to {}: {}", event.address(), err);
        }
        collect_actions(self, Vec::new())
    }

    fn update(&mut self, time: Instant) -> Vec<Action<SocketEvent>> {
        let events = Connection::update(self, time);
        collect_actions(self, events)
    }

    fn on_send_failure(&mut self, frame: &[u8], _time: Instant) -> Vec<Action<SocketEvent>> {
        // a lost acknowledgement is recovered by the peer's retransmission
        if frame.first() == Some(&SendOption::Ack.to_u8()) {
            return Vec::new();
        }
        let events = self.internal_disconnect(DisconnectReason::SocketSendFailure);
        collect_actions(self, events.into_iter().collect())
    }

    fn close(&mut self) {
        Connection::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_payload_requires_a_full_hello() {
        // too short
        assert_eq!(
            <Connection as Session>::opening_payload(&[8, 0, 0]),
            None
        );
        // wrong header
        assert_eq!(
            <Connection as Session>::opening_payload(&[1, 0, 0, 0, 1]),
            None
        );
        // minimal hello: header, id, version
        assert_eq!(
            <Connection as Session>::opening_payload(&[8, 0, 0, 0]),
            Some(&[][..])
        );
        // handshake bytes follow the version byte
        assert_eq!(
            <Connection as Session>::opening_payload(&[8, 0, 5, 0, 0xAB, 0xCD]),
            Some(&[0xAB, 0xCD][..])
        );
    }

    #[test]
    fn rejection_frame_is_a_disconnect() {
        let frame = <Connection as Session>::rejection_frame(b"full");
        assert_eq!(frame[0], SendOption::Disconnect.to_u8());
        assert_eq!(&frame[1..], b"full");
    }

    #[test]
    fn admit_emits_connect_with_handshake() {
        let config = Config::default();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut connection = Connection::new(addr, &config);

        let actions = connection.admit(b"hi", Instant::now());
        assert!(connection.is_established());
        assert!(matches!(
            &actions[..],
            [Action::Emit(SocketEvent::Connect { handshake, .. })] if handshake == b"hi"
        ));
    }
}
