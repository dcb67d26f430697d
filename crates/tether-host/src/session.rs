use std::{fmt::Debug, net::SocketAddr, time::Instant};

use tether_core::config::Config;

use crate::event_types::Action;

/// Returns an address of an event.
pub trait SessionEventAddress {
    /// Returns event address
    fn address(&self) -> SocketAddr;
}

/// Manages the lifecycle and state of a peer session on behalf of the
/// listener. Defines the `Send` and `Receive` event types a session uses.
pub trait Session: Debug {
    /// Defines a user event type.
    type SendEvent: Debug + SessionEventAddress;
    /// Defines a session event type.
    type ReceiveEvent: Debug + SessionEventAddress;

    /// Creates a new session for a remote address.
    fn create_session(config: &Config, address: SocketAddr, time: Instant) -> Self;

    /// Decides whether a datagram from an unknown peer may open a session.
    /// Returns the handshake payload when it may; anything else from an
    /// unknown peer is ignored.
    fn opening_payload(datagram: &[u8]) -> Option<&[u8]>;

    /// Builds the frame sent to a peer the admission gate turned away.
    fn rejection_frame(payload: &[u8]) -> Vec<u8>;

    /// Marks the session admitted and announces it to the user.
    /// Called once, before the opening datagram is processed.
    fn admit(&mut self, handshake: &[u8], time: Instant) -> Vec<Action<Self::ReceiveEvent>>;

    /// Sessions are established once their handshake completed.
    fn is_established(&self) -> bool;

    /// Determines if the listener should remove the session.
    fn should_drop(&mut self, time: Instant) -> bool;

    /// Processes a received datagram.
    fn process_packet(&mut self, payload: &[u8], time: Instant) -> Vec<Action<Self::ReceiveEvent>>;

    /// Processes a user send request.
    fn process_event(
        &mut self,
        event: Self::SendEvent,
        time: Instant,
    ) -> Vec<Action<Self::ReceiveEvent>>;

    /// Processes session-related tasks: resend due packets, keep-alive, etc.
    fn update(&mut self, time: Instant) -> Vec<Action<Self::ReceiveEvent>>;

    /// Reacts to a frame that could not be put on the wire. Sessions decide
    /// whether the failure is fatal; losing an acknowledgement is not.
    fn on_send_failure(
        &mut self,
        frame: &[u8],
        time: Instant,
    ) -> Vec<Action<Self::ReceiveEvent>>;

    /// Ungracefully closes the session when the listener shuts down.
    fn close(&mut self);
}
