//! Event and action types for the runtime layer.
//!
//! This module defines the core types used for communication between the
//! connection layer and the user:
//! - `Action`: Instructions from connections to the runtime (send bytes or emit events)
//! - `SocketEvent`: Events emitted to the user (messages, connects, disconnects)
//! - `OutboundMessage`: A send request routed to a peer by address

use std::net::SocketAddr;

use tether_core::error::DisconnectReason;
use tether_protocol::send_option::{SendMode, SendOption};

/// Actions that connections can request from the runtime.
/// Used by the Session trait to return instructions to the listener.
#[derive(Debug)]
pub enum Action<E> {
    /// Send the given bytes to the connection's remote address
    Send(Vec<u8>),
    /// Emit an event to the user
    Emit(E),
}

/// Events that can occur and are pushed through the event receiver.
/// These are user-facing events emitted by the listener.
#[derive(Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// A peer completed its handshake. Carries the hello payload past the
    /// version byte.
    Connect {
        /// The new peer
        address: SocketAddr,
        /// Handshake payload the peer sent
        handshake: Vec<u8>,
    },
    /// An application message arrived.
    Message {
        /// The sending peer
        address: SocketAddr,
        /// Bytes past the wire header
        payload: Vec<u8>,
        /// How the peer sent it
        mode: SendMode,
    },
    /// A session ended, gracefully or not.
    Disconnect {
        /// The departed peer
        address: SocketAddr,
        /// Why the session ended
        reason: DisconnectReason,
        /// A farewell payload, when the peer attached one
        payload: Option<Vec<u8>>,
    },
}

impl SocketEvent {
    /// The peer this event concerns.
    pub fn address(&self) -> SocketAddr {
        match self {
            SocketEvent::Connect { address, .. } => *address,
            SocketEvent::Message { address, .. } => *address,
            SocketEvent::Disconnect { address, .. } => *address,
        }
    }
}

/// A send request addressed to one peer, queued through the server's
/// message sender and dispatched on the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    address: SocketAddr,
    payload: Vec<u8>,
    option: SendOption,
}

impl OutboundMessage {
    /// Creates a message with an explicit delivery mode.
    pub fn new(address: SocketAddr, payload: Vec<u8>, mode: SendMode) -> Self {
        Self { address, payload, option: mode.into() }
    }

    /// Creates a message retransmitted until acknowledged.
    pub fn reliable(address: SocketAddr, payload: Vec<u8>) -> Self {
        Self::new(address, payload, SendMode::Reliable)
    }

    /// Creates a fire-and-forget message.
    pub fn unreliable(address: SocketAddr, payload: Vec<u8>) -> Self {
        Self::new(address, payload, SendMode::Unreliable)
    }

    /// The destination peer.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The message bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The wire header this message will be framed with.
    pub fn option(&self) -> SendOption {
        self.option
    }
}
