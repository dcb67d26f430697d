#![warn(missing_docs)]

//! Tether: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types to build session-oriented UDP apps:
//!
//! - Server and client endpoints (`Server`, `Client`, `SocketEvent`)
//! - Message framing (`MessageBuffer`, `SendMode`)
//! - Core configuration and hooks (`Config`, `ConnectionGate`,
//!   `DisconnectPolicy`)
//!
//! Example
//! ```ignore
//! use std::time::{Duration, Instant};
//! use tether::{Client, SendMode, Server, SocketEvent};
//!
//! let mut server = Server::bind("127.0.0.1:7777").unwrap();
//! let remote = server.local_addr().unwrap();
//!
//! // a client session; the handshake payload reaches the server's
//! // Connect event
//! let mut client = Client::connect(remote, b"nick=kit", Duration::from_secs(5)).unwrap();
//! client.send_bytes(b"hello", SendMode::Reliable).unwrap();
//!
//! server.manual_poll(Instant::now());
//! while let Some(event) = server.recv() {
//!     match event {
//!         SocketEvent::Connect { address, handshake } => { /* admit player */ }
//!         SocketEvent::Message { payload, .. } => { /* game input */ }
//!         SocketEvent::Disconnect { .. } => { /* drop player */ }
//!     }
//! }
//! ```

// Core config, errors and hooks
pub use tether_core::{
    config::Config,
    error::{DisconnectReason, ErrorKind, Result},
    hooks::{ConnectionGate, DisconnectPolicy},
};
// Host: server listener and client connector
pub use tether_host::{
    Client, DiscoveryBroadcaster, DiscoveryListener, OutboundMessage, Server, SocketEvent,
};
// Peer: lifecycle state
pub use tether_peer::ConnectionState;
// Protocol: framing and delivery modes
pub use tether_protocol::{Lease, MessageBuffer, MessageBufferPool, SendMode};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Client, Config, ConnectionState, DisconnectReason, MessageBuffer, MessageBufferPool,
        OutboundMessage, SendMode, Server, SocketEvent,
    };
}
