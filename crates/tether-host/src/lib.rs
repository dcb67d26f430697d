#![warn(missing_docs)]

//! tether-host: socket glue for the tether transport.
//!
//! The [`Server`] multiplexes many peers on one bound socket, admitting new
//! sessions through an optional [`ConnectionGate`] when their hello arrives.
//! The [`Client`] binds an ephemeral socket and drives the handshake to one
//! server. Both are pumped by a synchronous poll; all per-connection work
//! happens on the calling thread.
//!
//! [`ConnectionGate`]: tether_core::hooks::ConnectionGate

/// LAN discovery broadcasts.
pub mod discovery;
/// Event and action types for the runtime layer.
pub mod event_types;
/// Session trait connecting the listener to the peer layer.
pub mod session;
/// Clock abstraction for testability.
pub mod time;

mod client;
mod connection_session;
mod listener;
mod server;
mod socket;

pub use client::Client;
pub use discovery::{DiscoveryBroadcaster, DiscoveryListener};
pub use event_types::{Action, OutboundMessage, SocketEvent};
pub use listener::Listener;
pub use server::Server;
pub use time::{Clock, SystemClock};
