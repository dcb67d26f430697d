#![warn(missing_docs)]

//! tether-peer: the per-peer half of the tether transport.
//!
//! A [`Connection`] couples the protocol dispatcher, the reliability engine
//! and the keep-alive engine for one remote endpoint. It owns no socket:
//! inbound datagrams are pushed in, outbound frames are drained out, and a
//! periodic update drives retransmission and liveness deadlines. The host
//! layer wires connections to an actual socket.

/// Keep-alive pings and the unanswered-ping budget.
pub mod keep_alive;
/// Connection state machine.
pub mod state;

mod connection;

pub use connection::{Connection, ConnectionEvent};
pub use keep_alive::{KeepAlive, KeepAliveDecision};
pub use state::ConnectionState;
