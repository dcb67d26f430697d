#![warn(missing_docs)]

//! tether-protocol: the wire contracts of the tether transport.
//!
//! This crate holds everything a peer implementation must match bit-exactly:
//! - The send-option header byte and the user-facing send mode
//! - The message buffer (length-prefixed nested messages, packed varints,
//!   typed little/big-endian primitives)
//! - The reliability engine (ID allocation, retransmission, cumulative
//!   acknowledgement with a recent bitmask, round-trip estimation)
//! - The novelty window deciding which reliable IDs reach the application

/// Pooling for message buffers.
pub mod buffer_pool;
/// The framing buffer: typed primitives and nested message frames.
pub mod message_buffer;
/// Duplicate/novelty classification of reliable IDs across 16-bit wrap.
pub mod novelty;
/// Reliable-ID allocation, retransmission and acknowledgement handling.
pub mod reliability;
/// Send-option header byte and user-facing send mode.
pub mod send_option;

pub use buffer_pool::{Lease, MessageBufferPool};
pub use message_buffer::MessageBuffer;
pub use novelty::{Novelty, NoveltyWindow};
pub use reliability::{OutstandingPacket, ReliabilityEngine, ResendPass};
pub use send_option::{EnumConverter, SendMode, SendOption};
