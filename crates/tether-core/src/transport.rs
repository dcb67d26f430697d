//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// This trait allows various transports (UDP, in-memory test links, etc.) to
/// be plugged into the listener without coupling to a concrete implementation.
pub trait Socket {
    /// Sends a single datagram to the given address.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram from the socket.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the socket address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether the socket operates in blocking or non-blocking mode.
    fn is_blocking_mode(&self) -> bool;
}
