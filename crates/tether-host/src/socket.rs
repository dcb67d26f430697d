use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

use socket2::Socket as Socket2;
use tether_core::{config::Config, transport::Socket as TransportSocket};

/// A bound UDP socket behind the transport abstraction.
#[derive(Debug)]
pub(crate) struct UdpTransport {
    is_blocking_mode: bool,
    socket: UdpSocket,
}

impl UdpTransport {
    /// Wraps a bound socket, applying the configured kernel options and
    /// blocking mode.
    pub(crate) fn new(socket: UdpSocket, config: &Config) -> io::Result<Self> {
        // buffer sizing is only reachable through socket2; TTL and
        // broadcast are plain std setters
        if config.socket_recv_buffer_size.is_some() || config.socket_send_buffer_size.is_some() {
            let raw = Socket2::from(socket.try_clone()?);
            if let Some(bytes) = config.socket_recv_buffer_size {
                raw.set_recv_buffer_size(bytes)?;
            }
            if let Some(bytes) = config.socket_send_buffer_size {
                raw.set_send_buffer_size(bytes)?;
            }
        }
        if let Some(ttl) = config.socket_ttl {
            socket.set_ttl(ttl)?;
        }
        if config.socket_broadcast {
            socket.set_broadcast(true)?;
        }

        socket.set_nonblocking(!config.blocking_mode)?;
        Ok(UdpTransport { is_blocking_mode: config.blocking_mode, socket })
    }
}

impl TransportSocket for UdpTransport {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(recv_len, address)| (&buffer[..recv_len], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.is_blocking_mode
    }
}
