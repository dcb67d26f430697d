//! LAN discovery broadcasts.
//!
//! Servers announce themselves by broadcasting a small prefixed packet to a
//! well-known port; clients listen on that port and surface the announced
//! name with the sender's address. Packets without the two-byte prefix are
//! ignored, so the listener coexists with other traffic on the port.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
};

use tether_core::constants::DISCOVERY_PREFIX;
use tracing::trace;

fn discovery_packet(name: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(DISCOVERY_PREFIX.len() + name.len());
    packet.extend_from_slice(&DISCOVERY_PREFIX);
    packet.extend_from_slice(name.as_bytes());
    packet
}

/// Announces a server on the local network.
#[derive(Debug)]
pub struct DiscoveryBroadcaster {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl DiscoveryBroadcaster {
    /// Creates a broadcaster announcing to the given well-known port.
    pub fn new(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, target: SocketAddrV4::new(Ipv4Addr::BROADCAST, port) })
    }

    /// Broadcasts one announcement carrying the given name.
    pub fn broadcast(&self, name: &str) -> io::Result<()> {
        self.socket.send_to(&discovery_packet(name), self.target)?;
        Ok(())
    }
}

/// Listens for server announcements on the well-known port.
#[derive(Debug)]
pub struct DiscoveryListener {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl DiscoveryListener {
    /// Binds the listener to the well-known discovery port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, buffer: vec![0; 1024] })
    }

    /// Returns the next announcement, if one arrived. Packets without the
    /// discovery prefix or with a malformed name are skipped.
    pub fn poll(&mut self) -> Option<(SocketAddr, String)> {
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((len, addr)) => {
                    let bytes = &self.buffer[..len];
                    if len < DISCOVERY_PREFIX.len() || bytes[..2] != DISCOVERY_PREFIX {
                        trace!("ignoring non-discovery packet from {}", addr);
                        continue;
                    }
                    match std::str::from_utf8(&bytes[2..]) {
                        Ok(name) => return Some((addr, name.to_owned())),
                        Err(_) => continue,
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_carries_prefix_and_name() {
        let packet = discovery_packet("lobby-1");
        assert_eq!(&packet[..2], &[0x04, 0x02]);
        assert_eq!(&packet[2..], b"lobby-1");
    }

    #[test]
    fn listener_surfaces_prefixed_packets_only() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        let port = listener.socket.local_addr().unwrap().port();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let target = (Ipv4Addr::LOCALHOST, port);

        // noise on the port is skipped
        sender.send_to(b"not discovery", target).unwrap();
        sender.send_to(&discovery_packet("game-42"), target).unwrap();

        let mut found = None;
        for _ in 0..50 {
            if let Some(hit) = listener.poll() {
                found = Some(hit);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let (addr, name) = found.expect("announcement should arrive on loopback");
        assert_eq!(name, "game-42");
        assert_eq!(addr.port(), sender.local_addr().unwrap().port());
    }

    #[test]
    fn empty_poll_returns_none() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        assert_eq!(listener.poll(), None);
    }
}
