//! Admission and disconnect-policy hooks.
//!
//! These traits are the two points where an application steers the session
//! lifecycle from inside the poll loop: gating new peers at the listener, and
//! attaching a farewell payload when the transport tears a session down.

use std::net::SocketAddr;

use crate::error::DisconnectReason;

/// Admission gate consulted when an unknown peer sends a hello.
///
/// Returning a payload rejects the peer; the payload is delivered to the
/// remote in a disconnect datagram and no session is created. Returning
/// `None` admits the peer.
///
/// # Examples
/// ```
/// use std::net::SocketAddr;
/// use tether_core::hooks::ConnectionGate;
///
/// struct VersionGate;
///
/// impl ConnectionGate for VersionGate {
///     fn on_connection_init(&mut self, _addr: &SocketAddr, hello: &[u8]) -> Option<Vec<u8>> {
///         if hello.first() == Some(&1) {
///             None // admit
///         } else {
///             Some(b"unsupported client version".to_vec())
///         }
///     }
/// }
/// ```
pub trait ConnectionGate: Send {
    /// Called with the remote address and the hello handshake payload.
    fn on_connection_init(&mut self, addr: &SocketAddr, hello: &[u8]) -> Option<Vec<u8>>;
}

/// Admission gate that accepts every peer.
///
/// This is the default gate when none is installed.
#[derive(Debug, Clone, Copy)]
pub struct OpenGate;

impl ConnectionGate for OpenGate {
    fn on_connection_init(&mut self, _addr: &SocketAddr, _hello: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Policy consulted when the transport disconnects a session on its own,
/// e.g. after a retransmission budget or the keep-alive budget ran out.
///
/// Returning a payload sends one farewell disconnect datagram to the remote
/// before the session closes.
pub trait DisconnectPolicy: Send {
    /// Called with the reason the transport is about to close the session.
    fn on_internal_disconnect(&mut self, reason: DisconnectReason) -> Option<Vec<u8>>;
}

/// Policy that closes silently in every case.
#[derive(Debug, Clone, Copy)]
pub struct SilentDisconnect;

impl DisconnectPolicy for SilentDisconnect {
    fn on_internal_disconnect(&mut self, _reason: DisconnectReason) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    struct DenyAll;

    impl ConnectionGate for DenyAll {
        fn on_connection_init(&mut self, _addr: &SocketAddr, _hello: &[u8]) -> Option<Vec<u8>> {
            Some(b"full".to_vec())
        }
    }

    #[test]
    fn open_gate_admits() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);
        assert!(OpenGate.on_connection_init(&addr, b"hi").is_none());
    }

    #[test]
    fn rejecting_gate_returns_payload() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);
        assert_eq!(DenyAll.on_connection_init(&addr, b"hi"), Some(b"full".to_vec()));
    }

    #[test]
    fn silent_policy_sends_nothing() {
        assert!(SilentDisconnect
            .on_internal_disconnect(DisconnectReason::PingsWithoutResponse)
            .is_none());
    }
}
