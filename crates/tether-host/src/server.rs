use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread::{sleep, yield_now},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tether_core::{
    config::Config,
    error::Result,
    hooks::ConnectionGate,
    transport::Socket as TransportSocket,
};
use tether_peer::Connection;
use tether_protocol::message_buffer::MessageBuffer;

use crate::{
    event_types::{OutboundMessage, SocketEvent},
    listener::Listener,
    socket::UdpTransport,
    time::{Clock, SystemClock},
};

/// A server endpoint accepting many peers on one bound socket.
///
/// Peers announce themselves with a hello datagram; an optional
/// [`ConnectionGate`] decides admission. Established peers exchange
/// messages through the [`OutboundMessage`] sender and the
/// [`SocketEvent`] receiver, pumped by [`manual_poll`](Server::manual_poll)
/// or the blocking [`start_polling`](Server::start_polling) loop.
pub struct Server {
    listener: Listener<UdpTransport, Connection>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("listener", &self.listener).finish()
    }
}

impl Server {
    /// Creates a server bound to the specified address with default
    /// configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, Config::default())
    }

    /// Creates a server bound to any available port on localhost with
    /// default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(Config::default())
    }

    /// Creates a server bound to any available port on localhost with the
    /// specified configuration.
    pub fn bind_any_with_config(config: Config) -> Result<Self> {
        let loopback = Ipv4Addr::new(127, 0, 0, 1);
        let address = SocketAddrV4::new(loopback, 0);
        let socket = UdpSocket::bind(address)?;
        Self::build(socket, config, Arc::new(SystemClock), None)
    }

    /// Creates a server bound to the specified address with custom
    /// configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::build(socket, config, Arc::new(SystemClock), None)
    }

    /// Creates a server with a custom admission gate.
    pub fn bind_with_gate<A: ToSocketAddrs>(
        addresses: A,
        config: Config,
        gate: Box<dyn ConnectionGate>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::build(socket, config, Arc::new(SystemClock), Some(gate))
    }

    /// Creates a server with a custom socket, configuration, clock and
    /// gate, for tests that control time.
    pub fn bind_with_config_clock_and_gate(
        socket: UdpSocket,
        config: Config,
        clock: Arc<dyn Clock>,
        gate: Option<Box<dyn ConnectionGate>>,
    ) -> Result<Self> {
        Self::build(socket, config, clock, gate)
    }

    fn build(
        socket: UdpSocket,
        config: Config,
        clock: Arc<dyn Clock>,
        gate: Option<Box<dyn ConnectionGate>>,
    ) -> Result<Self> {
        let transport = UdpTransport::new(socket, &config)?;
        Ok(Server { listener: Listener::new_with_gate(transport, config, gate), clock })
    }

    /// Returns a clone of the message sender for queueing sends to peers.
    pub fn get_message_sender(&self) -> Sender<OutboundMessage> {
        self.listener.message_sender().clone()
    }

    /// Returns a clone of the event receiver for network events.
    pub fn get_event_receiver(&self) -> Receiver<SocketEvent> {
        self.listener.event_receiver().clone()
    }

    /// Queues a message to a peer. It is framed and sent during the next
    /// poll.
    pub fn send(&mut self, message: OutboundMessage) -> Result<()> {
        self.listener.message_sender().send(message).expect("Receiver must exist");
        Ok(())
    }

    /// Receives the next available network event.
    pub fn recv(&mut self) -> Option<SocketEvent> {
        match self.listener.event_receiver().try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!["This can never happen"],
        }
    }

    /// Starts automatic polling in a loop with 1ms intervals (blocking
    /// call). Returns once [`stop`](Server::stop) was called.
    pub fn start_polling(&mut self) {
        self.start_polling_with_duration(Some(Duration::from_millis(1)))
    }

    /// Starts automatic polling with a custom sleep between polls
    /// (blocking call).
    pub fn start_polling_with_duration(&mut self, sleep_duration: Option<Duration>) {
        while !self.listener.is_stopped() {
            self.manual_poll(self.clock.now());
            match sleep_duration {
                None => yield_now(),
                Some(duration) => sleep(duration),
            };
        }
    }

    /// Manually polls the network for inbound datagrams, dispatches queued
    /// sends and drives every peer's retransmission and keep-alive
    /// deadlines.
    pub fn manual_poll(&mut self, time: Instant) {
        self.listener.manual_poll(time);
    }

    /// Returns the local socket address this server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.socket().local_addr()?)
    }

    /// Initiates a graceful disconnect from the specified peer. The
    /// optional payload buffer must not be reliable.
    pub fn disconnect(
        &mut self,
        addr: SocketAddr,
        payload: Option<&MessageBuffer>,
    ) -> Result<()> {
        let event = match self.listener.session_mut(&addr) {
            Some(session) => Connection::disconnect(session, payload)?,
            None => return Ok(()),
        };
        if let Some(tether_peer::ConnectionEvent::Disconnected { reason, payload }) = event {
            self.listener.emit(SocketEvent::Disconnect { address: addr, reason, payload });
        }
        Ok(())
    }

    /// Halts accepting, closes every session and releases the socket when
    /// the server is dropped. Polling afterwards is inert.
    pub fn stop(&mut self) {
        self.listener.stop(self.clock.now());
    }

    /// Broadcasts a payload to all established peers. Returns the number
    /// of peers addressed.
    pub fn broadcast(
        &mut self,
        payload: Vec<u8>,
        mode: tether_protocol::send_option::SendMode,
    ) -> Result<usize> {
        let addresses: Vec<SocketAddr> = self.listener.established_sessions().copied().collect();
        let count = addresses.len();
        for addr in addresses {
            self.send(OutboundMessage::new(addr, payload.clone(), mode))?;
        }
        Ok(count)
    }

    /// Returns the number of established peers.
    pub fn established_connections_count(&self) -> usize {
        self.listener.established_sessions_count()
    }
}
