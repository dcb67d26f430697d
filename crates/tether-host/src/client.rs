use std::{
    collections::VecDeque,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    sync::Arc,
    thread::sleep,
    time::{Duration, Instant},
};

use tether_core::{
    config::Config,
    error::{DisconnectReason, ErrorKind, Result},
    hooks::DisconnectPolicy,
    transport::Socket as TransportSocket,
};
use tether_peer::{Connection, ConnectionEvent, ConnectionState};
use tether_protocol::{
    message_buffer::MessageBuffer,
    send_option::{EnumConverter, SendMode, SendOption},
};
use tracing::{error, trace};

use crate::{
    event_types::SocketEvent,
    socket::UdpTransport,
    time::{Clock, SystemClock},
};

/// Sleep between handshake poll rounds.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A client session to one server.
///
/// [`connect`](Client::connect) binds an ephemeral socket on the server's IP
/// family, performs the hello handshake and returns an established client.
/// The caller then pumps [`manual_poll`](Client::manual_poll) and drains
/// [`recv`](Client::recv), the same rhythm as a [`Server`](crate::Server).
pub struct Client {
    socket: UdpTransport,
    connection: Connection,
    remote: SocketAddr,
    receive_buffer: Vec<u8>,
    pending_events: VecDeque<SocketEvent>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("remote", &self.remote)
            .field("connection", &self.connection)
            .finish()
    }
}

impl Client {
    /// Connects to a server with default configuration.
    ///
    /// The handshake payload is delivered to the server's new-connection
    /// event. Completes when the hello is acknowledged, fails when the
    /// remote disconnects during the handshake or the timeout passes.
    pub fn connect(remote: SocketAddr, payload: &[u8], timeout: Duration) -> Result<Self> {
        Self::connect_with_config(remote, payload, timeout, Config::default())
    }

    /// Connects to a server with custom configuration.
    pub fn connect_with_config(
        remote: SocketAddr,
        payload: &[u8],
        timeout: Duration,
        config: Config,
    ) -> Result<Self> {
        Self::connect_with_config_and_clock(remote, payload, timeout, config, Arc::new(SystemClock))
    }

    /// Connects with a custom clock, for tests that control time.
    pub fn connect_with_config_and_clock(
        remote: SocketAddr,
        payload: &[u8],
        timeout: Duration,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // an ephemeral port on the remote's IP family
        let local: SocketAddr = match remote {
            SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
            SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
        };
        let socket = UdpTransport::new(UdpSocket::bind(local)?, &config)?;

        let mut client = Client {
            socket,
            connection: Connection::new(remote, &config),
            remote,
            receive_buffer: vec![0; config.receive_buffer_max_size],
            pending_events: VecDeque::new(),
            clock,
        };
        client.handshake(payload, timeout)?;
        Ok(client)
    }

    fn handshake(&mut self, payload: &[u8], timeout: Duration) -> Result<()> {
        let started = self.clock.now();
        let deadline = started + timeout;
        self.connection.begin_connect(payload, started)?;
        self.flush();

        loop {
            let now = self.clock.now();
            self.manual_poll(now);

            let mut index = 0;
            while index < self.pending_events.len() {
                match &self.pending_events[index] {
                    SocketEvent::Connect { .. } => {
                        self.pending_events.remove(index);
                        return Ok(());
                    }
                    SocketEvent::Disconnect { reason, payload, .. } => {
                        let detail = match payload {
                            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                            None => reason.to_string(),
                        };
                        self.pending_events.remove(index);
                        return Err(ErrorKind::RemoteDisconnectedDuringHandshake(detail));
                    }
                    // anything the server raced ahead with stays queued
                    SocketEvent::Message { .. } => index += 1,
                }
            }

            if now >= deadline {
                // the wait is cancelled; the socket stays bound until close
                self.connection.close();
                return Err(ErrorKind::HandshakeTimeout);
            }
            sleep(CONNECT_POLL_INTERVAL);
        }
    }

    /// The server this client is connected to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Returns the local socket address this client is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current round-trip estimate in milliseconds.
    pub fn rtt_estimate_ms(&self) -> f32 {
        self.connection.rtt_estimate_ms()
    }

    /// Installs the policy consulted before an internal disconnect.
    pub fn set_disconnect_policy(&mut self, policy: Box<dyn DisconnectPolicy>) {
        self.connection.set_disconnect_policy(policy);
    }

    /// Changes the keep-alive interval; assignment restarts the timer and
    /// `None` disables pings.
    pub fn set_keep_alive_interval(&mut self, interval: Option<Duration>) {
        self.connection.set_keep_alive_interval(interval, self.clock.now());
    }

    /// Sends a composed buffer using its send-mode preamble, immediately.
    pub fn send(&mut self, buffer: &MessageBuffer) -> Result<()> {
        self.connection.send(buffer, self.clock.now())?;
        self.flush();
        Ok(())
    }

    /// Frames raw bytes with the given mode and sends them immediately.
    pub fn send_bytes(&mut self, payload: &[u8], mode: SendMode) -> Result<()> {
        self.connection.send_bytes(payload, SendOption::from(mode), self.clock.now())?;
        self.flush();
        Ok(())
    }

    /// Gracefully disconnects: one unreliable disconnect datagram, then the
    /// session closes and a disconnect event is queued. The optional
    /// payload buffer must not be reliable. A no-op when already closed.
    pub fn disconnect(&mut self, payload: Option<&MessageBuffer>) -> Result<()> {
        if let Some(event) = self.connection.disconnect(payload)? {
            self.queue_event(event);
        }
        self.flush();
        Ok(())
    }

    /// Ungracefully closes the session. Sends nothing and fires no
    /// disconnect event.
    pub fn close(&mut self) {
        self.connection.close();
    }

    /// Receives the next available network event.
    pub fn recv(&mut self) -> Option<SocketEvent> {
        self.pending_events.pop_front()
    }

    /// Polls the socket, drives the connection's deadlines and flushes
    /// outbound frames.
    pub fn manual_poll(&mut self, now: Instant) {
        loop {
            match self.socket.receive_packet(&mut self.receive_buffer) {
                Ok((payload, address)) => {
                    if address != self.remote {
                        trace!("ignoring datagram from unrelated peer {}", address);
                        continue;
                    }
                    if payload.is_empty() {
                        // a zero-length read is how some platforms report a
                        // closed remote socket
                        let event = self
                            .connection
                            .internal_disconnect(DisconnectReason::ZeroBytesReceived);
                        self.queue_events(event);
                        continue;
                    }
                    let payload = payload.to_vec();
                    let events = self.connection.process_datagram(&payload, now);
                    self.queue_events(events);
                }
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        error!("encountered an error receiving data: {:?}", err);
                        let event = self
                            .connection
                            .internal_disconnect(DisconnectReason::SocketReceiveFailure);
                        self.queue_events(event);
                    }
                    break;
                }
            }
            if self.socket.is_blocking_mode() {
                break;
            }
        }

        let events = self.connection.update(now);
        self.queue_events(events);
        self.flush();
    }

    fn flush(&mut self) {
        for frame in self.connection.drain_outgoing() {
            if let Err(err) = self.socket.send_packet(&self.remote, &frame) {
                error!("error occurred sending a datagram (to {}): {}", self.remote, err);
                // a lost acknowledgement is recovered by the peer's
                // retransmission; anything else is fatal
                if frame.first() == Some(&SendOption::Ack.to_u8()) {
                    continue;
                }
                let event =
                    self.connection.internal_disconnect(DisconnectReason::SocketSendFailure);
                self.queue_events(event);
                break;
            }
        }
    }

    fn queue_events<I: IntoIterator<Item = ConnectionEvent>>(&mut self, events: I) {
        for event in events {
            self.queue_event(event);
        }
    }

    fn queue_event(&mut self, event: ConnectionEvent) {
        let address = self.remote;
        let socket_event = match event {
            ConnectionEvent::Connected { handshake } => {
                SocketEvent::Connect { address, handshake }
            }
            ConnectionEvent::Message { payload, mode } => {
                SocketEvent::Message { address, payload, mode }
            }
            ConnectionEvent::Disconnected { reason, payload } => {
                SocketEvent::Disconnect { address, reason, payload }
            }
        };
        self.pending_events.push_back(socket_event);
    }
}
