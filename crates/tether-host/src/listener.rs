use std::{collections::HashMap, fmt, fmt::Debug, net::SocketAddr, time::Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tether_core::{
    config::Config,
    hooks::{ConnectionGate, OpenGate},
    transport::Socket,
};
use tracing::{error, trace};

use crate::{
    event_types::Action,
    session::{Session, SessionEventAddress},
};

/// Owns the socket and the outbound/event staging shared by every session.
///
/// Kept separate from the session map so sessions can be iterated while
/// their actions are staged.
struct Messenger<TSocket: Socket, ReceiveEvent: Debug> {
    config: Config,
    socket: TSocket,
    event_sender: Sender<ReceiveEvent>,
    pending_sends: Vec<(SocketAddr, Vec<u8>)>,
    pending_events: Vec<ReceiveEvent>,
}

impl<TSocket: Socket, ReceiveEvent: Debug> Messenger<TSocket, ReceiveEvent> {
    fn new(config: Config, socket: TSocket, event_sender: Sender<ReceiveEvent>) -> Self {
        Self {
            config,
            socket,
            event_sender,
            pending_sends: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    fn handle_actions(&mut self, address: &SocketAddr, actions: Vec<Action<ReceiveEvent>>) {
        for action in actions {
            match action {
                Action::Send(bytes) => self.pending_sends.push((*address, bytes)),
                Action::Emit(event) => self.pending_events.push(event),
            }
        }
    }

    /// Flushes staged frames and events. Frames that failed to send are
    /// returned so their sessions can decide whether the failure is fatal.
    fn flush(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut failed = Vec::new();
        for (addr, payload) in self.pending_sends.drain(..) {
            if let Err(err) = self.socket.send_packet(&addr, &payload) {
                error!("error occurred sending a datagram (to {}): {}", addr, err);
                failed.push((addr, payload));
            }
        }
        for event in self.pending_events.drain(..) {
            self.event_sender.send(event).expect("Receiver must exist");
        }
        failed
    }
}

/// Demultiplexes one bound socket across many peer sessions.
///
/// Unknown peers are ignored unless their first datagram is a complete
/// hello; the admission gate may still turn them away with a rejection
/// payload. A single [`manual_poll`](Listener::manual_poll) drains the
/// socket, dispatches queued user sends, runs every session's periodic
/// update and flushes everything staged for the wire.
pub struct Listener<TSocket: Socket, TSession: Session> {
    sessions: HashMap<SocketAddr, TSession>,
    receive_buffer: Vec<u8>,
    messenger: Messenger<TSocket, TSession::ReceiveEvent>,
    user_event_receiver: Receiver<TSession::SendEvent>,
    user_event_sender: Sender<TSession::SendEvent>,
    event_receiver: Receiver<TSession::ReceiveEvent>,
    gate: Box<dyn ConnectionGate>,
    max_peers: usize,
    stopped: bool,
}

impl<TSocket: Socket, TSession: Session> fmt::Debug for Listener<TSocket, TSession> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("sessions", &self.sessions.len())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl<TSocket: Socket, TSession: Session> Listener<TSocket, TSession> {
    /// Creates a listener admitting every peer.
    pub fn new(socket: TSocket, config: Config) -> Self {
        Self::new_with_gate(socket, config, None)
    }

    /// Creates a listener with a custom admission gate.
    pub fn new_with_gate(
        socket: TSocket,
        config: Config,
        gate: Option<Box<dyn ConnectionGate>>,
    ) -> Self {
        let (event_sender, event_receiver) = unbounded();
        let (user_event_sender, user_event_receiver) = unbounded();
        let max_peers = config.max_peers;
        let gate = gate.unwrap_or_else(|| Box::new(OpenGate));

        Listener {
            receive_buffer: vec![0; config.receive_buffer_max_size],
            sessions: Default::default(),
            messenger: Messenger::new(config, socket, event_sender),
            user_event_receiver,
            user_event_sender,
            event_receiver,
            gate,
            max_peers,
            stopped: false,
        }
    }

    /// Polls for network I/O and processes all sessions.
    pub fn manual_poll(&mut self, time: Instant) {
        if self.stopped {
            return;
        }

        loop {
            match self.messenger.socket.receive_packet(self.receive_buffer.as_mut()) {
                Ok((payload, address)) => {
                    if payload.is_empty() {
                        trace!("ignoring empty datagram from {}", address);
                    } else if let Some(session) = self.sessions.get_mut(&address) {
                        let actions = session.process_packet(payload, time);
                        self.messenger.handle_actions(&address, actions);
                    } else if let Some(handshake) = TSession::opening_payload(payload) {
                        if self.max_peers != 0 && self.sessions.len() >= self.max_peers {
                            trace!("at peer capacity, ignoring hello from {}", address);
                        } else if let Some(rejection) =
                            self.gate.on_connection_init(&address, handshake)
                        {
                            self.messenger
                                .pending_sends
                                .push((address, TSession::rejection_frame(&rejection)));
                        } else {
                            let mut session = TSession::create_session(
                                &self.messenger.config,
                                address,
                                time,
                            );
                            let mut actions = session.admit(handshake, time);
                            actions.extend(session.process_packet(payload, time));
                            self.messenger.handle_actions(&address, actions);
                            self.sessions.insert(address, session);
                        }
                    } else {
                        trace!("ignoring datagram from unknown peer {}", address);
                    }
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        error!("encountered an error receiving data: {:?}", e);
                    }
                    break;
                }
            }
            if self.messenger.socket.is_blocking_mode() {
                break;
            }
        }

        while let Ok(event) = self.user_event_receiver.try_recv() {
            let addr = event.address();
            match self.sessions.get_mut(&addr) {
                Some(session) => {
                    let actions = session.process_event(event, time);
                    self.messenger.handle_actions(&addr, actions);
                }
                None => trace!("dropping send to unknown peer {}", addr),
            }
        }

        for (addr, session) in self.sessions.iter_mut() {
            let actions = session.update(time);
            self.messenger.handle_actions(addr, actions);
        }

        let failed = self.messenger.flush();
        for (addr, frame) in failed {
            if let Some(session) = self.sessions.get_mut(&addr) {
                let actions = session.on_send_failure(&frame, time);
                self.messenger.handle_actions(&addr, actions);
            }
        }

        let mut to_drop = Vec::new();
        for (addr, session) in self.sessions.iter_mut() {
            if session.should_drop(time) {
                to_drop.push(*addr);
            }
        }
        for addr in to_drop {
            self.sessions.remove(&addr);
        }

        // farewell frames and disconnect events raised by send failures;
        // a failure here has nowhere left to go
        let _ = self.messenger.flush();
    }

    /// Halts accepting, closes each session and stops polling. Pending
    /// frames are flushed one last time.
    pub fn stop(&mut self, _time: Instant) {
        for session in self.sessions.values_mut() {
            session.close();
        }
        self.sessions.clear();
        self.messenger.flush();
        self.stopped = true;
    }

    /// True after [`stop`](Listener::stop).
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Pushes an event to the user's receiver immediately.
    pub fn emit(&mut self, event: TSession::ReceiveEvent) {
        self.messenger.event_sender.send(event).expect("Receiver must exist");
    }

    /// Returns the sender for queueing user send requests.
    pub fn message_sender(&self) -> &Sender<TSession::SendEvent> {
        &self.user_event_sender
    }

    /// Returns the receiver for session events.
    pub fn event_receiver(&self) -> &Receiver<TSession::ReceiveEvent> {
        &self.event_receiver
    }

    /// Returns a reference to the underlying socket.
    pub fn socket(&self) -> &TSocket {
        &self.messenger.socket
    }

    /// Returns the number of active sessions.
    pub fn sessions_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns a mutable reference to a specific session by address.
    pub fn session_mut(&mut self, addr: &SocketAddr) -> Option<&mut TSession> {
        self.sessions.get_mut(addr)
    }

    /// Returns an iterator over all established session addresses.
    pub fn established_sessions(&self) -> impl Iterator<Item = &SocketAddr> {
        self.sessions.iter().filter(|(_, s)| s.is_established()).map(|(addr, _)| addr)
    }

    /// Returns the number of established sessions.
    pub fn established_sessions_count(&self) -> usize {
        self.sessions.iter().filter(|(_, s)| s.is_established()).count()
    }
}
