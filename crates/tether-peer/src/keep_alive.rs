use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tether_core::config::Config;

use crate::state::ConnectionState;

/// What the keep-alive deadline decided when it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveDecision {
    /// Nothing due
    Idle,
    /// Send one ping through the reliability engine and rearm
    SendPing,
    /// The unanswered-ping budget ran out; terminate the connection
    GiveUp,
}

/// Liveness proof for an established session.
///
/// A restartable deadline fires every `keep_alive_interval`. Each firing
/// sends one ping (tracked like any reliable packet) and counts it; any
/// inbound reliable-ack clears the count. When the count reaches
/// `missing_pings_until_disconnect` the session is declared dead.
///
/// Outbound reliable traffic restarts the deadline, so an active session
/// pings only when it would otherwise go quiet.
#[derive(Debug)]
pub struct KeepAlive {
    interval: Option<Duration>,
    missing_pings_until_disconnect: u32,
    pings_since_ack: u32,
    in_flight: HashMap<u16, Instant>,
    next_deadline: Option<Instant>,
}

impl KeepAlive {
    /// Creates the engine from the connection's tunables. The deadline
    /// stays unarmed until the first reliable activity.
    pub fn new(config: &Config) -> Self {
        Self {
            interval: config.keep_alive_interval,
            missing_pings_until_disconnect: config.missing_pings_until_disconnect,
            pings_since_ack: 0,
            in_flight: HashMap::new(),
            next_deadline: None,
        }
    }

    /// Checks the deadline. Firing while not connected stops the timer.
    pub fn poll(&mut self, state: ConnectionState, now: Instant) -> KeepAliveDecision {
        let deadline = match self.next_deadline {
            Some(deadline) => deadline,
            None => return KeepAliveDecision::Idle,
        };
        if now < deadline {
            return KeepAliveDecision::Idle;
        }
        if state != ConnectionState::Connected {
            self.next_deadline = None;
            return KeepAliveDecision::Idle;
        }
        if self.pings_since_ack >= self.missing_pings_until_disconnect {
            self.next_deadline = None;
            return KeepAliveDecision::GiveUp;
        }
        self.pings_since_ack += 1;
        self.arm(now);
        KeepAliveDecision::SendPing
    }

    /// Records a ping put in flight so its ID can be matched on ack.
    pub fn track_ping(&mut self, id: u16, now: Instant) {
        self.in_flight.insert(id, now);
    }

    /// Restarts the deadline after an outbound reliable send.
    pub fn on_reliable_activity(&mut self, now: Instant) {
        self.arm(now);
    }

    /// Handles an inbound reliable-ack: clears the unanswered count,
    /// retires matched pings and restarts the deadline.
    pub fn on_ack(&mut self, acked: &[u16], now: Instant) {
        self.pings_since_ack = 0;
        for id in acked {
            self.in_flight.remove(id);
        }
        self.arm(now);
    }

    /// Changes the ping interval; assignment restarts the timer.
    /// None disables keep-alive.
    pub fn set_interval(&mut self, interval: Option<Duration>, now: Instant) {
        self.interval = interval;
        self.arm(now);
    }

    fn arm(&mut self, now: Instant) {
        self.next_deadline = self.interval.map(|interval| now + interval);
    }

    /// Pings fired since the last reliable-ack.
    pub fn pings_since_ack(&self) -> u32 {
        self.pings_since_ack
    }

    /// Pings currently unacknowledged.
    pub fn pings_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Clears all liveness state and disarms the deadline.
    pub fn reset(&mut self) {
        self.pings_since_ack = 0;
        self.in_flight.clear();
        self.next_deadline = None;
    }
}
