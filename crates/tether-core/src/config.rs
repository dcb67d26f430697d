use std::{default::Default, time::Duration};

use crate::constants::DEFAULT_MTU;

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
pub struct Config {
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Fixed retransmission timeout. None derives the timeout from the
    /// round-trip estimate instead.
    pub resend_timeout: Option<Duration>,
    /// Max retransmissions of a single packet before dropping the connection
    /// (0 = unlimited).
    pub resend_limit: u32,
    /// Factor applied when escalating a packet's retransmission timeout, and
    /// to the round-trip estimate when deriving the initial timeout.
    pub resend_ping_multiplier: f32,
    /// Max age of an unacknowledged reliable packet before the connection is
    /// considered dead.
    pub disconnect_timeout: Duration,
    /// Interval between keep-alive pings. None disables keep-alive.
    pub keep_alive_interval: Option<Duration>,
    /// Number of unanswered pings tolerated before dropping the connection.
    pub missing_pings_until_disconnect: u32,
    /// Max receive buffer size in bytes.
    pub receive_buffer_max_size: usize,
    /// Maximum number of concurrent peers a listener accepts (0 = unlimited).
    pub max_peers: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    /// Corresponds to IP_TTL socket option.
    pub socket_ttl: Option<u32>,
    /// Enable broadcast mode (default: false).
    /// Corresponds to SO_BROADCAST socket option.
    pub socket_broadcast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocking_mode: false,
            resend_timeout: None, // adaptive from the round-trip estimate
            resend_limit: 0,      // unlimited; the age budget still applies
            resend_ping_multiplier: 2.0,
            disconnect_timeout: Duration::from_secs(5),
            keep_alive_interval: Some(Duration::from_millis(1500)),
            missing_pings_until_disconnect: 6,
            receive_buffer_max_size: DEFAULT_MTU,
            max_peers: 0, // unlimited
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
            socket_broadcast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_tunables() {
        let config = Config::default();
        assert_eq!(config.resend_timeout, None);
        assert_eq!(config.resend_limit, 0);
        assert_eq!(config.resend_ping_multiplier, 2.0);
        assert_eq!(config.disconnect_timeout, Duration::from_secs(5));
        assert_eq!(config.keep_alive_interval, Some(Duration::from_millis(1500)));
        assert_eq!(config.missing_pings_until_disconnect, 6);
    }
}
