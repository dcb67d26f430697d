use std::convert::TryFrom;

use tether_core::error::{DecodingErrorKind, ErrorKind};

/// Helper trait to convert enums to u8 values for wire format.
pub trait EnumConverter {
    /// The enum type this converter works with.
    type Enum;

    /// Converts the enum to a u8 for serialization.
    fn to_u8(&self) -> u8;
}

/// Enum to specify how an application message should be delivered.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq)]
pub enum SendMode {
    /// Message may or may not be delivered
    Unreliable,
    /// Message will be delivered at most once, retransmitted until
    /// acknowledged
    Reliable,
}

impl EnumConverter for SendMode {
    type Enum = SendMode;

    /// Returns an integer value from `SendMode` enum.
    fn to_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for SendMode {
    type Error = ErrorKind;
    /// Gets the `SendMode` enum instance from integer value.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SendMode::Unreliable),
            1 => Ok(SendMode::Reliable),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::SendOption)),
        }
    }
}

/// The one-byte packet type at the start of each datagram.
///
/// The user-facing [`SendMode`] values are a subset; the remaining values
/// mark transport-internal frames.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq)]
pub enum SendOption {
    /// Fire-and-forget application payload
    Unreliable = 0,
    /// Tracked application payload carrying a reliable ID
    Reliable = 1,
    /// Session-opening handshake, tracked like a reliable packet
    Hello = 8,
    /// Session teardown notice, sent unreliably
    Disconnect = 9,
    /// Acknowledgement of a reliable ID plus a recent bitmask
    Ack = 10,
    /// Reserved for payload fragmentation
    Fragment = 11,
    /// Keep-alive probe, tracked like a reliable packet
    Ping = 12,
}

impl SendOption {
    /// Returns true when a packet with this header carries a reliable ID in
    /// the two bytes after the header and is tracked for retransmission.
    pub fn carries_reliable_id(&self) -> bool {
        matches!(self, SendOption::Reliable | SendOption::Hello | SendOption::Ping)
    }

    /// Classifies an inbound header byte.
    ///
    /// Unknown bytes are not an error on the wire: the dispatcher delivers
    /// such packets as unreliable payloads, so this returns `None` for them.
    pub fn from_header_byte(value: u8) -> Option<SendOption> {
        match value {
            0 => Some(SendOption::Unreliable),
            1 => Some(SendOption::Reliable),
            8 => Some(SendOption::Hello),
            9 => Some(SendOption::Disconnect),
            10 => Some(SendOption::Ack),
            11 => Some(SendOption::Fragment),
            12 => Some(SendOption::Ping),
            _ => None,
        }
    }
}

impl EnumConverter for SendOption {
    type Enum = SendOption;

    fn to_u8(&self) -> u8 {
        *self as u8
    }
}

impl From<SendMode> for SendOption {
    fn from(mode: SendMode) -> Self {
        match mode {
            SendMode::Unreliable => SendOption::Unreliable,
            SendMode::Reliable => SendOption::Reliable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_fixed() {
        assert_eq!(SendOption::Unreliable.to_u8(), 0);
        assert_eq!(SendOption::Reliable.to_u8(), 1);
        assert_eq!(SendOption::Hello.to_u8(), 8);
        assert_eq!(SendOption::Disconnect.to_u8(), 9);
        assert_eq!(SendOption::Ack.to_u8(), 10);
        assert_eq!(SendOption::Fragment.to_u8(), 11);
        assert_eq!(SendOption::Ping.to_u8(), 12);
    }

    #[test]
    fn reliable_tracking_covers_hello_and_ping() {
        assert!(SendOption::Reliable.carries_reliable_id());
        assert!(SendOption::Hello.carries_reliable_id());
        assert!(SendOption::Ping.carries_reliable_id());
        assert!(!SendOption::Unreliable.carries_reliable_id());
        assert!(!SendOption::Ack.carries_reliable_id());
        assert!(!SendOption::Disconnect.carries_reliable_id());
    }

    #[test]
    fn unknown_header_bytes_are_not_options() {
        assert_eq!(SendOption::from_header_byte(2), None);
        assert_eq!(SendOption::from_header_byte(7), None);
        assert_eq!(SendOption::from_header_byte(0xFF), None);
    }

    #[test]
    fn send_mode_round_trips() {
        assert_eq!(SendMode::try_from(0).unwrap(), SendMode::Unreliable);
        assert_eq!(SendMode::try_from(1).unwrap(), SendMode::Reliable);
        assert!(SendMode::try_from(8).is_err());
    }
}
