//! Error types and results.

use std::io;

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that can occur while using the transport.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A wire field could not be decoded.
    #[error("could not decode packet field: {0}")]
    DecodingError(DecodingErrorKind),
    /// A datagram was too short to carry the header it announced.
    #[error("received data was too short to parse")]
    ReceivedDataTooShort,
    /// A write or clear was attempted on a read-only message view.
    #[error("buffer is a read-only message view")]
    BufferIsView,
    /// A buffer was handed to the send path with unclosed nested messages.
    #[error("buffer has unfinished nested messages")]
    UnfinishedMessage,
    /// `end_message` or `cancel_message` was called without a matching
    /// `start_message`.
    #[error("no nested message is open")]
    NoOpenMessage,
    /// A pool slot was rented while still checked out.
    #[error("buffer slot is already checked out")]
    BufferAlreadyCheckedOut,
    /// The send mode is not valid for the attempted operation, e.g. a
    /// reliable disconnect payload.
    #[error("send mode is not valid for this operation")]
    InvalidSendMode,
    /// An operation required an established session.
    #[error("connection is not in the connected state")]
    NotConnected,
    /// `connect` was called while a session was already underway.
    #[error("connection attempt is already underway")]
    AlreadyConnected,
    /// The hello handshake did not complete before the caller's deadline.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The remote tore the session down while the handshake was in flight.
    #[error("remote disconnected during handshake: {0}")]
    RemoteDisconnectedDuringHandshake(String),
    /// An I/O error occurred on the underlying socket.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Specifies which wire field failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodingErrorKind {
    /// The send-option byte was outside the known set.
    #[error("send option")]
    SendOption,
    /// A read ran past the end of the readable bytes.
    #[error("unexpected end of buffer")]
    UnexpectedEnd,
    /// A nested message announced more bytes than its parent holds.
    #[error("message length")]
    MessageLength,
    /// A string field was not valid UTF-8.
    #[error("utf-8 string")]
    Utf8,
}

/// Why a session ended.
///
/// Surfaced through disconnect events and the [`DisconnectPolicy`] hook.
///
/// [`DisconnectPolicy`]: crate::hooks::DisconnectPolicy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local side requested a graceful disconnect.
    Graceful,
    /// The remote sent a disconnect datagram.
    RemoteRequested,
    /// Sending on the socket failed.
    SocketSendFailure,
    /// Receiving on the socket failed.
    SocketReceiveFailure,
    /// A zero-length receive signalled a closed socket.
    ZeroBytesReceived,
    /// The keep-alive budget ran out.
    PingsWithoutResponse,
    /// A reliable packet exhausted its retransmission budget.
    ReliablePacketWithoutResponse,
    /// The connection was torn down while traffic was still pending.
    ConnectionDisconnected,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DisconnectReason::Graceful => "graceful disconnect",
            DisconnectReason::RemoteRequested => "remote requested disconnect",
            DisconnectReason::SocketSendFailure => "socket send failure",
            DisconnectReason::SocketReceiveFailure => "socket receive failure",
            DisconnectReason::ZeroBytesReceived => "zero bytes received",
            DisconnectReason::PingsWithoutResponse => "pings without response",
            DisconnectReason::ReliablePacketWithoutResponse => {
                "reliable packet without response"
            }
            DisconnectReason::ConnectionDisconnected => "connection disconnected",
        };
        f.write_str(text)
    }
}

impl DisconnectReason {
    /// Returns true for reasons raised by the transport itself rather than
    /// by either application.
    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::Graceful | DisconnectReason::RemoteRequested
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_text_matches_taxonomy() {
        assert_eq!(
            DisconnectReason::ReliablePacketWithoutResponse.to_string(),
            "reliable packet without response"
        );
        assert_eq!(
            DisconnectReason::PingsWithoutResponse.to_string(),
            "pings without response"
        );
        assert_eq!(
            DisconnectReason::ConnectionDisconnected.to_string(),
            "connection disconnected"
        );
    }

    #[test]
    fn internal_reasons_exclude_requested_closures() {
        assert!(!DisconnectReason::Graceful.is_internal());
        assert!(!DisconnectReason::RemoteRequested.is_internal());
        assert!(DisconnectReason::SocketSendFailure.is_internal());
        assert!(DisconnectReason::PingsWithoutResponse.is_internal());
    }

    #[test]
    fn io_errors_convert() {
        let err: ErrorKind = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, ErrorKind::Io(_)));
    }
}
