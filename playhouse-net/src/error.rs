//! Transport-level error taxonomy (§7 `TransportError`, SPEC_FULL §10.3).

// Layer 1: Standard library imports
use std::io;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use playhouse_proto::ids::{ErrorCode, NodeId};

/// Errors arising from client listeners, sessions, and the mesh transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("session idle past heartbeat timeout")]
    HeartbeatTimeout,

    #[error("session outbound queue exceeded capacity")]
    BackpressureExceeded,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("peer node unreachable: {0}")]
    PeerUnreachable(NodeId),

    #[error("protocol error: {0}")]
    Protocol(#[from] playhouse_proto::error::ProtocolError),
}

impl TransportError {
    /// Map onto the wire-level error-code taxonomy (§6): `1000-1099`
    /// transport, `4000-4099` routing.
    pub fn as_error_code(&self) -> ErrorCode {
        let raw = match self {
            TransportError::Io(_) => 1000,
            TransportError::Tls(_) => 1001,
            TransportError::WebSocket(_) => 1002,
            TransportError::HeartbeatTimeout => 1003,
            TransportError::BackpressureExceeded => 1004,
            TransportError::ConnectionClosed => 1005,
            TransportError::PeerUnreachable(_) => 4002,
            TransportError::Protocol(err) => return err.as_error_code(),
        };
        ErrorCode::new(raw)
    }

    /// Whether the same logical operation could succeed if retried against a
    /// fresh connection (as opposed to a permanent protocol violation).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::ConnectionClosed | TransportError::PeerUnreachable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_timeout_maps_to_transport_range() {
        assert_eq!(TransportError::HeartbeatTimeout.as_error_code().as_raw(), 1003);
    }

    #[test]
    fn peer_unreachable_maps_to_routing_range() {
        let err = TransportError::PeerUnreachable(NodeId::new("play-02"));
        assert_eq!(err.as_error_code().as_raw(), 4002);
    }

    #[test]
    fn protocol_error_delegates_its_own_code() {
        let err = TransportError::Protocol(playhouse_proto::error::ProtocolError::MsgIdEmpty);
        assert_eq!(err.as_error_code().as_raw(), 2002);
    }

    #[test]
    fn connection_loss_is_retriable_peer_unreachable_is_not_permanent() {
        assert!(TransportError::ConnectionClosed.is_retriable());
        assert!(!TransportError::HeartbeatTimeout.is_retriable());
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn transport_error_is_send_sync() {
        assert_send_sync::<TransportError>();
    }
}
