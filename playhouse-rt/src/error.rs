//! Runtime-level error taxonomy (§7), covering everything above the wire:
//! stage lifecycle, routing, authentication, and request correlation.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use playhouse_proto::ids::{AccountId, ErrorCode, MsgId, MsgSeq, NodeId, StageId};

/// Errors arising from the stage/actor runtime: stage lifecycle, routing,
/// auth, and request-cache correlation (§7's `RoutingError`, `AuthError`,
/// `Timeout`, `Cancelled`, plus a `HandlerError` wrapper for user-code
/// failures).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("stage {0} not found")]
    StageNotFound(StageId),

    #[error("stage {0} already exists")]
    StageAlreadyExists(StageId),

    #[error("session not authenticated")]
    NotAuthenticated,

    #[error("actor {0} not found in stage")]
    ActorNotFound(AccountId),

    #[error("actor rejected by on_join_stage")]
    JoinRejected,

    #[error("request timed out waiting for reply (msg_seq={0})")]
    RequestTimeout(MsgSeq),

    #[error("request cancelled: stage closed before reply arrived")]
    Cancelled,

    #[error("connection to peer closed before reply arrived")]
    ConnectionClosed,

    #[error("peer node unreachable: {0}")]
    NodeUnreachable(NodeId),

    #[error("duplicate msg_seq registered in request cache: {0}")]
    DuplicateSeq(MsgSeq),

    #[error("no handler registered for message {0:?}")]
    UnknownMessage(MsgId),

    #[error("handler returned application error code {0}")]
    Handler(ErrorCode),

    #[error("stage is closing and no longer accepts new work")]
    StageClosing,

    #[error("transport error: {0}")]
    Transport(#[from] playhouse_net::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] playhouse_proto::error::ProtocolError),

    #[error("compute pool error: {0}")]
    ComputePool(#[from] crate::compute_pool::ComputePoolError),
}

impl RuntimeError {
    /// Map onto the wire-level error-code taxonomy (§6): `3000-3099` auth,
    /// `4000-4099` routing, `5000-5099` application/timeout.
    pub fn as_error_code(&self) -> ErrorCode {
        let raw = match self {
            RuntimeError::NotAuthenticated => 3000,
            RuntimeError::StageNotFound(_) => 4001,
            RuntimeError::NodeUnreachable(_) => 4002,
            RuntimeError::StageAlreadyExists(_) => 4003,
            RuntimeError::ActorNotFound(_) => 4004,
            RuntimeError::DuplicateSeq(_) => 4005,
            RuntimeError::UnknownMessage(_) => 4006,
            RuntimeError::JoinRejected => 3001,
            RuntimeError::RequestTimeout(_) => 5000,
            RuntimeError::Cancelled => 5001,
            RuntimeError::ConnectionClosed => 5002,
            RuntimeError::StageClosing => 5003,
            RuntimeError::ComputePool(_) => 5004,
            RuntimeError::Handler(code) => return *code,
            RuntimeError::Transport(err) => return err.as_error_code(),
            RuntimeError::Protocol(err) => return err.as_error_code(),
        };
        ErrorCode::new(raw)
    }
}
