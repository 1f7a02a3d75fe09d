//! Protocol-level error taxonomy.
//!
//! A flat thiserror enum with per-variant classification helpers, rather
//! than a nested error-chain type. `ProtocolError` additionally bridges to
//! the wire-level `u16` error code taxonomy (§6) via
//! [`ProtocolError::as_error_code`].

// Layer 1: Standard library imports
use std::io;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::ids::ErrorCode;

/// Errors arising while encoding, decoding, or routing a [`crate::Packet`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("msg_id too long: {0} bytes")]
    MsgIdTooLong(usize),

    #[error("msg_id must not be empty")]
    MsgIdEmpty,

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("invalid UTF-8 in msg_id")]
    InvalidMsgIdEncoding,

    #[error("unknown route header version: {0}")]
    UnsupportedHeaderVersion(u8),

    #[error(
        "decompression bomb suspected: claimed original size {original} bytes is more than {limit}x the {compressed}-byte compressed body"
    )]
    DecompressionBombSuspected { compressed: usize, original: u32, limit: u32 },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("handler returned error code {0}")]
    Handler(ErrorCode),

    #[error("session not authenticated")]
    NotAuthenticated,

    #[error("target stage not found: {0}")]
    StageNotFound(crate::ids::StageId),

    #[error("request timed out waiting for reply (msg_seq={0})")]
    RequestTimeout(crate::ids::MsgSeq),
}

impl ProtocolError {
    /// Map this error onto the wire-level error-code taxonomy (§6):
    /// `1000-1099` transport, `2000-2099` protocol/decode, `3000-3099`
    /// auth, `4000-4099` routing, `5000-5099` application/timeout.
    pub fn as_error_code(&self) -> ErrorCode {
        let raw = match self {
            ProtocolError::Io(_) => 1000,
            ProtocolError::FrameTooLarge { .. } => 2000,
            ProtocolError::MsgIdTooLong(_) => 2001,
            ProtocolError::MsgIdEmpty => 2002,
            ProtocolError::PayloadTooLarge { .. } => 2003,
            ProtocolError::TruncatedFrame { .. } => 2004,
            ProtocolError::InvalidMsgIdEncoding => 2005,
            ProtocolError::UnsupportedHeaderVersion(_) => 2006,
            ProtocolError::DecompressionBombSuspected { .. } => 2007,
            ProtocolError::NotAuthenticated => 3000,
            // StageNotFound is 4001 specifically (S2 in SPEC_FULL.md §8),
            // leaving 4000 free for a generic routing failure.
            ProtocolError::StageNotFound(_) => 4001,
            ProtocolError::Handler(code) => return *code,
            ProtocolError::RequestTimeout(_) => 5000,
        };
        ErrorCode::new(raw)
    }

    /// Whether retrying the same frame without modification could succeed
    /// (transport-level hiccups), as opposed to a malformed-frame error
    /// that will fail identically every time.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::RequestTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_preserves_original_code() {
        let err = ProtocolError::Handler(ErrorCode::new(9999));
        assert_eq!(err.as_error_code().as_raw(), 9999);
    }

    #[test]
    fn frame_too_large_maps_to_protocol_range() {
        let err = ProtocolError::FrameTooLarge { size: 10, limit: 5 };
        assert_eq!(err.as_error_code().as_raw(), 2000);
    }

    #[test]
    fn stage_not_found_maps_to_4001() {
        let err = ProtocolError::StageNotFound(crate::ids::StageId::new(9));
        assert_eq!(err.as_error_code().as_raw(), 4001);
    }

    #[test]
    fn io_errors_are_retriable() {
        let err = ProtocolError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "boom"));
        assert!(err.is_retriable());
    }

    #[test]
    fn malformed_frame_errors_are_not_retriable() {
        let err = ProtocolError::MsgIdEmpty;
        assert!(!err.is_retriable());
    }

    #[test]
    fn decompression_bomb_maps_to_protocol_range_and_is_not_retriable() {
        let err = ProtocolError::DecompressionBombSuspected {
            compressed: 10,
            original: 10_000,
            limit: 100,
        };
        assert_eq!(err.as_error_code().as_raw(), 2007);
        assert!(!err.is_retriable());
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = ProtocolError::TruncatedFrame { expected: 10, actual: 3 };
        assert_eq!(
            err.to_string(),
            "truncated frame: expected at least 10 bytes, got 3"
        );
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn protocol_error_is_send_sync() {
        assert_send_sync::<ProtocolError>();
    }
}
