//! The opaque message unit exchanged between clients, stages, and peers.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::Bytes;

// Layer 3: Internal module imports
use crate::ids::{ErrorCode, MsgId, MsgSeq, StageId};

/// `{ msgId, payload, seq, stageId, errorCode }` (§3 "Packet").
///
/// A `Packet` is consumed exactly once: it is built by a codec or by user
/// code, handed into the outbound pipeline, and released once the frame is
/// flushed. Cloning is cheap (`Bytes` is refcounted) but ownership transfer
/// is still the intended usage — holding onto a `Packet` after passing it
/// to a sender is a logic error, not a type error, following the usual
/// "caller drops its handle" mailbox convention.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    msg_id: MsgId,
    payload: Bytes,
    seq: MsgSeq,
    stage_id: StageId,
    error_code: ErrorCode,
}

impl Packet {
    /// Build a successful, non-reply packet bound for no particular stage.
    pub fn new(msg_id: MsgId, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_id,
            payload: payload.into(),
            seq: MsgSeq::FIRE_AND_FORGET,
            stage_id: StageId::UNBOUND,
            error_code: ErrorCode::SUCCESS,
        }
    }

    /// Build an empty-payload error reply carrying `error_code`.
    pub fn error_reply(msg_id: MsgId, seq: MsgSeq, error_code: ErrorCode) -> Self {
        Self {
            msg_id,
            payload: Bytes::new(),
            seq,
            stage_id: StageId::UNBOUND,
            error_code,
        }
    }

    pub fn with_seq(mut self, seq: MsgSeq) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_stage_id(mut self, stage_id: StageId) -> Self {
        self.stage_id = stage_id;
        self
    }

    pub fn with_error_code(mut self, error_code: ErrorCode) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn msg_id(&self) -> &MsgId {
        &self.msg_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn seq(&self) -> MsgSeq {
        self.seq
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// Whether this packet represents a failed request (nonzero error
    /// code). An error reply may legitimately carry an empty payload
    /// (§6 "a nonzero code with an empty payload is a valid error reply").
    pub fn is_error(&self) -> bool {
        !self.error_code.is_success()
    }

    /// Consume the packet, returning its payload bytes.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("msg_id", &self.msg_id)
            .field("payload_len", &self.payload.len())
            .field("seq", &self.seq)
            .field("stage_id", &self.stage_id)
            .field("error_code", &self.error_code)
            .finish()
    }
}
