//! Newtype identifiers used throughout the wire protocol.
//!
//! Every id here wraps a primitive (`i64`, `u16`, `String`) rather than a
//! UUID: the wire layout (§4.1) fixes these as 8-byte / 2-byte / length-
//! prefixed-string fields, so the Rust types must round-trip those exact
//! widths.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Maximum length in bytes of an encoded `MsgId` (the wire `MsgIdLen` byte
/// is unsigned, 1..=255).
pub const MAX_MSG_ID_LEN: usize = 255;

/// Textual message identifier (e.g. `"EchoRequest"`).
///
/// Bounded to [`MAX_MSG_ID_LEN`] bytes when UTF-8 encoded; construction
/// validates this so the codec never has to reject an already-constructed
/// `MsgId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgId(String);

impl MsgId {
    /// Build a `MsgId`, rejecting strings that cannot be represented on the
    /// wire (empty, or longer than [`MAX_MSG_ID_LEN`] bytes).
    pub fn new(value: impl Into<String>) -> Result<Self, MsgIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(MsgIdError::Empty);
        }
        if value.len() > MAX_MSG_ID_LEN {
            return Err(MsgIdError::TooLong(value.len()));
        }
        Ok(Self(value))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is a reserved system message (`@...@`).
    pub fn is_system(&self) -> bool {
        self.0.starts_with('@') && self.0.ends_with('@') && self.0.len() > 1
    }
}

impl Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors constructing a [`MsgId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MsgIdError {
    #[error("msg_id must not be empty")]
    Empty,
    #[error("msg_id length {0} exceeds maximum of {MAX_MSG_ID_LEN}")]
    TooLong(usize),
}

/// Per-process monotonic request/reply correlation counter.
///
/// `0` means "fire-and-forget": no reply is expected and any reply frame
/// carrying `msg_seq == 0` is dropped by the receiver. Valid request
/// sequences are `1..=u16::MAX`, wrapping back to `1` (never `0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MsgSeq(u16);

impl MsgSeq {
    /// The "no reply expected" sentinel.
    pub const FIRE_AND_FORGET: MsgSeq = MsgSeq(0);

    /// Wrap a raw sequence number as-is (used when decoding from the wire).
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    pub fn as_raw(self) -> u16 {
        self.0
    }

    /// Whether this sequence means "fire-and-forget".
    pub fn is_fire_and_forget(self) -> bool {
        self.0 == 0
    }

    /// Advance a process-wide counter, skipping `0` on wraparound.
    pub fn next(current: u16) -> (MsgSeq, u16) {
        let next_raw = current.wrapping_add(1);
        let next_raw = if next_raw == 0 { 1 } else { next_raw };
        (MsgSeq(next_raw), next_raw)
    }
}

impl Display for MsgSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a stage: a named, addressable single-threaded execution
/// domain (§3 "Stage"). `0` means unbound / no stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(i64);

impl StageId {
    /// The "unbound" sentinel used by `Session.stageId` before binding.
    pub const UNBOUND: StageId = StageId(0);

    /// First id handed out by API-node stage-id generation (§9 design
    /// notes: "seeded above 1_000_000 to leave room for reserved IDs").
    pub const GENERATION_FLOOR: i64 = 1_000_000;

    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> i64 {
        self.0
    }

    pub fn is_unbound(self) -> bool {
        self.0 == 0
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an authenticated actor within its owning stage (§3 "Actor").
/// `0` until `OnAuthenticate` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(i64);

impl AccountId {
    /// The "not yet authenticated" sentinel.
    pub const UNAUTHENTICATED: AccountId = AccountId(0);

    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> i64 {
        self.0
    }

    pub fn is_authenticated(self) -> bool {
        self.0 != 0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique identifier of a live client connection (§3 "Session").
/// Stable for the lifetime of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(i64);

impl SessionId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> i64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a mesh peer process (§GLOSSARY "Node").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical service identifier used to group nodes in the Server Info
/// Center (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(u16);

impl ServiceId {
    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u16 {
        self.0
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node type in the mesh (§GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Play,
    Api,
}

/// Wire-level error code (§6). `0` means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u16);

impl ErrorCode {
    pub const SUCCESS: ErrorCode = ErrorCode(0);

    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
