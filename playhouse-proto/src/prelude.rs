//! Prelude module for convenient imports.
//!
//! ```rust
//! use playhouse_proto::prelude::*;
//! ```

pub use crate::codec::{ClientFrame, ClientFrameCodec, MeshFrame, MeshFrameCodec, ServerFrame, ServerFrameCodec};
pub use crate::config::CodecConfig;
pub use crate::error::ProtocolError;
pub use crate::header::RouteHeader;
pub use crate::ids::{
    AccountId, ErrorCode, MsgId, MsgIdError, MsgSeq, NodeId, NodeType, ServiceId, SessionId, StageId,
};
pub use crate::packet::Packet;
