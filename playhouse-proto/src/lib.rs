//! Wire protocol for PlayHouse: packets, route headers, and frame codecs.
//!
//! This crate has no networking and no actor runtime of its own (see
//! `playhouse-net` and `playhouse-rt`); it only defines the data model and
//! the `tokio_util::codec::{Encoder, Decoder}` implementations that turn
//! bytes on a socket into [`Packet`]s and [`RouteHeader`]s and back.

pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod ids;
pub mod packet;
pub mod prelude;

pub use codec::{ClientFrame, ClientFrameCodec, MeshFrame, MeshFrameCodec, ServerFrame, ServerFrameCodec};
pub use config::CodecConfig;
pub use error::ProtocolError;
pub use header::RouteHeader;
pub use ids::{AccountId, ErrorCode, MsgId, MsgSeq, NodeId, NodeType, ServiceId, SessionId, StageId};
pub use packet::Packet;
