//! Wire codecs (§4.1, §6): length-prefixed binary framing, little-endian
//! throughout, implemented against `tokio_util::codec::{Encoder, Decoder}`.

mod client;
mod mesh;
mod server;

pub use client::{ClientFrame, ClientFrameCodec};
pub use mesh::{MeshFrame, MeshFrameCodec};
pub use server::{ServerFrame, ServerFrameCodec};

/// Size in bytes of the little-endian `u32` length prefix every frame kind
/// shares.
pub(crate) const LENGTH_PREFIX_LEN: usize = 4;
