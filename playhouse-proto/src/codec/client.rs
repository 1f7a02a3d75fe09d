//! Client→server frame codec (§4.1).
//!
//! `Length(4, LE) || ServiceId(2) || MsgIdLen(1) || MsgId(N) || MsgSeq(2) ||
//! StageId(8) || Body(...)`

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use super::LENGTH_PREFIX_LEN;
use crate::config::CodecConfig;
use crate::error::ProtocolError;
use crate::ids::{MsgId, MsgSeq, ServiceId, StageId};
use crate::packet::Packet;

/// Fixed portion of a client frame after the length prefix: ServiceId(2) +
/// MsgIdLen(1) + MsgSeq(2) + StageId(8).
const FIXED_TAIL_LEN: usize = 2 + 1 + 2 + 8;

/// A decoded client→server frame: the service it targets plus the packet
/// it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub service_id: ServiceId,
    pub packet: Packet,
}

/// Codec for the client↔server frame shape. Used by the server to decode
/// inbound bytes, and by test harnesses (and, symmetrically, any Rust
/// client) to encode outbound ones.
#[derive(Debug, Clone)]
pub struct ClientFrameCodec {
    config: CodecConfig,
}

impl ClientFrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

impl Default for ClientFrameCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for ClientFrameCodec {
    type Item = ClientFrame;
    type Error = ProtocolError;

    #[allow(clippy::expect_used)]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let length = u32::from_le_bytes(src[..LENGTH_PREFIX_LEN].try_into().expect("4 bytes")) as usize;
        if length > self.config.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                limit: self.config.max_frame_size,
            });
        }
        if length < FIXED_TAIL_LEN + 1 {
            return Err(ProtocolError::TruncatedFrame {
                expected: FIXED_TAIL_LEN + 1,
                actual: length,
            });
        }

        let total = LENGTH_PREFIX_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let service_id = ServiceId::new(src.get_u16_le());
        let msg_id_len = src.get_u8() as usize;
        if msg_id_len == 0 {
            return Err(ProtocolError::MsgIdEmpty);
        }
        if src.len() < msg_id_len + (FIXED_TAIL_LEN - 3) {
            return Err(ProtocolError::TruncatedFrame {
                expected: msg_id_len + (FIXED_TAIL_LEN - 3),
                actual: src.len(),
            });
        }

        let msg_id_bytes = src.split_to(msg_id_len);
        let msg_id_str = std::str::from_utf8(&msg_id_bytes).map_err(|_| ProtocolError::InvalidMsgIdEncoding)?;
        let msg_id = MsgId::new(msg_id_str).map_err(|_| ProtocolError::MsgIdEmpty)?;

        let msg_seq = MsgSeq::from_raw(src.get_u16_le());
        let stage_id = StageId::new(src.get_i64_le());

        let body_len = total - LENGTH_PREFIX_LEN - 2 - 1 - msg_id_len - 2 - 8;
        let body = src.split_to(body_len).freeze();

        let packet = Packet::new(msg_id, body).with_seq(msg_seq).with_stage_id(stage_id);
        Ok(Some(ClientFrame { service_id, packet }))
    }
}

impl Encoder<ClientFrame> for ClientFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: ClientFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let msg_id_bytes = frame.packet.msg_id().as_str().as_bytes();
        if msg_id_bytes.len() > crate::ids::MAX_MSG_ID_LEN {
            return Err(ProtocolError::MsgIdTooLong(msg_id_bytes.len()));
        }

        let body: &Bytes = frame.packet.payload();
        let length = FIXED_TAIL_LEN + msg_id_bytes.len() + body.len();
        if LENGTH_PREFIX_LEN + length > self.config.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: LENGTH_PREFIX_LEN + length,
                limit: self.config.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_LEN + length);
        dst.put_u32_le(length as u32);
        dst.put_u16_le(frame.service_id.as_raw());
        dst.put_u8(msg_id_bytes.len() as u8);
        dst.put_slice(msg_id_bytes);
        dst.put_u16_le(frame.packet.seq().as_raw());
        dst.put_i64_le(frame.packet.stage_id().as_raw());
        dst.put_slice(body);
        Ok(())
    }
}
