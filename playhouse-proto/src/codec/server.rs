//! Server→client frame codec (§4.1).
//!
//! `Length(4, LE) || ServiceId(2) || MsgIdLen(1) || MsgId(N) || MsgSeq(2) ||
//! StageId(8) || ErrorCode(2) || OriginalSize(4) || Body(...)`
//!
//! `OriginalSize` is the pre-compression payload size; `0` means no
//! compression was applied to `Body`.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use super::LENGTH_PREFIX_LEN;
use crate::config::CodecConfig;
use crate::error::ProtocolError;
use crate::ids::{ErrorCode, MsgId, MsgSeq, ServiceId, StageId};
use crate::packet::Packet;

/// Fixed portion of a server frame after the length prefix: ServiceId(2) +
/// MsgIdLen(1) + MsgSeq(2) + StageId(8) + ErrorCode(2) + OriginalSize(4).
const FIXED_TAIL_LEN: usize = 2 + 1 + 2 + 8 + 2 + 4;

/// A decoded server→client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    pub service_id: ServiceId,
    pub packet: Packet,
    /// Pre-compression payload size; `0` means `packet.payload()` is
    /// already uncompressed.
    pub original_size: u32,
}

/// Codec for the server↔client reply frame shape.
#[derive(Debug, Clone)]
pub struct ServerFrameCodec {
    config: CodecConfig,
}

impl ServerFrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

impl Default for ServerFrameCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for ServerFrameCodec {
    type Item = ServerFrame;
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
        let error_code = ErrorCode::new(src.get_u16_le());
        let original_size = src.get_u32_le();

        let body_len = total - LENGTH_PREFIX_LEN - (FIXED_TAIL_LEN - 3) - msg_id_len;

        // §4.1 zip-bomb guard: `original_size == 0` means "not
        // compressed", so only a nonzero claim is checked against the
        // body's actual (compressed) length.
        if original_size > 0 {
            let limit = (body_len as u64).saturating_mul(self.config.max_decompression_ratio as u64);
            if original_size as u64 > limit {
                return Err(ProtocolError::DecompressionBombSuspected {
                    compressed: body_len,
                    original: original_size,
                    limit: self.config.max_decompression_ratio,
                });
            }
        }

        let body = src.split_to(body_len).freeze();

        let packet = Packet::new(msg_id, body)
            .with_seq(msg_seq)
            .with_stage_id(stage_id)
            .with_error_code(error_code);
        Ok(Some(ServerFrame {
            service_id,
            packet,
            original_size,
        }))
    }
}

impl Encoder<ServerFrame> for ServerFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: ServerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
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
        dst.put_u16_le(frame.packet.error_code().as_raw());
        dst.put_u32_le(frame.original_size);
        dst.put_slice(body);
        Ok(())
    }
}
