//! Inter-node frame codec (§6).
//!
//! Field order matches §6's "stable schema": `from, msgId, msgSeq,
//! serviceId, stageId, accountId, sid, errorCode, flags-byte`, plus the
//! `reply_stage_id` field this crate adds (§10.6). The spec permits any
//! concrete serialization as long as it is bit-stable between peers of the
//! same build; this codec picks a fixed-order binary record:
//!
//! `Length(4,LE) || FromLen(1) || From(N) || MsgIdLen(1) || MsgId(N) ||
//! MsgSeq(2) || ServiceId(2) || StageId(8) || AccountId(8) || Sid(8) ||
//! ReplyStagePresent(1) || ReplyStageId(8, present only if the previous
//! byte is 1) || ErrorCode(2) || Flags(1) || Body(...)`

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use super::LENGTH_PREFIX_LEN;
use crate::config::CodecConfig;
use crate::error::ProtocolError;
use crate::header::RouteHeader;
use crate::ids::{AccountId, ErrorCode, MsgId, MsgSeq, NodeId, ServiceId, SessionId, StageId};
use crate::packet::Packet;

/// A `RouteHeader` together with the payload bytes it routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFrame {
    pub header: RouteHeader,
    pub packet: Packet,
}

/// Codec for node-to-node mesh frames.
#[derive(Debug, Clone)]
pub struct MeshFrameCodec {
    config: CodecConfig,
}

impl MeshFrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

impl Default for MeshFrameCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder for MeshFrameCodec {
    type Item = MeshFrame;
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

        let total = LENGTH_PREFIX_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut cursor = src.split_to(total);
        cursor.advance(LENGTH_PREFIX_LEN);

        let from_len = Self::take_u8(&mut cursor)?;
        let from = Self::take_string(&mut cursor, from_len)?;

        let msg_id_len = Self::take_u8(&mut cursor)?;
        if msg_id_len == 0 {
            return Err(ProtocolError::MsgIdEmpty);
        }
        let msg_id_str = Self::take_string(&mut cursor, msg_id_len)?;
        let msg_id = MsgId::new(msg_id_str).map_err(|_| ProtocolError::MsgIdEmpty)?;

        Self::require(&cursor, 2 + 2 + 8 + 8 + 8 + 1)?;
        let msg_seq = MsgSeq::from_raw(cursor.get_u16_le());
        let service_id = ServiceId::new(cursor.get_u16_le());
        let stage_id = StageId::new(cursor.get_i64_le());
        let account_id = AccountId::new(cursor.get_i64_le());
        let sid = SessionId::new(cursor.get_i64_le());

        let reply_stage_present = cursor.get_u8();
        let reply_stage_id = if reply_stage_present == 1 {
            Self::require(&cursor, 8)?;
            Some(StageId::new(cursor.get_i64_le()))
        } else {
            None
        };

        Self::require(&cursor, 2 + 1)?;
        let error_code = ErrorCode::new(cursor.get_u16_le());
        let flags = cursor.get_u8();

        let body = cursor.split_to(cursor.len()).freeze();

        let mut header = RouteHeader::request(NodeId::new(from), msg_id.clone(), service_id, stage_id, sid);
        header.msg_seq = msg_seq;
        header.account_id = account_id;
        header.reply_stage_id = reply_stage_id;
        header.error_code = error_code;
        header.apply_flags_byte(flags);

        let packet = Packet::new(msg_id, body)
            .with_seq(msg_seq)
            .with_stage_id(stage_id)
            .with_error_code(error_code);

        Ok(Some(MeshFrame { header, packet }))
    }
}

impl MeshFrameCodec {
    fn take_u8(cursor: &mut BytesMut) -> Result<usize, ProtocolError> {
        Self::require(cursor, 1)?;
        Ok(cursor.get_u8() as usize)
    }

    fn take_string(cursor: &mut BytesMut, len: usize) -> Result<String, ProtocolError> {
        Self::require(cursor, len)?;
        let bytes = cursor.split_to(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidMsgIdEncoding)
    }

    fn require(cursor: &BytesMut, len: usize) -> Result<(), ProtocolError> {
        if cursor.len() < len {
            return Err(ProtocolError::TruncatedFrame {
                expected: len,
                actual: cursor.len(),
            });
        }
        Ok(())
    }
}

impl Encoder<MeshFrame> for MeshFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: MeshFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let from_bytes = frame.header.from.as_str().as_bytes();
        let msg_id_bytes = frame.header.msg_id.as_str().as_bytes();
        if msg_id_bytes.len() > crate::ids::MAX_MSG_ID_LEN {
            return Err(ProtocolError::MsgIdTooLong(msg_id_bytes.len()));
        }
        if from_bytes.len() > crate::ids::MAX_MSG_ID_LEN {
            return Err(ProtocolError::MsgIdTooLong(from_bytes.len()));
        }

        let body = frame.packet.payload();
        let reply_stage_len = if frame.header.reply_stage_id.is_some() { 8 } else { 0 };
        let length = 1 + from_bytes.len()
            + 1 + msg_id_bytes.len()
            + 2 + 2 + 8 + 8 + 8
            + 1 + reply_stage_len
            + 2 + 1
            + body.len();

        if LENGTH_PREFIX_LEN + length > self.config.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: LENGTH_PREFIX_LEN + length,
                limit: self.config.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_LEN + length);
        dst.put_u32_le(length as u32);
        dst.put_u8(from_bytes.len() as u8);
        dst.put_slice(from_bytes);
        dst.put_u8(msg_id_bytes.len() as u8);
        dst.put_slice(msg_id_bytes);
        dst.put_u16_le(frame.header.msg_seq.as_raw());
        dst.put_u16_le(frame.header.service_id.as_raw());
        dst.put_i64_le(frame.header.stage_id.as_raw());
        dst.put_i64_le(frame.header.account_id.as_raw());
        dst.put_i64_le(frame.header.sid.as_raw());
        match frame.header.reply_stage_id {
            Some(reply_stage_id) => {
                dst.put_u8(1);
                dst.put_i64_le(reply_stage_id.as_raw());
            }
            None => dst.put_u8(0),
        }
        dst.put_u16_le(frame.header.error_code.as_raw());
        dst.put_u8(frame.header.flags_byte());
        dst.put_slice(body);
        Ok(())
    }
}
