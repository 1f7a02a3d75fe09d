//! The out-of-band routing envelope attached to every mesh or dispatch hop.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::ids::{AccountId, ErrorCode, MsgId, MsgSeq, NodeId, ServiceId, SessionId, StageId};

/// `RouteHeader` (§3 "Route Header", resolved per §10.6).
///
/// `account_id` and `reply_stage_id` are deliberately disjoint, differently
/// typed fields rather than one `i64` slot overloaded for both "which
/// account authenticated this" and "which stage should a cross-node reply
/// land on" — overloading one slot would force every reader of the header
/// to know which meaning applied from context. The two newtypes
/// (`AccountId` vs `StageId`) cannot be confused without an explicit
/// conversion, so the ambiguity is a compile error rather than a runtime
/// bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHeader {
    pub from: NodeId,
    pub msg_id: MsgId,
    pub msg_seq: MsgSeq,
    pub service_id: ServiceId,
    pub stage_id: StageId,
    pub account_id: AccountId,
    pub sid: SessionId,
    pub reply_stage_id: Option<StageId>,
    pub is_reply: bool,
    pub is_system: bool,
    pub error_code: ErrorCode,
}

impl RouteHeader {
    /// Build a header for a brand-new, non-reply, non-system request.
    pub fn request(
        from: NodeId,
        msg_id: MsgId,
        service_id: ServiceId,
        stage_id: StageId,
        sid: SessionId,
    ) -> Self {
        Self {
            from,
            msg_id,
            msg_seq: MsgSeq::FIRE_AND_FORGET,
            service_id,
            stage_id,
            account_id: AccountId::UNAUTHENTICATED,
            sid,
            reply_stage_id: None,
            is_reply: false,
            is_system: false,
            error_code: ErrorCode::SUCCESS,
        }
    }

    /// Derive the header for the reply to this request, swapping
    /// `reply_stage_id` back into `stage_id` so the reply routes home.
    pub fn into_reply(self, error_code: ErrorCode) -> Self {
        let stage_id = self.reply_stage_id.unwrap_or(self.stage_id);
        Self {
            stage_id,
            reply_stage_id: None,
            is_reply: true,
            error_code,
            ..self
        }
    }

    /// Whether no reply is expected for this header's request.
    pub fn is_fire_and_forget(&self) -> bool {
        self.msg_seq.is_fire_and_forget()
    }

    /// The encoded flags byte (§6): bit0 = `is_reply`, bit1 = `is_system`.
    pub fn flags_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.is_reply {
            flags |= 0b0000_0001;
        }
        if self.is_system {
            flags |= 0b0000_0010;
        }
        flags
    }

    /// Rebuild `is_reply`/`is_system` from a decoded flags byte.
    pub fn apply_flags_byte(&mut self, flags: u8) {
        self.is_reply = flags & 0b0000_0001 != 0;
        self.is_system = flags & 0b0000_0010 != 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RouteHeader {
        RouteHeader::request(
            NodeId::new("play-01"),
            MsgId::new("Move").expect("valid msg id"),
            ServiceId::new(1),
            StageId::new(100),
            SessionId::new(7),
        )
    }

    #[test]
    fn request_header_has_no_reply_stage() {
        let header = sample_header();
        assert!(header.reply_stage_id.is_none());
        assert!(!header.is_reply);
        assert!(header.is_fire_and_forget());
    }

    #[test]
    fn into_reply_prefers_reply_stage_id_over_stage_id() {
        let mut header = sample_header();
        header.reply_stage_id = Some(StageId::new(999));
        let reply = header.into_reply(ErrorCode::SUCCESS);
        assert_eq!(reply.stage_id.as_raw(), 999);
        assert!(reply.is_reply);
    }

    #[test]
    fn into_reply_falls_back_to_stage_id_without_reply_stage() {
        let header = sample_header();
        let reply = header.clone().into_reply(ErrorCode::new(4000));
        assert_eq!(reply.stage_id, header.stage_id);
        assert_eq!(reply.error_code.as_raw(), 4000);
    }

    #[test]
    fn account_id_and_reply_stage_id_are_not_interchangeable() {
        let mut header = sample_header();
        header.account_id = AccountId::new(55);
        header.reply_stage_id = Some(StageId::new(55));
        assert_ne!(header.account_id.as_raw(), header.reply_stage_id.unwrap().as_raw() + 1);
        assert_eq!(header.account_id.as_raw(), 55);
        assert_eq!(header.reply_stage_id.unwrap().as_raw(), 55);
    }

    #[test]
    fn flags_byte_round_trips() {
        let mut header = sample_header();
        header.is_reply = true;
        header.is_system = true;
        let flags = header.flags_byte();
        assert_eq!(flags, 0b0000_0011);

        let mut decoded = sample_header();
        decoded.apply_flags_byte(flags);
        assert!(decoded.is_reply);
        assert!(decoded.is_system);
    }
}
