//! Reserved control `MsgId`s (§4.10) and the routing rules attached to
//! them: bypassing the authenticated-session restriction and, on mesh
//! hops, setting `isSystem`.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use playhouse_proto::ids::MsgId;

/// Heartbeat keep-alive (§4.10). Accepted from unauthenticated sessions.
pub const HEARTBEAT: &str = "@Heart@Beat@";

/// Debug/introspection control message (§4.10). Accepted from
/// unauthenticated sessions.
pub const DEBUG: &str = "@Debug@";

/// Synthetic timeout notification (§4.10).
pub const TIMEOUT: &str = "@Timeout@";

/// Internal stage-creation control message used by [`crate::sender::Sender::create_stage`]
/// (§4.9). Not part of the client-facing reserved set in §4.10, but shares
/// the same `@…@` convention so it can never collide with an application
/// `MsgId` (§4.10 "Control names begin with `@…@` and MUST NOT be used by
/// applications").
pub const CREATE_STAGE: &str = crate::sender::CREATE_STAGE_MSG_ID;

/// The client-facing reserved set an unauthenticated session may still
/// send (§4.3 invariant: "An unauthenticated session may send only the
/// authenticate message-id and heartbeats").
pub fn bypasses_authentication(msg_id: &MsgId) -> bool {
    matches!(msg_id.as_str(), HEARTBEAT | DEBUG)
}

/// Whether `msg_id` is one of the runtime's reserved control names,
/// client-facing or internal.
pub fn is_reserved(msg_id: &MsgId) -> bool {
    matches!(msg_id.as_str(), HEARTBEAT | DEBUG | TIMEOUT | CREATE_STAGE) || msg_id.is_system()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_and_debug_bypass_authentication() {
        assert!(bypasses_authentication(&MsgId::new(HEARTBEAT).unwrap()));
        assert!(bypasses_authentication(&MsgId::new(DEBUG).unwrap()));
    }

    #[test]
    fn ordinary_application_message_requires_authentication() {
        assert!(!bypasses_authentication(&MsgId::new("MovePlayer").unwrap()));
    }

    #[test]
    fn timeout_is_reserved_but_not_an_auth_bypass() {
        let timeout = MsgId::new(TIMEOUT).unwrap();
        assert!(is_reserved(&timeout));
        assert!(!bypasses_authentication(&timeout));
    }

    #[test]
    fn arbitrary_at_wrapped_name_is_reserved_via_msg_id_is_system() {
        let custom = MsgId::new("@CustomControl@").unwrap();
        assert!(is_reserved(&custom));
    }
}
