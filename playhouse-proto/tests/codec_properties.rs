//! Property and scenario tests for the wire codecs (§8, invariant 5:
//! "codec idempotence").

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use playhouse_proto::codec::{ClientFrame, ClientFrameCodec, MeshFrame, MeshFrameCodec, ServerFrame, ServerFrameCodec};
use playhouse_proto::header::RouteHeader;
use playhouse_proto::ids::{AccountId, ErrorCode, MsgId, MsgSeq, NodeId, ServiceId, SessionId, StageId};
use playhouse_proto::packet::Packet;

fn arb_msg_id() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9]{0,30}"
}

proptest! {
    #[test]
    fn client_frame_round_trips(
        msg_id in arb_msg_id(),
        seq in any::<u16>(),
        stage_id in any::<i64>(),
        service_id in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut codec = ClientFrameCodec::default();
        let frame = ClientFrame {
            service_id: ServiceId::new(service_id),
            packet: Packet::new(MsgId::new(msg_id).unwrap(), payload.clone())
                .with_seq(MsgSeq::from_raw(seq))
                .with_stage_id(StageId::new(stage_id)),
        };

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        prop_assert_eq!(decoded.packet.msg_id(), frame.packet.msg_id());
        prop_assert_eq!(decoded.packet.payload(), frame.packet.payload());
        prop_assert_eq!(decoded.packet.seq(), frame.packet.seq());
        prop_assert_eq!(decoded.packet.stage_id(), frame.packet.stage_id());
        prop_assert_eq!(decoded.service_id, frame.service_id);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn server_frame_round_trips(
        msg_id in arb_msg_id(),
        seq in any::<u16>(),
        stage_id in any::<i64>(),
        error_code in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut codec = ServerFrameCodec::default();
        let frame = ServerFrame {
            service_id: ServiceId::new(1),
            packet: Packet::new(MsgId::new(msg_id).unwrap(), payload)
                .with_seq(MsgSeq::from_raw(seq))
                .with_stage_id(StageId::new(stage_id))
                .with_error_code(ErrorCode::new(error_code)),
            original_size: 0,
        };

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        prop_assert_eq!(decoded.packet.msg_id(), frame.packet.msg_id());
        prop_assert_eq!(decoded.packet.error_code(), frame.packet.error_code());
        prop_assert_eq!(decoded.packet.payload(), frame.packet.payload());
    }

    #[test]
    fn mesh_frame_round_trips(
        from in arb_msg_id(),
        msg_id in arb_msg_id(),
        account_id in any::<i64>(),
        reply_stage in proptest::option::of(any::<i64>()),
    ) {
        let mut codec = MeshFrameCodec::default();
        let mut header = RouteHeader::request(
            NodeId::new(from),
            MsgId::new(msg_id).unwrap(),
            ServiceId::new(1),
            StageId::new(10),
            SessionId::new(1),
        );
        header.account_id = AccountId::new(account_id);
        header.reply_stage_id = reply_stage.map(StageId::new);

        let packet = Packet::new(header.msg_id.clone(), &b"payload"[..]);
        let frame = MeshFrame { header: header.clone(), packet };

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        prop_assert_eq!(decoded.header.from, header.from);
        prop_assert_eq!(decoded.header.account_id, header.account_id);
        prop_assert_eq!(decoded.header.reply_stage_id, header.reply_stage_id);
    }
}

#[test]
fn echo_roundtrip_scenario_s1() {
    // S1: client sends EchoRequest{"Hello",42}, expects EchoReply with the
    // same payload, errorCode=0, matching msgSeq.
    let mut client_codec = ClientFrameCodec::default();
    let mut server_codec = ServerFrameCodec::default();

    let request = ClientFrame {
        service_id: ServiceId::new(1),
        packet: Packet::new(MsgId::new("EchoRequest").unwrap(), &br#"["Hello",42]"#[..])
            .with_seq(MsgSeq::from_raw(1)),
    };

    let mut wire = BytesMut::new();
    client_codec.encode(request.clone(), &mut wire).unwrap();
    let decoded_request = client_codec.decode(&mut wire).unwrap().unwrap();

    let reply = ServerFrame {
        service_id: decoded_request.service_id,
        packet: Packet::new(MsgId::new("EchoReply").unwrap(), decoded_request.packet.payload().clone())
            .with_seq(decoded_request.packet.seq())
            .with_error_code(ErrorCode::SUCCESS),
        original_size: 0,
    };

    let mut reply_wire = BytesMut::new();
    server_codec.encode(reply, &mut reply_wire).unwrap();
    let decoded_reply = server_codec.decode(&mut reply_wire).unwrap().unwrap();

    assert_eq!(decoded_reply.packet.msg_id().as_str(), "EchoReply");
    assert_eq!(decoded_reply.packet.payload().as_ref(), br#"["Hello",42]"#);
    assert!(decoded_reply.packet.error_code().is_success());
    assert_eq!(decoded_reply.packet.seq().as_raw(), 1);
}

#[test]
fn stage_not_found_scenario_s2() {
    // S2: a request against a nonexistent stage replies with errorCode=4001.
    let mut codec = ServerFrameCodec::default();
    let reply = ServerFrame {
        service_id: ServiceId::new(1),
        packet: Packet::error_reply(MsgId::new("MoveReply").unwrap(), MsgSeq::from_raw(1), ErrorCode::new(4001)),
        original_size: 0,
    };

    let mut buf = BytesMut::new();
    codec.encode(reply, &mut buf).unwrap();
    let decoded = codec.decode(&mut buf).unwrap().unwrap();

    assert_eq!(decoded.packet.error_code().as_raw(), 4001);
    assert!(decoded.packet.payload().is_empty());
}
