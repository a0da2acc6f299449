#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the codec, framing and request routing
//! Covers boundary sizes, malformed input, and error propagation

mod common;

use std::time::Duration;

use adversarial_protocol::config::{MAGIC_BYTES, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use adversarial_protocol::core::codec::PacketCodec;
use adversarial_protocol::core::document::{self, Document, Value, MAX_NESTING_DEPTH};
use adversarial_protocol::core::packet::{Packet, HEADER_SIZE};
use adversarial_protocol::error::ProtocolError;
use adversarial_protocol::protocol::{Dispatcher, ErrorReply, Message, Probe, SessionId, Want};
use adversarial_protocol::utils::timeout::with_timeout;
use adversarial_protocol::Tensor;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

fn header(version: u8, len: u32) -> Vec<u8> {
    let mut bytes = MAGIC_BYTES.to_vec();
    bytes.push(version);
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes
}

// ============================================================================
// PACKET EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_payload() {
    let packet = Packet::new(vec![]);
    let bytes = packet.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE);
    let decoded = Packet::from_bytes(&bytes).expect("Should decode empty payload");
    assert!(decoded.payload.is_empty());
    assert_eq!(decoded.version, PROTOCOL_VERSION);
}

#[test]
fn test_packet_magic_is_avcp() {
    let bytes = Packet::new(vec![0x01]).to_bytes();
    assert_eq!(&bytes[..4], b"AVCP");
    assert_eq!(bytes[4], PROTOCOL_VERSION);
    assert_eq!(&bytes[5..9], &1u32.to_be_bytes());
}

#[test]
fn test_packet_oversized_header_rejected() {
    let mut bytes = header(PROTOCOL_VERSION, MAX_PAYLOAD_SIZE as u32 + 1);
    bytes.extend_from_slice(&[0xFF; 10]);

    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::OversizedPacket(n)) if n == MAX_PAYLOAD_SIZE + 1
    ));
}

#[test]
fn test_packet_invalid_magic_bytes() {
    let mut bytes = vec![0x4E, 0x50, 0x52, 0x4F];
    bytes.push(PROTOCOL_VERSION);
    bytes.extend_from_slice(&5u32.to_be_bytes());
    bytes.extend_from_slice(&[0xAA; 5]);

    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::InvalidHeader)
    ));
}

#[test]
fn test_packet_unsupported_version() {
    let mut bytes = header(99, 1);
    bytes.push(0);
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::UnsupportedVersion(99))
    ));
}

#[test]
fn test_packet_truncated_header() {
    let bytes = Packet::new(vec![1, 2, 3]).to_bytes();
    for cut in 0..HEADER_SIZE {
        assert!(matches!(
            Packet::from_bytes(&bytes[..cut]),
            Err(ProtocolError::InvalidHeader)
        ));
    }
}

#[test]
fn test_packet_payload_exactly_max() {
    let payload = vec![0x7E; MAX_PAYLOAD_SIZE];
    let bytes = Packet::new(payload).to_bytes();
    let decoded = Packet::from_bytes(&bytes).expect("Should decode max boundary");
    assert_eq!(decoded.payload.len(), MAX_PAYLOAD_SIZE);
}

// ============================================================================
// CODEC EDGE CASES
// ============================================================================

#[test]
fn test_codec_byte_by_byte_delivery() {
    let mut codec = PacketCodec;
    let bytes = Packet::new(b"partial".to_vec()).to_bytes();
    let mut buf = BytesMut::new();

    for (i, byte) in bytes.iter().enumerate() {
        buf.extend_from_slice(&[*byte]);
        let frame = codec.decode(&mut buf).expect("decode");
        if i + 1 < bytes.len() {
            assert!(frame.is_none(), "frame emitted early at byte {i}");
        } else {
            assert_eq!(frame.expect("complete frame").payload, b"partial");
        }
    }
}

#[test]
fn test_codec_rejects_oversized_header_before_payload_arrives() {
    let mut codec = PacketCodec;
    let mut buf = BytesMut::from(&header(PROTOCOL_VERSION, u32::MAX)[..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_codec_refuses_to_encode_oversized_payload() {
    let mut codec = PacketCodec;
    let mut buf = BytesMut::new();
    let err = codec
        .encode(Packet::new(vec![0; MAX_PAYLOAD_SIZE + 1]), &mut buf)
        .unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedPacket(_)));
    assert!(buf.is_empty());
}

// ============================================================================
// DOCUMENT EDGE CASES
// ============================================================================

#[test]
fn test_empty_document_is_five_bytes() {
    let bytes = document::encode(&Document::new()).expect("encode");
    assert_eq!(bytes, vec![5, 0, 0, 0, 0]);
    assert!(document::decode(&bytes).expect("decode").is_empty());
}

#[test]
fn test_document_special_floats_survive() {
    let doc = Document::new()
        .with("nan", f64::NAN)
        .with("neg_zero", -0.0f64)
        .with("inf", vec![f32::INFINITY, f32::NEG_INFINITY, f32::NAN]);
    let decoded = document::decode(&document::encode(&doc).expect("encode")).expect("decode");
    assert_eq!(decoded, doc);
    let neg_zero = decoded.get("neg_zero").and_then(Value::as_f64).expect("f64");
    assert!(neg_zero.is_sign_negative());
}

#[test]
fn test_document_field_order_preserved() {
    let doc = Document::new()
        .with("z", 1i32)
        .with("a", 2i32)
        .with("m", 3i32);
    let decoded = document::decode(&document::encode(&doc).expect("encode")).expect("decode");
    assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
}

#[test]
fn test_document_nul_in_key_rejected() {
    let doc = Document::new().with("bad\0key", true);
    assert!(matches!(
        document::encode(&doc),
        Err(ProtocolError::MalformedDocument(_))
    ));
}

#[test]
fn test_document_nesting_limit() {
    let mut doc = Document::new().with("leaf", 1i32);
    for _ in 0..=MAX_NESTING_DEPTH {
        doc = Document::new().with("inner", doc);
    }
    assert!(matches!(
        document::encode(&doc),
        Err(ProtocolError::MalformedDocument(_))
    ));
}

#[test]
fn test_document_trailing_bytes_rejected() {
    let mut bytes = document::encode(&Document::new().with("a", 1i32)).expect("encode");
    bytes.push(0);
    assert!(matches!(
        document::decode(&bytes),
        Err(ProtocolError::MalformedDocument(_))
    ));
}

#[test]
fn test_document_negative_length_rejected() {
    let bytes = (-1i32).to_le_bytes();
    assert!(document::decode(&bytes).is_err());
}

#[test]
fn test_document_unknown_tag_rejected() {
    // total(4) + tag 0x07 (ObjectId) + "x\0" + terminator
    let bytes = vec![8, 0, 0, 0, 0x07, b'x', 0, 0];
    assert!(matches!(
        document::decode(&bytes),
        Err(ProtocolError::MalformedDocument(_))
    ));
}

#[test]
fn test_document_missing_terminator() {
    let mut bytes = document::encode(&Document::new().with("a", 1i32)).expect("encode");
    let last = bytes.len() - 1;
    bytes[last] = 0x01;
    assert!(document::decode(&bytes).is_err());
}

#[test]
fn test_document_insert_replaces_in_place() {
    let mut doc = Document::new().with("a", 1i32).with("b", 2i32);
    let previous = doc.insert("a", "one");
    assert_eq!(previous, Some(Value::Int32(1)));
    assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(doc.get("a").and_then(Value::as_str), Some("one"));
}

// ============================================================================
// MESSAGE EDGE CASES
// ============================================================================

#[test]
fn test_message_without_type_field() {
    let bytes = document::encode(&Document::new().with("budget", 3i64)).expect("encode");
    assert!(matches!(
        Message::decode(&bytes),
        Err(ProtocolError::MalformedDocument(_))
    ));
}

#[test]
fn test_message_unknown_type() {
    let bytes = document::encode(&Document::new().with("type", "ping")).expect("encode");
    assert!(Message::decode(&bytes).is_err());
}

#[test]
fn test_message_negative_budget_rejected() {
    let bytes = document::encode(
        &Document::new()
            .with("type", "open_session")
            .with("budget", -4i64),
    )
    .expect("encode");
    assert!(matches!(
        Message::decode(&bytes),
        Err(ProtocolError::MalformedDocument(_))
    ));
}

#[test]
fn test_message_budget_accepts_int32() {
    let bytes = document::encode(
        &Document::new()
            .with("type", "open_session")
            .with("budget", 12i32),
    )
    .expect("encode");
    assert_eq!(
        Message::decode(&bytes).expect("decode"),
        Message::OpenSession { budget: 12 }
    );
}

#[test]
fn test_message_unknown_want_rejected() {
    let doc = Message::Probe {
        session_id: SessionId::from("s"),
        probe: Probe::new(Tensor::from_vec(vec![0.5]), Want::Label),
    }
    .to_document()
    .with("want", "logits");
    assert!(Message::from_document(&doc).is_err());
}

#[test]
fn test_inconsistent_probe_shape_reaches_server_check() {
    let doc = Message::Probe {
        session_id: SessionId::from("s"),
        probe: Probe::new(Tensor::from_vec(vec![0.5, 0.5]), Want::Label),
    }
    .to_document()
    .with("shape", vec![3i64]);

    let server = common::server();
    let id = server.open_session(1).expect("open");
    match Message::from_document(&doc).expect("decodes") {
        Message::Probe { probe, .. } => {
            assert!(matches!(
                server.predict(&id, &probe),
                Err(ProtocolError::ShapeMismatch { .. })
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.session_info(&id).expect("info").consumed, 0);
}

#[test]
fn test_error_reply_unicode_message() {
    let msg = Message::Error(ErrorReply {
        kind: "Custom".to_string(),
        message: "Hello, 世界! 🌍".to_string(),
    });
    let decoded = Message::decode(&msg.encode().expect("encode")).expect("decode");
    assert_eq!(decoded, msg);
}

// ============================================================================
// DISPATCHER EDGE CASES
// ============================================================================

#[test]
fn test_dispatcher_unregistered_type() {
    let dispatcher = Dispatcher::new();
    let result = dispatcher.dispatch(&Message::OpenSession { budget: 1 });
    assert!(matches!(result, Err(ProtocolError::UnexpectedMessage)));
}

#[test]
fn test_dispatcher_handler_override() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register("open_session", |_| Ok(Message::OpenSession { budget: 1 }))
        .expect("register");
    dispatcher
        .register("open_session", |_| Ok(Message::OpenSession { budget: 2 }))
        .expect("re-register");

    let reply = dispatcher
        .dispatch(&Message::OpenSession { budget: 0 })
        .expect("dispatch");
    assert_eq!(reply, Message::OpenSession { budget: 2 });
}

#[test]
fn test_server_dispatcher_covers_client_requests() {
    let server = common::server();
    let dispatcher = server.dispatcher().expect("dispatcher");
    for opcode in ["open_session", "probe", "close_session"] {
        assert!(dispatcher.handles(opcode), "missing handler for {opcode}");
    }
    for opcode in ["session", "response", "closed", "error"] {
        assert!(!dispatcher.handles(opcode), "server must not answer {opcode}");
    }
}

#[test]
fn test_handler_errors_propagate() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register("close_session", |_| {
            Err(ProtocolError::SessionNotFound("gone".into()))
        })
        .expect("register");
    let result = dispatcher.dispatch(&Message::CloseSession {
        session_id: SessionId::from("gone"),
    });
    assert!(matches!(result, Err(ProtocolError::SessionNotFound(_))));
}

// ============================================================================
// TIMEOUT EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_timeout_zero_duration() {
    let result = with_timeout(Duration::ZERO, async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    })
    .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

#[tokio::test]
async fn test_timeout_passes_inner_error_through() {
    let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
        Err(ProtocolError::ConnectionClosed)
    })
    .await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
}

// ============================================================================
// ERROR PROPAGATION EDGE CASES
// ============================================================================

#[test]
fn test_error_display_formatting() {
    let errors = vec![
        ProtocolError::InvalidHeader,
        ProtocolError::UnsupportedVersion(42),
        ProtocolError::OversizedPacket(999),
        ProtocolError::BudgetExceeded { budget: 5 },
        ProtocolError::ShapeMismatch {
            expected: vec![2],
            actual: vec![3],
        },
        ProtocolError::ConnectionClosed,
        ProtocolError::Timeout,
        ProtocolError::Io(std::io::Error::other("test error")),
    ];

    for err in errors {
        assert!(!format!("{err}").is_empty(), "Error should have display format");
        assert!(!err.kind().is_empty());
    }
}

#[test]
fn test_error_reply_restores_client_visible_kinds() {
    let cases = [
        ProtocolError::BudgetExceeded { budget: 9 },
        ProtocolError::SessionNotFound("abc".into()),
        ProtocolError::Unsupported("gradient".into()),
    ];
    for err in cases {
        let restored = ErrorReply::from(&err).into_error();
        assert_eq!(restored.kind(), err.kind());
    }

    let restored = ErrorReply::from(&ProtocolError::TooManySessions(4)).into_error();
    assert!(matches!(restored, ProtocolError::Remote { ref kind, .. } if kind == "TooManySessions"));
}
