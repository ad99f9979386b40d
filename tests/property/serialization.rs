//! Property-based serialization round-trip tests for the wire protocol.
//!
//! Uses proptest to verify:
//! 1. Any valid `ClientFrame` survives encode → decode round-trip.
//! 2. Any valid `ServerEvent` survives encode → decode round-trip.
//! 3. Random text never causes a panic in the decoders (graceful `Err`).
//! 4. The canonical `Message` shape survives a JSON round-trip.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use schoolchat_proto::channel::ChannelId;
use schoolchat_proto::codec;
use schoolchat_proto::event::{ClientFrame, ServerEvent};
use schoolchat_proto::message::{
    Message, MessageId, MessageKind, MessageStatus, SenderRole, WireMessage,
};

// --- Strategies for protocol types ---

/// Millisecond timestamps between the epoch and the year 2100.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800_000).prop_map(|ms| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .expect("in-range millis")
    })
}

fn arb_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Text),
        Just(MessageKind::Doubt),
        Just(MessageKind::Announcement),
        Just(MessageKind::Assignment),
        Just(MessageKind::File),
        Just(MessageKind::Image),
    ]
}

fn arb_role() -> impl Strategy<Value = SenderRole> {
    prop_oneof![
        Just(SenderRole::Student),
        Just(SenderRole::Teacher),
        Just(SenderRole::Parent),
        Just(SenderRole::Admin),
    ]
}

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sending),
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
    ]
}

/// Message body text: non-empty, no NUL bytes.
fn arb_content() -> impl Strategy<Value = String> {
    "[^\x00]{1,256}"
}

fn arb_wire_message() -> impl Strategy<Value = WireMessage> {
    (
        proptest::option::of("[0-9]{1,9}"),
        any::<i64>(),
        "[a-z0-9-]{1,16}",
        "[A-Za-z ]{1,24}",
        arb_content(),
        arb_kind(),
        proptest::option::of(arb_role()),
        arb_timestamp(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(
                id,
                channel_id,
                author_id,
                author_username,
                content,
                message_type,
                sender_role,
                created_at,
                is_pinned,
                is_doubt_answered,
            )| WireMessage {
                id,
                channel_id,
                author_id,
                author_username,
                sender_role,
                content,
                message_type,
                file_url: None,
                reply_to: None,
                read_by: Vec::new(),
                delivered_to: Vec::new(),
                is_pinned,
                is_doubt_answered,
                assignment_data: None,
                created_at,
            },
        )
}

fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        any::<i64>().prop_map(|channel_id| ClientFrame::JoinChannel { channel_id }),
        any::<i64>().prop_map(|channel_id| ClientFrame::LeaveChannel { channel_id }),
        (any::<i64>(), arb_content(), arb_kind()).prop_map(
            |(channel_id, content, message_type)| ClientFrame::SendMessage {
                channel_id,
                content,
                message_type,
                file_url: None,
            }
        ),
        any::<i64>().prop_map(|channel_id| ClientFrame::Typing { channel_id }),
        any::<i64>().prop_map(|channel_id| ClientFrame::StopTyping { channel_id }),
        (any::<i64>(), "[0-9]{1,9}").prop_map(|(channel_id, message_id)| {
            ClientFrame::MarkRead {
                channel_id,
                message_id,
            }
        }),
        (any::<i64>(), "[0-9]{1,9}").prop_map(|(channel_id, message_id)| {
            ClientFrame::MarkDelivered {
                channel_id,
                message_id,
            }
        }),
    ]
}

fn arb_server_event() -> impl Strategy<Value = ServerEvent> {
    prop_oneof![
        (any::<i64>(), arb_wire_message()).prop_map(|(channel_id, mut message)| {
            message.channel_id = channel_id;
            ServerEvent::NewMessage {
                channel_id,
                message,
            }
        }),
        (any::<i64>(), "[a-z0-9-]{1,16}", "[A-Za-z ]{1,24}").prop_map(
            |(channel_id, user_id, display_name)| ServerEvent::UserTyping {
                channel_id,
                user_id,
                display_name,
            }
        ),
        (any::<i64>(), "[0-9]{1,9}", "[a-z0-9-]{1,16}").prop_map(
            |(channel_id, message_id, user_id)| ServerEvent::MessageRead {
                channel_id,
                message_id,
                user_id,
            }
        ),
        (any::<i64>(), 1u32..1000).prop_map(|(channel_id, delta)| ServerEvent::UnreadUpdated {
            channel_id,
            delta
        }),
        any::<i64>().prop_map(|channel_id| ServerEvent::JoinedChannel { channel_id }),
        arb_content().prop_map(|message| ServerEvent::Error { message }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any valid ClientFrame survives an encode → decode round-trip.
    #[test]
    fn client_frame_round_trip(frame in arb_client_frame()) {
        let text = codec::encode_frame(&frame).expect("encode should succeed");
        let decoded = codec::decode_frame(&text).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Any valid ServerEvent survives an encode → decode round-trip.
    #[test]
    fn server_event_round_trip(event in arb_server_event()) {
        let text = codec::encode_event(&event).expect("encode should succeed");
        let decoded = codec::decode_event(&text).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// Random text never causes a panic in the decoders.
    #[test]
    fn random_text_decode_no_panic(text in ".{0,512}") {
        let _ = codec::decode_event(&text);
        let _ = codec::decode_frame(&text);
    }

    /// The canonical Message shape survives a JSON round-trip, preserving
    /// the status and the optimistic-id marker.
    #[test]
    fn canonical_message_json_round_trip(
        content in arb_content(),
        role in arb_role(),
        kind in arb_kind(),
        status in arb_status(),
        timestamp in arb_timestamp(),
        optimistic in any::<bool>(),
    ) {
        let message = Message {
            id: if optimistic { MessageId::optimistic() } else { MessageId::new() },
            channel_id: ChannelId::Backend(7),
            sender_id: "u-1".into(),
            sender_role: role,
            kind,
            content,
            status,
            timestamp,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            reply_to: None,
            file_url: None,
            assignment: None,
            is_pinned: false,
            is_doubt_answered: false,
        };

        let json = serde_json::to_string(&message).expect("encode should succeed");
        let decoded: Message = serde_json::from_str(&json).expect("decode should succeed");
        prop_assert_eq!(decoded.id.is_optimistic(), optimistic);
        prop_assert_eq!(message, decoded);
    }
}
