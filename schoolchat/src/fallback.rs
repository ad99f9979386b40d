//! Local fallback dataset for offline/demo operation.
//!
//! When the backend is unreachable, or a conversation is not
//! backend-registered, the UI still needs something to show. This module
//! provides that data: a small set of channels with richer display
//! metadata (icons, rosters) than the backend carries, plus seed messages
//! for a couple of them. The conversation list reconciler also mines this
//! set to enrich authoritative records.

use chrono::{Duration, Utc};
use schoolchat_proto::channel::{Category, Channel, ChannelId, Participant};
use schoolchat_proto::message::{Message, MessageId, MessageKind, MessageStatus, SenderRole};

/// User id the demo dataset uses for the local user.
pub const DEMO_USER_ID: &str = "u-me";

fn participant(id: &str, name: &str, role: SenderRole, online: bool) -> Participant {
    Participant {
        id: id.into(),
        display_name: name.into(),
        role,
        is_online: online,
    }
}

/// The demo channel list, in source order.
#[must_use]
pub fn demo_channels() -> Vec<Channel> {
    let me = participant(DEMO_USER_ID, "You", SenderRole::Student, true);

    let mut announcements = Channel::new(
        ChannelId::Local("demo-announcements".into()),
        "School Announcements",
        Category::Announcement,
    );
    announcements.is_group = true;
    announcements.is_read_only = true;
    announcements.icon = Some("📢".into());
    announcements.participants = vec![
        me.clone(),
        participant("u-principal", "Principal Rao", SenderRole::Admin, false),
    ];

    let mut math = Channel::new(
        ChannelId::Local("demo-math".into()),
        "Math 7B",
        Category::Class,
    );
    math.is_group = true;
    math.icon = Some("📐".into());
    math.participants = vec![
        me.clone(),
        participant("u-alvarez", "Mr. Alvarez", SenderRole::Teacher, true),
        participant("u-ria", "Ria", SenderRole::Student, true),
        participant("u-tom", "Tom", SenderRole::Student, false),
    ];

    let mut alvarez = Channel::new(
        ChannelId::Local("demo-alvarez".into()),
        "Mr. Alvarez",
        Category::Teacher,
    );
    alvarez.icon = Some("🧑\u{200d}🏫".into());
    alvarez.participants = vec![
        me.clone(),
        participant("u-alvarez", "Mr. Alvarez", SenderRole::Teacher, true),
    ];

    let mut mom = Channel::new(ChannelId::Local("demo-mom".into()), "Mom", Category::Parent);
    mom.participants = vec![
        me.clone(),
        participant("u-mom", "Mom", SenderRole::Parent, false),
    ];

    let mut ria = Channel::new(ChannelId::Local("demo-ria".into()), "Ria", Category::Friend);
    ria.participants = vec![me, participant("u-ria", "Ria", SenderRole::Student, true)];

    vec![announcements, math, alvarez, mom, ria]
}

fn seed_message(
    channel: &ChannelId,
    sender_id: &str,
    role: SenderRole,
    kind: MessageKind,
    content: &str,
    hours_ago: i64,
) -> Message {
    Message {
        id: MessageId::new(),
        channel_id: channel.clone(),
        sender_id: sender_id.into(),
        sender_role: role,
        kind,
        content: content.into(),
        status: MessageStatus::Read,
        timestamp: Utc::now() - Duration::hours(hours_ago),
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        reply_to: None,
        file_url: None,
        assignment: None,
        is_pinned: false,
        is_doubt_answered: false,
    }
}

/// Seed messages for a demo channel. Channels without seeds (and any
/// unknown key) get an empty history.
#[must_use]
pub fn demo_messages(channel_id: &ChannelId) -> Vec<Message> {
    let ChannelId::Local(key) = channel_id else {
        return Vec::new();
    };
    match key.as_str() {
        "demo-math" => vec![
            seed_message(
                channel_id,
                "u-alvarez",
                SenderRole::Teacher,
                MessageKind::Announcement,
                "Test on chapter 4 this Friday.",
                26,
            ),
            seed_message(
                channel_id,
                "u-ria",
                SenderRole::Student,
                MessageKind::Doubt,
                "Does question 12 need the quadratic formula?",
                25,
            ),
            seed_message(
                channel_id,
                "u-alvarez",
                SenderRole::Teacher,
                MessageKind::Text,
                "Yes — factor first if you can, formula otherwise.",
                24,
            ),
        ],
        "demo-alvarez" => vec![
            seed_message(
                channel_id,
                DEMO_USER_ID,
                SenderRole::Student,
                MessageKind::Text,
                "Sir, I was absent Monday. What did I miss?",
                4,
            ),
            seed_message(
                channel_id,
                "u-alvarez",
                SenderRole::Teacher,
                MessageKind::Text,
                "We covered simultaneous equations. Check the worksheet.",
                3,
            ),
        ],
        _ => Vec::new(),
    }
}
