// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items,
    clippy::field_reassign_with_default
)]

//! Unread counters and conversation-list behavior across live clients.
//!
//! One client posts into a channel; a second client that has not joined
//! it receives `unread_updated` and its conversation list bumps the
//! counter, while a third client with the channel open receives the
//! message itself and its counter stays at zero. Also covers the HTTP
//! fallback send fanning out like the socket path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use schoolchat::api::ChatApi;
use schoolchat::config::{ClientConfig, ReconnectConfig, UserIdentity};
use schoolchat::connection::ConnectionManager;
use schoolchat::events::EventRouter;
use schoolchat::roster::ConversationList;
use schoolchat_proto::channel::{Category, ChannelId};
use schoolchat_proto::event::{ClientFrame, ServerEvent};
use schoolchat_proto::message::{MessageKind, SenderRole};
use schoolchat_server::server::{ChatState, start_server_with_state};

// =============================================================================
// Helpers
// =============================================================================

async fn start_server_with_channel() -> (SocketAddr, Arc<ChatState>, i64) {
    let state = Arc::new(ChatState::new());
    let channel_id = state
        .registry
        .register("Math 7B", Category::Class, true)
        .await;
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, state, channel_id)
}

fn test_config(addr: SocketAddr, user_id: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.base_url = format!("http://{addr}");
    config.user = UserIdentity {
        user_id: user_id.into(),
        display_name: user_id.into(),
        role: SenderRole::Student,
    };
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(800),
    };
    config
}

async fn wait_until(what: &str, deadline: Duration, check: impl Fn() -> bool) {
    let end = tokio::time::Instant::now() + deadline;
    while !check() {
        assert!(
            tokio::time::Instant::now() < end,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connects a manager and waits for the socket to be online.
async fn connect(addr: SocketAddr, user_id: &str) -> (Arc<ConnectionManager>, EventRouter) {
    let router = EventRouter::new(64);
    let conn = Arc::new(
        ConnectionManager::connect(&test_config(addr, user_id), router.clone()).unwrap(),
    );
    wait_until("socket online", Duration::from_secs(5), || conn.is_online()).await;
    (conn, router)
}

/// Pulls events from a receiver into a roster until `check` holds.
async fn drive_roster_until(
    roster: &mut ConversationList,
    events: &mut tokio::sync::broadcast::Receiver<ServerEvent>,
    what: &str,
    check: impl Fn(&ConversationList) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check(roster) {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for {what}"));
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .unwrap();
        roster.handle_event(&event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn closed_channel_unread_bumps_open_channel_stays_zero() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let api = ChatApi::new(format!("http://{addr}")).unwrap();

    // Alice has the channel open and posts into it.
    let (alice_conn, _alice_router) = connect(addr, "u-alice").await;
    alice_conn.set_active_channel(Some(channel_id)).await;

    // Bob also has it open: his roster marks it active.
    let (bob_conn, bob_router) = connect(addr, "u-bob").await;
    bob_conn.set_active_channel(Some(channel_id)).await;
    let mut bob_roster = ConversationList::new(Vec::new());
    bob_roster.load(&api).await;
    bob_roster.select(&ChannelId::Backend(channel_id), &api);
    let mut bob_events = bob_router.subscribe();

    // Carol is connected but never joined the channel.
    let (carol_conn, carol_router) = connect(addr, "u-carol").await;
    let mut carol_roster = ConversationList::new(Vec::new());
    carol_roster.load(&api).await;
    let mut carol_events = carol_router.subscribe();

    let delivered = alice_conn
        .send(&ClientFrame::SendMessage {
            channel_id,
            content: "pop quiz tomorrow".into(),
            message_type: MessageKind::Text,
            file_url: None,
        })
        .await;
    assert!(delivered);

    // Carol's counter bumps via unread_updated.
    drive_roster_until(&mut carol_roster, &mut carol_events, "carol unread", |r| {
        r.channels()
            .iter()
            .any(|c| c.id == ChannelId::Backend(channel_id) && c.unread_count == 1)
    })
    .await;

    // Bob sees the message itself; his counter must stay at zero while
    // the preview refreshes.
    drive_roster_until(&mut bob_roster, &mut bob_events, "bob preview", |r| {
        r.channels().iter().any(|c| {
            c.id == ChannelId::Backend(channel_id)
                && c.last_message
                    .as_ref()
                    .is_some_and(|m| m.content == "pop quiz tomorrow")
        })
    })
    .await;
    let bob_channel = bob_roster
        .channels()
        .iter()
        .find(|c| c.id == ChannelId::Backend(channel_id))
        .unwrap();
    assert_eq!(bob_channel.unread_count, 0);

    alice_conn.shutdown().await;
    bob_conn.shutdown().await;
    carol_conn.shutdown().await;
}

#[tokio::test]
async fn selecting_a_channel_resets_unread_before_any_round_trip() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let api = ChatApi::new(format!("http://{addr}")).unwrap();

    let (alice_conn, _ar) = connect(addr, "u-alice").await;
    alice_conn.set_active_channel(Some(channel_id)).await;

    let (carol_conn, carol_router) = connect(addr, "u-carol").await;
    let mut carol_roster = ConversationList::new(Vec::new());
    carol_roster.load(&api).await;
    let mut carol_events = carol_router.subscribe();

    for i in 0..3 {
        let delivered = alice_conn
            .send(&ClientFrame::SendMessage {
                channel_id,
                content: format!("note {i}"),
                message_type: MessageKind::Text,
                file_url: None,
            })
            .await;
        assert!(delivered);
    }

    drive_roster_until(&mut carol_roster, &mut carol_events, "three unread", |r| {
        r.channels()
            .iter()
            .any(|c| c.id == ChannelId::Backend(channel_id) && c.unread_count == 3)
    })
    .await;

    // Selection resets synchronously; the persist runs in the background.
    let selected = carol_roster
        .select(&ChannelId::Backend(channel_id), &api)
        .unwrap();
    assert_eq!(selected.unread_count, 0);
    assert_eq!(
        carol_roster.active(),
        Some(&ChannelId::Backend(channel_id))
    );

    // Selecting a conversation also joins its live stream.
    carol_conn.set_active_channel(Some(channel_id)).await;

    // Further messages no longer bump the (now active) channel.
    let delivered = alice_conn
        .send(&ClientFrame::SendMessage {
            channel_id,
            content: "one more".into(),
            message_type: MessageKind::Text,
            file_url: None,
        })
        .await;
    assert!(delivered);

    drive_roster_until(&mut carol_roster, &mut carol_events, "preview refresh", |r| {
        r.channels().iter().any(|c| {
            c.id == ChannelId::Backend(channel_id)
                && c.last_message.as_ref().is_some_and(|m| m.content == "one more")
        })
    })
    .await;
    assert_eq!(
        carol_roster
            .channels()
            .iter()
            .find(|c| c.id == ChannelId::Backend(channel_id))
            .unwrap()
            .unread_count,
        0
    );

    alice_conn.shutdown().await;
    carol_conn.shutdown().await;
}

#[tokio::test]
async fn http_fallback_send_fans_out_like_the_socket_path() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let api = ChatApi::new(format!("http://{addr}")).unwrap();

    let (alice_conn, alice_router) = connect(addr, "u-alice").await;
    alice_conn.set_active_channel(Some(channel_id)).await;
    let mut alice_events = alice_router.subscribe();

    let stored = api
        .send_message_http(channel_id, "posted over http", MessageKind::Text)
        .await
        .unwrap();
    assert!(stored.id.is_some());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for fanned-out message");
        let event = tokio::time::timeout(remaining, alice_events.recv())
            .await
            .expect("timed out waiting for fanned-out message")
            .unwrap();
        if let ServerEvent::NewMessage { message, .. } = event {
            assert_eq!(message.content, "posted over http");
            break;
        }
    }

    alice_conn.shutdown().await;
}
