// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items,
    clippy::field_reassign_with_default
)]

//! End-to-end send/receive through the in-process chat server.
//!
//! Exercises the full client stack: connection manager → event router →
//! thread state machine, against a real `schoolchat-server` instance.
//! Validates the optimistic send protocol (exactly one visible entry per
//! send action), duplicate suppression, arrival ordering, and the
//! automatic delivery/read acknowledgements.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use schoolchat::config::{ClientConfig, ReconnectConfig, ThreadTimings, UserIdentity};
use schoolchat::connection::ConnectionManager;
use schoolchat::events::EventRouter;
use schoolchat::thread::ChannelThread;
use schoolchat_proto::channel::{Category, Channel, ChannelId};
use schoolchat_proto::event::ServerEvent;
use schoolchat_proto::message::{MessageKind, MessageStatus, SenderRole};
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

fn test_config(addr: SocketAddr, user_id: &str, display_name: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.base_url = format!("http://{addr}");
    config.user = UserIdentity {
        user_id: user_id.into(),
        display_name: display_name.into(),
        role: SenderRole::Student,
    };
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(800),
    };
    config.timings = ThreadTimings {
        optimistic_expiry: Duration::from_millis(400),
        simulate_sent: Duration::from_millis(30),
        simulate_delivered: Duration::from_millis(60),
        typing_quiet: Duration::from_millis(150),
    };
    config
}

/// Polls `check` every 10ms until it holds, panicking after `deadline`.
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

/// Connects a full client stack and waits until the socket is online and
/// the channel is joined.
async fn connect_member(
    addr: SocketAddr,
    channel_id: i64,
    user_id: &str,
    display_name: &str,
) -> (Arc<ConnectionManager>, EventRouter, Arc<ChannelThread>) {
    let config = test_config(addr, user_id, display_name);
    let router = EventRouter::new(config.event_capacity);
    let mut joined_rx = router.subscribe();

    let conn = Arc::new(ConnectionManager::connect(&config, router.clone()).unwrap());
    wait_until("socket online", Duration::from_secs(5), || conn.is_online()).await;
    conn.set_active_channel(Some(channel_id)).await;

    // Wait for the join acknowledgement before proceeding.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for joined_channel");
        let event = tokio::time::timeout(remaining, joined_rx.recv())
            .await
            .expect("timed out waiting for joined_channel")
            .unwrap();
        if event == (ServerEvent::JoinedChannel { channel_id }) {
            break;
        }
    }

    let thread = Arc::new(ChannelThread::new(
        Channel::new(ChannelId::Backend(channel_id), "Math 7B", Category::Class),
        config.user.clone(),
        Arc::clone(&conn),
        config.timings,
    ));
    let pump = Arc::clone(&thread);
    let events = router.subscribe();
    tokio::spawn(async move {
        pump.pump(events).await;
    });

    (conn, router, thread)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn message_reaches_other_member() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let (alice_conn, _alice_router, alice) =
        connect_member(addr, channel_id, "u-alice", "Alice").await;
    let (bob_conn, _bob_router, bob) = connect_member(addr, channel_id, "u-bob", "Bob").await;

    alice.send("hello class", MessageKind::Text).await;

    wait_until("bob receives the message", Duration::from_secs(5), || {
        bob.messages().iter().any(|m| m.content == "hello class")
    })
    .await;

    let received = bob.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sender_id, "u-alice");
    assert!(!received[0].id.is_optimistic());

    alice.close();
    bob.close();
    alice_conn.shutdown().await;
    bob_conn.shutdown().await;
}

#[tokio::test]
async fn optimistic_entry_is_replaced_by_echo_not_duplicated() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let (conn, _router, thread) = connect_member(addr, channel_id, "u-alice", "Alice").await;

    thread.send("optimistic check", MessageKind::Text).await;

    // Immediately after the send there is exactly one visible entry,
    // optimistic, at status `sending`.
    let initial = thread.messages();
    assert_eq!(initial.len(), 1);
    assert!(initial[0].id.is_optimistic());
    assert_eq!(initial[0].status, MessageStatus::Sending);

    // The server echo replaces it; at no point do two entries with this
    // content coexist past the poll interval.
    wait_until("echo replaces optimistic entry", Duration::from_secs(5), || {
        let msgs = thread.messages();
        msgs.len() == 1 && !msgs[0].id.is_optimistic()
    })
    .await;

    // And it stays that way after the optimistic window would have expired.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = thread.messages();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].content, "optimistic check");

    thread.close();
    conn.shutdown().await;
}

#[tokio::test]
async fn messages_arrive_in_order_with_distinct_ids() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let (alice_conn, _ar, alice) = connect_member(addr, channel_id, "u-alice", "Alice").await;
    let (bob_conn, _br, bob) = connect_member(addr, channel_id, "u-bob", "Bob").await;

    for i in 0..5 {
        alice.send(&format!("message {i}"), MessageKind::Text).await;
    }

    wait_until("bob receives all five", Duration::from_secs(5), || {
        bob.messages().len() == 5
    })
    .await;

    let received = bob.messages();
    for (i, msg) in received.iter().enumerate() {
        assert_eq!(msg.content, format!("message {i}"), "order violated");
    }
    let mut ids: Vec<String> = received.iter().map(|m| m.id.to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5, "duplicate ids in thread");

    alice.close();
    bob.close();
    alice_conn.shutdown().await;
    bob_conn.shutdown().await;
}

#[tokio::test]
async fn receiver_auto_acks_and_sender_sees_read() {
    let (addr, _state, channel_id) = start_server_with_channel().await;
    let (alice_conn, _ar, alice) = connect_member(addr, channel_id, "u-alice", "Alice").await;
    let (bob_conn, _br, bob) = connect_member(addr, channel_id, "u-bob", "Bob").await;

    alice.send("ack me", MessageKind::Text).await;

    // Bob's thread automatically acknowledges delivery and read for
    // messages he didn't author; Alice's copy ends up `read`.
    wait_until("alice sees read status", Duration::from_secs(5), || {
        alice
            .messages()
            .iter()
            .any(|m| m.content == "ack me" && m.status == MessageStatus::Read)
    })
    .await;

    let msg = alice
        .messages()
        .into_iter()
        .find(|m| m.content == "ack me")
        .unwrap();
    assert!(msg.read_by.contains(&"u-bob".to_string()));

    alice.close();
    bob.close();
    alice_conn.shutdown().await;
    bob_conn.shutdown().await;
}

#[tokio::test]
async fn read_only_channel_send_degrades_to_local_simulation() {
    let state = Arc::new(ChatState::new());
    let channel_id = state
        .registry
        .register("Notices", Category::Announcement, true)
        .await;
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();

    let (conn, _router, thread) = connect_member(addr, channel_id, "u-alice", "Alice").await;

    // The socket transmit succeeds (the server rejects with an error
    // event, not a transport failure), so the optimistic protocol runs;
    // with no echo arriving, the entry expires within the window.
    thread.send("into the void", MessageKind::Text).await;
    assert_eq!(thread.messages().len(), 1);

    wait_until("optimistic entry expires", Duration::from_secs(5), || {
        thread.messages().is_empty()
    })
    .await;

    thread.close();
    conn.shutdown().await;
}
