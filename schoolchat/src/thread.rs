//! Per-open-channel thread state machine.
//!
//! A [`ChannelThread`] owns the message list for the one channel the user
//! currently has open: it seeds from history (or the local fallback
//! dataset), folds live events from the router into an ordered,
//! deduplicated list, tracks who is typing, and runs the optimistic send
//! protocol. All delayed work — optimistic expiry, offline-send
//! simulation, typing quiet periods — runs as cancellable tasks keyed by
//! message id or typing entry, aborted on superseding events and on
//! [`close`](ChannelThread::close).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use schoolchat_proto::channel::{Channel, ChannelId};
use schoolchat_proto::event::{ClientFrame, ServerEvent};
use schoolchat_proto::message::{Message, MessageId, MessageKind, MessageStatus};

use crate::config::{ThreadTimings, UserIdentity};
use crate::connection::ConnectionManager;
use crate::fallback;
use crate::history::HistoryService;

/// Timer key for the local user's typing quiet period.
const SELF_TYPING_KEY: &str = "typing:self";

/// Lifecycle of an open thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    /// History is being fetched; the fallback seed is showing.
    LoadingHistory,
    /// The thread is live.
    Ready,
}

/// Mutable thread state, shared with timer tasks.
struct ThreadInner {
    channel: Channel,
    phase: ThreadPhase,
    messages: Vec<Message>,
    /// Ids present in `messages`; duplicate deliveries are dropped here.
    seen_ids: HashSet<String>,
    /// Display names currently typing, in arrival order.
    typing: Vec<String>,
    /// Scheduled tasks keyed by message id / typing entry.
    timers: HashMap<String, AbortHandle>,
    closed: bool,
}

impl ThreadInner {
    fn insert_message(&mut self, message: Message) -> bool {
        if self.seen_ids.contains(message.id.as_str()) {
            return false;
        }
        self.seen_ids.insert(message.id.to_string());
        self.messages.push(message);
        true
    }

    fn cancel_timer(&mut self, key: &str) {
        if let Some(handle) = self.timers.remove(key) {
            handle.abort();
        }
    }
}

/// State machine for the active channel's message thread.
pub struct ChannelThread {
    inner: Arc<Mutex<ThreadInner>>,
    conn: Arc<ConnectionManager>,
    timings: ThreadTimings,
    me: UserIdentity,
    /// Cached backend id; `None` for local-only (fallback) channels.
    backend_id: Option<i64>,
}

impl ChannelThread {
    /// Opens a thread for `channel`, seeded from the fallback dataset.
    ///
    /// The thread starts in [`ThreadPhase::LoadingHistory`]; call
    /// [`load`](Self::load) to fetch real history and become ready.
    #[must_use]
    pub fn new(
        channel: Channel,
        me: UserIdentity,
        conn: Arc<ConnectionManager>,
        timings: ThreadTimings,
    ) -> Self {
        let seed = fallback::demo_messages(&channel.id);
        let seen_ids = seed.iter().map(|m| m.id.to_string()).collect();
        let backend_id = channel.id.as_backend();

        Self {
            inner: Arc::new(Mutex::new(ThreadInner {
                channel,
                phase: ThreadPhase::LoadingHistory,
                messages: seed,
                seen_ids,
                typing: Vec::new(),
                timers: HashMap::new(),
                closed: false,
            })),
            conn,
            timings,
            me,
            backend_id,
        }
    }

    /// Seeds the thread from the history service and marks it ready.
    ///
    /// For backend channels, a non-empty fetch replaces the fallback seed
    /// and a mark-read is fired and forgotten; an empty fetch or a fetch
    /// error keeps whatever the seed provided. Local-only channels skip
    /// the fetch entirely. The thread always ends up [`ThreadPhase::Ready`].
    pub async fn load(&self, history: &HistoryService) {
        if let Some(channel_id) = self.backend_id {
            match history.fetch(channel_id, None, None).await {
                Ok(messages) if !messages.is_empty() => {
                    let mut inner = self.inner.lock();
                    inner.seen_ids = messages.iter().map(|m| m.id.to_string()).collect();
                    inner.messages = messages;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(channel_id, error = %e, "history fetch failed, keeping fallback");
                }
            }
            history.mark_read(channel_id);
        }
        self.inner.lock().phase = ThreadPhase::Ready;
    }

    /// Sends a message authored by the local user.
    ///
    /// Connected path: transmit over the socket, append an optimistic
    /// entry with status `sending`, and schedule its removal after the
    /// optimistic window so the authoritative echo never shows twice.
    ///
    /// Offline path (no backend id, socket down, or transmit refused):
    /// append the message locally and simulate the `sent`/`delivered`
    /// transitions on timers. This keeps the UI usable in demo mode and
    /// is never mistaken for real delivery.
    pub async fn send(&self, content: &str, kind: MessageKind) {
        if let Some(channel_id) = self.backend_id
            && self.conn.is_online()
        {
            let frame = ClientFrame::SendMessage {
                channel_id,
                content: content.to_string(),
                message_type: kind,
                file_url: None,
            };
            if self.conn.send(&frame).await {
                let message = self.local_message(MessageId::optimistic(), kind, content);
                let key = message.id.to_string();
                {
                    let mut inner = self.inner.lock();
                    if inner.closed {
                        return;
                    }
                    inner.insert_message(message);
                }
                self.arm_optimistic_expiry(key);
                return;
            }
        }

        let message = self.local_message(MessageId::new(), kind, content);
        let key = message.id.to_string();
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.insert_message(message);
        }
        self.arm_simulated_delivery(key);
    }

    /// Folds one router event into the thread state.
    ///
    /// Events for other channels (and channel-less lifecycle notices) are
    /// ignored; the router broadcasts everything and relevance filtering
    /// happens here. Receipt and flag updates for ids not in the list are
    /// silently dropped.
    pub async fn handle_event(&self, event: &ServerEvent) {
        let Some(channel_id) = self.backend_id else {
            return;
        };
        if event.channel_id() != Some(channel_id) {
            return;
        }

        match event {
            ServerEvent::NewMessage { message, .. } => {
                let incoming = Message::from_wire(message);
                let from_self = incoming.sender_id == self.me.user_id;
                let message_id = incoming.id.to_string();
                let inserted = {
                    let mut inner = self.inner.lock();
                    if inner.closed {
                        return;
                    }
                    if from_self {
                        // The authoritative echo replaces the optimistic
                        // entry rather than duplicating it.
                        if let Some(pos) = inner
                            .messages
                            .iter()
                            .position(|m| m.id.is_optimistic() && m.content == incoming.content)
                        {
                            let optimistic = inner.messages.remove(pos);
                            let key = optimistic.id.to_string();
                            inner.seen_ids.remove(&key);
                            inner.cancel_timer(&key);
                        }
                    }
                    inner.insert_message(incoming)
                };
                if inserted && !from_self {
                    let _ = self
                        .conn
                        .send(&ClientFrame::MarkDelivered {
                            channel_id,
                            message_id: message_id.clone(),
                        })
                        .await;
                    let _ = self
                        .conn
                        .send(&ClientFrame::MarkRead {
                            channel_id,
                            message_id,
                        })
                        .await;
                }
            }
            ServerEvent::UserTyping {
                user_id,
                display_name,
                ..
            } => {
                if *user_id == self.me.user_id {
                    return;
                }
                {
                    let mut inner = self.inner.lock();
                    if inner.closed {
                        return;
                    }
                    if !inner.typing.contains(display_name) {
                        inner.typing.push(display_name.clone());
                    }
                }
                self.arm_typing_expiry(display_name.clone());
            }
            ServerEvent::UserStopTyping { display_name, .. } => {
                let mut inner = self.inner.lock();
                inner.typing.retain(|name| name != display_name);
                inner.cancel_timer(&typing_key(display_name));
            }
            ServerEvent::MessageRead {
                message_id,
                user_id,
                ..
            } => {
                self.apply_receipt(message_id, user_id, MessageStatus::Read);
            }
            ServerEvent::MessageDelivered {
                message_id,
                user_id,
                ..
            } => {
                self.apply_receipt(message_id, user_id, MessageStatus::Delivered);
            }
            ServerEvent::DoubtAnswered { message_id, .. } => {
                let mut inner = self.inner.lock();
                if let Some(msg) = inner
                    .messages
                    .iter_mut()
                    .find(|m| m.id.as_str() == message_id)
                {
                    msg.is_doubt_answered = true;
                }
            }
            ServerEvent::MessagePinned { message_id, .. } => {
                let mut inner = self.inner.lock();
                if let Some(msg) = inner
                    .messages
                    .iter_mut()
                    .find(|m| m.id.as_str() == message_id)
                {
                    msg.is_pinned = true;
                }
            }
            ServerEvent::UnreadUpdated { .. }
            | ServerEvent::JoinedChannel { .. }
            | ServerEvent::LeftChannel { .. }
            | ServerEvent::Connected { .. }
            | ServerEvent::Error { .. } => {
                // Unread bookkeeping belongs to the conversation list;
                // lifecycle notices don't alter thread state.
            }
        }
    }

    /// Consumes router events until the thread is closed or the stream
    /// ends. Intended to run on its own task per open thread.
    pub async fn pump(&self, mut events: broadcast::Receiver<ServerEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if self.inner.lock().closed {
                        break;
                    }
                    self.handle_event(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "thread event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// The local user started typing; notify the channel and arm the
    /// quiet-period stop. Re-invoking before the quiet period elapses
    /// re-arms the timer instead of stacking a second one.
    pub async fn notify_typing(&self) {
        let Some(channel_id) = self.backend_id else {
            return;
        };
        if !self.conn.is_online() {
            return;
        }
        let _ = self.conn.send(&ClientFrame::Typing { channel_id }).await;

        let conn = Arc::clone(&self.conn);
        let shared = Arc::clone(&self.inner);
        let delay = self.timings.typing_quiet;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = shared.lock();
                if inner.closed {
                    return;
                }
                inner.timers.remove(SELF_TYPING_KEY);
            }
            let _ = conn.send(&ClientFrame::StopTyping { channel_id }).await;
        });
        let mut inner = self.inner.lock();
        if inner.closed {
            task.abort();
            return;
        }
        if let Some(old) = inner
            .timers
            .insert(SELF_TYPING_KEY.to_string(), task.abort_handle())
        {
            old.abort();
        }
    }

    /// Tears the thread down, cancelling every scheduled task.
    ///
    /// Idempotent; timer callbacks racing with this call observe the
    /// closed flag and do nothing.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        for (_, handle) in inner.timers.drain() {
            handle.abort();
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ThreadPhase {
        self.inner.lock().phase
    }

    /// Snapshot of the message list, in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().messages.clone()
    }

    /// Display names currently typing, in arrival order.
    #[must_use]
    pub fn typing_users(&self) -> Vec<String> {
        self.inner.lock().typing.clone()
    }

    /// Snapshot of the channel metadata this thread was opened with.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.inner.lock().channel.clone()
    }

    /// Messages grouped for rendering: day buckets with same-sender runs
    /// collapsed.
    #[must_use]
    pub fn day_sections(&self) -> Vec<DayBucket> {
        day_sections(&self.inner.lock().messages)
    }

    fn local_message(&self, id: MessageId, kind: MessageKind, content: &str) -> Message {
        let channel_id = self.inner.lock().channel.id.clone();
        Message {
            id,
            channel_id,
            sender_id: self.me.user_id.clone(),
            sender_role: self.me.role,
            kind,
            content: content.to_string(),
            status: MessageStatus::Sending,
            timestamp: Utc::now(),
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            reply_to: None,
            file_url: None,
            assignment: None,
            is_pinned: false,
            is_doubt_answered: false,
        }
    }

    fn apply_receipt(&self, message_id: &str, user_id: &str, status: MessageStatus) {
        let mut inner = self.inner.lock();
        if let Some(msg) = inner
            .messages
            .iter_mut()
            .find(|m| m.id.as_str() == message_id)
        {
            msg.upgrade_status(status);
            let acked_by = if status == MessageStatus::Read {
                &mut msg.read_by
            } else {
                &mut msg.delivered_to
            };
            if !acked_by.iter().any(|u| u == user_id) {
                acked_by.push(user_id.to_string());
            }
        }
    }

    /// Schedules a state mutation after `delay`, replacing any existing
    /// timer under the same key.
    fn arm_timer(
        &self,
        key: String,
        delay: Duration,
        action: impl FnOnce(&mut ThreadInner) + Send + 'static,
    ) {
        let shared = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = shared.lock();
            if inner.closed {
                return;
            }
            inner.timers.remove(&task_key);
            action(&mut inner);
        });

        let mut inner = self.inner.lock();
        if inner.closed {
            task.abort();
            return;
        }
        if let Some(old) = inner.timers.insert(key, task.abort_handle()) {
            old.abort();
        }
    }

    fn arm_optimistic_expiry(&self, message_id: String) {
        let id = message_id.clone();
        self.arm_timer(message_id, self.timings.optimistic_expiry, move |inner| {
            inner.messages.retain(|m| m.id.as_str() != id);
            inner.seen_ids.remove(&id);
        });
    }

    fn arm_simulated_delivery(&self, message_id: String) {
        let sent_id = message_id.clone();
        self.arm_timer(
            format!("{message_id}:sent"),
            self.timings.simulate_sent,
            move |inner| {
                if let Some(msg) = inner.messages.iter_mut().find(|m| m.id.as_str() == sent_id) {
                    msg.upgrade_status(MessageStatus::Sent);
                }
            },
        );
        let delivered_id = message_id.clone();
        self.arm_timer(
            format!("{message_id}:delivered"),
            self.timings.simulate_delivered,
            move |inner| {
                if let Some(msg) = inner
                    .messages
                    .iter_mut()
                    .find(|m| m.id.as_str() == delivered_id)
                {
                    msg.upgrade_status(MessageStatus::Delivered);
                }
            },
        );
    }

    fn arm_typing_expiry(&self, display_name: String) {
        let name = display_name.clone();
        self.arm_timer(
            typing_key(&display_name),
            self.timings.typing_quiet,
            move |inner| {
                inner.typing.retain(|n| n != &name);
            },
        );
    }
}

fn typing_key(display_name: &str) -> String {
    format!("typing:{display_name}")
}

/// One rendered message with its run marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    /// The message itself.
    pub message: Message,
    /// Whether this message starts a new same-sender run (i.e. the
    /// identity marker should be shown).
    pub starts_run: bool,
}

/// A calendar-day bucket of messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    /// The UTC calendar day.
    pub date: NaiveDate,
    /// Messages of that day, in arrival order.
    pub entries: Vec<ThreadEntry>,
}

/// Groups messages into calendar-day buckets (UTC) and flags the first
/// message of each consecutive same-sender run.
#[must_use]
pub fn day_sections(messages: &[Message]) -> Vec<DayBucket> {
    let mut buckets: Vec<DayBucket> = Vec::new();
    let mut prev_sender: Option<&str> = None;

    for message in messages {
        let date = message.timestamp.date_naive();
        if buckets.last().is_none_or(|b| b.date != date) {
            buckets.push(DayBucket {
                date,
                entries: Vec::new(),
            });
            prev_sender = None;
        }
        let starts_run = prev_sender != Some(message.sender_id.as_str());
        prev_sender = Some(message.sender_id.as_str());
        if let Some(bucket) = buckets.last_mut() {
            bucket.entries.push(ThreadEntry {
                message: message.clone(),
                starts_run,
            });
        }
    }
    buckets
}
