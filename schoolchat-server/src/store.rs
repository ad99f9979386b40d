//! In-memory per-channel message store with cursor pagination.
//!
//! Messages are held in arrival order per channel. History reads return
//! the newest page (capped), oldest→newest, optionally before an id
//! cursor. Receipt sets and teacher flags are updated in place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use schoolchat_proto::message::{MessageKind, SenderRole, WireMessage};

/// A message draft as accepted from a client, before id assignment.
#[derive(Debug, Clone)]
pub struct Draft {
    /// Author's user id.
    pub author_id: String,
    /// Author's display name.
    pub author_username: String,
    /// Author's platform role, when known.
    pub sender_role: Option<SenderRole>,
    /// Message body text.
    pub content: String,
    /// Content kind.
    pub message_type: MessageKind,
    /// URL of an attached file.
    pub file_url: Option<String>,
}

/// In-memory message store keyed by channel id.
pub struct MessageStore {
    messages: RwLock<HashMap<i64, Vec<WireMessage>>>,
    next_message_id: AtomicI64,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            next_message_id: AtomicI64::new(1),
        }
    }

    /// Appends a draft to a channel, assigning id and timestamp.
    ///
    /// Returns the stored message in wire shape, ready for fan-out.
    pub async fn append(&self, channel_id: i64, draft: Draft) -> WireMessage {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let message = WireMessage {
            id: Some(id.to_string()),
            channel_id,
            author_id: draft.author_id,
            author_username: draft.author_username,
            sender_role: draft.sender_role,
            content: draft.content,
            message_type: draft.message_type,
            file_url: draft.file_url,
            reply_to: None,
            read_by: Vec::new(),
            delivered_to: Vec::new(),
            is_pinned: false,
            is_doubt_answered: false,
            assignment_data: None,
            created_at: Utc::now(),
        };
        self.messages
            .write()
            .await
            .entry(channel_id)
            .or_default()
            .push(message.clone());
        message
    }

    /// Returns a history page for a channel: the newest `limit` messages
    /// older than the `before` id cursor (all when no cursor), in
    /// oldest→newest order.
    pub async fn history(
        &self,
        channel_id: i64,
        limit: usize,
        before: Option<&str>,
    ) -> Vec<WireMessage> {
        let map = self.messages.read().await;
        let Some(all) = map.get(&channel_id) else {
            return Vec::new();
        };

        let cutoff = before.map_or(all.len(), |cursor| {
            all.iter()
                .position(|m| m.id.as_deref() == Some(cursor))
                .unwrap_or(all.len())
        });
        let window = &all[..cutoff];
        let start = window.len().saturating_sub(limit);
        window[start..].to_vec()
    }

    /// Records a read receipt. Returns `false` for unknown messages.
    pub async fn mark_read(&self, channel_id: i64, message_id: &str, user_id: &str) -> bool {
        self.update(channel_id, message_id, |m| {
            if !m.read_by.iter().any(|u| u == user_id) {
                m.read_by.push(user_id.to_string());
            }
        })
        .await
    }

    /// Records a delivery receipt. Returns `false` for unknown messages.
    pub async fn mark_delivered(&self, channel_id: i64, message_id: &str, user_id: &str) -> bool {
        self.update(channel_id, message_id, |m| {
            if !m.delivered_to.iter().any(|u| u == user_id) {
                m.delivered_to.push(user_id.to_string());
            }
        })
        .await
    }

    /// Pins a message. Returns `false` for unknown messages.
    pub async fn pin(&self, channel_id: i64, message_id: &str) -> bool {
        self.update(channel_id, message_id, |m| m.is_pinned = true)
            .await
    }

    /// Marks a doubt as answered. Returns `false` for unknown messages.
    pub async fn answer_doubt(&self, channel_id: i64, message_id: &str) -> bool {
        self.update(channel_id, message_id, |m| m.is_doubt_answered = true)
            .await
    }

    /// The most recent message of a channel, if any.
    pub async fn last(&self, channel_id: i64) -> Option<WireMessage> {
        self.messages
            .read()
            .await
            .get(&channel_id)
            .and_then(|v| v.last().cloned())
    }

    async fn update(
        &self,
        channel_id: i64,
        message_id: &str,
        apply: impl FnOnce(&mut WireMessage),
    ) -> bool {
        let mut map = self.messages.write().await;
        let Some(all) = map.get_mut(&channel_id) else {
            return false;
        };
        let Some(message) = all.iter_mut().find(|m| m.id.as_deref() == Some(message_id)) else {
            return false;
        };
        apply(message);
        true
    }
}
