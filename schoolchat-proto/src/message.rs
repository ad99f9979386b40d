//! Canonical message types for the `SchoolChat` protocol.
//!
//! [`Message`] is the client-side canonical shape: every message held in a
//! thread or shown in a conversation preview has this form. The server's
//! JSON shape for a message inside a `new_message` event is [`WireMessage`];
//! [`Message::from_wire`] maps one into the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelId;

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Prefix marking a locally generated optimistic message id.
pub const OPTIMISTIC_PREFIX: &str = "opt-";

/// Unique identifier for a message.
///
/// Server-assigned ids are opaque strings (numeric for backend-stored
/// messages). Locally generated ids are UUID v7 for time-ordering;
/// optimistic placeholders carry the [`OPTIMISTIC_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Creates an optimistic placeholder id (`opt-` + UUID v7).
    #[must_use]
    pub fn optimistic() -> Self {
        Self(format!("{OPTIMISTIC_PREFIX}{}", Uuid::now_v7()))
    }

    /// Wraps an existing id string (e.g. a server-assigned id).
    #[must_use]
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns `true` if this is a locally generated optimistic id.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.0.starts_with(OPTIMISTIC_PREFIX)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a message sender within the school platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// A student account.
    Student,
    /// A teacher account.
    Teacher,
    /// A parent/guardian account.
    Parent,
    /// A platform administrator.
    Admin,
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Student => write!(f, "student"),
            Self::Teacher => write!(f, "teacher"),
            Self::Parent => write!(f, "parent"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// A student question flagged for teacher clarification.
    Doubt,
    /// A broadcast announcement.
    Announcement,
    /// An assignment with structured metadata.
    Assignment,
    /// A file attachment.
    File,
    /// An image attachment.
    Image,
}

/// Delivery lifecycle of a message, from the sender's perspective.
///
/// Statuses form a total order (`Sending < Sent < Delivered < Read`) and
/// only ever advance; see [`MessageStatus::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created locally, not yet confirmed by the server.
    Sending,
    /// Accepted by the server.
    Sent,
    /// Delivered to at least one recipient.
    Delivered,
    /// Read by at least one recipient.
    Read,
}

impl MessageStatus {
    /// Position of this status in the delivery lifecycle.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    /// Returns the later of `self` and `other` in the lifecycle order.
    ///
    /// Receipt events can arrive out of order; upgrading through this
    /// method keeps a message's status monotonically non-decreasing.
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Structured metadata attached to an assignment message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentData {
    /// Assignment title.
    pub title: String,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

/// A message in its canonical client-side form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier within the channel.
    pub id: MessageId,
    /// The channel this message belongs to.
    pub channel_id: ChannelId,
    /// User id of the author.
    pub sender_id: String,
    /// Role of the author.
    pub sender_role: SenderRole,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message body text.
    pub content: String,
    /// Delivery status from the sender's perspective.
    pub status: MessageStatus,
    /// Creation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// User ids the message has been delivered to.
    #[serde(default)]
    pub delivered_to: Vec<String>,
    /// User ids that have read the message.
    #[serde(default)]
    pub read_by: Vec<String>,
    /// Id of the message this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// URL of an attached file, for `file`/`image` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Assignment metadata, for `assignment` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentData>,
    /// Whether a teacher has pinned this message.
    #[serde(default)]
    pub is_pinned: bool,
    /// Whether a flagged doubt has been answered.
    #[serde(default)]
    pub is_doubt_answered: bool,
}

/// Error returned when a message fails validation before sending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl Message {
    /// Validates this message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the content is empty, or
    /// [`ValidationError::TooLarge`] if it exceeds [`MAX_CONTENT_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.content.len();
        if size > MAX_CONTENT_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_CONTENT_SIZE,
            });
        }
        Ok(())
    }

    /// Upgrades the delivery status, never downgrading.
    pub fn upgrade_status(&mut self, to: MessageStatus) {
        self.status = self.status.max(to);
    }

    /// Maps a server [`WireMessage`] into the canonical shape.
    ///
    /// A client id is generated only when the server omitted one. Messages
    /// arriving over the wire are at least `Delivered` from the receiving
    /// client's point of view.
    #[must_use]
    pub fn from_wire(wire: &WireMessage) -> Self {
        Self {
            id: wire
                .id
                .as_deref()
                .map_or_else(MessageId::new, MessageId::from_raw),
            channel_id: ChannelId::Backend(wire.channel_id),
            sender_id: wire.author_id.clone(),
            sender_role: wire.sender_role.unwrap_or(SenderRole::Student),
            kind: wire.message_type,
            content: wire.content.clone(),
            status: MessageStatus::Delivered,
            timestamp: wire.created_at,
            delivered_to: Vec::new(),
            read_by: wire.read_by.clone(),
            reply_to: wire.reply_to.as_deref().map(MessageId::from_raw),
            file_url: wire.file_url.clone(),
            assignment: wire.assignment_data.clone(),
            is_pinned: wire.is_pinned,
            is_doubt_answered: wire.is_doubt_answered,
        }
    }
}

/// Server-side JSON shape of a message, as carried in `new_message` events
/// and history responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned message id; may be absent for relayed drafts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Backend channel id.
    pub channel_id: i64,
    /// User id of the author.
    pub author_id: String,
    /// Display name of the author.
    pub author_username: String,
    /// Role of the author, when the server knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<SenderRole>,
    /// Message body text.
    pub content: String,
    /// Content kind.
    pub message_type: MessageKind,
    /// URL of an attached file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Id of the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// User ids that have read the message.
    #[serde(default)]
    pub read_by: Vec<String>,
    /// User ids the message has been delivered to.
    #[serde(default)]
    pub delivered_to: Vec<String>,
    /// Whether a teacher has pinned this message.
    #[serde(default)]
    pub is_pinned: bool,
    /// Whether a flagged doubt has been answered.
    #[serde(default)]
    pub is_doubt_answered: bool,
    /// Assignment metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_data: Option<AssignmentData>,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
}
