//! Wire frames exchanged over the chat WebSocket.
//!
//! Frames are JSON text with a snake_case discriminator in a `type` field
//! and camelCase payload fields, e.g.
//! `{"type":"join_channel","channelId":7}`. [`ClientFrame`] covers the
//! client→server direction, [`ServerEvent`] the server→client direction.

use serde::{Deserialize, Serialize};

use crate::message::{MessageKind, WireMessage};

/// WebSocket close code meaning "unauthorized — do not reconnect".
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Frames sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a channel's live events.
    #[serde(rename_all = "camelCase")]
    JoinChannel {
        /// Backend channel id.
        channel_id: i64,
    },
    /// Unsubscribe from a channel's live events.
    #[serde(rename_all = "camelCase")]
    LeaveChannel {
        /// Backend channel id.
        channel_id: i64,
    },
    /// Post a message to a channel.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// Backend channel id.
        channel_id: i64,
        /// Message body text.
        content: String,
        /// Content kind.
        message_type: MessageKind,
        /// URL of an attached file, for `file`/`image` messages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
    },
    /// The current user started typing in a channel.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Backend channel id.
        channel_id: i64,
    },
    /// The current user stopped typing in a channel.
    #[serde(rename_all = "camelCase")]
    StopTyping {
        /// Backend channel id.
        channel_id: i64,
    },
    /// Acknowledge that a specific message has been viewed.
    #[serde(rename_all = "camelCase")]
    MarkRead {
        /// Backend channel id.
        channel_id: i64,
        /// Id of the acknowledged message.
        message_id: String,
    },
    /// Acknowledge that a specific message has been received.
    #[serde(rename_all = "camelCase")]
    MarkDelivered {
        /// Backend channel id.
        channel_id: i64,
        /// Id of the acknowledged message.
        message_id: String,
    },
}

/// Events pushed from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was posted to a channel.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        /// Backend channel id.
        channel_id: i64,
        /// The posted message.
        message: WireMessage,
    },
    /// A user started typing in a channel.
    #[serde(rename_all = "camelCase")]
    UserTyping {
        /// Backend channel id.
        channel_id: i64,
        /// Typing user's id.
        user_id: String,
        /// Typing user's display name.
        display_name: String,
    },
    /// A user stopped typing in a channel.
    #[serde(rename_all = "camelCase")]
    UserStopTyping {
        /// Backend channel id.
        channel_id: i64,
        /// User's id.
        user_id: String,
        /// User's display name.
        display_name: String,
    },
    /// A message was read by a user.
    #[serde(rename_all = "camelCase")]
    MessageRead {
        /// Backend channel id.
        channel_id: i64,
        /// Id of the read message.
        message_id: String,
        /// Reader's user id.
        user_id: String,
    },
    /// A message was delivered to a user.
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        /// Backend channel id.
        channel_id: i64,
        /// Id of the delivered message.
        message_id: String,
        /// Recipient's user id.
        user_id: String,
    },
    /// A flagged doubt was answered by a teacher.
    #[serde(rename_all = "camelCase")]
    DoubtAnswered {
        /// Backend channel id.
        channel_id: i64,
        /// Id of the answered doubt message.
        message_id: String,
    },
    /// A message was pinned.
    #[serde(rename_all = "camelCase")]
    MessagePinned {
        /// Backend channel id.
        channel_id: i64,
        /// Id of the pinned message.
        message_id: String,
    },
    /// A channel's unread count changed server-side.
    #[serde(rename_all = "camelCase")]
    UnreadUpdated {
        /// Backend channel id.
        channel_id: i64,
        /// Unread delta to apply (defaults to 1 when omitted).
        #[serde(default = "default_unread_delta")]
        delta: u32,
    },
    /// Sent once after a successful connection.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Authenticated user's id.
        user_id: String,
        /// Authenticated user's display name.
        display_name: String,
    },
    /// Acknowledges a `join_channel` frame.
    #[serde(rename_all = "camelCase")]
    JoinedChannel {
        /// Backend channel id.
        channel_id: i64,
    },
    /// Acknowledges a `leave_channel` frame.
    #[serde(rename_all = "camelCase")]
    LeftChannel {
        /// Backend channel id.
        channel_id: i64,
    },
    /// Server-reported error; non-fatal, the connection stays up.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

const fn default_unread_delta() -> u32 {
    1
}

impl ServerEvent {
    /// Returns the channel this event concerns, when it has one.
    ///
    /// Subscribers filter on this; the router broadcasts every event to
    /// every subscriber without pre-filtering.
    #[must_use]
    pub const fn channel_id(&self) -> Option<i64> {
        match self {
            Self::NewMessage { channel_id, .. }
            | Self::UserTyping { channel_id, .. }
            | Self::UserStopTyping { channel_id, .. }
            | Self::MessageRead { channel_id, .. }
            | Self::MessageDelivered { channel_id, .. }
            | Self::DoubtAnswered { channel_id, .. }
            | Self::MessagePinned { channel_id, .. }
            | Self::UnreadUpdated { channel_id, .. }
            | Self::JoinedChannel { channel_id }
            | Self::LeftChannel { channel_id } => Some(*channel_id),
            Self::Connected { .. } | Self::Error { .. } => None,
        }
    }
}
