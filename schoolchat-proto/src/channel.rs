//! Channel (conversation) types for the `SchoolChat` protocol.

use serde::{Deserialize, Serialize};

use crate::message::{Message, SenderRole};

/// Identifier for a channel.
///
/// Backend-registered channels have numeric ids; channels that exist only
/// in the local fallback dataset use opaque string ids. Serialized untagged,
/// so backend ids appear as JSON numbers and local ids as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    /// A real backend channel id.
    Backend(i64),
    /// A local-only (fallback/demo) channel id.
    Local(String),
}

impl ChannelId {
    /// Parses an id string: numeric strings become [`ChannelId::Backend`],
    /// everything else [`ChannelId::Local`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.parse::<i64>()
            .map_or_else(|_| Self::Local(raw.to_string()), Self::Backend)
    }

    /// Returns the numeric backend id, if this channel is backend-registered.
    #[must_use]
    pub const fn as_backend(&self) -> Option<i64> {
        match self {
            Self::Backend(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "{id}"),
        }
    }
}

/// Category a channel is grouped under in the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// School-wide or class announcements (usually read-only).
    Announcement,
    /// A class group channel.
    Class,
    /// A direct conversation with a teacher.
    Teacher,
    /// A direct conversation with a parent.
    Parent,
    /// A direct conversation with a classmate.
    Friend,
}

impl Category {
    /// Fixed display priority for grouping conversations.
    ///
    /// Within a category, source order is preserved; there is deliberately
    /// no recency sort.
    pub const PRIORITY: [Self; 5] = [
        Self::Announcement,
        Self::Class,
        Self::Teacher,
        Self::Parent,
        Self::Friend,
    ];

    /// Human-readable group label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Announcement => "Announcements",
            Self::Class => "Classes",
            Self::Teacher => "Teachers",
            Self::Parent => "Parents",
            Self::Friend => "Friends",
        }
    }
}

/// A member of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Platform role.
    pub role: SenderRole,
    /// Whether the user is currently online.
    #[serde(default)]
    pub is_online: bool,
}

/// A named message stream with a participant set and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel identity.
    pub id: ChannelId,
    /// Display name.
    pub name: String,
    /// Grouping category.
    pub category: Category,
    /// Whether this is a group channel (vs. a 1:1 conversation).
    #[serde(default)]
    pub is_group: bool,
    /// Channel members.
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Whether the current user may post (announcements are read-only).
    #[serde(default)]
    pub is_read_only: bool,
    /// Number of unread messages for the current user.
    #[serde(default)]
    pub unread_count: u32,
    /// Most recent message, for the conversation list preview.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Display glyph for the conversation list (fallback-supplied).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Channel {
    /// Creates a channel with the given identity and empty state.
    #[must_use]
    pub fn new(id: ChannelId, name: impl Into<String>, category: Category) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            is_group: false,
            participants: Vec::new(),
            is_read_only: false,
            unread_count: 0,
            last_message: None,
            icon: None,
        }
    }
}
