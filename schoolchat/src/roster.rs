//! Conversation list reconciler.
//!
//! Merges the authoritative channel list from the backend with the richer
//! local fallback dataset, tracks unread counters from relayed events for
//! channels that aren't open, and groups conversations for display. The
//! reconciler never touches a thread's message list — both consume the
//! same event stream independently.

use schoolchat_proto::channel::{Category, Channel, ChannelId};
use schoolchat_proto::event::ServerEvent;
use schoolchat_proto::message::Message;

use crate::api::ChatApi;

/// Merges an authoritative channel record with the local fallback set.
///
/// Precedence: the authoritative id and category always win; the fallback
/// supplies display enrichment (icon, roster, group flag, read-only flag)
/// where the authoritative record is empty. A fallback entry matches by
/// id, or by case-insensitive substring between the names.
#[must_use]
pub fn merge_channel(authoritative: Channel, fallback: &[Channel]) -> Channel {
    let name_lower = authoritative.name.to_lowercase();
    let matched = fallback.iter().find(|f| {
        f.id == authoritative.id
            || (!name_lower.is_empty() && f.name.to_lowercase().contains(&name_lower))
    });
    let Some(local) = matched else {
        return authoritative;
    };

    Channel {
        id: authoritative.id,
        category: authoritative.category,
        name: if authoritative.name.is_empty() {
            local.name.clone()
        } else {
            authoritative.name
        },
        icon: authoritative.icon.or_else(|| local.icon.clone()),
        participants: if authoritative.participants.is_empty() {
            local.participants.clone()
        } else {
            authoritative.participants
        },
        is_group: authoritative.is_group || local.is_group,
        is_read_only: authoritative.is_read_only || local.is_read_only,
        unread_count: authoritative.unread_count,
        last_message: authoritative
            .last_message
            .or_else(|| local.last_message.clone()),
    }
}

/// Summary and unread state for every conversation of the session.
pub struct ConversationList {
    channels: Vec<Channel>,
    fallback: Vec<Channel>,
    active: Option<ChannelId>,
    authoritative: bool,
}

impl ConversationList {
    /// Creates a list seeded from the fallback dataset.
    ///
    /// Until [`load`](Self::load) succeeds the list is non-authoritative
    /// and the UI should badge it as demo data.
    #[must_use]
    pub fn new(fallback: Vec<Channel>) -> Self {
        Self {
            channels: fallback.clone(),
            fallback,
            active: None,
            authoritative: false,
        }
    }

    /// Fetches the authoritative channel list and reconciles it.
    ///
    /// Each returned channel is enriched from the fallback set via
    /// [`merge_channel`]. A failed or empty fetch keeps the fallback list
    /// and leaves the list marked non-authoritative — never a user-facing
    /// error.
    pub async fn load(&mut self, api: &ChatApi) {
        match api.conversations().await {
            Ok(list) if !list.is_empty() => {
                self.channels = list
                    .into_iter()
                    .map(|c| merge_channel(c, &self.fallback))
                    .collect();
                self.authoritative = true;
            }
            Ok(_) => {
                tracing::debug!("conversation list empty, keeping fallback");
            }
            Err(e) => {
                tracing::debug!(error = %e, "conversation fetch failed, using fallback");
                self.channels.clone_from(&self.fallback);
            }
        }
    }

    /// Folds one router event into the summary state.
    ///
    /// `new_message` refreshes the channel's preview and bumps its unread
    /// count unless the channel is active; `unread_updated` applies the
    /// server-supplied delta under the same condition. The active
    /// channel's unread count never increments.
    pub fn handle_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::NewMessage {
                channel_id,
                message,
            } => {
                let id = ChannelId::Backend(*channel_id);
                let is_active = self.active.as_ref() == Some(&id);
                if let Some(channel) = self.channels.iter_mut().find(|c| c.id == id) {
                    channel.last_message = Some(Message::from_wire(message));
                    if !is_active {
                        channel.unread_count += 1;
                    }
                }
            }
            ServerEvent::UnreadUpdated { channel_id, delta } => {
                let id = ChannelId::Backend(*channel_id);
                if self.active.as_ref() == Some(&id) {
                    return;
                }
                if let Some(channel) = self.channels.iter_mut().find(|c| c.id == id) {
                    channel.unread_count += delta;
                }
            }
            _ => {}
        }
    }

    /// Selects a channel: resets its unread count synchronously, marks it
    /// active, and fires a best-effort read-marker persist for backend
    /// channels. Persist failure does not roll back the reset.
    ///
    /// Returns the selected channel, or `None` for an unknown id.
    pub fn select(&mut self, id: &ChannelId, api: &ChatApi) -> Option<Channel> {
        let channel = self.channels.iter_mut().find(|c| &c.id == id)?;
        channel.unread_count = 0;
        let snapshot = channel.clone();
        self.active = Some(id.clone());

        if let Some(backend_id) = id.as_backend() {
            let api = api.clone();
            tokio::spawn(async move {
                if let Err(e) = api.mark_read(backend_id).await {
                    tracing::debug!(channel_id = backend_id, error = %e, "read persist failed (ignored)");
                }
            });
        }
        Some(snapshot)
    }

    /// Channels grouped by category in the fixed priority order.
    ///
    /// Within a category, source order is preserved — deliberately no
    /// recency sort. Empty categories are omitted.
    #[must_use]
    pub fn grouped(&self) -> Vec<(Category, Vec<&Channel>)> {
        Category::PRIORITY
            .into_iter()
            .filter_map(|category| {
                let members: Vec<&Channel> = self
                    .channels
                    .iter()
                    .filter(|c| c.category == category)
                    .collect();
                if members.is_empty() {
                    None
                } else {
                    Some((category, members))
                }
            })
            .collect()
    }

    /// Whether the current list came from the backend (vs. fallback/demo).
    #[must_use]
    pub const fn authoritative(&self) -> bool {
        self.authoritative
    }

    /// The currently active channel, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&ChannelId> {
        self.active.as_ref()
    }

    /// All channels in source order.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}
