//! Channel and workspace registry.
//!
//! In-memory directory of backend-registered channels, grouped into
//! workspaces. The registry hands out numeric ids; everything a channel
//! carries beyond identity (participants, icons) is optional server-side —
//! clients enrich from their local fallback dataset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use schoolchat_proto::channel::{Category, Channel, ChannelId};

/// A workspace grouping channels (a school, a grade, a club).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Workspace id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// URL slug.
    pub slug: String,
}

/// A channel summary in workspace-listing shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    /// Backend channel id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Summary kind: `channel`, `dm`, or `announcement`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Subject, for class channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// In-memory channel and workspace directory.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<i64, Channel>>,
    /// Workspace id → (workspace, member channel ids).
    workspaces: RwLock<HashMap<i64, (Workspace, Vec<i64>)>>,
    next_channel_id: AtomicI64,
    next_workspace_id: AtomicI64,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(HashMap::new()),
            next_channel_id: AtomicI64::new(1),
            next_workspace_id: AtomicI64::new(1),
        }
    }

    /// Registers a channel and returns its assigned id.
    pub async fn register(&self, name: &str, category: Category, is_group: bool) -> i64 {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let mut channel = Channel::new(ChannelId::Backend(id), name, category);
        channel.is_group = is_group;
        channel.is_read_only = category == Category::Announcement;
        self.channels.write().await.insert(id, channel);
        id
    }

    /// Returns a channel by id.
    pub async fn get(&self, id: i64) -> Option<Channel> {
        self.channels.read().await.get(&id).cloned()
    }

    /// Returns `true` if the channel exists.
    pub async fn exists(&self, id: i64) -> bool {
        self.channels.read().await.contains_key(&id)
    }

    /// All channels, ordered by id.
    pub async fn list(&self) -> Vec<Channel> {
        let map = self.channels.read().await;
        let mut ids: Vec<i64> = map.keys().copied().collect();
        ids.sort_unstable();
        ids.iter().filter_map(|id| map.get(id).cloned()).collect()
    }

    /// All non-group channels, in summary shape (the DM listing).
    pub async fn dms(&self) -> Vec<ChannelSummary> {
        self.list()
            .await
            .into_iter()
            .filter(|c| !c.is_group)
            .map(|c| summarize(&c))
            .collect()
    }

    /// Creates a workspace and returns its id.
    pub async fn create_workspace(&self, name: &str, slug: &str) -> i64 {
        let id = self.next_workspace_id.fetch_add(1, Ordering::Relaxed);
        let workspace = Workspace {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
        };
        self.workspaces
            .write()
            .await
            .insert(id, (workspace, Vec::new()));
        id
    }

    /// Assigns a channel to a workspace. Unknown ids are ignored.
    pub async fn assign(&self, workspace_id: i64, channel_id: i64) {
        if !self.exists(channel_id).await {
            return;
        }
        if let Some((_, members)) = self.workspaces.write().await.get_mut(&workspace_id)
            && !members.contains(&channel_id)
        {
            members.push(channel_id);
        }
    }

    /// All workspaces, ordered by id.
    pub async fn workspaces(&self) -> Vec<Workspace> {
        let map = self.workspaces.read().await;
        let mut ids: Vec<i64> = map.keys().copied().collect();
        ids.sort_unstable();
        ids.iter()
            .filter_map(|id| map.get(id).map(|(w, _)| w.clone()))
            .collect()
    }

    /// Channel summaries of a workspace, in assignment order.
    pub async fn workspace_channels(&self, workspace_id: i64) -> Option<Vec<ChannelSummary>> {
        let member_ids = {
            let map = self.workspaces.read().await;
            map.get(&workspace_id).map(|(_, members)| members.clone())?
        };
        let channels = self.channels.read().await;
        Some(
            member_ids
                .iter()
                .filter_map(|id| channels.get(id).map(summarize))
                .collect(),
        )
    }
}

fn summarize(channel: &Channel) -> ChannelSummary {
    let kind = match channel.category {
        Category::Announcement => "announcement",
        Category::Class => "channel",
        Category::Teacher | Category::Parent | Category::Friend => "dm",
    };
    let id = channel.id.as_backend().unwrap_or_default();
    ChannelSummary {
        id,
        name: channel.name.clone(),
        kind,
        subject: None,
    }
}
