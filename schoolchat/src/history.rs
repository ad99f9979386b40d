//! Message history service: REST-backed paging of past messages.
//!
//! A thin layer over [`ChatApi`] that maps wire messages into the
//! canonical shape and makes the read-marker call fire-and-forget:
//! marking read is an optimization, not a correctness requirement, so its
//! failures are swallowed.

use schoolchat_proto::message::Message;

use crate::api::{ApiError, ChatApi};

/// Default page size for history fetches.
pub const DEFAULT_LIMIT: usize = 50;

/// REST-backed message history reader for backend channels.
#[derive(Debug, Clone)]
pub struct HistoryService {
    api: ChatApi,
    default_limit: usize,
}

impl HistoryService {
    /// Creates a history service over the given REST client.
    #[must_use]
    pub const fn new(api: ChatApi) -> Self {
        Self {
            api,
            default_limit: DEFAULT_LIMIT,
        }
    }

    /// Overrides the default page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Fetches a page of history for a channel, oldest→newest as the
    /// server returns it.
    ///
    /// `limit` defaults to the configured page size; `before` is an id
    /// cursor for paging further back.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on any fetch failure. Callers fall back to
    /// local data rather than surfacing this to the user.
    pub async fn fetch(
        &self,
        channel_id: i64,
        limit: Option<usize>,
        before: Option<&str>,
    ) -> Result<Vec<Message>, ApiError> {
        let limit = limit.unwrap_or(self.default_limit);
        let wire = self.api.messages(channel_id, limit, before).await?;
        Ok(wire.iter().map(Message::from_wire).collect())
    }

    /// Marks a conversation read, fire-and-forget.
    ///
    /// The request runs on a background task; failure is logged at debug
    /// level and never surfaced.
    pub fn mark_read(&self, channel_id: i64) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(channel_id).await {
                tracing::debug!(channel_id, error = %e, "mark-read failed (ignored)");
            }
        });
    }
}
