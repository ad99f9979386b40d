//! Event router: classifies inbound socket frames and fans them out.
//!
//! Every subscriber receives every event; relevance filtering (by channel
//! id) is the subscriber's job. The active thread and the conversation
//! list both consume the same stream this way. Malformed frames are
//! dropped with a debug log — bad traffic is never fatal.

use schoolchat_proto::codec;
use schoolchat_proto::event::ServerEvent;
use tokio::sync::broadcast;

/// Broadcast router for [`ServerEvent`]s.
///
/// Cloning is cheap; all clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct EventRouter {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventRouter {
    /// Creates a router whose channel buffers up to `capacity` events per
    /// subscriber before lagging.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Registers a new subscriber.
    ///
    /// The receiver only sees events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Parses a raw text frame and broadcasts the decoded event.
    ///
    /// Malformed frames are discarded. A send error (no live subscribers)
    /// is also ignored — events are best-effort notifications.
    pub fn route_frame(&self, text: &str) {
        match codec::decode_event(text) {
            Ok(event) => {
                self.publish(event);
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed frame");
            }
        }
    }

    /// Broadcasts an already-decoded event to all subscribers.
    pub fn publish(&self, event: ServerEvent) {
        if let ServerEvent::Error { message } = &event {
            tracing::warn!(message = %message, "server reported error");
        }
        let _ = self.tx.send(event);
    }
}
