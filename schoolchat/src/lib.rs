//! `SchoolChat` — client-side real-time messaging core.
//!
//! The crate wires five components around one WebSocket session:
//! [`connection::ConnectionManager`] owns the socket and reconnects with
//! backoff, [`events::EventRouter`] classifies inbound frames and fans them
//! out, [`history::HistoryService`] pages past messages over REST,
//! [`thread::ChannelThread`] holds per-open-channel message state, and
//! [`roster::ConversationList`] reconciles the server's channel list with
//! the local fallback dataset.

pub mod api;
pub mod config;
pub mod connection;
pub mod events;
pub mod fallback;
pub mod history;
pub mod roster;
pub mod thread;
