//! `SchoolChat` backend — single-process chat server.
//!
//! An axum server exposing the chat WebSocket endpoint with in-process
//! fan-out plus the REST endpoints the client core consumes. State is
//! in-memory: one channel registry, one message store, one connection
//! table. There is no cross-node replication and no durable queue —
//! delivery is best-effort over the socket, with clients reconnecting.

pub mod channels;
pub mod config;
pub mod server;
pub mod store;
