//! Server core: shared state, WebSocket handler, REST routes, fan-out.
//!
//! One WebSocket connection per client session lands at `/ws/chat` with
//! identity in the query string; connections missing identity are closed
//! with the reserved unauthorized code (4001) and must not reconnect.
//! Events fan out in-process: `new_message` to every connection joined to
//! the channel, `unread_updated` to everyone else.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use schoolchat_proto::channel::Channel;
use schoolchat_proto::codec;
use schoolchat_proto::event::{CLOSE_UNAUTHORIZED, ClientFrame, ServerEvent};
use schoolchat_proto::message::{Message as ChatMessage, MessageKind, SenderRole, WireMessage};

use crate::channels::ChannelRegistry;
use crate::store::{Draft, MessageStore};

/// Default history page size when the query omits `limit`.
const DEFAULT_PAGE_LIMIT: usize = 50;

/// Hard cap on a history page regardless of the requested `limit`.
const MAX_PAGE_LIMIT: usize = 200;

/// One registered client connection.
struct ClientConn {
    user_id: String,
    username: String,
    sender: mpsc::UnboundedSender<Message>,
    joined: HashSet<i64>,
}

/// Shared server state: connection table, channel registry, message store.
pub struct ChatState {
    connections: RwLock<HashMap<u64, ClientConn>>,
    next_conn_id: AtomicU64,
    /// Channel and workspace directory.
    pub registry: ChannelRegistry,
    /// Per-channel message history.
    pub store: MessageStore,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    /// Creates empty server state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            registry: ChannelRegistry::new(),
            store: MessageStore::new(),
        }
    }

    async fn register_connection(
        &self,
        user_id: String,
        username: String,
        sender: mpsc::UnboundedSender<Message>,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(
            conn_id,
            ClientConn {
                user_id,
                username,
                sender,
                joined: HashSet::new(),
            },
        );
        conn_id
    }

    async fn unregister_connection(&self, conn_id: u64) {
        self.connections.write().await.remove(&conn_id);
    }

    /// Number of live connections (used by tests and shutdown logging).
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends an event to one connection; errors mean the writer task is
    /// gone and the reader will clean up shortly.
    async fn send_to(&self, conn_id: u64, event: &ServerEvent) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(&conn_id) {
            send_event(conn, event);
        }
    }

    /// Broadcasts an event to every connection joined to `channel_id`,
    /// optionally skipping one connection.
    async fn broadcast_joined(&self, channel_id: i64, event: &ServerEvent, skip: Option<u64>) {
        let conns = self.connections.read().await;
        for (id, conn) in conns.iter() {
            if Some(*id) == skip || !conn.joined.contains(&channel_id) {
                continue;
            }
            send_event(conn, event);
        }
    }

    /// Fans a stored message out: `new_message` to joined connections,
    /// `unread_updated` to everyone else (their conversation lists bump
    /// the counter for the closed channel).
    pub async fn fan_out_message(&self, channel_id: i64, message: WireMessage) {
        let new_message = ServerEvent::NewMessage {
            channel_id,
            message,
        };
        let unread = ServerEvent::UnreadUpdated {
            channel_id,
            delta: 1,
        };
        let conns = self.connections.read().await;
        for conn in conns.values() {
            if conn.joined.contains(&channel_id) {
                send_event(conn, &new_message);
            } else {
                send_event(conn, &unread);
            }
        }
    }

    /// Pins a message and broadcasts `message_pinned` to the channel.
    ///
    /// Returns `false` for unknown messages.
    pub async fn pin_message(&self, channel_id: i64, message_id: &str) -> bool {
        if !self.store.pin(channel_id, message_id).await {
            return false;
        }
        let event = ServerEvent::MessagePinned {
            channel_id,
            message_id: message_id.to_string(),
        };
        self.broadcast_joined(channel_id, &event, None).await;
        true
    }

    /// Marks a doubt answered and broadcasts `doubt_answered`.
    ///
    /// Returns `false` for unknown messages.
    pub async fn answer_doubt(&self, channel_id: i64, message_id: &str) -> bool {
        if !self.store.answer_doubt(channel_id, message_id).await {
            return false;
        }
        let event = ServerEvent::DoubtAnswered {
            channel_id,
            message_id: message_id.to_string(),
        };
        self.broadcast_joined(channel_id, &event, None).await;
        true
    }

    /// Sends a close frame to every connection.
    ///
    /// Clients treat this as an unintentional close and reconnect with
    /// backoff; used for graceful shutdown and reconnect testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn_id, conn) in conns.iter() {
            tracing::info!(conn_id, "sending close frame");
            let _ = conn.sender.send(Message::Close(None));
        }
    }
}

fn send_event(conn: &ClientConn, event: &ServerEvent) {
    match codec::encode_event(event) {
        Ok(text) => {
            let _ = conn.sender.send(Message::Text(text.into()));
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode event");
        }
    }
}

/// Handles an upgraded WebSocket connection for one client session.
///
/// Lifecycle: reject without identity (close 4001), register, send
/// `connected`, then pump frames until either side closes. The writer
/// task drains a per-connection channel so fan-out never blocks on a
/// slow socket.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<ChatState>,
    identity: Option<(String, String)>,
) {
    let Some((user_id, username)) = identity else {
        tracing::warn!("connection without identity, closing unauthorized");
        let mut socket = socket;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state
        .register_connection(user_id.clone(), username.clone(), tx)
        .await;
    tracing::info!(conn_id, user_id = %user_id, "client connected");

    state
        .send_to(
            conn_id,
            &ServerEvent::Connected {
                user_id: user_id.clone(),
                display_name: username.clone(),
            },
        )
        .await;

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(&reader_state, conn_id, &user_id, &username, text.as_str())
                        .await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping, pong: not part of the chat protocol.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister_connection(conn_id).await;
    tracing::info!(conn_id, "client disconnected");
}

/// Dispatches one decoded client frame.
async fn handle_text_frame(
    state: &Arc<ChatState>,
    conn_id: u64,
    user_id: &str,
    username: &str,
    text: &str,
) {
    let frame = match codec::decode_frame(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "malformed frame");
            state
                .send_to(
                    conn_id,
                    &ServerEvent::Error {
                        message: "malformed frame".into(),
                    },
                )
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::JoinChannel { channel_id } => {
            if !state.registry.exists(channel_id).await {
                state
                    .send_to(
                        conn_id,
                        &ServerEvent::Error {
                            message: format!("unknown channel {channel_id}"),
                        },
                    )
                    .await;
                return;
            }
            {
                let mut conns = state.connections.write().await;
                if let Some(conn) = conns.get_mut(&conn_id) {
                    conn.joined.insert(channel_id);
                }
            }
            state
                .send_to(conn_id, &ServerEvent::JoinedChannel { channel_id })
                .await;
        }
        ClientFrame::LeaveChannel { channel_id } => {
            {
                let mut conns = state.connections.write().await;
                if let Some(conn) = conns.get_mut(&conn_id) {
                    conn.joined.remove(&channel_id);
                }
            }
            state
                .send_to(conn_id, &ServerEvent::LeftChannel { channel_id })
                .await;
        }
        ClientFrame::SendMessage {
            channel_id,
            content,
            message_type,
            file_url,
        } => {
            let Some(channel) = state.registry.get(channel_id).await else {
                state
                    .send_to(
                        conn_id,
                        &ServerEvent::Error {
                            message: format!("unknown channel {channel_id}"),
                        },
                    )
                    .await;
                return;
            };
            if channel.is_read_only {
                state
                    .send_to(
                        conn_id,
                        &ServerEvent::Error {
                            message: "channel is read-only".into(),
                        },
                    )
                    .await;
                return;
            }
            let draft = Draft {
                author_id: user_id.to_string(),
                author_username: username.to_string(),
                sender_role: None,
                content,
                message_type,
                file_url,
            };
            let stored = state.store.append(channel_id, draft).await;
            state.fan_out_message(channel_id, stored).await;
        }
        ClientFrame::Typing { channel_id } => {
            let event = ServerEvent::UserTyping {
                channel_id,
                user_id: user_id.to_string(),
                display_name: username.to_string(),
            };
            state
                .broadcast_joined(channel_id, &event, Some(conn_id))
                .await;
        }
        ClientFrame::StopTyping { channel_id } => {
            let event = ServerEvent::UserStopTyping {
                channel_id,
                user_id: user_id.to_string(),
                display_name: username.to_string(),
            };
            state
                .broadcast_joined(channel_id, &event, Some(conn_id))
                .await;
        }
        ClientFrame::MarkRead {
            channel_id,
            message_id,
        } => {
            if state.store.mark_read(channel_id, &message_id, user_id).await {
                let event = ServerEvent::MessageRead {
                    channel_id,
                    message_id,
                    user_id: user_id.to_string(),
                };
                state
                    .broadcast_joined(channel_id, &event, Some(conn_id))
                    .await;
            }
        }
        ClientFrame::MarkDelivered {
            channel_id,
            message_id,
        } => {
            if state
                .store
                .mark_delivered(channel_id, &message_id, user_id)
                .await
            {
                let event = ServerEvent::MessageDelivered {
                    channel_id,
                    message_id,
                    user_id: user_id.to_string(),
                };
                state
                    .broadcast_joined(channel_id, &event, Some(conn_id))
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// REST handlers
// ---------------------------------------------------------------------------

type ApiFailure = (StatusCode, Json<serde_json::Value>);

fn failure(status: StatusCode, message: &str) -> ApiFailure {
    (status, Json(serde_json::json!({ "message": message })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ChatState>>,
) -> impl IntoResponse {
    let identity = match (params.get("userId"), params.get("username")) {
        (Some(user_id), Some(username)) if !user_id.is_empty() => {
            Some((user_id.clone(), username.clone()))
        }
        _ => None,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn list_conversations(State(state): State<Arc<ChatState>>) -> Json<Vec<Channel>> {
    let mut channels = state.registry.list().await;
    for channel in &mut channels {
        if let Some(id) = channel.id.as_backend() {
            channel.last_message = state.store.last(id).await.map(|w| ChatMessage::from_wire(&w));
        }
    }
    Json(channels)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    before: Option<String>,
}

async fn channel_messages(
    State(state): State<Arc<ChatState>>,
    Path(channel_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<WireMessage>>, ApiFailure> {
    if !state.registry.exists(channel_id).await {
        return Err(failure(StatusCode::NOT_FOUND, "channel not found"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let page = state
        .store
        .history(channel_id, limit, query.before.as_deref())
        .await;
    Ok(Json(page))
}

async fn mark_conversation_read(
    State(state): State<Arc<ChatState>>,
    Path(channel_id): Path<i64>,
) -> Result<StatusCode, ApiFailure> {
    if !state.registry.exists(channel_id).await {
        return Err(failure(StatusCode::NOT_FOUND, "channel not found"));
    }
    // Per-user unread bookkeeping lives client-side; accepting the call
    // keeps the read-marker persist best-effort and idempotent.
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody {
    channel_id: i64,
    content: String,
    message_type: Option<MessageKind>,
    author_id: Option<String>,
    author_username: Option<String>,
    sender_role: Option<SenderRole>,
    file_url: Option<String>,
}

/// HTTP fallback send: stores the message and fans it out exactly like
/// the WebSocket path.
async fn post_message(
    State(state): State<Arc<ChatState>>,
    Json(body): Json<PostMessageBody>,
) -> Result<Json<WireMessage>, ApiFailure> {
    let Some(channel) = state.registry.get(body.channel_id).await else {
        return Err(failure(StatusCode::NOT_FOUND, "channel not found"));
    };
    if channel.is_read_only {
        return Err(failure(StatusCode::FORBIDDEN, "channel is read-only"));
    }
    let draft = Draft {
        author_id: body.author_id.unwrap_or_else(|| "anonymous".to_string()),
        author_username: body
            .author_username
            .unwrap_or_else(|| "Anonymous".to_string()),
        sender_role: body.sender_role,
        content: body.content,
        message_type: body.message_type.unwrap_or(MessageKind::Text),
        file_url: body.file_url,
    };
    let stored = state.store.append(body.channel_id, draft).await;
    state
        .fan_out_message(body.channel_id, stored.clone())
        .await;
    Ok(Json(stored))
}

async fn pin_message_handler(
    State(state): State<Arc<ChatState>>,
    Path((channel_id, message_id)): Path<(i64, String)>,
) -> Result<StatusCode, ApiFailure> {
    if state.pin_message(channel_id, &message_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(failure(StatusCode::NOT_FOUND, "message not found"))
    }
}

async fn answer_doubt_handler(
    State(state): State<Arc<ChatState>>,
    Path((channel_id, message_id)): Path<(i64, String)>,
) -> Result<StatusCode, ApiFailure> {
    if state.answer_doubt(channel_id, &message_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(failure(StatusCode::NOT_FOUND, "message not found"))
    }
}

async fn list_workspaces(State(state): State<Arc<ChatState>>) -> impl IntoResponse {
    Json(state.registry.workspaces().await)
}

async fn workspace_channels(
    State(state): State<Arc<ChatState>>,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiFailure> {
    match state.registry.workspace_channels(workspace_id).await {
        Some(channels) => Ok(Json(channels)),
        None => Err(failure(StatusCode::NOT_FOUND, "workspace not found")),
    }
}

async fn list_dms(State(state): State<Arc<ChatState>>) -> impl IntoResponse {
    Json(state.registry.dms().await)
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadSummary {
    url: String,
    name: String,
    mime_type: String,
}

async fn upload(mut multipart: Multipart) -> Result<Json<UploadSummary>, ApiFailure> {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field
            .file_name()
            .map_or_else(|| "file".to_string(), ToString::to_string);
        let mime_type = field.content_type().map_or_else(
            || "application/octet-stream".to_string(),
            ToString::to_string,
        );
        let Ok(bytes) = field.bytes().await else {
            return Err(failure(StatusCode::BAD_REQUEST, "failed to read upload"));
        };
        tracing::info!(name = %name, size = bytes.len(), "file uploaded");
        return Ok(Json(UploadSummary {
            url: format!("/files/{}-{name}", Uuid::now_v7()),
            name,
            mime_type,
        }));
    }
    Err(failure(StatusCode::BAD_REQUEST, "no file in upload"))
}

/// Builds the axum router over shared state.
#[must_use]
pub fn router(state: Arc<ChatState>) -> axum::Router {
    axum::Router::new()
        .route("/ws/chat", get(ws_handler))
        .route("/api/chat/conversations", get(list_conversations))
        .route(
            "/api/chat/conversations/{id}/read",
            post(mark_conversation_read),
        )
        .route("/api/chat/dms", get(list_dms))
        .route("/api/channels/{id}/messages", get(channel_messages))
        .route(
            "/api/channels/{id}/messages/{mid}/pin",
            post(pin_message_handler),
        )
        .route(
            "/api/channels/{id}/messages/{mid}/answer",
            post(answer_doubt_handler),
        )
        .route("/api/messages", post(post_message))
        .route("/api/workspaces", get(list_workspaces))
        .route("/api/workspaces/{id}/channels", get(workspace_channels))
        .route("/api/upload", post(upload))
        .with_state(state)
}

/// Starts the server on the given address.
///
/// Returns the bound address and a join handle. This is the entry point
/// for both `main.rs` and in-process test servers.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ChatState::new())).await
}

/// Starts the server with pre-configured state (e.g. seeded channels).
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ChatState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "chat server error");
        }
    });

    Ok((bound_addr, handle))
}
