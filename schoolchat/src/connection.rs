//! Connection manager: owns the chat WebSocket for one session.
//!
//! One [`ConnectionManager`] is created per messaging session and injected
//! into every consumer; nothing else touches the socket. The manager
//! connects to the endpoint derived from the configured origin, re-joins
//! the active channel after every (re)connect, and recovers from
//! unintentional closes with exponential backoff. An unauthorized close
//! (code 4001) is terminal: the supervisor surfaces
//! [`ConnState::AuthRejected`] and never reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use schoolchat_proto::codec;
use schoolchat_proto::event::{CLOSE_UNAUTHORIZED, ClientFrame};

use crate::config::{ClientConfig, ConfigError, ReconnectConfig};
use crate::events::EventRouter;

/// Write half of the chat WebSocket.
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of the chat WebSocket.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open.
    Online,
    /// The socket is down; a reconnect is scheduled.
    Offline,
    /// The server rejected the session (close code 4001). Terminal:
    /// no reconnect will be attempted.
    AuthRejected,
}

/// Shared state between the manager handle and its supervisor task.
struct ConnInner {
    /// Resolved WebSocket URL including identity query parameters.
    ws_url: String,
    /// Liveness flag; checked before every reconnect and after every
    /// async completion that could outlive a shutdown.
    alive: AtomicBool,
    /// Write half of the current socket, when one is open.
    sink: tokio::sync::Mutex<Option<WsSink>>,
    /// Channel to re-join after every (re)connect.
    active_channel: parking_lot::Mutex<Option<i64>>,
    /// Connection state publisher.
    state_tx: watch::Sender<ConnState>,
    /// Router receiving every inbound frame.
    router: EventRouter,
    /// Backoff tuning.
    reconnect: ReconnectConfig,
    /// Wakes the supervisor out of a backoff sleep on shutdown.
    stop: Notify,
}

impl ConnInner {
    fn set_state(&self, state: ConnState) {
        self.state_tx.send_replace(state);
    }

    /// Serialize and transmit a frame; `false` means "not delivered" and
    /// the caller is expected to fall back, never to retry blindly.
    async fn send_frame(&self, frame: &ClientFrame) -> bool {
        let Ok(text) = codec::encode_frame(frame) else {
            return false;
        };
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::warn!(error = %e, "chat socket send failed");
            *guard = None;
            return false;
        }
        true
    }
}

/// Owns the chat WebSocket connection for one client session.
///
/// Created via [`ConnectionManager::connect`], which spawns a supervisor
/// task that holds the read half and drives the reconnect loop. Consumers
/// send through [`send`](Self::send) and observe liveness through
/// [`state`](Self::state); they never hold the socket themselves.
pub struct ConnectionManager {
    inner: Arc<ConnInner>,
    /// Kept for the manager's lifetime; the supervisor exits on its own
    /// after `shutdown()` or an unauthorized close.
    _supervisor: tokio::task::JoinHandle<()>,
}

impl ConnectionManager {
    /// Starts a connection supervisor for the configured endpoint.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Progress is observable via [`state`](Self::state).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if no WebSocket URL can be
    /// derived from the configured origin.
    pub fn connect(config: &ClientConfig, router: EventRouter) -> Result<Self, ConfigError> {
        let ws_url = config.ws_url()?;
        let (state_tx, _state_rx) = watch::channel(ConnState::Connecting);

        let inner = Arc::new(ConnInner {
            ws_url,
            alive: AtomicBool::new(true),
            sink: tokio::sync::Mutex::new(None),
            active_channel: parking_lot::Mutex::new(None),
            state_tx,
            router,
            reconnect: config.reconnect,
            stop: Notify::new(),
        });

        let supervisor = tokio::spawn(supervisor_loop(Arc::clone(&inner)));
        Ok(Self {
            inner,
            _supervisor: supervisor,
        })
    }

    /// Returns a receiver observing the connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns `true` while the socket is open.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.inner.state_tx.borrow() == ConnState::Online
    }

    /// Transmits a frame if the socket is open.
    ///
    /// Returns `false` when the frame could not be delivered (socket down
    /// or mid-reconnect); never errors. Callers treat `false` as "fall
    /// back to local behavior".
    pub async fn send(&self, frame: &ClientFrame) -> bool {
        self.inner.send_frame(frame).await
    }

    /// Switches the active channel.
    ///
    /// Sends `leave_channel` for the previous channel (if any) and
    /// `join_channel` for the new one while connected. The active channel
    /// is also re-joined automatically after every reconnect.
    pub async fn set_active_channel(&self, channel: Option<i64>) {
        let previous = {
            let mut guard = self.inner.active_channel.lock();
            std::mem::replace(&mut *guard, channel)
        };
        if previous == channel {
            return;
        }
        if let Some(channel_id) = previous {
            let _ = self
                .inner
                .send_frame(&ClientFrame::LeaveChannel { channel_id })
                .await;
        }
        if let Some(channel_id) = channel {
            let _ = self
                .inner
                .send_frame(&ClientFrame::JoinChannel { channel_id })
                .await;
        }
    }

    /// Tears the connection down intentionally.
    ///
    /// Idempotent and race-free: the liveness flag flips exactly once, any
    /// pending backoff sleep is cancelled, and a normal close (1000) is
    /// sent on the open socket. No reconnect fires afterwards.
    pub async fn shutdown(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.notify_waiters();
        let mut guard = self.inner.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "session ended".into(),
            };
            let _ = sink.send(Message::Close(Some(close))).await;
        }
        self.inner.set_state(ConnState::Offline);
    }
}

/// Supervisor: connect, pump frames, reconnect with backoff.
async fn supervisor_loop(inner: Arc<ConnInner>) {
    let mut delay = inner.reconnect.initial_delay;

    while inner.alive.load(Ordering::SeqCst) {
        inner.set_state(ConnState::Connecting);

        match connect_async(inner.ws_url.as_str()).await {
            Ok((stream, _response)) => {
                // Successful open resets the backoff schedule.
                delay = inner.reconnect.initial_delay;
                let (sink, reader) = stream.split();
                *inner.sink.lock().await = Some(sink);
                inner.set_state(ConnState::Online);
                tracing::info!(url = %inner.ws_url, "chat socket connected");

                let rejoin = *inner.active_channel.lock();
                if let Some(channel_id) = rejoin {
                    let _ = inner
                        .send_frame(&ClientFrame::JoinChannel { channel_id })
                        .await;
                }

                let close_code = read_loop(reader, &inner).await;
                *inner.sink.lock().await = None;

                if close_code == Some(CLOSE_UNAUTHORIZED) {
                    tracing::warn!("chat socket closed as unauthorized, not reconnecting");
                    inner.set_state(ConnState::AuthRejected);
                    return;
                }
                if !inner.alive.load(Ordering::SeqCst) {
                    return;
                }
                inner.set_state(ConnState::Offline);
                tracing::info!(delay = ?delay, "chat socket closed, reconnect scheduled");
            }
            Err(e) => {
                if !inner.alive.load(Ordering::SeqCst) {
                    return;
                }
                inner.set_state(ConnState::Offline);
                tracing::warn!(error = %e, delay = ?delay, "chat socket connect failed");
            }
        }

        // Backoff sleep; shutdown() interrupts it so no reconnect can
        // fire after intentional teardown.
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.stop.notified() => return,
        }
        delay = inner.reconnect.next_delay(delay);
    }
}

/// Pumps inbound frames into the router until the socket closes.
///
/// Returns the close code when the server sent a close frame, `None` for
/// read errors or a bare stream end.
async fn read_loop(mut reader: WsReader, inner: &Arc<ConnInner>) -> Option<u16> {
    while let Some(result) = reader.next().await {
        match result {
            Ok(Message::Text(text)) => inner.router.route_frame(text.as_str()),
            Ok(Message::Close(frame)) => {
                return frame.map(|f| u16::from(f.code));
            }
            Ok(_) => {
                // Binary/ping/pong frames are not part of the chat protocol.
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat socket read error");
                return None;
            }
        }
    }
    None
}
