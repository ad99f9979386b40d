//! Typed REST client for the chat backend.
//!
//! All requests ride on one [`reqwest::Client`] with a cookie store so the
//! session credential set at login is sent on every call. Non-2xx
//! responses carry a JSON body with a `message` field, which becomes the
//! error text.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use schoolchat_proto::channel::Channel;
use schoolchat_proto::message::{MessageKind, SenderRole, WireMessage};

/// Errors produced by the REST client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error text from the response body's `message` field.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Error body shape returned by the backend for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// A workspace the current user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiWorkspace {
    /// Workspace id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// URL slug.
    pub slug: String,
}

/// Kind of a workspace channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiChannelKind {
    /// A group channel.
    Channel,
    /// A direct-message conversation.
    Dm,
    /// A read-only announcement stream.
    Announcement,
}

/// The other party of a direct-message conversation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPartner {
    /// User id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Platform role.
    pub role: SenderRole,
}

/// A channel summary as returned by the workspace endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiChannelSummary {
    /// Backend channel id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Channel kind.
    #[serde(rename = "type")]
    pub kind: ApiChannelKind,
    /// Subject, for class channels.
    #[serde(default)]
    pub subject: Option<String>,
    /// Class label, for class channels.
    #[serde(default)]
    pub class: Option<String>,
    /// DM partner, for direct conversations.
    #[serde(default)]
    pub partner: Option<ApiPartner>,
}

/// Result of a file upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// Public URL of the stored file.
    pub url: String,
    /// Original file name.
    pub name: String,
    /// Detected MIME type.
    pub mime_type: String,
}

/// REST client for the chat backend.
///
/// Cloning is cheap; clones share the connection pool and cookie store.
#[derive(Debug, Clone)]
pub struct ChatApi {
    client: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    /// Creates a client for the given backend origin.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.client.get(self.url(path)).send().await?;
        Self::read_json(resp).await
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        Self::read_json(resp).await
    }

    async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let resp = self.client.post(self.url(path)).send().await?;
        Self::check_status(resp).await.map(|_| ())
    }

    /// Surfaces a non-2xx response as [`ApiError::Http`], extracting the
    /// body's `message` field when present.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(ApiError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let resp = Self::check_status(resp).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Fetches all conversations accessible to the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn conversations(&self) -> Result<Vec<Channel>, ApiError> {
        self.get_json("/api/chat/conversations").await
    }

    /// Fetches a page of message history for a channel.
    ///
    /// `before` is an id cursor: only messages older than it are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn messages(
        &self,
        channel_id: i64,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<WireMessage>, ApiError> {
        let mut path = format!("/api/channels/{channel_id}/messages?limit={limit}");
        if let Some(cursor) = before {
            path.push_str("&before=");
            path.push_str(cursor);
        }
        self.get_json(&path).await
    }

    /// Marks all messages in a conversation as read.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn mark_read(&self, channel_id: i64) -> Result<(), ApiError> {
        self.post_empty(&format!("/api/chat/conversations/{channel_id}/read"))
            .await
    }

    /// Sends a message over HTTP — the fallback when the socket is down.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn send_message_http(
        &self,
        channel_id: i64,
        content: &str,
        kind: MessageKind,
    ) -> Result<WireMessage, ApiError> {
        let body = serde_json::json!({
            "channelId": channel_id,
            "content": content,
            "messageType": kind,
        });
        self.post_json("/api/messages", &body).await
    }

    /// Fetches all workspaces the current user belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn workspaces(&self) -> Result<Vec<ApiWorkspace>, ApiError> {
        self.get_json("/api/workspaces").await
    }

    /// Fetches all channels of a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn workspace_channels(
        &self,
        workspace_id: i64,
    ) -> Result<Vec<ApiChannelSummary>, ApiError> {
        self.get_json(&format!("/api/workspaces/{workspace_id}/channels"))
            .await
    }

    /// Fetches all direct-message conversations of the current user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure or a non-2xx response.
    pub async fn dms(&self) -> Result<Vec<ApiChannelSummary>, ApiError> {
        self.get_json("/api/chat/dms").await
    }

    /// Uploads a file, returning its public URL and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure, an invalid MIME type, or a
    /// non-2xx response.
    pub async fn upload(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResult, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await?;
        Self::read_json(resp).await
    }
}
