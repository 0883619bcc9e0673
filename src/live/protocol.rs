//! Wire protocol for the dashboard's live-update socket.
//!
//! Every frame from the server is a UTF-8 JSON object with a `type` tag and
//! an optional `data` payload:
//!
//! ```json
//! {"type": "APPLICATION_UPDATED", "data": {"id": "app-1"}}
//! {"type": "HEARTBEAT"}
//! ```
//!
//! Unknown tags are accepted and surfaced as [`MessageKind::Unknown`] so a
//! newer server never breaks an older client.

use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when no close frame carried a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// The `type` tag of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ApplicationAdded,
    ApplicationRemoved,
    ApplicationUpdated,
    StatusChanged,
    BookmarkAdded,
    BookmarkRemoved,
    BookmarkUpdated,
    ConfigChanged,
    Heartbeat,
    /// Any tag this client does not know about.
    Unknown(String),
}

impl MessageKind {
    /// Parse a wire tag. Never fails; unrecognized tags become `Unknown`.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "APPLICATION_ADDED" => MessageKind::ApplicationAdded,
            "APPLICATION_REMOVED" => MessageKind::ApplicationRemoved,
            "APPLICATION_UPDATED" => MessageKind::ApplicationUpdated,
            "STATUS_CHANGED" => MessageKind::StatusChanged,
            "BOOKMARK_ADDED" => MessageKind::BookmarkAdded,
            "BOOKMARK_REMOVED" => MessageKind::BookmarkRemoved,
            "BOOKMARK_UPDATED" => MessageKind::BookmarkUpdated,
            "CONFIG_CHANGED" => MessageKind::ConfigChanged,
            "HEARTBEAT" => MessageKind::Heartbeat,
            other => MessageKind::Unknown(other.to_string()),
        }
    }

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::ApplicationAdded => "APPLICATION_ADDED",
            MessageKind::ApplicationRemoved => "APPLICATION_REMOVED",
            MessageKind::ApplicationUpdated => "APPLICATION_UPDATED",
            MessageKind::StatusChanged => "STATUS_CHANGED",
            MessageKind::BookmarkAdded => "BOOKMARK_ADDED",
            MessageKind::BookmarkRemoved => "BOOKMARK_REMOVED",
            MessageKind::BookmarkUpdated => "BOOKMARK_UPDATED",
            MessageKind::ConfigChanged => "CONFIG_CHANGED",
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    /// The `data` field, or `null` when absent. Opaque to this client.
    pub payload: serde_json::Value,
}

/// Raw envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl InboundMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Null,
        }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns [`Error::MalformedMessage`] if the frame is not JSON or has no
    /// string `type` field.
    pub fn parse(frame: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(frame).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::parse(&envelope.tag),
            payload: envelope.data,
        })
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageKind::Heartbeat
    }
}

/// Derive the socket endpoint from the dashboard's page URL.
///
/// `https` pages get `wss`, `http` pages get `ws`. The path is replaced by
/// `socket_path`; query and fragment are dropped.
pub fn socket_url(page: &Url, socket_path: &str) -> Result<Url> {
    let scheme = match page.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::InvalidConfig(format!(
                "unsupported server scheme '{}' (expected http or https)",
                other
            )));
        }
    };

    let mut url = page.clone();
    url.set_scheme(scheme)
        .map_err(|_| Error::InvalidConfig(format!("cannot use scheme '{}' for {}", scheme, page)))?;
    url.set_path(socket_path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
