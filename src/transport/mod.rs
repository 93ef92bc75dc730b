//! Transport Seam
//!
//! The WhatsApp protocol client is an external collaborator. This module
//! defines the narrow surface the rest of the crate consumes: a [`Transport`]
//! that produces a connected [`SocketHandle`] plus an event stream, and the
//! close-reason codes used to classify disconnects.

pub mod bridge;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use bridge::BridgeTransport;
pub use local::{LocalSocket, LocalTransport};

/// Close codes surfaced by the protocol side, following the WhatsApp Web
/// convention. 401 is the one terminal code: stored credentials are invalid
/// and no reconnect can recover the session.
pub mod close_code {
    pub const LOGGED_OUT: u16 = 401;
    pub const TIMED_OUT: u16 = 408;
    pub const CONNECTION_CLOSED: u16 = 428;
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const BAD_SESSION: u16 = 500;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("transport closed")]
    Closed,
}

/// Stable reference to a message inside a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: String,
    pub id: String,
    pub sender: String,
}

/// Reference to the message an inbound message replies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedRef {
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub text: String,
}

/// Raw inbound message as delivered by the protocol side. Group metadata the
/// pipeline needs (admin status) arrives pre-resolved so the crate never has
/// to call back into the protocol for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub chat: String,
    pub sender: String,
    #[serde(default)]
    pub push_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub sender_is_admin: bool,
    #[serde(default)]
    pub view_once: bool,
    #[serde(default)]
    pub quoted: Option<QuotedRef>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text { text: String },
    /// Ask the protocol side to re-send captured view-once media into the chat.
    ForwardViewOnce { source_id: String, caption: String },
    Delete { target: MessageRef },
    Typing { on: bool },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendOptions {
    /// Message id to quote in the outbound message.
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Session is open. `me` is the bot's own bare number.
    Connected { me: String },
    /// Transport closed; `reason` is a close code when the protocol side knew one.
    Closed { reason: Option<u16> },
    Messages(Vec<InboundMessage>),
}

#[async_trait]
pub trait SocketHandle: Send + Sync {
    /// Send content into a chat. Returns the id assigned to the outbound
    /// message so interactive flows can bind replies to it.
    async fn send(
        &self,
        chat: &str,
        content: OutboundContent,
        opts: SendOptions,
    ) -> Result<String, TransportError>;

    /// Tear the connection down. Safe to call on an already-dead socket.
    async fn end(&self) -> Result<(), TransportError>;
}

/// Connection factory for the external protocol endpoint. Each call
/// establishes a fresh session; the supervisor calls it once per
/// (re)connect attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn SocketHandle>, mpsc::Receiver<TransportEvent>), TransportError>;
}
