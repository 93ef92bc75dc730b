//! WebSocket Bridge Transport
//!
//! Production transport: connects to a protocol side-car over WebSocket and
//! exchanges JSON frames. The side-car owns the actual WhatsApp session
//! (encryption, media, group metadata); this client only sees the narrow
//! frame protocol below.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{
    InboundMessage, OutboundContent, SendOptions, SocketHandle, Transport, TransportError,
    TransportEvent,
};

/// Frame sent by the bridge to us.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    Connection {
        connection: String,
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        me: Option<String>,
    },
    Messages {
        messages: Vec<InboundMessage>,
    },
}

/// Frame we send to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Send {
        id: &'a str,
        chat: &'a str,
        content: &'a OutboundContent,
        options: &'a SendOptions,
    },
    End,
}

pub struct BridgeTransport {
    url: String,
}

impl BridgeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn SocketHandle>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::info!("bridge: websocket session established at {}", self.url);

        let (mut sink, mut stream) = ws.split();
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

        // Writer: drains outbound frames into the websocket.
        tokio::spawn(async move {
            while let Some(json) = frame_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    tracing::warn!("bridge: outbound frame failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: translates bridge frames into transport events. A raw
        // websocket drop without a close frame still surfaces as Closed so
        // the supervisor always learns the session died.
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("bridge: websocket read error: {e}");
                        break;
                    }
                };
                match serde_json::from_str::<BridgeFrame>(text.as_str()) {
                    Ok(BridgeFrame::Connection {
                        connection,
                        code,
                        me,
                    }) => match connection.as_str() {
                        "open" => {
                            let me = me.unwrap_or_default();
                            if event_tx.send(TransportEvent::Connected { me }).await.is_err() {
                                return;
                            }
                        }
                        "close" => {
                            let _ = event_tx.send(TransportEvent::Closed { reason: code }).await;
                            return;
                        }
                        other => {
                            tracing::debug!("bridge: connection state '{other}'");
                        }
                    },
                    Ok(BridgeFrame::Messages { messages }) => {
                        if event_tx
                            .send(TransportEvent::Messages(messages))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("bridge: unparseable frame dropped: {e}");
                    }
                }
            }
            // The raw socket died without a close frame; the supervisor still
            // needs to hear about it.
            let _ = event_tx.send(TransportEvent::Closed { reason: None }).await;
        });

        let handle = BridgeSocket { frame_tx };
        Ok((Arc::new(handle), event_rx))
    }
}

struct BridgeSocket {
    frame_tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SocketHandle for BridgeSocket {
    async fn send(
        &self,
        chat: &str,
        content: OutboundContent,
        opts: SendOptions,
    ) -> Result<String, TransportError> {
        let id = uuid::Uuid::new_v4().to_string();
        let frame = ClientFrame::Send {
            id: &id,
            chat,
            content: &content,
            options: &opts,
        };
        let json = serde_json::to_string(&frame).map_err(|e| TransportError::Send(e.to_string()))?;
        self.frame_tx
            .send(json)
            .map_err(|_| TransportError::Closed)?;
        Ok(id)
    }

    async fn end(&self) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(&ClientFrame::End).map_err(|e| TransportError::Send(e.to_string()))?;
        self.frame_tx.send(json).map_err(|_| TransportError::Closed)
    }
}
