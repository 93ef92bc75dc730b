//! Local Loopback Transport
//!
//! In-process transport with no external endpoint. Two uses: `--local` dev
//! mode (stdin lines become owner messages, outbound sends print to stdout)
//! and tests (a [`LocalDriver`] injects events and inspects sends).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{
    InboundMessage, OutboundContent, SendOptions, SocketHandle, Transport, TransportError,
    TransportEvent,
};

#[derive(Debug, Clone)]
pub struct SentRecord {
    /// Id assigned to the outbound message.
    pub id: String,
    pub chat: String,
    pub content: OutboundContent,
    pub opts: SendOptions,
}

enum Mode {
    /// Read owner messages from stdin, print replies to stdout.
    Stdin { owner: String },
    /// Events are injected by a [`LocalDriver`]; sends are only recorded.
    Manual,
}

pub struct LocalTransport {
    mode: Mode,
    sender_slot: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    sent: Arc<Mutex<Vec<SentRecord>>>,
    connects: Arc<AtomicU32>,
}

/// Test-side handle onto a manual [`LocalTransport`].
#[derive(Clone)]
pub struct LocalDriver {
    sender_slot: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    pub sent: Arc<Mutex<Vec<SentRecord>>>,
    connects: Arc<AtomicU32>,
}

impl LocalTransport {
    /// Dev-mode transport: the local terminal plays the owner's phone.
    pub fn stdin(owner: impl Into<String>) -> Self {
        Self {
            mode: Mode::Stdin {
                owner: owner.into(),
            },
            sender_slot: Arc::new(Mutex::new(None)),
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Test-mode transport plus the driver that scripts it.
    pub fn manual() -> (Self, LocalDriver) {
        let sender_slot = Arc::new(Mutex::new(None));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connects = Arc::new(AtomicU32::new(0));
        let driver = LocalDriver {
            sender_slot: sender_slot.clone(),
            sent: sent.clone(),
            connects: connects.clone(),
        };
        (
            Self {
                mode: Mode::Manual,
                sender_slot,
                sent,
                connects,
            },
            driver,
        )
    }
}

impl LocalDriver {
    /// Inject an event into the most recent connection. Returns false when no
    /// connection is live.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let tx = self.sender_slot.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// All text sends so far, as (chat, text) pairs.
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match &r.content {
                OutboundContent::Text { text } => Some((r.chat.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn SocketHandle>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.sender_slot.lock().unwrap() = Some(event_tx.clone());

        let echo = matches!(self.mode, Mode::Stdin { .. });
        if let Mode::Stdin { owner } = &self.mode {
            let jid = format!("{}@s.whatsapp.net", owner.trim_start_matches('+'));
            let _ = event_tx
                .send(TransportEvent::Connected {
                    me: "local".to_string(),
                })
                .await;
            let tx = event_tx.clone();
            let chat = jid.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let msg = InboundMessage {
                        id: uuid::Uuid::new_v4().to_string(),
                        chat: chat.clone(),
                        sender: chat.clone(),
                        push_name: "local".to_string(),
                        text: line,
                        ..Default::default()
                    };
                    if tx.send(TransportEvent::Messages(vec![msg])).await.is_err() {
                        break;
                    }
                }
            });
        }

        let handle = LocalSocket {
            sent: self.sent.clone(),
            echo,
        };
        Ok((Arc::new(handle), event_rx))
    }
}

pub struct LocalSocket {
    sent: Arc<Mutex<Vec<SentRecord>>>,
    echo: bool,
}

impl LocalSocket {
    /// Standalone socket for unit tests, plus the send log to assert against.
    pub fn recording() -> (Arc<Self>, Arc<Mutex<Vec<SentRecord>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                sent: sent.clone(),
                echo: false,
            }),
            sent,
        )
    }
}

#[async_trait]
impl SocketHandle for LocalSocket {
    async fn send(
        &self,
        chat: &str,
        content: OutboundContent,
        opts: SendOptions,
    ) -> Result<String, TransportError> {
        if self.echo
            && let OutboundContent::Text { text } = &content
        {
            println!("<< {text}");
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.sent.lock().unwrap().push(SentRecord {
            id: id.clone(),
            chat: chat.to_string(),
            content,
            opts,
        });
        Ok(id)
    }

    async fn end(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
