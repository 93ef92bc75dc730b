//! Social Engine
//!
//! Passive relationship bookkeeping plus the autonomous-initiative loop.
//! Purely advisory: it reads the world and occasionally starts a
//! conversation, but nothing here ever gates connection or restart
//! decisions. The RECOVER corrective action suspends it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::transport::{OutboundContent, SendOptions, SocketHandle};

const AFFINITY_DECAY: f64 = 0.005;
const LEARNING_RATE: f64 = 0.1;
/// Minimum affinity before a contact is considered for outreach.
const INITIATIVE_AFFINITY: f64 = 0.6;
/// A contact must have been quiet this long before outreach.
const IDLE_HOURS: i64 = 6;
/// Minimum gap between initiatives toward the same contact.
const INITIATIVE_COOLDOWN_HOURS: i64 = 24;

const KNOWLEDGE_BASE: &[&str] = &[
    "Curious fact: honey never spoils.",
    "A thought: is true freedom the freedom from wanting itself?",
    "Quote of the day: 'The only true wisdom is in knowing you know nothing.' — Socrates",
    "I was just processing data about fractals. The universe seems to repeat its patterns at every scale.",
    "Something to ponder: if you could write one new law everyone had to follow, what would it be?",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub affinity: f64,
    pub last_interaction: DateTime<Utc>,
    #[serde(default)]
    pub last_initiative: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
}

pub struct SocialEngine {
    path: PathBuf,
    model: Mutex<HashMap<String, Relationship>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocialEngine {
    pub fn new(path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            path,
            model: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    pub async fn load(&self) {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, Relationship>>(&raw) {
                Ok(model) => {
                    tracing::info!(contacts = model.len(), "relationship model loaded");
                    *self.model.lock().unwrap() = model;
                }
                Err(e) => tracing::warn!("corrupt contact matrix ignored: {e}"),
            },
            Err(_) => {
                tracing::debug!("no contact matrix yet, starting empty");
            }
        }
    }

    pub async fn save(&self) {
        let json = {
            let model = self.model.lock().unwrap();
            match serde_json::to_string_pretty(&*model) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to serialize contact matrix: {e}");
                    return;
                }
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            tracing::error!("failed to persist contact matrix: {e}");
        }
    }

    /// Stage-2 bookkeeping: reinforce the sender's affinity. Group chatter
    /// counts too, keyed by the individual sender.
    pub fn observe(&self, env: &Envelope) {
        let mut model = self.model.lock().unwrap();
        let rel = model
            .entry(env.sender.clone())
            .or_insert_with(|| Relationship {
                affinity: 0.1,
                last_interaction: Utc::now(),
                last_initiative: None,
                message_count: 0,
            });
        rel.affinity += LEARNING_RATE * (1.0 - rel.affinity);
        rel.message_count += 1;
        rel.last_interaction = Utc::now();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the initiative loop against the given socket. No-op if already
    /// running.
    pub fn start(self: &Arc<Self>, socket: Arc<dyn SocketHandle>, interval: std::time::Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("social initiative engine started");
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                engine.cycle(&socket).await;
            }
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!("social initiative engine stopped");
    }

    async fn cycle(&self, socket: &Arc<dyn SocketHandle>) {
        let target = self.plan_initiative();
        if let Some(jid) = target {
            let line = KNOWLEDGE_BASE[rand::rng().random_range(0..KNOWLEDGE_BASE.len())];
            tracing::info!(contact = %jid, "sending autonomous initiative");
            let sent = socket
                .send(
                    &jid,
                    OutboundContent::Text { text: line.into() },
                    SendOptions::default(),
                )
                .await;
            if let Err(e) = sent {
                tracing::warn!("initiative send failed: {e}");
            }
        }
        self.save().await;
    }

    /// Decay all affinities, then pick the strongest idle contact that
    /// has not been messaged recently. Marks the pick as initiated.
    fn plan_initiative(&self) -> Option<String> {
        let now = Utc::now();
        let mut model = self.model.lock().unwrap();
        for rel in model.values_mut() {
            rel.affinity *= 1.0 - AFFINITY_DECAY;
        }

        let idle_cutoff = now - ChronoDuration::hours(IDLE_HOURS);
        let initiative_cutoff = now - ChronoDuration::hours(INITIATIVE_COOLDOWN_HOURS);
        let candidate = model
            .iter()
            .filter(|(jid, rel)| {
                !jid.ends_with("@g.us")
                    && rel.affinity >= INITIATIVE_AFFINITY
                    && rel.last_interaction < idle_cutoff
                    && rel.last_initiative.is_none_or(|t| t < initiative_cutoff)
            })
            .max_by(|a, b| a.1.affinity.total_cmp(&b.1.affinity))
            .map(|(jid, _)| jid.clone());

        if let Some(jid) = &candidate
            && let Some(rel) = model.get_mut(jid)
        {
            rel.last_initiative = Some(now);
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SenderFlags;
    use crate::transport::InboundMessage;

    fn envelope_from(sender: &str) -> Envelope {
        let msg = InboundMessage {
            id: "m1".into(),
            chat: sender.into(),
            sender: sender.into(),
            text: "hello".into(),
            ..Default::default()
        };
        Envelope::build(msg, &[], &[], SenderFlags::default()).unwrap()
    }

    fn engine() -> Arc<SocialEngine> {
        SocialEngine::new(PathBuf::from("/tmp/unused-contact-matrix.json"))
    }

    #[test]
    fn observation_reinforces_affinity_asymptotically() {
        let engine = engine();
        let env = envelope_from("u@s.whatsapp.net");
        for _ in 0..200 {
            engine.observe(&env);
        }
        let model = engine.model.lock().unwrap();
        let rel = model.get("u@s.whatsapp.net").unwrap();
        assert!(rel.affinity > 0.9 && rel.affinity <= 1.0);
        assert_eq!(rel.message_count, 200);
    }

    #[test]
    fn initiative_skips_recently_active_contacts() {
        let engine = engine();
        let env = envelope_from("u@s.whatsapp.net");
        for _ in 0..50 {
            engine.observe(&env);
        }
        // Contact is high-affinity but interacted just now: nothing to do.
        assert!(engine.plan_initiative().is_none());
    }

    #[test]
    fn initiative_picks_idle_high_affinity_contact() {
        let engine = engine();
        {
            let mut model = engine.model.lock().unwrap();
            model.insert(
                "idle@s.whatsapp.net".into(),
                Relationship {
                    affinity: 0.9,
                    last_interaction: Utc::now() - ChronoDuration::hours(12),
                    last_initiative: None,
                    message_count: 10,
                },
            );
            model.insert(
                "group@g.us".into(),
                Relationship {
                    affinity: 0.95,
                    last_interaction: Utc::now() - ChronoDuration::hours(12),
                    last_initiative: None,
                    message_count: 10,
                },
            );
        }
        // The group is never a target; the idle contact is.
        assert_eq!(
            engine.plan_initiative().as_deref(),
            Some("idle@s.whatsapp.net")
        );
        // The pick was stamped: a second cycle stays quiet.
        assert!(engine.plan_initiative().is_none());
    }

    #[tokio::test]
    async fn start_stop_toggles_running_flag() {
        let engine = engine();
        let (socket, _sent) = crate::transport::local::LocalSocket::recording();
        assert!(!engine.is_running());
        engine.start(socket, std::time::Duration::from_secs(3600));
        assert!(engine.is_running());
        // Second start is a no-op.
        engine.start(
            crate::transport::local::LocalSocket::recording().0,
            std::time::Duration::from_secs(3600),
        );
        engine.stop();
        assert!(!engine.is_running());
        engine.stop();
    }
}
