//! Session Registry
//!
//! At most one in-flight multi-turn session per user. Sessions are created by
//! a command's entry handler, advanced by its continuation handler on each
//! matching reply, and destroyed on completion, cancellation, or timeout —
//! whichever happens first.
//!
//! Timeout-vs-reply races are resolved with a generation counter checked
//! under the registry lock: whichever side enters its critical section first
//! wins, the loser detects the stale generation and becomes a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("an active `{command}` session already exists")]
    Conflict {
        command: String,
        remaining: Option<Duration>,
    },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub owner: String,
    pub chat: String,
    pub command: String,
    pub step: String,
    pub answers: HashMap<String, String>,
    /// Id of the bot message whose reply continues this session.
    pub reply_to: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Instant,
}

impl Session {
    pub fn new(
        owner: impl Into<String>,
        chat: impl Into<String>,
        command: impl Into<String>,
        step: impl Into<String>,
        reply_to: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            owner: owner.into(),
            chat: chat.into(),
            command: command.into(),
            step: step.into(),
            answers: HashMap::new(),
            reply_to: reply_to.into(),
            created_at: chrono::Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }
}

/// Emitted when a session dies by timeout, so the owner can be notified.
#[derive(Debug, Clone)]
pub struct ExpiredSession {
    pub owner: String,
    pub chat: String,
    pub command: String,
}

struct Entry {
    session: Session,
    generation: u64,
    timeout: JoinHandle<()>,
}

struct Inner {
    sessions: HashMap<String, Entry>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
    expired_tx: mpsc::UnboundedSender<ExpiredSession>,
}

impl SessionRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExpiredSession>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    sessions: HashMap::new(),
                    next_generation: 0,
                })),
                expired_tx,
            },
            expired_rx,
        )
    }

    /// Register a session for its owner. Fails with [`SessionError::Conflict`]
    /// when one is already active, unless `supersede` is set, in which case
    /// the existing session is cancelled first.
    pub fn create(&self, session: Session, supersede: bool) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.sessions.get(&session.owner) {
            if !supersede {
                return Err(SessionError::Conflict {
                    command: existing.session.command.clone(),
                    remaining: existing
                        .session
                        .expires_at
                        .checked_duration_since(Instant::now()),
                });
            }
            let old = inner.sessions.remove(&session.owner);
            if let Some(old) = old {
                old.timeout.abort();
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let timeout = self.spawn_timer(
            session.owner.clone(),
            session.chat.clone(),
            session.command.clone(),
            generation,
            session.expires_at,
        );
        inner.sessions.insert(
            session.owner.clone(),
            Entry {
                session,
                generation,
                timeout,
            },
        );
        Ok(())
    }

    fn spawn_timer(
        &self,
        owner: String,
        chat: String,
        command: String,
        generation: u64,
        deadline: Instant,
    ) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let tx = self.expired_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = inner.lock().unwrap();
            let still_ours = inner
                .sessions
                .get(&owner)
                .is_some_and(|e| e.generation == generation);
            if !still_ours {
                // A reply won the race; this timer is stale.
                return;
            }
            inner.sessions.remove(&owner);
            tracing::debug!(owner = %owner, command = %command, "session expired");
            let _ = tx.send(ExpiredSession {
                owner,
                chat,
                command,
            });
        })
    }

    pub fn get(&self, owner: &str) -> Option<Session> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(owner)
            .map(|e| e.session.clone())
    }

    /// Active command and remaining lifetime for the owner, if any.
    pub fn active(&self, owner: &str) -> Option<(String, Option<Duration>)> {
        self.inner.lock().unwrap().sessions.get(owner).map(|e| {
            (
                e.session.command.clone(),
                e.session.expires_at.checked_duration_since(Instant::now()),
            )
        })
    }

    /// Claim the session for a reply that matches its reply target. Cancels
    /// the pending timeout; a timer that already fired but lost the lock race
    /// sees a stale generation and no-ops.
    pub fn begin_reply(&self, owner: &str, quoted_id: &str) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap();
        let fresh = inner.next_generation;
        let entry = inner.sessions.get_mut(owner)?;
        if entry.session.reply_to != quoted_id {
            return None;
        }
        entry.timeout.abort();
        entry.generation = fresh;
        let session = entry.session.clone();
        inner.next_generation += 1;
        Some(session)
    }

    /// Mutate the stored session in place.
    pub fn update<F: FnOnce(&mut Session)>(&self, owner: &str, f: F) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(owner) {
            Some(entry) => {
                f(&mut entry.session);
                true
            }
            None => false,
        }
    }

    /// Replace the session's timeout with a fresh deadline.
    pub fn rearm(&self, owner: &str, deadline: Instant) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let Some(entry) = inner.sessions.get_mut(owner) else {
            return false;
        };
        entry.timeout.abort();
        entry.generation = generation;
        entry.session.expires_at = deadline;
        let chat = entry.session.chat.clone();
        let command = entry.session.command.clone();
        let timeout = self.spawn_timer(owner.to_string(), chat, command, generation, deadline);
        if let Some(entry) = inner.sessions.get_mut(owner) {
            entry.timeout = timeout;
        }
        true
    }

    /// Destroy the owner's session, cancelling its timeout.
    pub fn remove(&self, owner: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.remove(owner) {
            Some(entry) => {
                entry.timeout.abort();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(owner: &str, command: &str, ttl_secs: u64) -> Session {
        Session::new(
            owner,
            "chat@s.whatsapp.net",
            command,
            "start",
            "msg-1",
            Duration::from_secs(ttl_secs),
        )
    }

    #[tokio::test]
    async fn create_rejects_second_session_for_same_user() {
        let (registry, _rx) = SessionRegistry::new();
        registry.create(session("u1", "register", 60), false).unwrap();
        let err = registry
            .create(session("u1", "menu", 60), false)
            .unwrap_err();
        match err {
            SessionError::Conflict { command, .. } => assert_eq!(command, "register"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn supersede_replaces_existing_session() {
        let (registry, _rx) = SessionRegistry::new();
        registry.create(session("u1", "menu", 60), false).unwrap();
        registry.create(session("u1", "register", 60), true).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("u1").unwrap().command, "register");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_session_and_notifies() {
        let (registry, mut rx) = SessionRegistry::new();
        registry.create(session("u1", "register", 60), false).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        // Let the timer task take the lock and finish.
        tokio::task::yield_now().await;

        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.owner, "u1");
        assert_eq!(expired.command, "register");
        assert!(registry.get("u1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_cancels_timeout() {
        let (registry, mut rx) = SessionRegistry::new();
        registry.create(session("u1", "register", 60), false).unwrap();

        let claimed = registry.begin_reply("u1", "msg-1");
        assert!(claimed.is_some());

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        // The stale timer must not have deleted the session or notified.
        assert!(registry.get("u1").is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_after_timeout_is_noop() {
        let (registry, mut rx) = SessionRegistry::new();
        registry.create(session("u1", "register", 60), false).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(rx.recv().await.is_some());

        // The reply arrives after the session died: nothing to claim, nothing
        // resurrected.
        assert!(registry.begin_reply("u1", "msg-1").is_none());
        assert!(registry.get("u1").is_none());
    }

    #[tokio::test]
    async fn non_matching_reply_target_is_ignored() {
        let (registry, _rx) = SessionRegistry::new();
        registry.create(session("u1", "register", 60), false).unwrap();
        assert!(registry.begin_reply("u1", "some-other-msg").is_none());
        // Session is untouched and its timer still armed.
        assert!(registry.get("u1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_extends_lifetime() {
        let (registry, mut rx) = SessionRegistry::new();
        registry.create(session("u1", "menu", 60), false).unwrap();
        assert!(registry.rearm("u1", Instant::now() + Duration::from_secs(300)));

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(registry.get("u1").is_some());
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(200)).await;
        tokio::task::yield_now().await;
        assert!(registry.get("u1").is_none());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn at_most_one_session_per_user_across_operations() {
        let (registry, _rx) = SessionRegistry::new();
        for i in 0..5 {
            let _ = registry.create(session("u1", &format!("cmd{i}"), 60), true);
            assert!(registry.len() <= 1);
        }
        registry.remove("u1");
        assert!(registry.is_empty());
    }
}
