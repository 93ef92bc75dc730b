//! Persisted State
//!
//! One JSON file per logical domain under the data directory, loaded on
//! startup and written best-effort on mutation plus a periodic flush. The
//! in-memory copy is always authoritative; a failed write is logged and
//! retried by the next flush.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    Public,
    /// Owner-only operation; everyone else is ignored by the AI fallback.
    #[serde(rename = "self")]
    SelfOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bot_mode: BotMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_mode: BotMode::Public,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStats {
    pub command_hits: HashMap<String, u64>,
    pub ai_response_hits: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub name: String,
    pub age: u32,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub banned_by: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntilinkConfig {
    pub enabled: bool,
    pub allowed_links: Vec<String>,
}

impl Default for AntilinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_links: vec![
                "youtube.com".into(),
                "instagram.com".into(),
                "tiktok.com".into(),
            ],
        }
    }
}

/// Per-sender flags the message envelope carries through the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderFlags {
    pub is_premium: bool,
    pub is_registered: bool,
    pub is_banned: bool,
}

#[derive(Debug, Default)]
struct Domains {
    settings: Settings,
    system_stats: SystemStats,
    premium_users: Vec<String>,
    registered_users: HashMap<String, RegisteredUser>,
    banned_users: HashMap<String, BanRecord>,
    antilink: HashMap<String, AntilinkConfig>,
    rvom: HashMap<String, bool>,
    muted_chats: HashSet<String>,
    banned_ai_chats: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Settings,
    SystemStats,
    PremiumUsers,
    RegisteredUsers,
    BannedUsers,
    Antilink,
    Rvom,
    MutedChats,
    BannedAiChats,
}

impl Domain {
    pub const ALL: &[Domain] = &[
        Domain::Settings,
        Domain::SystemStats,
        Domain::PremiumUsers,
        Domain::RegisteredUsers,
        Domain::BannedUsers,
        Domain::Antilink,
        Domain::Rvom,
        Domain::MutedChats,
        Domain::BannedAiChats,
    ];

    fn file_name(self) -> &'static str {
        match self {
            Domain::Settings => "settings.json",
            Domain::SystemStats => "systemStats.json",
            Domain::PremiumUsers => "premiumUsers.json",
            Domain::RegisteredUsers => "registeredUsers.json",
            Domain::BannedUsers => "bannedUsers.json",
            Domain::Antilink => "antilink.json",
            Domain::Rvom => "rvomSettings.json",
            Domain::MutedChats => "mutedChats.json",
            Domain::BannedAiChats => "bannedAIChats.json",
        }
    }
}

pub struct StateStore {
    data_dir: PathBuf,
    domains: Mutex<Domains>,
    started_at: DateTime<Utc>,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            data_dir: data_dir.into(),
            domains: Mutex::new(Domains::default()),
            started_at: Utc::now(),
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn path(&self, domain: Domain) -> PathBuf {
        self.data_dir.join(domain.file_name())
    }

    /// Load every domain from disk, creating the data directory and any
    /// missing files. Corrupt files are logged and left as defaults.
    pub async fn load_all(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        for &domain in Domain::ALL {
            let path = self.path(domain);
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    if let Err(e) = self.ingest(domain, &raw) {
                        tracing::error!(file = %path.display(), "corrupt state file ignored: {e}");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(file = %path.display(), "state file missing, creating");
                    self.save(domain).await;
                }
                Err(e) => {
                    tracing::error!(file = %path.display(), "failed to load state: {e}");
                }
            }
        }
        tracing::info!(dir = %self.data_dir.display(), "persistent state synchronized");
        Ok(())
    }

    fn ingest(&self, domain: Domain, raw: &str) -> serde_json::Result<()> {
        let mut d = self.domains.lock().unwrap();
        match domain {
            Domain::Settings => d.settings = serde_json::from_str(raw)?,
            Domain::SystemStats => d.system_stats = serde_json::from_str(raw)?,
            Domain::PremiumUsers => d.premium_users = serde_json::from_str(raw)?,
            Domain::RegisteredUsers => d.registered_users = serde_json::from_str(raw)?,
            Domain::BannedUsers => d.banned_users = serde_json::from_str(raw)?,
            Domain::Antilink => d.antilink = serde_json::from_str(raw)?,
            Domain::Rvom => d.rvom = serde_json::from_str(raw)?,
            Domain::MutedChats => d.muted_chats = serde_json::from_str(raw)?,
            Domain::BannedAiChats => d.banned_ai_chats = serde_json::from_str(raw)?,
        }
        Ok(())
    }

    fn render(&self, domain: Domain) -> serde_json::Result<String> {
        let d = self.domains.lock().unwrap();
        match domain {
            Domain::Settings => serde_json::to_string_pretty(&d.settings),
            Domain::SystemStats => serde_json::to_string_pretty(&d.system_stats),
            Domain::PremiumUsers => serde_json::to_string_pretty(&d.premium_users),
            Domain::RegisteredUsers => serde_json::to_string_pretty(&d.registered_users),
            Domain::BannedUsers => serde_json::to_string_pretty(&d.banned_users),
            Domain::Antilink => serde_json::to_string_pretty(&d.antilink),
            Domain::Rvom => serde_json::to_string_pretty(&d.rvom),
            Domain::MutedChats => serde_json::to_string_pretty(&d.muted_chats),
            Domain::BannedAiChats => serde_json::to_string_pretty(&d.banned_ai_chats),
        }
    }

    /// Write one domain to disk. Best-effort: failures are logged and the
    /// in-memory copy stays authoritative.
    pub async fn save(&self, domain: Domain) {
        let json = match self.render(domain) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(?domain, "failed to serialize state: {e}");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(self.path(domain), json).await {
            tracing::error!(?domain, "failed to persist state: {e}");
        }
    }

    pub async fn save_all(&self) {
        for &domain in Domain::ALL {
            self.save(domain).await;
        }
        tracing::debug!("all state domains flushed to disk");
    }

    // --- sender flags -----------------------------------------------------

    pub fn flags_for(&self, sender: &str) -> SenderFlags {
        let d = self.domains.lock().unwrap();
        SenderFlags {
            is_premium: d.premium_users.iter().any(|p| p == sender),
            is_registered: d.registered_users.contains_key(sender),
            is_banned: d.banned_users.contains_key(sender),
        }
    }

    // --- bans -------------------------------------------------------------

    pub fn is_banned(&self, sender: &str) -> bool {
        self.domains
            .lock()
            .unwrap()
            .banned_users
            .contains_key(sender)
    }

    /// Returns false if the user was already banned.
    pub fn ban(&self, target: &str, banned_by: &str) -> bool {
        let mut d = self.domains.lock().unwrap();
        if d.banned_users.contains_key(target) {
            return false;
        }
        d.banned_users.insert(
            target.to_string(),
            BanRecord {
                banned_by: banned_by.to_string(),
                date: Utc::now(),
            },
        );
        true
    }

    pub fn unban(&self, target: &str) -> bool {
        self.domains
            .lock()
            .unwrap()
            .banned_users
            .remove(target)
            .is_some()
    }

    // --- registration -----------------------------------------------------

    pub fn register_user(&self, sender: &str, user: RegisteredUser) {
        self.domains
            .lock()
            .unwrap()
            .registered_users
            .insert(sender.to_string(), user);
    }

    // --- chat toggles -----------------------------------------------------

    pub fn is_muted(&self, chat: &str) -> bool {
        self.domains.lock().unwrap().muted_chats.contains(chat)
    }

    pub fn set_muted(&self, chat: &str, muted: bool) {
        let mut d = self.domains.lock().unwrap();
        if muted {
            d.muted_chats.insert(chat.to_string());
        } else {
            d.muted_chats.remove(chat);
        }
    }

    pub fn is_ai_banned(&self, chat: &str) -> bool {
        self.domains.lock().unwrap().banned_ai_chats.contains(chat)
    }

    pub fn set_ai_banned(&self, chat: &str, banned: bool) {
        let mut d = self.domains.lock().unwrap();
        if banned {
            d.banned_ai_chats.insert(chat.to_string());
        } else {
            d.banned_ai_chats.remove(chat);
        }
    }

    pub fn rvom_enabled(&self, chat: &str) -> bool {
        self.domains
            .lock()
            .unwrap()
            .rvom
            .get(chat)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_rvom(&self, chat: &str, enabled: bool) {
        self.domains
            .lock()
            .unwrap()
            .rvom
            .insert(chat.to_string(), enabled);
    }

    // --- antilink ---------------------------------------------------------

    pub fn antilink(&self, chat: &str) -> Option<AntilinkConfig> {
        self.domains.lock().unwrap().antilink.get(chat).cloned()
    }

    pub fn update_antilink<F: FnOnce(&mut AntilinkConfig)>(&self, chat: &str, f: F) {
        let mut d = self.domains.lock().unwrap();
        let entry = d.antilink.entry(chat.to_string()).or_default();
        f(entry);
    }

    // --- mode & stats -----------------------------------------------------

    pub fn bot_mode(&self) -> BotMode {
        self.domains.lock().unwrap().settings.bot_mode
    }

    pub fn set_bot_mode(&self, mode: BotMode) {
        self.domains.lock().unwrap().settings.bot_mode = mode;
    }

    pub fn record_command_hit(&self, command: &str) {
        let mut d = self.domains.lock().unwrap();
        *d.system_stats
            .command_hits
            .entry(command.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_ai_hit(&self) {
        self.domains.lock().unwrap().system_stats.ai_response_hits += 1;
    }

    pub fn stats(&self) -> SystemStats {
        self.domains.lock().unwrap().system_stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_all_creates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("data"));
        store.load_all().await.unwrap();
        for &domain in Domain::ALL {
            assert!(store.path(domain).exists(), "{:?} not created", domain);
        }
    }

    #[tokio::test]
    async fn domains_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.load_all().await.unwrap();

        store.ban("u1@s.whatsapp.net", "owner@s.whatsapp.net");
        store.set_bot_mode(BotMode::SelfOnly);
        store.set_rvom("g1@g.us", true);
        store.record_command_hit("ping");
        store.set_muted("g2@g.us", true);
        store.save_all().await;

        let reloaded = StateStore::new(dir.path());
        reloaded.load_all().await.unwrap();
        assert!(reloaded.is_banned("u1@s.whatsapp.net"));
        assert_eq!(reloaded.bot_mode(), BotMode::SelfOnly);
        assert!(reloaded.rvom_enabled("g1@g.us"));
        assert_eq!(reloaded.stats().command_hits.get("ping"), Some(&1));
        assert!(reloaded.is_muted("g2@g.us"));
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("settings.json"), "{not json")
            .await
            .unwrap();
        let store = StateStore::new(dir.path());
        store.load_all().await.unwrap();
        assert_eq!(store.bot_mode(), BotMode::Public);
    }

    #[test]
    fn ban_is_idempotent_and_reports_first_insert() {
        let store = StateStore::new("/tmp/unused");
        assert!(store.ban("u", "owner"));
        assert!(!store.ban("u", "owner"));
        assert!(store.unban("u"));
        assert!(!store.unban("u"));
    }

    #[test]
    fn flags_reflect_domain_membership() {
        let store = StateStore::new("/tmp/unused");
        store.ban("u", "owner");
        let flags = store.flags_for("u");
        assert!(flags.is_banned);
        assert!(!flags.is_registered);
    }

    #[test]
    fn mode_serializes_as_lowercase_names() {
        let json = serde_json::to_string(&Settings {
            bot_mode: BotMode::SelfOnly,
        })
        .unwrap();
        assert!(json.contains("\"self\""));
    }
}
