//! Command Framework
//!
//! Command descriptors (name, aliases, permission rules, cooldown, handler),
//! the registry that resolves them, and the execution context handlers
//! receive. `load()` replaces the whole command set atomically so a reload
//! never leaves the registry half-populated.

pub mod aichat;
pub mod antilink;
pub mod menu;
pub mod mode;
pub mod moderation;
pub mod ping;
pub mod register;
pub mod restart;
pub mod rvom;
pub mod status;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::ai::AiServiceManager;
use crate::bot::ControlHandle;
use crate::cognition::CognitiveCore;
use crate::config::BotConfig;
use crate::envelope::Envelope;
use crate::session::{Session, SessionRegistry};
use crate::social::SocialEngine;
use crate::state::StateStore;
use crate::transport::{OutboundContent, SendOptions, SocketHandle, TransportError};
use crate::vitals::Vitals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Utility,
    Moderation,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Group,
    Admin,
}

/// One authorization rule: an identity class, or a conjunction of
/// conditions that must all hold.
#[derive(Debug, Clone)]
pub enum Rule {
    Owner,
    Premium,
    All(Vec<Condition>),
}

#[derive(Debug, Clone, Default)]
pub struct Permission {
    /// Authorized when ANY rule matches.
    pub rules: Vec<Rule>,
    pub prompt: Option<String>,
    /// Deny silently and let the AI fallback answer instead.
    pub ai_mediated: bool,
}

pub enum Verdict {
    Authorized,
    Denied(Option<String>),
}

/// Evaluate a command's permission spec against the message envelope.
/// Commands without one are open to everyone.
pub fn check_permission(env: &Envelope, permission: Option<&Permission>) -> Verdict {
    let Some(permission) = permission else {
        return Verdict::Authorized;
    };

    let authorized = permission.rules.iter().any(|rule| match rule {
        Rule::Owner => env.is_owner,
        Rule::Premium => env.is_premium,
        Rule::All(conditions) => conditions.iter().all(|c| match c {
            Condition::Group => env.is_group,
            Condition::Admin => env.is_group && env.raw.sender_is_admin,
        }),
    });

    if authorized {
        Verdict::Authorized
    } else if permission.ai_mediated {
        Verdict::Denied(None)
    } else {
        Verdict::Denied(Some(
            permission
                .prompt
                .clone()
                .unwrap_or_else(|| "Access denied.".to_string()),
        ))
    }
}

/// Shared component handles threaded into every handler invocation.
pub struct Services {
    pub config: Arc<BotConfig>,
    pub state: Arc<StateStore>,
    pub sessions: SessionRegistry,
    pub registry: Arc<CommandRegistry>,
    pub cognition: Arc<std::sync::Mutex<CognitiveCore>>,
    pub vitals: Arc<Vitals>,
    pub ai: Arc<AiServiceManager>,
    pub social: Arc<SocialEngine>,
    pub control: ControlHandle,
    pub op_state: Arc<std::sync::Mutex<crate::bot::OperationalState>>,
    /// Bot's own bare number, known once connected.
    pub bot_id: std::sync::Mutex<Option<String>>,
}

impl Services {
    pub fn bot_id(&self) -> Option<String> {
        self.bot_id.lock().unwrap().clone()
    }

    pub fn set_bot_id(&self, id: String) {
        *self.bot_id.lock().unwrap() = Some(id);
    }
}

/// Execution context handed to command handlers and reply continuations.
pub struct CommandContext {
    pub env: Envelope,
    pub socket: Arc<dyn SocketHandle>,
    pub services: Arc<Services>,
    /// Set for `on_reply` invocations: the claimed session.
    pub session: Option<Session>,
}

impl CommandContext {
    /// Quote-reply into the originating chat. Returns the sent message id.
    pub async fn reply(&self, text: impl Into<String>) -> Result<String, TransportError> {
        self.socket
            .send(
                &self.env.chat,
                OutboundContent::Text { text: text.into() },
                SendOptions {
                    quote: Some(self.env.raw.id.clone()),
                    mentions: Vec::new(),
                },
            )
            .await
    }

    pub async fn reply_with_mentions(
        &self,
        text: impl Into<String>,
        mentions: Vec<String>,
    ) -> Result<String, TransportError> {
        self.socket
            .send(
                &self.env.chat,
                OutboundContent::Text { text: text.into() },
                SendOptions {
                    quote: Some(self.env.raw.id.clone()),
                    mentions,
                },
            )
            .await
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()>;

    /// Whether this command drives a multi-turn session.
    fn handles_replies(&self) -> bool {
        false
    }

    async fn on_reply(&self, _ctx: &CommandContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: Category,
    pub description: &'static str,
    pub permission: Option<Permission>,
    /// Per-(command, sender) cooldown; `None` uses the configured default.
    pub cooldown_secs: Option<u64>,
    /// Allow invocation while the sender has an active session.
    pub allow_during_session: bool,
    pub handler: Box<dyn Command>,
}

#[derive(Default)]
struct Tables {
    commands: HashMap<String, Arc<CommandSpec>>,
    aliases: HashMap<String, String>,
}

pub struct CommandRegistry {
    tables: RwLock<Tables>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Clear-then-repopulate with the built-in command set. Callers resolving
    /// concurrently in the cooperative model never observe a partial table:
    /// the swap happens under one write lock.
    pub fn load(&self) {
        let specs = builtin_commands();
        let mut tables = self.tables.write().unwrap();
        tables.commands.clear();
        tables.aliases.clear();
        for spec in specs {
            let name = spec.name.to_ascii_lowercase();
            for alias in spec.aliases {
                tables
                    .aliases
                    .insert(alias.to_ascii_lowercase(), name.clone());
            }
            tables.commands.insert(name, Arc::new(spec));
        }
        tracing::info!(count = tables.commands.len(), "command registry loaded");
    }

    pub fn resolve(&self, name_or_alias: &str) -> Option<Arc<CommandSpec>> {
        let key = name_or_alias.to_ascii_lowercase();
        let tables = self.tables.read().unwrap();
        if let Some(spec) = tables.commands.get(&key) {
            return Some(spec.clone());
        }
        let canonical = tables.aliases.get(&key)?;
        tables.commands.get(canonical).cloned()
    }

    /// Closest known command name when similarity clears the threshold.
    pub fn suggest(&self, input: &str, threshold: f64) -> Option<String> {
        let tables = self.tables.read().unwrap();
        let candidates = tables
            .commands
            .keys()
            .chain(tables.aliases.keys());
        let mut best: Option<(f64, &String)> = None;
        for candidate in candidates {
            let score = dice_similarity(input, candidate);
            if best.is_none_or(|(b, _)| score > b) {
                best = Some((score, candidate));
            }
        }
        match best {
            Some((score, name)) if score > threshold => Some(name.clone()),
            _ => None,
        }
    }

    /// Non-owner commands, sorted by name (menu listing).
    pub fn visible_commands(&self) -> Vec<Arc<CommandSpec>> {
        let tables = self.tables.read().unwrap();
        let mut specs: Vec<_> = tables
            .commands
            .values()
            .filter(|s| s.category != Category::Owner)
            .cloned()
            .collect();
        specs.sort_by_key(|s| s.name);
        specs
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn builtin_commands() -> Vec<CommandSpec> {
    vec![
        ping::spec(),
        register::spec(),
        menu::spec(),
        moderation::ban_spec(),
        moderation::unban_spec(),
        moderation::mute_spec(),
        antilink::spec(),
        aichat::spec(),
        rvom::spec(),
        mode::spec(),
        restart::spec(),
        status::spec(),
    ]
}

/// Sørensen–Dice similarity over character bigrams.
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() && b_grams.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for g in &a_grams {
        *counts.entry(*g).or_insert(0) += 1;
    }
    let mut overlap = 0usize;
    for g in &b_grams {
        if let Some(c) = counts.get_mut(g)
            && *c > 0
        {
            *c -= 1;
            overlap += 1;
        }
    }
    2.0 * overlap as f64 / (a_grams.len() + b_grams.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SenderFlags;
    use crate::transport::InboundMessage;

    fn envelope(is_owner: bool, is_group: bool, admin: bool) -> Envelope {
        let msg = InboundMessage {
            id: "m1".into(),
            chat: "c".into(),
            sender: if is_owner {
                "111@s.whatsapp.net".into()
            } else {
                "222@s.whatsapp.net".into()
            },
            is_group,
            sender_is_admin: admin,
            text: "hi".into(),
            ..Default::default()
        };
        let owners = vec!["111".to_string()];
        Envelope::build(msg, &[], &owners, SenderFlags::default()).unwrap()
    }

    #[test]
    fn registry_resolves_name_and_alias_to_same_descriptor() {
        let registry = CommandRegistry::new();
        registry.load();
        let by_name = registry.resolve("ping").unwrap();
        let by_alias = registry.resolve("p").unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_alias));
        assert!(registry.resolve("definitely-not-a-command").is_none());
    }

    #[test]
    fn reload_is_atomic_and_idempotent() {
        let registry = CommandRegistry::new();
        registry.load();
        let before = registry.len();
        registry.load();
        assert_eq!(registry.len(), before);
        assert!(registry.resolve("ping").is_some());
    }

    #[test]
    fn suggest_finds_near_misses_above_threshold() {
        let registry = CommandRegistry::new();
        registry.load();
        assert_eq!(registry.suggest("pingg", 0.6), Some("ping".to_string()));
        // "pong" shares only one bigram with "ping": below the bar.
        assert_eq!(registry.suggest("pong", 0.6), None);
    }

    #[test]
    fn dice_similarity_behaves() {
        assert_eq!(dice_similarity("ping", "ping"), 1.0);
        assert!(dice_similarity("pingg", "ping") > 0.8);
        assert!(dice_similarity("pong", "ping") < 0.4);
        assert_eq!(dice_similarity("a", "b"), 0.0);
        assert_eq!(dice_similarity("a", "a"), 1.0);
    }

    #[test]
    fn permission_disjunction_across_rules() {
        let perm = Permission {
            rules: vec![Rule::Owner, Rule::All(vec![Condition::Group, Condition::Admin])],
            prompt: Some("admins only".into()),
            ai_mediated: false,
        };
        // Owner matches the first rule even outside a group.
        assert!(matches!(
            check_permission(&envelope(true, false, false), Some(&perm)),
            Verdict::Authorized
        ));
        // Group admin matches the conjunctive rule.
        assert!(matches!(
            check_permission(&envelope(false, true, true), Some(&perm)),
            Verdict::Authorized
        ));
        // Group non-admin fails both.
        match check_permission(&envelope(false, true, false), Some(&perm)) {
            Verdict::Denied(Some(prompt)) => assert_eq!(prompt, "admins only"),
            _ => panic!("expected denial with prompt"),
        }
    }

    #[test]
    fn conjunction_requires_every_condition() {
        let perm = Permission {
            rules: vec![Rule::All(vec![Condition::Group, Condition::Admin])],
            ..Default::default()
        };
        // Admin flag without group context is not enough.
        assert!(matches!(
            check_permission(&envelope(false, false, true), Some(&perm)),
            Verdict::Denied(_)
        ));
    }

    #[test]
    fn ai_mediated_denial_is_silent() {
        let perm = Permission {
            rules: vec![Rule::Owner],
            prompt: Some("unused".into()),
            ai_mediated: true,
        };
        assert!(matches!(
            check_permission(&envelope(false, false, false), Some(&perm)),
            Verdict::Denied(None)
        ));
    }

    #[test]
    fn no_permission_spec_means_open_access() {
        assert!(matches!(
            check_permission(&envelope(false, false, false), None),
            Verdict::Authorized
        ));
    }
}
