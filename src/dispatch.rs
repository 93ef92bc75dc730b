//! Dispatch Pipeline
//!
//! Every inbound message runs the same ordered stage chain; the first stage
//! that fully handles it stops the rest. The ordering is a behavioral
//! contract — a banned sender must be dropped before session continuation
//! ever sees them, link moderation must run before command dispatch, and the
//! AI fallback only fires when nothing else claimed the event.
//!
//! `handle` never panics outward: stage failures are logged, counted against
//! integrity, and surfaced to the user as a generic apology at most.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};

use crate::commands::{check_permission, CommandContext, Services, Verdict};
use crate::envelope::{bare, Envelope};
use crate::state::BotMode;
use crate::transport::{
    InboundMessage, MessageRef, OutboundContent, SendOptions, SocketHandle,
};
use crate::utils::truncate_str;

/// Shell/exec output is clipped to keep replies readable.
const EXEC_OUTPUT_LIMIT: usize = 3500;

pub struct Dispatcher {
    services: Arc<Services>,
    cooldowns: Mutex<HashMap<String, Instant>>,
}

impl Dispatcher {
    pub fn new(services: Arc<Services>) -> Arc<Self> {
        Arc::new(Self {
            services,
            cooldowns: Mutex::new(HashMap::new()),
        })
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Entry point for one raw message. Infallible by contract.
    pub async fn handle(&self, socket: Arc<dyn SocketHandle>, msg: InboundMessage) {
        // The bot's own sends echo back; never process them.
        if msg.from_me {
            return;
        }

        let flags = self.services.state.flags_for(&msg.sender);
        let Some(env) = Envelope::build(
            msg,
            &self.services.config.prefixes,
            &self.services.config.owner_numbers,
            flags,
        ) else {
            return;
        };

        if let Err(e) = self.run_stages(&socket, &env).await {
            self.services.cognition.lock().unwrap().record_error();
            tracing::error!(
                chat = %env.chat,
                sender = %env.sender,
                "unexpected failure at top of message handler: {e:#}"
            );
        }
    }

    async fn run_stages(
        &self,
        socket: &Arc<dyn SocketHandle>,
        env: &Envelope,
    ) -> anyhow::Result<()> {
        if self.pre_checks(env) {
            return Ok(());
        }
        self.passive_observation(env);
        if self.view_once_archival(socket, env).await {
            return Ok(());
        }
        if self.owner_execution(socket, env).await {
            return Ok(());
        }
        if self.session_reply(socket, env).await {
            return Ok(());
        }
        if self.group_moderation(socket, env).await {
            return Ok(());
        }
        if self.command_dispatch(socket, env).await {
            return Ok(());
        }
        if self.ai_fallback(socket, env).await {
            return Ok(());
        }
        Ok(())
    }

    /// Stage 1: banned senders and muted chats are dropped outright.
    fn pre_checks(&self, env: &Envelope) -> bool {
        if env.is_banned {
            tracing::debug!(sender = %env.sender, "message from banned sender dropped");
            return true;
        }
        if self.services.state.is_muted(&env.chat) {
            return true;
        }
        false
    }

    /// Stage 2: best-effort relationship bookkeeping; never interrupts.
    fn passive_observation(&self, env: &Envelope) {
        self.services.social.observe(env);
    }

    /// Stage 3: capture-and-resend of view-once media where enabled.
    async fn view_once_archival(&self, socket: &Arc<dyn SocketHandle>, env: &Envelope) -> bool {
        if !env.raw.view_once || !self.services.state.rvom_enabled(&env.chat) {
            return false;
        }
        let caption = format!(
            "👁️ View-once media detected\n\nFrom: @{}",
            env.sender_bare
        );
        let result = socket
            .send(
                &env.chat,
                OutboundContent::ForwardViewOnce {
                    source_id: env.raw.id.clone(),
                    caption,
                },
                SendOptions {
                    quote: None,
                    mentions: vec![env.sender.clone()],
                },
            )
            .await;
        if let Err(e) = result {
            tracing::error!("failed to archive view-once media: {e}");
        }
        true
    }

    /// Stage 4: owner-only raw shell escape hatch. Terminates the pipeline
    /// whether the command succeeds or not.
    async fn owner_execution(&self, socket: &Arc<dyn SocketHandle>, env: &Envelope) -> bool {
        if !env.is_owner || !env.text.starts_with('$') {
            return false;
        }
        let command = env.text[1..].trim().to_string();
        if command.is_empty() {
            return true;
        }

        let reply = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await
        {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    format!("[EXEC-STDERR]\n{}", truncate_str(&stderr, EXEC_OUTPUT_LIMIT))
                } else {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    format!("[EXEC-STDOUT]\n{}", truncate_str(&stdout, EXEC_OUTPUT_LIMIT))
                }
            }
            Err(e) => format!("[EXEC-ERROR]\n{e}"),
        };
        self.quote_reply(socket, env, reply).await;
        true
    }

    /// Stage 5: route a reply onto its owner's active session when the reply
    /// target matches. A non-matching reply is not an error; it falls through.
    async fn session_reply(&self, socket: &Arc<dyn SocketHandle>, env: &Envelope) -> bool {
        let Some(quoted) = &env.quoted else {
            return false;
        };
        let Some(session) = self
            .services
            .sessions
            .begin_reply(&env.sender, &quoted.id)
        else {
            return false;
        };

        let spec = self.services.registry.resolve(&session.command);
        let Some(spec) = spec.filter(|s| s.handler.handles_replies()) else {
            // Command vanished (registry reload) — restore the timer and let
            // the message continue down the pipeline.
            self.services
                .sessions
                .rearm(&env.sender, session.expires_at);
            return false;
        };

        let ctx = CommandContext {
            env: env.clone(),
            socket: socket.clone(),
            services: self.services.clone(),
            session: Some(session),
        };
        if let Err(e) = spec.handler.on_reply(&ctx).await {
            self.services.cognition.lock().unwrap().record_error();
            tracing::error!(command = spec.name, "session continuation failed: {e:#}");
        }
        true
    }

    /// Stage 6: group link moderation.
    async fn group_moderation(&self, socket: &Arc<dyn SocketHandle>, env: &Envelope) -> bool {
        if !env.is_group || env.urls.is_empty() {
            return false;
        }
        let Some(config) = self.services.state.antilink(&env.chat) else {
            return false;
        };
        if !config.enabled {
            return false;
        }
        // Admins and the owner are exempt.
        if env.raw.sender_is_admin || env.is_owner {
            return false;
        }
        let offending = env
            .urls
            .iter()
            .any(|url| !config.allowed_links.iter().any(|ok| url.contains(ok)));
        if !offending {
            return false;
        }

        let target = MessageRef {
            chat: env.chat.clone(),
            id: env.raw.id.clone(),
            sender: env.sender.clone(),
        };
        if let Err(e) = socket
            .send(
                &env.chat,
                OutboundContent::Delete { target },
                SendOptions::default(),
            )
            .await
        {
            tracing::error!("antilink delete failed: {e}");
            return false;
        }
        let warn = format!("🚨 @{}, links are not allowed here!", env.sender_bare);
        let _ = socket
            .send(
                &env.chat,
                OutboundContent::Text { text: warn },
                SendOptions {
                    quote: None,
                    mentions: vec![env.sender.clone()],
                },
            )
            .await;
        true
    }

    /// Stage 7: command resolution and execution. Once command syntax is
    /// recognized the pipeline always stops here, success or not.
    async fn command_dispatch(&self, socket: &Arc<dyn SocketHandle>, env: &Envelope) -> bool {
        if !env.is_cmd {
            return false;
        }
        let Some(name) = &env.command else {
            return true;
        };

        let Some(spec) = self.services.registry.resolve(name) else {
            if let Some(suggestion) = self
                .services
                .registry
                .suggest(name, self.services.config.suggestion_threshold)
            {
                let prefix = env.prefix.as_deref().unwrap_or("");
                self.quote_reply(
                    socket,
                    env,
                    format!("Unknown command. Did you mean `{prefix}{suggestion}`?"),
                )
                .await;
            }
            return true;
        };

        // An active session blocks other commands unless the descriptor
        // explicitly opts out.
        if !spec.allow_during_session
            && let Some((active, remaining)) = self.services.sessions.active(&env.sender)
        {
            let countdown = remaining
                .map(|d| format!("\n\nThat session expires in {} seconds.", d.as_secs()))
                .unwrap_or_default();
            self.quote_reply(
                socket,
                env,
                format!(
                    "[SYSTEM] You are in an active `{active}` session. Finish or cancel it first.{countdown}"
                ),
            )
            .await;
            return true;
        }

        match check_permission(env, spec.permission.as_ref()) {
            Verdict::Authorized => {}
            Verdict::Denied(prompt) => {
                if let Some(prompt) = prompt {
                    self.quote_reply(socket, env, prompt).await;
                }
                return true;
            }
        }

        // Per-(command, sender) cooldown; violations are silently dropped.
        let cooldown = Duration::from_secs(
            spec.cooldown_secs
                .unwrap_or(self.services.config.default_cooldown_secs),
        );
        {
            let mut cooldowns = self.cooldowns.lock().unwrap();
            let now = Instant::now();
            if let Some(&until) = cooldowns.get(&cooldown_key(spec.name, &env.sender))
                && now < until
            {
                return true;
            }
            cooldowns.insert(cooldown_key(spec.name, &env.sender), now + cooldown);
        }

        let ctx = CommandContext {
            env: env.clone(),
            socket: socket.clone(),
            services: self.services.clone(),
            session: None,
        };
        match spec.handler.execute(&ctx).await {
            Ok(()) => {
                self.services.vitals.consume_energy(0.2);
                self.services.state.record_command_hit(spec.name);
            }
            Err(e) => {
                self.services.cognition.lock().unwrap().record_error();
                tracing::error!(command = spec.name, "command execution failed: {e:#}");
                self.quote_reply(
                    socket,
                    env,
                    "An internal anomaly occurred while running this command.",
                )
                .await;
            }
        }
        true
    }

    /// Stage 8: AI chat for anything nothing else claimed — private chats,
    /// replies to the bot, and mentions of the bot.
    async fn ai_fallback(&self, socket: &Arc<dyn SocketHandle>, env: &Envelope) -> bool {
        let bot_id = self.services.bot_id();
        let replying_to_bot = match (&env.quoted, &bot_id) {
            (Some(q), Some(id)) => bare(&q.sender) == id,
            _ => false,
        };
        let mentioning_bot = match &bot_id {
            Some(id) => {
                env.mentions.iter().any(|m| bare(m) == id)
                    || env.text.contains(&format!("@{id}"))
            }
            None => false,
        };
        let triggered = !env.is_group || replying_to_bot || mentioning_bot;
        if !triggered {
            return false;
        }
        if self.services.state.bot_mode() == BotMode::SelfOnly && !env.is_owner {
            return false;
        }
        if self.services.state.is_ai_banned(&env.chat) {
            return false;
        }
        if env.text.trim().is_empty() {
            return false;
        }

        let _ = socket
            .send(
                &env.chat,
                OutboundContent::Typing { on: true },
                SendOptions::default(),
            )
            .await;

        match self
            .services
            .ai
            .handle_chat(env, &self.services.vitals)
            .await
        {
            Some(text) => {
                self.quote_reply(socket, env, text).await;
                self.services.state.record_ai_hit();
            }
            None => {
                tracing::warn!(chat = %env.chat, "every ai provider failed, staying quiet");
            }
        }

        let _ = socket
            .send(
                &env.chat,
                OutboundContent::Typing { on: false },
                SendOptions::default(),
            )
            .await;
        true
    }

    /// Best-effort quoted text reply; send failures end up in the log, never
    /// back in the pipeline.
    async fn quote_reply(
        &self,
        socket: &Arc<dyn SocketHandle>,
        env: &Envelope,
        text: impl Into<String>,
    ) {
        let result = socket
            .send(
                &env.chat,
                OutboundContent::Text { text: text.into() },
                SendOptions {
                    quote: Some(env.raw.id.clone()),
                    mentions: Vec::new(),
                },
            )
            .await;
        if let Err(e) = result {
            tracing::error!(chat = %env.chat, "failed to send reply: {e}");
        }
    }
}

fn cooldown_key(command: &str, sender: &str) -> String {
    format!("{command}-{sender}")
}
