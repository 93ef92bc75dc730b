//! User registration: a two-step interactive session (name, then age).

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::session::Session;
use crate::state::{Domain, RegisteredUser};

use super::{Category, Command, CommandContext, CommandSpec};

const STEP_ASK_NAME: &str = "ask_name";
const STEP_ASK_AGE: &str = "ask_age";
const MAX_NAME_LEN: usize = 50;

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "register",
        aliases: &["reg", "signup"],
        category: Category::Utility,
        description: "Register yourself in the bot's user database.",
        permission: None,
        cooldown_secs: None,
        // This command manages session conflicts itself so it can take over
        // from an idle menu session.
        allow_during_session: true,
        handler: Box::new(Register),
    }
}

struct Register;

#[async_trait]
impl Command for Register {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let services = &ctx.services;
        if let Some(active) = services.sessions.get(&ctx.env.sender) {
            // Only a menu session may be pre-empted by registration.
            if active.command == "menu" {
                services.sessions.remove(&ctx.env.sender);
                ctx.reply("[SYSTEM] Active menu session stopped to begin registration.")
                    .await?;
            } else {
                ctx.reply(format!(
                    "[SYSTEM] You already have an active `{}` session.",
                    active.command
                ))
                .await?;
                return Ok(());
            }
        }

        let sent = ctx
            .reply("Registration started.\n\nReply to this message with your full name.")
            .await?;
        let ttl = Duration::from_secs(services.config.session_timeout_secs);
        let session = Session::new(
            ctx.env.sender.clone(),
            ctx.env.chat.clone(),
            "register",
            STEP_ASK_NAME,
            sent,
            ttl,
        );
        services.sessions.create(session, true)?;
        Ok(())
    }

    fn handles_replies(&self) -> bool {
        true
    }

    async fn on_reply(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let Some(session) = &ctx.session else {
            return Ok(());
        };
        let services = &ctx.services;
        let sessions = &services.sessions;
        let owner = &ctx.env.sender;
        let ttl = Duration::from_secs(services.config.session_timeout_secs);

        match session.step.as_str() {
            STEP_ASK_NAME => {
                let name = ctx.env.text.trim().to_string();
                if name.is_empty() || name.len() > MAX_NAME_LEN {
                    ctx.reply(format!(
                        "Invalid name. Please send a real name (at most {MAX_NAME_LEN} characters)."
                    ))
                    .await?;
                    sessions.rearm(owner, Instant::now() + ttl);
                    return Ok(());
                }
                let sent = ctx
                    .reply(format!(
                        "Name accepted: {name}\n\nNow reply with your age (digits only)."
                    ))
                    .await?;
                sessions.update(owner, |s| {
                    s.answers.insert("name".into(), name);
                    s.step = STEP_ASK_AGE.into();
                    s.reply_to = sent;
                });
                sessions.rearm(owner, Instant::now() + ttl);
            }
            STEP_ASK_AGE => {
                let age: Option<u32> = ctx.env.text.trim().parse().ok();
                let Some(age) = age.filter(|a| (13..=100).contains(a)) else {
                    ctx.reply("Invalid age. Please send a number between 13 and 100.")
                        .await?;
                    sessions.rearm(owner, Instant::now() + ttl);
                    return Ok(());
                };

                let name = session
                    .answers
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| ctx.env.raw.push_name.clone());
                services.state.register_user(
                    owner,
                    RegisteredUser {
                        name: name.clone(),
                        age,
                        registered_at: chrono::Utc::now(),
                    },
                );
                services.state.save(Domain::RegisteredUsers).await;
                sessions.remove(owner);
                ctx.reply(format!(
                    "Registration complete. Welcome aboard, {name}."
                ))
                .await?;
            }
            other => {
                tracing::warn!(step = other, "registration session in unknown step");
                sessions.remove(owner);
                ctx.reply("[SYSTEM] Session state error. Session ended.")
                    .await?;
            }
        }
        Ok(())
    }
}
