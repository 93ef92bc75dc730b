//! Ban, unban, and per-chat mute.

use async_trait::async_trait;

use crate::envelope::bare;
use crate::state::Domain;

use super::{
    Category, Command, CommandContext, CommandSpec, Condition, Permission, Rule,
};

pub fn ban_spec() -> CommandSpec {
    CommandSpec {
        name: "ban",
        aliases: &[],
        category: Category::Owner,
        description: "Block a user from using the bot.",
        permission: Some(Permission {
            rules: vec![Rule::Owner],
            prompt: None,
            ai_mediated: false,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Ban),
    }
}

pub fn unban_spec() -> CommandSpec {
    CommandSpec {
        name: "unban",
        aliases: &[],
        category: Category::Owner,
        description: "Lift a user's ban.",
        permission: Some(Permission {
            rules: vec![Rule::Owner],
            prompt: None,
            ai_mediated: false,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Unban),
    }
}

pub fn mute_spec() -> CommandSpec {
    CommandSpec {
        name: "mute",
        aliases: &[],
        category: Category::Moderation,
        description: "Silence the bot in this group (on/off).",
        permission: Some(Permission {
            rules: vec![Rule::All(vec![Condition::Group, Condition::Admin])],
            prompt: Some("Only group administrators can use this command.".into()),
            ai_mediated: true,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Mute),
    }
}

/// Resolve the target user from a quoted message, a mention, or a bare
/// number argument, in that order.
fn resolve_target(ctx: &CommandContext) -> Option<String> {
    if let Some(quoted) = &ctx.env.quoted {
        return Some(quoted.sender.clone());
    }
    if let Some(mentioned) = ctx.env.mentions.first() {
        return Some(mentioned.clone());
    }
    let arg = ctx.env.args.first()?;
    let digits: String = arg.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("{digits}@s.whatsapp.net"))
    }
}

struct Ban;

#[async_trait]
impl Command for Ban {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let Some(target) = resolve_target(ctx) else {
            ctx.reply("Tag, reply to, or name the user you want to block.")
                .await?;
            return Ok(());
        };

        if ctx.services.config.is_owner(bare(&target)) {
            ctx.reply("[SECURITY] The owner cannot be blocked.").await?;
            return Ok(());
        }

        if !ctx.services.state.ban(&target, &ctx.env.sender) {
            ctx.reply_with_mentions(
                format!("[SYSTEM] @{} is already blocked.", bare(&target)),
                vec![target],
            )
            .await?;
            return Ok(());
        }

        ctx.services.state.save(Domain::BannedUsers).await;
        ctx.reply_with_mentions(
            format!("User blocked: @{} can no longer use the bot.", bare(&target)),
            vec![target],
        )
        .await?;
        Ok(())
    }
}

struct Unban;

#[async_trait]
impl Command for Unban {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let Some(target) = resolve_target(ctx) else {
            ctx.reply("Tag, reply to, or name the user you want to unblock.")
                .await?;
            return Ok(());
        };

        if !ctx.services.state.unban(&target) {
            ctx.reply_with_mentions(
                format!("[SYSTEM] @{} is not in the block list.", bare(&target)),
                vec![target],
            )
            .await?;
            return Ok(());
        }

        ctx.services.state.save(Domain::BannedUsers).await;
        ctx.reply_with_mentions(
            format!("Ban lifted for @{}.", bare(&target)),
            vec![target],
        )
        .await?;
        Ok(())
    }
}

struct Mute;

#[async_trait]
impl Command for Mute {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        match ctx.env.args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("on") => {
                ctx.services.state.set_muted(&ctx.env.chat, true);
                ctx.services.state.save(Domain::MutedChats).await;
                ctx.reply("[SYSTEM] Bot muted in this group.").await?;
            }
            Some("off") => {
                ctx.services.state.set_muted(&ctx.env.chat, false);
                ctx.services.state.save(Domain::MutedChats).await;
                ctx.reply("[SYSTEM] Bot unmuted in this group.").await?;
            }
            _ => {
                ctx.reply("Usage: mute on | mute off").await?;
            }
        }
        Ok(())
    }
}
