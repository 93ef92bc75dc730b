//! Operational mode switch (public vs owner-only).

use async_trait::async_trait;

use crate::state::{BotMode, Domain};

use super::{Category, Command, CommandContext, CommandSpec, Permission, Rule};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "mode",
        aliases: &[],
        category: Category::Owner,
        description: "Switch the bot between public and owner-only mode.",
        permission: Some(Permission {
            rules: vec![Rule::Owner],
            prompt: None,
            ai_mediated: false,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Mode),
    }
}

struct Mode;

#[async_trait]
impl Command for Mode {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let state = &ctx.services.state;
        let current = state.bot_mode();
        let requested = match ctx.env.args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("self") => BotMode::SelfOnly,
            Some("public") => BotMode::Public,
            _ => {
                let name = match current {
                    BotMode::Public => "public",
                    BotMode::SelfOnly => "self",
                };
                ctx.reply(format!(
                    "Invalid mode. Use: mode self | mode public\n\nCurrent mode: {name}"
                ))
                .await?;
                return Ok(());
            }
        };

        if requested == current {
            ctx.reply("[SYSTEM] That mode is already active.").await?;
            return Ok(());
        }

        state.set_bot_mode(requested);
        state.save(Domain::Settings).await;
        ctx.reply(format!(
            "[SYSTEM] Operational mode changed to {}.",
            match requested {
                BotMode::Public => "PUBLIC",
                BotMode::SelfOnly => "SELF",
            }
        ))
        .await?;
        Ok(())
    }
}
