//! Per-chat AI fallback toggle.

use async_trait::async_trait;

use crate::state::Domain;

use super::{Category, Command, CommandContext, CommandSpec};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "aichat",
        aliases: &[],
        category: Category::Moderation,
        description: "Enable or disable AI chat in this conversation.",
        permission: None,
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(AiChat),
    }
}

struct AiChat;

#[async_trait]
impl Command for AiChat {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let state = &ctx.services.state;
        let chat = &ctx.env.chat;
        match ctx.env.args.first().map(|a| a.as_str()) {
            Some("--ban") => {
                state.set_ai_banned(chat, true);
                state.save(Domain::BannedAiChats).await;
                ctx.reply("[AI] AI chat disabled here.").await?;
            }
            Some("--unban") => {
                state.set_ai_banned(chat, false);
                state.save(Domain::BannedAiChats).await;
                ctx.reply("[AI] AI chat re-enabled here.").await?;
            }
            _ => {
                ctx.reply("Usage: aichat --ban | aichat --unban").await?;
            }
        }
        Ok(())
    }
}
