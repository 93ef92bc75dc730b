//! View-once auto-archival toggle.

use async_trait::async_trait;

use crate::state::Domain;

use super::{
    Category, Command, CommandContext, CommandSpec, Condition, Permission, Rule,
};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "rvom",
        aliases: &[],
        category: Category::Moderation,
        description: "Toggle automatic archival of view-once media.",
        permission: Some(Permission {
            rules: vec![Rule::Owner, Rule::All(vec![Condition::Group, Condition::Admin])],
            prompt: None,
            ai_mediated: false,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Rvom),
    }
}

struct Rvom;

#[async_trait]
impl Command for Rvom {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let state = &ctx.services.state;
        let chat = &ctx.env.chat;
        let mode = ctx.env.args.first().map(|a| a.to_ascii_lowercase());

        let enable = match mode.as_deref() {
            Some("on") => true,
            Some("off") => false,
            _ => {
                let current = if state.rvom_enabled(chat) { "ON" } else { "OFF" };
                ctx.reply(format!("Usage: rvom on|off. Current mode: {current}"))
                    .await?;
                return Ok(());
            }
        };

        if state.rvom_enabled(chat) == enable {
            ctx.reply(format!(
                "[SYSTEM] Mode is already {}.",
                if enable { "ON" } else { "OFF" }
            ))
            .await?;
            return Ok(());
        }

        state.set_rvom(chat, enable);
        state.save(Domain::Rvom).await;
        ctx.reply(format!(
            "View-once archival set to: {}",
            if enable { "ON" } else { "OFF" }
        ))
        .await?;
        Ok(())
    }
}
