//! Per-group link filtering configuration.

use async_trait::async_trait;

use crate::state::Domain;

use super::{
    Category, Command, CommandContext, CommandSpec, Condition, Permission, Rule,
};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "antilink",
        aliases: &[],
        category: Category::Moderation,
        description: "Configure link filtering in this group.",
        permission: Some(Permission {
            rules: vec![Rule::All(vec![Condition::Group, Condition::Admin])],
            prompt: Some("Only group administrators can use this command.".into()),
            ai_mediated: false,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Antilink),
    }
}

struct Antilink;

#[async_trait]
impl Command for Antilink {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let state = &ctx.services.state;
        let chat = &ctx.env.chat;
        let action = ctx.env.args.first().map(|a| a.to_ascii_lowercase());

        match action.as_deref() {
            Some("on") => {
                state.update_antilink(chat, |c| c.enabled = true);
                ctx.reply("[SYSTEM] Link filtering enabled.").await?;
            }
            Some("off") => {
                state.update_antilink(chat, |c| c.enabled = false);
                ctx.reply("[SYSTEM] Link filtering disabled.").await?;
            }
            Some("allow") => {
                let Some(link) = ctx.env.args.get(1) else {
                    ctx.reply("Usage: antilink allow <domain>").await?;
                    return Ok(());
                };
                let link = link.clone();
                state.update_antilink(chat, |c| {
                    if !c.allowed_links.contains(&link) {
                        c.allowed_links.push(link.clone());
                    }
                });
                ctx.reply(format!(
                    "[SYSTEM] Links containing \"{}\" are now allowed.",
                    ctx.env.args[1]
                ))
                .await?;
            }
            Some("disallow") => {
                let Some(link) = ctx.env.args.get(1) else {
                    ctx.reply("Usage: antilink disallow <domain>").await?;
                    return Ok(());
                };
                let link = link.clone();
                state.update_antilink(chat, |c| {
                    c.allowed_links.retain(|l| l != &link);
                });
                ctx.reply(format!(
                    "[SYSTEM] Links containing \"{}\" are now blocked.",
                    ctx.env.args[1]
                ))
                .await?;
            }
            _ => {
                ctx.reply("Invalid option. Use: on, off, allow, disallow.")
                    .await?;
                return Ok(());
            }
        }

        state.save(Domain::Antilink).await;
        Ok(())
    }
}
