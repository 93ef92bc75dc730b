//! Owner-triggered soft restart.

use async_trait::async_trait;

use super::{Category, Command, CommandContext, CommandSpec, Permission, Rule};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "restart",
        aliases: &["reboot"],
        category: Category::Owner,
        description: "Soft-restart the transport session.",
        permission: Some(Permission {
            rules: vec![Rule::Owner],
            prompt: None,
            ai_mediated: false,
        }),
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Restart),
    }
}

struct Restart;

#[async_trait]
impl Command for Restart {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        ctx.reply("[SYSTEM] Restart signal received. Beginning soft restart, hold on...")
            .await?;
        ctx.services.control.soft_restart();
        Ok(())
    }
}
