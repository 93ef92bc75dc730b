//! Latency probe.

use async_trait::async_trait;

use super::{Category, Command, CommandContext, CommandSpec};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "ping",
        aliases: &["p", "speedtest"],
        category: Category::Utility,
        description: "Measure dispatch and transport latency.",
        permission: None,
        cooldown_secs: Some(5),
        allow_during_session: false,
        handler: Box::new(Ping),
    }
}

struct Ping;

#[async_trait]
impl Command for Ping {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let started = std::time::Instant::now();
        ctx.reply("Pong!").await?;
        let ms = started.elapsed().as_secs_f64() * 1000.0;

        // The probe doubles as a latency sample for the health model.
        ctx.services
            .cognition
            .lock()
            .unwrap()
            .record_latency(ms);

        ctx.reply(format!("Transport round trip: {ms:.0} ms")).await?;
        Ok(())
    }
}
