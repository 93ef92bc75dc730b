//! Health and vitals snapshot.

use async_trait::async_trait;

use super::{Category, Command, CommandContext, CommandSpec};

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "status",
        aliases: &["diag", "health"],
        category: Category::Utility,
        description: "Show connection health, vitals, and usage stats.",
        permission: None,
        cooldown_secs: Some(10),
        allow_during_session: false,
        handler: Box::new(Status),
    }
}

struct Status;

#[async_trait]
impl Command for Status {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let services = &ctx.services;
        let cognition = services.cognition.lock().unwrap().snapshot();
        let vitals = services.vitals.snapshot();
        let stats = services.state.stats();
        let op_state = *services.op_state.lock().unwrap();
        let uptime = chrono::Utc::now() - services.state.started_at();

        let total_hits: u64 = stats.command_hits.values().sum();
        let text = format!(
            "*{} status*\n\n\
             State: {op_state:?}\n\
             Uptime: {}h {}m\n\n\
             Health: C {:.2} | P {:.2} | I {:.2}\n\
             Diagnosis: network {:.0}% / platform {:.0}%\n\
             Handler errors: {}\n\n\
             Energy: {:.1}% | Fatigue: {:.1}%\n\
             Mood: {} | Heart rate: {:.0} bpm\n\n\
             Commands served: {total_hits} | AI replies: {}\n\
             Active sessions: {}",
            services.config.bot_name,
            uptime.num_hours(),
            uptime.num_minutes() % 60,
            cognition.vector.c,
            cognition.vector.p,
            cognition.vector.i,
            cognition.beliefs.network_issue * 100.0,
            cognition.beliefs.platform_issue * 100.0,
            cognition.error_count,
            vitals.energy,
            vitals.fatigue,
            vitals.mood.as_str(),
            vitals.heart_rate,
            stats.ai_response_hits,
            services.sessions.len(),
        );
        ctx.reply(text).await?;
        Ok(())
    }
}
