//! Paginated command menu as an interactive session.
//!
//! Replying `next`/`prev`/a page number flips pages; `stop` ends the
//! session. Each valid reply re-arms the expiry timer.

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::session::Session;

use super::{Category, Command, CommandContext, CommandSpec};

const PAGE_SIZE: usize = 10;
const MENU_TTL: Duration = Duration::from_secs(120);

pub fn spec() -> CommandSpec {
    CommandSpec {
        name: "menu",
        aliases: &["help", "commands"],
        category: Category::Utility,
        description: "Browse available commands.",
        permission: None,
        cooldown_secs: None,
        allow_during_session: false,
        handler: Box::new(Menu),
    }
}

struct Menu;

fn render_page(ctx: &CommandContext, page: usize) -> (String, usize) {
    let specs = ctx.services.registry.visible_commands();
    let total_pages = specs.len().div_ceil(PAGE_SIZE).max(1);
    let page = page.clamp(1, total_pages);

    let mut text = format!("*{} — command menu*\n\n", ctx.services.config.bot_name);
    for spec in specs.iter().skip((page - 1) * PAGE_SIZE).take(PAGE_SIZE) {
        text.push_str(&format!("• *{}* — {}\n", spec.name, spec.description));
    }
    text.push_str(&format!(
        "\nPage {page}/{total_pages}. Reply `next`, `prev`, a page number, or `stop`."
    ));
    (text, total_pages)
}

#[async_trait]
impl Command for Menu {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let (text, _) = render_page(ctx, 1);
        let sent = ctx.reply(text).await?;

        let mut session = Session::new(
            ctx.env.sender.clone(),
            ctx.env.chat.clone(),
            "menu",
            "page",
            sent,
            MENU_TTL,
        );
        session.answers.insert("page".into(), "1".into());
        if let Err(e) = ctx.services.sessions.create(session, false) {
            tracing::debug!("menu session not created: {e}");
        }
        Ok(())
    }

    fn handles_replies(&self) -> bool {
        true
    }

    async fn on_reply(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let Some(session) = &ctx.session else {
            return Ok(());
        };
        let sessions = &ctx.services.sessions;
        let owner = &ctx.env.sender;
        let input = ctx.env.text.trim().to_ascii_lowercase();

        if input == "stop" {
            sessions.remove(owner);
            ctx.reply("Menu session closed.").await?;
            return Ok(());
        }

        let current: usize = session
            .answers
            .get("page")
            .and_then(|p| p.parse().ok())
            .unwrap_or(1);
        let requested = match input.as_str() {
            "next" | "n" => Some(current + 1),
            "prev" | "p" => current.checked_sub(1),
            other => other.parse::<usize>().ok(),
        };

        let (_, total_pages) = render_page(ctx, 1);
        match requested {
            Some(page) if (1..=total_pages).contains(&page) => {
                let (text, _) = render_page(ctx, page);
                let sent = ctx.reply(text).await?;
                sessions.update(owner, |s| {
                    s.answers.insert("page".into(), page.to_string());
                    s.reply_to = sent;
                });
                sessions.rearm(owner, Instant::now() + MENU_TTL);
            }
            _ => {
                // Out-of-range or unrecognized input keeps the session alive.
                sessions.rearm(owner, Instant::now() + MENU_TTL);
            }
        }
        Ok(())
    }
}
