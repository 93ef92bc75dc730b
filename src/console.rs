//! Operator Console
//!
//! Line-oriented control surface on stdin: status, restart, shutdown, and
//! log-level changes. Consumes only the supervisor's public operations.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bot::ControlHandle;
use crate::commands::Services;

const HELP: &str = "\
Commands:
  status            show health, vitals, and usage counters
  restart           soft-restart the transport session
  shutdown          graceful shutdown
  loglevel <level>  set console log level (trace|debug|info|warn|error)
  help              this text";

/// Run the console until stdin closes. Spawn this alongside the bot.
pub async fn run(control: ControlHandle, services: Arc<Services>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("operator console ready, type 'help' for commands");

    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("status") => println!("{}", render_status(&services)),
            Some("restart") => {
                println!("soft restart requested");
                control.soft_restart();
            }
            Some("shutdown") => {
                println!("shutdown requested");
                control.shutdown(false);
            }
            Some("loglevel") => match parts.next() {
                Some(level) => control.set_log_level(level),
                None => println!("usage: loglevel <trace|debug|info|warn|error>"),
            },
            Some("help") => println!("{HELP}"),
            Some(other) => println!("unknown command '{other}', try 'help'"),
            None => {}
        }
    }
}

fn render_status(services: &Arc<Services>) -> String {
    let cognition = services.cognition.lock().unwrap().snapshot();
    let vitals = services.vitals.snapshot();
    let stats = services.state.stats();
    let op_state = *services.op_state.lock().unwrap();
    format!(
        "state: {op_state:?}\n\
         health: C {:.2} P {:.2} I {:.2} (errors: {})\n\
         beliefs: network {:.2} / platform {:.2}\n\
         vitals: energy {:.1}% fatigue {:.1}% mood {} heart {:.0}bpm\n\
         sessions: {} | ai replies: {} | commands loaded: {}",
        cognition.vector.c,
        cognition.vector.p,
        cognition.vector.i,
        cognition.error_count,
        cognition.beliefs.network_issue,
        cognition.beliefs.platform_issue,
        vitals.energy,
        vitals.fatigue,
        vitals.mood.as_str(),
        vitals.heart_rate,
        services.sessions.len(),
        stats.ai_response_hits,
        services.registry.len(),
    )
}
