use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use wacrab::transport::{BridgeTransport, LocalTransport, Transport};
use wacrab::{logging, Bot, BotConfig};

#[derive(Parser, Debug)]
#[command(name = "wacrab", version, about = "Resilient WhatsApp chatbot core")]
struct Cli {
    /// Verbose logging plus a rotating debug log file
    #[arg(long)]
    debug: bool,

    /// Explicit config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against a local stdin/stdout loopback instead of the bridge
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything else (silently ignore if missing).
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut log_config = logging::LogConfig::new().with_debug_mode(cli.debug);
    if let Ok(dir) = std::env::var("WACRAB_LOG_DIR") {
        log_config = log_config.with_log_dir(PathBuf::from(dir));
    } else if let Some(home) = dirs::home_dir() {
        log_config = log_config.with_log_dir(home.join(".wacrab").join("logs"));
    }
    let (log_handle, _guard) = logging::init(log_config)?;

    let config = BotConfig::load(cli.config.as_deref())?;
    tracing::info!(version = wacrab::VERSION, "wacrab starting");

    let transport: Arc<dyn Transport> = if cli.local {
        let owner = config
            .owner_numbers
            .first()
            .cloned()
            .unwrap_or_else(|| "local".to_string());
        tracing::info!("local loopback mode: stdin plays the owner's phone");
        Arc::new(LocalTransport::stdin(owner))
    } else {
        Arc::new(BridgeTransport::new(config.bridge_url.clone()))
    };

    let bot = Bot::new(config, transport, Some(log_handle));
    bot.initialize().await?;

    // The operator console owns stdin; in local mode the transport does.
    if !cli.local {
        tokio::spawn(wacrab::console::run(bot.control_handle(), bot.services()));
    }

    let control = bot.control_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, shutting down");
            control.shutdown(false);
        }
    });

    let code = bot.wait_exit().await;
    std::process::exit(code);
}
