//! Logging bootstrap.
//!
//! EnvFilter + fmt console layer behind a reload handle so verbosity can be
//! raised at runtime (the ADAPT corrective action, the operator `loglevel`
//! command). Debug mode adds a daily-rotated file layer; the returned
//! [`WorkerGuard`] must stay alive for the file writer to flush.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }
}

/// Runtime control over the console filter.
#[derive(Clone)]
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Swap the console filter to a new base level. Invalid levels are
    /// rejected with a warning rather than an error, mirroring how operator
    /// input is treated everywhere else.
    pub fn set_level(&self, level: &str) -> bool {
        let level = level.trim().to_ascii_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            tracing::warn!("invalid log level '{level}', keeping current filter");
            return false;
        }
        match self.reload.reload(EnvFilter::new(&level)) {
            Ok(()) => {
                tracing::info!("log level set to '{level}'");
                true
            }
            Err(e) => {
                tracing::warn!("failed to reload log filter: {e}");
                false
            }
        }
    }
}

pub fn init(config: LogConfig) -> anyhow::Result<(LogHandle, Option<WorkerGuard>)> {
    let base = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let (file_layer, guard) = match (&config.log_dir, config.debug) {
        (Some(dir), true) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "wacrab.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok((LogHandle { reload: handle }, guard))
}
