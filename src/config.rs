//! Configuration
//!
//! Layered load: built-in defaults, then an optional JSON config file, then
//! `WACRAB_*` environment variables. Invalid values never abort startup —
//! they are replaced with the default and logged, so a hand-edited config
//! file degrades instead of bricking the bot.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BotError;

pub const DEFAULT_PREFIXES: &[&str] = &["!", ".", "#", "/"];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.4,
            ki: 0.05,
            kd: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiServiceConfig {
    pub id: String,
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Filled from `{ID}_API_KEY` (comma-separated) when empty.
    pub api_keys: Vec<String>,
}

impl Default for AiServiceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            enabled: true,
            base_url: String::new(),
            model: String::new(),
            api_keys: Vec::new(),
        }
    }
}

/// Tunables for the health model's metric-to-vector reduction.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthTuning {
    /// Per-disconnect exponential decay applied to connectivity.
    pub disconnect_decay: f64,
    /// Per-error exponential decay applied to integrity.
    pub error_decay: f64,
    /// Mean latency (ms) at which performance bottoms out.
    pub latency_floor_ms: f64,
}

impl Default for HealthTuning {
    fn default() -> Self {
        Self {
            disconnect_decay: 0.25,
            error_decay: 0.1,
            latency_floor_ms: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub pid: PidGains,
    pub health: HealthTuning,
    pub services: Vec<AiServiceConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            pid: PidGains::default(),
            health: HealthTuning::default(),
            services: default_services(),
        }
    }
}

fn default_services() -> Vec<AiServiceConfig> {
    vec![
        AiServiceConfig {
            id: "gemini".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
            model: "gemini-pro".into(),
            ..Default::default()
        },
        AiServiceConfig {
            id: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-3.5-turbo".into(),
            ..Default::default()
        },
        AiServiceConfig {
            id: "groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            model: "llama3-8b-8192".into(),
            ..Default::default()
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub bot_name: String,
    /// Bare phone numbers with administrator rights.
    pub owner_numbers: Vec<String>,
    pub prefixes: Vec<String>,
    pub bridge_url: String,
    pub data_dir: PathBuf,
    pub audit_log: PathBuf,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub health_check_interval_ms: u64,
    pub suggestion_threshold: f64,
    pub default_cooldown_secs: u64,
    pub session_timeout_secs: u64,
    pub state_flush_interval_secs: u64,
    pub max_text_len: usize,
    pub ai: AiConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            bot_name: "Wacrab".into(),
            owner_numbers: Vec::new(),
            prefixes: DEFAULT_PREFIXES.iter().map(|s| s.to_string()).collect(),
            bridge_url: "ws://127.0.0.1:8055/ws".into(),
            data_dir: home.join(".wacrab").join("data"),
            audit_log: home.join(".wacrab").join("audit.log"),
            max_reconnect_attempts: 6,
            reconnect_base_delay_ms: 2000,
            health_check_interval_ms: 30_000,
            suggestion_threshold: 0.6,
            default_cooldown_secs: 3,
            session_timeout_secs: 60,
            state_flush_interval_secs: 300,
            max_text_len: 4096,
            ai: AiConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load, hydrate from env, validate. `path` points at an explicit config
    /// file; without one, `<data parent>/wacrab.json` is tried if present.
    pub fn load(path: Option<&Path>) -> Result<Self, BotError> {
        let mut builder = config::Config::builder();
        match path {
            Some(p) => {
                builder = builder.add_source(config::File::from(p).required(true));
            }
            None => {
                let default_path = dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".wacrab")
                    .join("wacrab.json");
                builder = builder.add_source(
                    config::File::from(default_path).required(false),
                );
            }
        }
        builder = builder.add_source(
            config::Environment::with_prefix("WACRAB").separator("__"),
        );

        let mut cfg: BotConfig = builder
            .build()
            .map_err(|e| BotError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BotError::Config(e.to_string()))?;

        cfg.hydrate_from_env();
        cfg.validate();
        Ok(cfg)
    }

    fn hydrate_from_env(&mut self) {
        if self.owner_numbers.is_empty()
            && let Ok(owners) = std::env::var("OWNER_NUMBERS")
        {
            self.owner_numbers = split_csv(&owners);
        }
        for service in &mut self.ai.services {
            if service.api_keys.is_empty() {
                let var = format!("{}_API_KEY", service.id.to_ascii_uppercase());
                if let Ok(keys) = std::env::var(&var) {
                    service.api_keys = split_csv(&keys);
                }
            }
        }
    }

    /// Replace out-of-range values with defaults, warning per key.
    pub fn validate(&mut self) {
        let defaults = BotConfig::default();
        if self.health_check_interval_ms < 5000 {
            tracing::warn!(
                value = self.health_check_interval_ms,
                "health_check_interval_ms below 5000, using default"
            );
            self.health_check_interval_ms = defaults.health_check_interval_ms;
        }
        if self.reconnect_base_delay_ms == 0 {
            tracing::warn!("reconnect_base_delay_ms must be positive, using default");
            self.reconnect_base_delay_ms = defaults.reconnect_base_delay_ms;
        }
        if self.prefixes.is_empty() {
            tracing::warn!("empty prefix list, using defaults");
            self.prefixes = defaults.prefixes.clone();
        }
        if !(0.0..=1.0).contains(&self.suggestion_threshold) {
            tracing::warn!(
                value = self.suggestion_threshold,
                "suggestion_threshold outside [0,1], using default"
            );
            self.suggestion_threshold = defaults.suggestion_threshold;
        }
        let pid = &mut self.ai.pid;
        if !(pid.kp.is_finite() && pid.ki.is_finite() && pid.kd.is_finite()) {
            tracing::warn!("non-finite PID gains, using defaults");
            *pid = PidGains::default();
        }
        let health = &mut self.ai.health;
        if health.disconnect_decay <= 0.0
            || health.error_decay <= 0.0
            || health.latency_floor_ms <= 0.0
        {
            tracing::warn!("non-positive health tuning, using defaults");
            *health = HealthTuning::default();
        }
        if self.max_text_len == 0 {
            self.max_text_len = defaults.max_text_len;
        }
    }

    pub fn is_owner(&self, bare_number: &str) -> bool {
        self.owner_numbers.iter().any(|o| o == bare_number)
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.max_reconnect_attempts, 6);
        assert_eq!(cfg.reconnect_base_delay_ms, 2000);
        assert_eq!(cfg.health_check_interval_ms, 30_000);
        assert_eq!(cfg.prefixes.len(), 4);
        assert_eq!(cfg.ai.services.len(), 3);
    }

    #[test]
    fn validate_clamps_health_interval() {
        let mut cfg = BotConfig {
            health_check_interval_ms: 100,
            ..Default::default()
        };
        cfg.validate();
        assert_eq!(cfg.health_check_interval_ms, 30_000);
    }

    #[test]
    fn validate_restores_pid_defaults_on_nan() {
        let mut cfg = BotConfig::default();
        cfg.ai.pid.kp = f64::NAN;
        cfg.validate();
        assert_eq!(cfg.ai.pid, PidGains::default());
    }

    #[test]
    fn validate_restores_empty_prefixes() {
        let mut cfg = BotConfig {
            prefixes: vec![],
            ..Default::default()
        };
        cfg.validate();
        assert_eq!(cfg.prefixes, BotConfig::default().prefixes);
    }

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(split_csv("a, b,,c "), vec!["a", "b", "c"]);
    }
}
