//! AI Chat Services
//!
//! A prioritized list of chat providers behind the [`ProviderClient`]
//! capability. Failover policy is explicit: a rejected or exhausted key
//! rotates to the provider's next key, a network fault or provider failure
//! moves on to the next provider. Conversation history is kept per chat,
//! clamped to the last exchanges, and cleared daily.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::config::AiServiceConfig;
use crate::envelope::{bare, Envelope};
use crate::vitals::Vitals;

/// Turns of context kept per chat (user + assistant, system excluded).
const MAX_HISTORY_TURNS: usize = 10;
/// Quoted context is trimmed to this many characters.
const QUOTE_CONTEXT_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("api key rejected")]
    InvalidKey,
    #[error("quota exhausted")]
    QuotaExceeded,
    #[error("network failure: {0}")]
    Network(String),
    #[error("provider failure: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> &str;
    async fn query(&self, api_key: &str, history: &[ChatTurn]) -> Result<String, ProviderError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint, which covers
/// every configured provider family.
pub struct OpenAiCompatClient {
    id: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(id: String, base_url: String, model: String, http: reqwest::Client) -> Self {
        Self {
            id,
            base_url,
            model,
            http,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(&self, api_key: &str, history: &[ChatTurn]) -> Result<String, ProviderError> {
        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(|t| json!({ "role": t.role.as_str(), "content": t.content }))
            .collect();
        let body = json!({ "model": self.model, "messages": messages });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::InvalidKey);
        }
        if status.as_u16() == 429 {
            return Err(ProviderError::QuotaExceeded);
        }
        if !status.is_success() {
            return Err(ProviderError::Other(format!("http status {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::Other("no completion in response".into()))
    }
}

pub struct ProviderSlot {
    pub client: Box<dyn ProviderClient>,
    pub api_keys: Vec<String>,
}

pub struct AiServiceManager {
    bot_name: String,
    providers: Vec<ProviderSlot>,
    history: Mutex<HashMap<String, Vec<ChatTurn>>>,
}

impl AiServiceManager {
    pub fn from_config(bot_name: String, services: &[AiServiceConfig]) -> Self {
        let http = reqwest::Client::new();
        let providers = services
            .iter()
            .filter(|s| s.enabled && !s.api_keys.is_empty())
            .map(|s| ProviderSlot {
                client: Box::new(OpenAiCompatClient::new(
                    s.id.clone(),
                    s.base_url.clone(),
                    s.model.clone(),
                    http.clone(),
                )),
                api_keys: s.api_keys.clone(),
            })
            .collect();
        Self::with_providers(bot_name, providers)
    }

    pub fn with_providers(bot_name: String, providers: Vec<ProviderSlot>) -> Self {
        Self {
            bot_name,
            providers,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// 24-hour memory reset.
    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
        tracing::info!("conversation memory cleared");
    }

    /// Walk providers in priority order. Key-level failures rotate keys
    /// within the provider; everything else moves to the next provider.
    pub async fn query_failover(&self, history: &[ChatTurn]) -> Option<(String, String)> {
        for slot in &self.providers {
            let id = slot.client.id();
            for key in &slot.api_keys {
                match slot.client.query(key, history).await {
                    Ok(text) => return Some((id.to_string(), text)),
                    Err(e @ (ProviderError::InvalidKey | ProviderError::QuotaExceeded)) => {
                        tracing::warn!(provider = id, "key unusable ({e}), rotating");
                        continue;
                    }
                    Err(ProviderError::Network(e)) => {
                        tracing::warn!(provider = id, "unreachable ({e}), next provider");
                        break;
                    }
                    Err(ProviderError::Other(e)) => {
                        tracing::warn!(provider = id, "query failed ({e}), next provider");
                        break;
                    }
                }
            }
        }
        None
    }

    /// Run one AI exchange for a chat. Returns the reply text, or `None`
    /// when every provider failed.
    pub async fn handle_chat(&self, env: &Envelope, vitals: &Vitals) -> Option<String> {
        let prompt = match &env.quoted {
            Some(q) if !q.text.is_empty() => {
                let trimmed: String = q.text.chars().take(QUOTE_CONTEXT_LEN).collect();
                format!(
                    "[Context from @{}: \"{}\"]\n\n{}",
                    bare(&q.sender),
                    trimmed,
                    env.text
                )
            }
            _ => env.text.clone(),
        };

        let conversation = {
            let mut all = self.history.lock().unwrap();
            let history = all.entry(env.chat.clone()).or_default();
            history.push(ChatTurn {
                role: Role::User,
                content: prompt,
            });
            while history.len() > MAX_HISTORY_TURNS {
                history.remove(0);
            }

            let snap = vitals.snapshot();
            let system = ChatTurn {
                role: Role::System,
                content: format!(
                    "You are {}, a conversational assistant with a simulated inner state. \
                     Current condition: energy {:.1}%, mood {}. Let it color your tone.",
                    self.bot_name,
                    snap.energy,
                    snap.mood.as_str()
                ),
            };
            let mut conversation = vec![system];
            conversation.extend(history.iter().cloned());
            conversation
        };

        let (provider, text) = self.query_failover(&conversation).await?;
        tracing::info!(provider = %provider, chat = %env.chat, "ai reply produced");

        let mut all = self.history.lock().unwrap();
        if let Some(history) = all.get_mut(&env.chat) {
            history.push(ChatTurn {
                role: Role::Assistant,
                content: text.clone(),
            });
            while history.len() > MAX_HISTORY_TURNS {
                history.remove(0);
            }
        }

        let impact = emotional_impact(&env.text) + emotional_impact(&text);
        vitals.spike_heart_rate(impact);
        vitals.consume_energy(0.2);

        Some(text)
    }
}

/// Crude lexical affect score in [0,1].
pub fn emotional_impact(text: &str) -> f64 {
    let weights: &[(&str, f64)] = &[
        ("angry", 2.0),
        ("hate", 2.0),
        ("annoyed", 1.5),
        ("happy", 1.0),
        ("like", 1.0),
        ("love", 1.5),
        ("glad", 1.5),
        ("sad", 1.2),
        ("disappointed", 1.2),
        ("afraid", 1.8),
    ];
    let mut score = 0.0;
    for word in text.to_lowercase().split_whitespace() {
        if let Some((_, w)) = weights.iter().find(|(k, _)| *k == word) {
            score += w;
        }
    }
    (score / 5.0).min(1.0)
}
