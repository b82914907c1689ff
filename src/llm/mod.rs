// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! LLM access with automatic multi-provider fallback
//!
//! Providers are tried in chain order starting from the configured primary:
//! every model of a provider is attempted before moving to the next one.
//! When the whole chain is exhausted the router answers in safe mode with a
//! fixed notice instead of failing the caller.

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::{CopilotError, Result};
pub use providers::{HuggingFaceClient, OllamaClient, OpenAiCompatClient};

/// Reply content used when every provider failed
pub const SAFE_MODE_NOTICE: &str =
    "**System Notice:** All AI providers are currently at capacity. Please try again in a few minutes.";

/// Model name reported for safe-mode replies
pub const SAFE_MODE_MODEL: &str = "mock-fallback";

/// A hosted or local LLM backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    Groq,
    OpenRouter,
    HuggingFace,
}

impl Provider {
    /// Fallback order
    pub const CHAIN: [Provider; 4] = [
        Provider::Ollama,
        Provider::Groq,
        Provider::OpenRouter,
        Provider::HuggingFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
            Provider::HuggingFace => "huggingface",
        }
    }

    /// This provider and everything after it in the chain
    pub fn chain_from(self) -> impl Iterator<Item = Provider> {
        Self::CHAIN.into_iter().skip_while(move |p| *p != self)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::CHAIN
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CopilotError::Config(format!("Unknown LLM provider: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Chat completion backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Router output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmReply {
    pub content: String,
    /// `None` when the reply is the safe-mode notice
    pub provider: Option<Provider>,
    pub model: String,
}

impl LlmReply {
    fn safe_mode() -> Self {
        Self {
            content: SAFE_MODE_NOTICE.to_string(),
            provider: None,
            model: SAFE_MODE_MODEL.to_string(),
        }
    }

    pub fn is_safe_mode(&self) -> bool {
        self.provider.is_none()
    }
}

/// Walks the provider chain until a model answers
pub struct LlmRouter {
    primary: Provider,
    temperature: f32,
    retries: u32,
    models: HashMap<Provider, Vec<String>>,
    backends: HashMap<Provider, Arc<dyn ChatModel>>,
    last_success: Mutex<Option<(Provider, String)>>,
}

impl LlmRouter {
    /// Build HTTP backends for every enabled provider with a usable key
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut backends: Vec<(Provider, Arc<dyn ChatModel>)> = Vec::new();

        for provider in Provider::CHAIN {
            let settings = config.provider(provider);
            if !settings.enabled {
                debug!("[LLM] {} disabled in config", provider);
                continue;
            }
            let Some(key) = config.api_key(provider) else {
                warn!(
                    "[LLM] {} API key not found ({}), skipping provider",
                    provider,
                    settings.api_key_env.as_deref().unwrap_or("-")
                );
                continue;
            };

            let backend: Arc<dyn ChatModel> = match provider {
                Provider::Ollama => Arc::new(OllamaClient::new(&settings.base_url, timeout)?),
                Provider::Groq | Provider::OpenRouter => Arc::new(OpenAiCompatClient::new(
                    &settings.base_url,
                    &key,
                    config.max_tokens,
                    timeout,
                )?),
                Provider::HuggingFace => Arc::new(HuggingFaceClient::new(
                    &settings.base_url,
                    &key,
                    config.max_tokens,
                    timeout,
                )?),
            };
            backends.push((provider, backend));
        }

        Ok(Self::with_backends(config, backends))
    }

    /// Use explicit backends; providers without one are skipped
    pub fn with_backends(config: &LlmConfig, backends: Vec<(Provider, Arc<dyn ChatModel>)>) -> Self {
        let models = Provider::CHAIN
            .into_iter()
            .map(|p| (p, config.provider(p).models.clone()))
            .collect();
        Self {
            primary: config.primary,
            temperature: config.temperature,
            retries: config.retries,
            models,
            backends: backends.into_iter().collect(),
            last_success: Mutex::new(None),
        }
    }

    /// Providers that will actually be attempted, in order
    pub fn active_chain(&self) -> Vec<Provider> {
        self.primary
            .chain_from()
            .filter(|p| self.backends.contains_key(p))
            .collect()
    }

    /// Send messages down the chain. Never fails: exhaustion yields the
    /// safe-mode notice.
    pub async fn invoke(&self, messages: &[ChatMessage]) -> LlmReply {
        for provider in self.primary.chain_from() {
            let Some(backend) = self.backends.get(&provider) else {
                debug!("[LLM] No backend for {}, skipping", provider);
                continue;
            };
            let models = self.models.get(&provider).map(Vec::as_slice).unwrap_or(&[]);

            for model in models {
                info!("[LLM] Using {} model: {}", provider, model);
                match self.complete_with_retry(backend.as_ref(), model, messages).await {
                    Ok(content) => {
                        self.record_success(provider, model);
                        return LlmReply {
                            content,
                            provider: Some(provider),
                            model: model.clone(),
                        };
                    }
                    Err(e) => warn!("[LLM] {} model {} failed: {}", provider, model, e),
                }
            }
            error!("[LLM] {} exhausted, moving down the chain", provider);
        }

        error!("[LLM] All providers exhausted. Using Safe Mode.");
        LlmReply::safe_mode()
    }

    /// Convenience for single-prompt callers
    pub async fn invoke_prompt(&self, prompt: &str) -> LlmReply {
        self.invoke(&[ChatMessage::user(prompt)]).await
    }

    async fn complete_with_retry(
        &self,
        backend: &dyn ChatModel,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!("Retrying {} in {:?} (attempt {})", model, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match backend.complete(model, messages, self.temperature).await {
                Ok(content) => return Ok(content),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| CopilotError::LlmUnavailable("Unknown error".to_string())))
    }

    fn record_success(&self, provider: Provider, model: &str) {
        if let Ok(mut last) = self.last_success.lock() {
            *last = Some((provider, model.to_string()));
        }
    }

    /// Provider and model of the most recent successful call
    pub fn last_success(&self) -> Option<(Provider, String)> {
        self.last_success.lock().ok().and_then(|l| l.clone())
    }

    /// Forget the last success so reporting starts from the primary again
    pub fn reset(&self) {
        if let Ok(mut last) = self.last_success.lock() {
            *last = None;
        }
        info!("[LLM] Reset to {} primary model", self.primary);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Backend that replays canned replies and records the models it saw
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        /// Always answers with the same text
        pub fn answering(text: &str) -> Arc<Self> {
            Self::new((0..64).map(|_| Ok(text.to_string())).collect())
        }

        pub fn failing() -> Arc<Self> {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, model: &str, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
            self.calls.lock().unwrap().push(model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CopilotError::LlmUnavailable("script exhausted".to_string())))
        }
    }

    /// Router whose primary provider is backed by `model`
    pub fn router_with(model: Arc<ScriptedModel>) -> LlmRouter {
        let config = LlmConfig::default();
        LlmRouter::with_backends(&config, vec![(config.primary, model as Arc<dyn ChatModel>)])
    }

    /// Router with no reachable providers
    pub fn offline_router() -> LlmRouter {
        LlmRouter::with_backends(&LlmConfig::default(), Vec::new())
    }
}
