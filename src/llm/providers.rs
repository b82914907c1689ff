// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP chat backends: Ollama, OpenAI-compatible (Groq, OpenRouter) and
//! the Hugging Face inference API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChatMessage, ChatModel, Role};
use crate::{CopilotError, Result};

fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Ollama API client for local inference
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self { client: http_client(timeout)?, base_url })
    }

    /// Check if Ollama is reachable
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                CopilotError::LlmUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List locally pulled models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let tags: TagsResponse = self.client.get(&url).send().await?.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model,
            messages,
            stream: false,
            options: OllamaOptions { temperature },
        };

        debug!("Sending request to Ollama: model={}", model);

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(CopilotError::LlmUnavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: OllamaChatResponse = response.json().await?;
        Ok(result.message.content)
    }
}

/// Client for `/chat/completions` endpoints with bearer auth
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: &str, max_tokens: u32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature,
        };

        debug!("Sending chat completion: url={} model={}", url, model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body: CompletionResponse = response.json().await.map_err(|e| {
            CopilotError::LlmUnavailable(format!("{} returned status {} ({})", self.base_url, status, e))
        })?;

        if let Some(err) = body.error {
            return Err(CopilotError::LlmUnavailable(err.message));
        }
        if !status.is_success() {
            return Err(CopilotError::LlmUnavailable(format!("{} returned status {}", self.base_url, status)));
        }

        body.choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| CopilotError::LlmUnavailable("No choices in response".to_string()))
    }
}

/// Hugging Face text-generation inference API
pub struct HuggingFaceClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: InferenceParameters,
}

#[derive(Serialize)]
struct InferenceParameters {
    temperature: f32,
    max_new_tokens: u32,
}

#[derive(Deserialize)]
struct Generation {
    generated_text: String,
}

impl HuggingFaceClient {
    pub fn new(base_url: &str, api_key: &str, max_tokens: u32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_tokens,
        })
    }
}

/// Flatten chat turns into one prompt for text-generation models
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => format!("System: {}", m.content),
            Role::User => m.content.clone(),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ChatModel for HuggingFaceClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!("{}/{}", self.base_url, model);
        let request = InferenceRequest {
            inputs: flatten_messages(messages),
            parameters: InferenceParameters {
                // The inference API rejects a temperature of exactly zero
                temperature: temperature.max(0.01),
                max_new_tokens: self.max_tokens.min(512),
            },
        };

        debug!("Sending request to Hugging Face: model={}", model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CopilotError::LlmUnavailable(format!(
                "Hugging Face returned status {}",
                response.status()
            )));
        }

        let generations: Vec<Generation> = response.json().await?;
        generations
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| CopilotError::LlmUnavailable("Empty generation".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_url_normalized() {
        let client = OllamaClient::new("http://localhost:11434/api/chat/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "llama-3.1-8b-instant",
            messages: &messages,
            max_tokens: 2000,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_completion_response_parsing() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"SELECT 1"}}]}"#,
        )
        .unwrap();
        let content = body.choices.unwrap().remove(0).message.content;
        assert_eq!(content.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_flatten_messages() {
        let prompt = flatten_messages(&[ChatMessage::system("rules"), ChatMessage::user("question")]);
        assert_eq!(prompt, "System: rules\n\nquestion");
    }
}
