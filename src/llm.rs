//! LLM chat clients used by the query engine.
//!
//! The engine only needs one operation: given a system instruction and a
//! grounded user prompt, produce an answer string. Three implementations:
//!
//! | Config value | Client | Endpoint |
//! |--------------|--------|----------|
//! | `"openai"` | [`OpenAiChatClient`] | any OpenAI-compatible `/chat/completions` |
//! | `"ollama"` | [`OllamaClient`] | local `POST /api/generate` |
//! | `"disabled"` | [`DisabledClient`] | none; deterministic extractive fallback |
//!
//! The disabled client answers by echoing the most relevant sources, so
//! retrieval, source attribution, and query history work without any
//! credentials; answer quality is what an LLM adds on top.
//!
//! # Retry Strategy
//!
//! Remote calls retry like the embedder: up to 3 attempts with exponential
//! backoff (1 s, 2 s), cut short when the caller's deadline would expire,
//! surfacing the final failure as [`Error::BackendUnavailable`]. HTTP 429
//! and 5xx retry; other 4xx fail immediately.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 3;

/// A chat-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider label for logs and diagnostics.
    fn provider(&self) -> &str;

    /// Produce an answer for `prompt` under `system`, bounded by `deadline`.
    async fn complete(&self, system: &str, prompt: &str, deadline: &Deadline) -> Result<String>;
}

/// Instantiate the client named by the configuration.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledClient)),
        "openai" => Ok(Box::new(OpenAiChatClient::new(config))),
        "ollama" => Ok(Box::new(OllamaClient::new(config))),
        other => Err(Error::InvalidInput(format!("unknown llm provider: {}", other))),
    }
}

/// Sleep out the backoff for `attempt`, unless the deadline would expire
/// first. Attempt 0 sleeps nothing.
async fn backoff(attempt: u32, deadline: &Deadline) -> Result<()> {
    if attempt > 0 {
        let delay = Duration::from_secs(1 << (attempt - 1));
        match deadline.remaining() {
            Some(rem) if rem <= delay => return Err(Error::DeadlineExceeded),
            _ => {}
        }
        tokio::time::sleep(delay).await;
    }
    deadline.check()
}

fn http_client(deadline: &Deadline) -> Result<reqwest::Client> {
    let timeout = deadline.remaining().unwrap_or(Duration::from_secs(60));
    if timeout.is_zero() {
        return Err(Error::DeadlineExceeded);
    }
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("http client: {}", e)))
}

// ============ Disabled client ============

/// No-credential fallback: answers are assembled from the prompt's context
/// block rather than generated.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    fn provider(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, prompt: &str, deadline: &Deadline) -> Result<String> {
        deadline.check()?;
        // The prompt carries the assembled context between fixed markers;
        // surface it as the answer so callers still get grounded output.
        let context = prompt
            .split_once("Context:\n")
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.split_once("\n\nQuestion:"))
            .map(|(ctx, _)| ctx.trim())
            .unwrap_or("");

        if context.is_empty() {
            return Ok(
                "No language model is configured; no relevant content was found.".to_string(),
            );
        }
        Ok(format!(
            "No language model is configured. The most relevant saved content:\n\n{}",
            context
        ))
    }
}

// ============ OpenAI-compatible chat client ============

/// Chat client for any OpenAI-compatible completions endpoint (OpenAI,
/// Groq, and friends). Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiChatClient {
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, prompt: &str, deadline: &Deadline) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::BackendUnavailable("OPENAI_API_KEY not set".to_string()))?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            backoff(attempt, deadline).await?;

            let client = http_client(deadline)?;
            let resp = client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let parsed: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::BackendUnavailable(format!("invalid response: {}", e)))?;
                return parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| Error::BackendUnavailable("empty completion".to_string()));
            }

            let text = response.text().await.unwrap_or_default();
            // Rate limited or server error: retry. Other 4xx: fail now.
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(format!("chat API error {}: {}", status, text));
                continue;
            }
            return Err(Error::BackendUnavailable(format!(
                "chat API error {}: {}",
                status, text
            )));
        }

        Err(Error::BackendUnavailable(
            last_err.unwrap_or_else(|| "chat completion failed after retries".to_string()),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

// ============ Ollama client ============

/// Local inference via an Ollama server.
pub struct OllamaClient {
    model: String,
    base_url: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn provider(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, system: &str, prompt: &str, deadline: &Deadline) -> Result<String> {
        let body = json!({
            "model": self.model,
            "system": system,
            "prompt": prompt,
            "stream": false,
        });

        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            backoff(attempt, deadline).await?;

            let client = http_client(deadline)?;
            let resp = client
                .post(format!("{}/api/generate", self.base_url))
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            };

            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                last_err = Some(format!("ollama error: {}", text));
                continue;
            }

            let parsed: OllamaResponse = response
                .json()
                .await
                .map_err(|e| Error::BackendUnavailable(format!("invalid response: {}", e)))?;
            return Ok(parsed.response.trim().to_string());
        }

        Err(Error::BackendUnavailable(
            last_err.unwrap_or_else(|| "ollama call failed after retries".to_string()),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}
