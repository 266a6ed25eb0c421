//! Embedding generation: backends, caching, and normalization.
//!
//! The [`Embedder`] maps non-empty text to an L2-normalized vector of the
//! configured dimension. Callers never see which backend is in use:
//!
//! | Config value | Backend | Notes |
//! |--------------|---------|-------|
//! | `"hashing"` | [`HashingBackend`] | local, deterministic token feature hashing |
//! | `"openai"` | [`OpenAiBackend`] | OpenAI-compatible embeddings API with batching and retry |
//!
//! Embeddings are pure functions of the input text and the (fixed) model
//! identity, so results are cached per process behind a SHA-256 key.
//!
//! # Retry Strategy (remote backend)
//!
//! Up to `max_retries` attempts with exponential backoff (1 s, 2 s, 4 s),
//! aborted early when the operation deadline would expire. HTTP 429 and
//! 5xx retry; other 4xx fail immediately. The final failure surfaces as
//! [`Error::BackendUnavailable`].
//!
//! # Batch Atomicity
//!
//! `embed_batch` returns one vector per input in order, or fails as a
//! whole; partial results are never produced.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::vector;

/// A backend that turns a batch of texts into raw (unnormalized) vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Opaque model identity (e.g. `"token-hash-v1"`, `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Output dimensionality D.
    fn dims(&self) -> usize;

    /// Embed every text, one output per input, all-or-nothing.
    async fn embed_batch(&self, texts: &[String], deadline: &Deadline) -> Result<Vec<Vec<f32>>>;
}

/// Backend-agnostic embedder with validation, caching, and normalization.
pub struct Embedder {
    backend: Box<dyn EmbeddingBackend>,
    cache: Mutex<HashMap<[u8; 32], Vec<f32>>>,
}

impl Embedder {
    pub fn new(backend: Box<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        Ok(Self::new(create_backend(config, dims)?))
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    /// Embed a single text. Fails with `InvalidInput` on empty input and
    /// `BackendUnavailable` when the backend is down after retries.
    pub async fn embed(&self, text: &str, deadline: &Deadline) -> Result<Vec<f32>> {
        let mut vecs = self.embed_batch(&[text.to_string()], deadline).await?;
        vecs.pop()
            .ok_or_else(|| Error::Internal("backend returned empty batch".to_string()))
    }

    /// Embed a batch; the result length equals the input length and
    /// positions correspond. All-or-nothing.
    pub async fn embed_batch(&self, texts: &[String], deadline: &Deadline) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            if text.trim().is_empty() {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }
        }

        // Partition into cached and uncached, preserving positions.
        let keys: Vec<[u8; 32]> = texts.iter().map(|t| cache_key(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();
        {
            let cache = self.cache.lock().unwrap();
            for (i, key) in keys.iter().enumerate() {
                match cache.get(key) {
                    Some(v) => results[i] = Some(v.clone()),
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            deadline.check()?;
            let uncached: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let raw = self.backend.embed_batch(&uncached, deadline).await?;
            if raw.len() != uncached.len() {
                return Err(Error::Internal(format!(
                    "backend returned {} vectors for {} inputs",
                    raw.len(),
                    uncached.len()
                )));
            }

            let mut cache = self.cache.lock().unwrap();
            for (&i, mut vec) in missing.iter().zip(raw.into_iter()) {
                if vec.len() != self.dims() {
                    return Err(Error::Internal(format!(
                        "backend returned dimension {} (expected {})",
                        vec.len(),
                        self.dims()
                    )));
                }
                vector::normalize(&mut vec);
                cache.insert(keys[i], vec.clone());
                results[i] = Some(vec);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap()).collect())
    }
}

fn cache_key(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// Instantiate the backend named by the configuration. `dims` comes from
/// the index configuration so the embedder and the index always agree on D.
pub fn create_backend(config: &EmbeddingConfig, dims: usize) -> Result<Box<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "hashing" => Ok(Box::new(HashingBackend::new(config.model.clone(), dims))),
        "openai" => Ok(Box::new(OpenAiBackend::new(config, dims)?)),
        other => Err(Error::InvalidInput(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Hashing backend ============

/// Deterministic token-feature-hashing embedder.
///
/// Each lowercased alphanumeric token is hashed (SHA-256) to a slot and a
/// sign; token weights accumulate and the sum is left raw (the [`Embedder`]
/// normalizes). Texts sharing vocabulary land near each other, which is
/// enough for offline use and for exercising the full retrieval pipeline
/// without a network.
pub struct HashingBackend {
    model: String,
    dims: usize,
}

impl HashingBackend {
    pub fn new(model: String, dims: usize) -> Self {
        Self { model, dims }
    }

    pub fn with_dims(dims: usize) -> Self {
        Self::new("token-hash-v1".to_string(), dims)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let mut tokens = 0usize;

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let slot = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
            tokens += 1;
        }

        // No alphanumeric tokens at all: hash the raw text so the output
        // is still a valid non-zero vector.
        if tokens == 0 {
            let digest = Sha256::digest(text.as_bytes());
            let slot = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            v[slot] = 1.0;
        }

        v
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String], _deadline: &Deadline) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI-compatible backend ============

/// Remote embedding backend over an OpenAI-compatible `/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiBackend {
    model: String,
    base_url: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::BackendUnavailable(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            dims,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn call_api(&self, texts: &[String], deadline: &Deadline) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::BackendUnavailable("OPENAI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("http client: {}", e)))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, cut short by the deadline.
                let delay = Duration::from_secs(1 << (attempt - 1).min(4));
                match deadline.remaining() {
                    Some(rem) if rem <= delay => return Err(Error::DeadlineExceeded),
                    _ => {}
                }
                tokio::time::sleep(delay).await;
            }
            deadline.check()?;

            let resp = client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            Error::BackendUnavailable(format!("invalid response body: {}", e))
                        })?;
                        return parse_embeddings_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    // Rate limited or server error: retry. Other 4xx: fail now.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("embeddings API error {}: {}", status, body_text));
                        continue;
                    }
                    return Err(Error::BackendUnavailable(format!(
                        "embeddings API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(Error::BackendUnavailable(
            last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
        ))
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String], deadline: &Deadline) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vecs = self.call_api(batch, deadline).await?;
            if vecs.len() != batch.len() {
                return Err(Error::BackendUnavailable(format!(
                    "embeddings API returned {} vectors for {} inputs",
                    vecs.len(),
                    batch.len()
                )));
            }
            all.extend(vecs);
        }
        Ok(all)
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::BackendUnavailable("response missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::BackendUnavailable("response missing embedding".to_string()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}
