//! Ollama client for generation and embeddings.
//!
//! Calls `POST /api/generate` and `POST /api/embed` on a local Ollama
//! instance with exponential-backoff retry:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::OllamaConfig;
use askcorpus_core::traits::{Embedder, Generator};

/// Failure modes surfaced to callers that want to distinguish "Ollama is
/// down" from "Ollama rejected the request".
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Ollama unreachable at {url} (is Ollama running?): {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Ollama API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Invalid Ollama response: {0}")]
    InvalidResponse(String),
}

pub struct OllamaClient {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn llm_model(&self) -> &str {
        &self.config.llm_model
    }

    /// POST a JSON body with the shared retry policy and return the parsed
    /// response JSON.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.config.url, path);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(url = %url, attempt, "retrying Ollama request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(
                            LlmError::Api {
                                status: status.as_u16(),
                                body: body_text,
                            }
                            .into(),
                        );
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    }
                    .into());
                }
                Err(e) => {
                    last_err = Some(
                        LlmError::Unreachable {
                            url: self.config.url.clone(),
                            source: e,
                        }
                        .into(),
                    );
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("Ollama request failed after retries: {}", url)))
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.llm_model,
            "prompt": prompt,
            "system": system_prompt,
            "stream": false,
            "options": { "temperature": temperature },
        });

        let json = self.post_with_retry("/api/generate", &body).await?;

        let response = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| LlmError::InvalidResponse("missing response field".to_string()))?;

        Ok(response.trim().to_string())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": text,
        });

        let json = self.post_with_retry("/api/embed", &body).await?;

        let first = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|a| a.first())
            .and_then(|e| e.as_array())
            .ok_or_else(|| LlmError::InvalidResponse("missing embeddings array".to_string()))?;

        Ok(first
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}
