//! Chat client — unified interface over Ollama and OpenAI-compatible
//! backends, with bounded retries and per-request timeouts.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{ChatRequest, ChatResponse};

/// Provider backend for chat completion.
#[derive(Debug, Clone)]
pub enum ChatProvider {
    /// Ollama running locally (recommended).
    Ollama {
        /// Server base URL.
        base_url: String,
    },
    /// OpenAI-compatible API (also works with Anthropic, Together, etc.).
    OpenAiCompatible {
        /// Server base URL.
        base_url: String,
        /// Bearer token; empty string means no auth header.
        api_key: String,
    },
    /// No LLM available — all calls fail, triggering rule-based fallback.
    None,
}

/// The chat-completion client routing requests to the configured backend.
pub struct ChatClient {
    provider: ChatProvider,
    http: Client,
    model: String,
    max_retries: u32,
}

impl ChatClient {
    /// Create a new chat client.
    #[must_use]
    pub fn new(provider: ChatProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
        }
    }

    /// A client with no backend (all calls fail → rule-based fallback).
    #[must_use]
    pub fn none() -> Self {
        Self {
            provider: ChatProvider::None,
            http: Client::new(),
            model: String::new(),
            max_retries: 0,
        }
    }

    /// Whether a backend is configured at all.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, ChatProvider::None)
    }

    /// One system prompt, one user prompt, one answer string.
    ///
    /// This is the whole surface the memory engine consumes.
    ///
    /// # Errors
    ///
    /// Returns an error when no backend is configured or all retries fail.
    /// Callers treat any error as "skip the enrichment".
    pub async fn simple_chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = ChatRequest::new(system, user);
        let response = self.generate(&request).await?;
        Ok(response.text)
    }

    /// Generate a response from the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Unavailable`] with no backend, or
    /// [`LlmError::RetriesExhausted`] when every attempt failed.
    pub async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match &self.provider {
            ChatProvider::None => {
                Err(LlmError::Unavailable("No LLM provider configured".into()))
            }
            ChatProvider::Ollama { base_url } => self.generate_ollama(base_url, request).await,
            ChatProvider::OpenAiCompatible { base_url, api_key } => {
                self.generate_openai(base_url, api_key, request).await
            }
        }
    }

    /// Generate using Ollama's API.
    async fn generate_ollama(
        &self,
        base_url: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{base_url}/api/generate");
        let body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", request.system, request.user),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying LLM call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let start = Instant::now();
            let result = self
                .http
                .post(&url)
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;

            let latency_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    if resp.status().is_success() {
                        let json: serde_json::Value = resp
                            .json()
                            .await
                            .map_err(|e| LlmError::ParseError(e.to_string()))?;

                        let text = json["response"].as_str().unwrap_or("").to_string();

                        return Ok(ChatResponse {
                            text,
                            tokens_generated: json["eval_count"].as_u64().unwrap_or(0) as u32,
                            latency_ms,
                            model: self.model.clone(),
                        });
                    }
                    last_error = format!(
                        "HTTP {}: {}",
                        resp.status(),
                        resp.text().await.unwrap_or_default()
                    );
                    warn!("Ollama returned error: {}", last_error);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!("Ollama request timed out after {}ms", request.timeout_ms);
                    } else {
                        warn!("Ollama request failed: {}", last_error);
                    }
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Generate using an OpenAI-compatible API.
    async fn generate_openai(
        &self,
        base_url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{base_url}/v1/chat/completions");
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying LLM call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let start = Instant::now();
            let mut builder = self
                .http
                .post(&url)
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms));
            if !api_key.is_empty() {
                builder = builder.header("Authorization", format!("Bearer {api_key}"));
            }
            let result = builder.send().await;

            let latency_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    if resp.status().is_success() {
                        let json: serde_json::Value = resp
                            .json()
                            .await
                            .map_err(|e| LlmError::ParseError(e.to_string()))?;

                        let text = json["choices"][0]["message"]["content"]
                            .as_str()
                            .unwrap_or("")
                            .to_string();

                        let tokens =
                            json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;

                        return Ok(ChatResponse {
                            text,
                            tokens_generated: tokens,
                            latency_ms,
                            model: self.model.clone(),
                        });
                    }
                    last_error = format!("HTTP {}", resp.status());
                    warn!("Chat API returned error: {}", last_error);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Chat API request failed: {}", last_error);
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = ChatClient::none();
        assert!(!client.is_available());

        let err = client
            .simple_chat("system", "user")
            .await
            .expect_err("must fail");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_exhausts_retries() {
        // A port that nothing listens on; one retry keeps the test quick.
        let client = ChatClient::new(
            ChatProvider::Ollama {
                base_url: "http://127.0.0.1:9".to_string(),
            },
            "test-model",
            1,
        );

        let err = client
            .generate(&ChatRequest::new("s", "u").with_timeout(200))
            .await
            .expect_err("must fail");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
    }
}
