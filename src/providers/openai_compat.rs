//! OpenAI-compatible chat completions over HTTP
//!
//! Works against OpenAI, Groq, Moonshot, Ollama and any other server that
//! speaks `POST {base_url}/chat/completions`. Rate-limit headers of every
//! supported dialect are normalized into [`ResourceCounters`].

use super::{Provider, ProviderError, ProviderReply, ProviderRequest};
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::health::{ProviderKey, parse_rate_limit_headers, parse_retry_after};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Connection and sampling settings for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub id: String,
    pub key: ProviderKey,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
    pub default_reset_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

pub struct OpenAiCompatProvider {
    settings: CompletionSettings,
    endpoint: String,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl OpenAiCompatProvider {
    pub fn new(settings: CompletionSettings, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                AppError::Config(format!(
                    "failed to build HTTP client for provider '{}': {}",
                    settings.id, e
                ))
            })?;
        let endpoint = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
        Ok(Self {
            settings,
            endpoint,
            client,
            clock,
        })
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    fn unavailable(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::Unavailable {
            provider: self.settings.id.clone(),
            reason: reason.into(),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::Malformed {
            provider: self.settings.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.settings.id
    }

    fn key(&self) -> &ProviderKey {
        &self.settings.key
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let mut messages = Vec::with_capacity(3);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        if let Some(primer) = request.primer.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: primer,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatCompletionRequest {
            model: self.settings.key.model(),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let mut outbound = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.settings.api_key {
            outbound = outbound.bearer_auth(api_key);
        }

        let response = outbound.send().await.map_err(|e| {
            if e.is_timeout() {
                self.unavailable(format!(
                    "timed out after {}s",
                    self.settings.timeout.as_secs()
                ))
            } else {
                self.unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let header_pairs = || headers.iter().map(|(n, v)| (n.as_str(), v.as_str()));
        let now = self.clock.now_epoch();
        let default_reset = self.settings.default_reset_seconds;
        let counters = parse_rate_limit_headers(header_pairs(), now, default_reset);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(header_pairs(), now, default_reset)
                .or(counters.reset_after_seconds());
            tracing::debug!(
                provider = %self.settings.key,
                retry_after_seconds = ?retry_after,
                "Provider returned 429"
            );
            return Err(ProviderError::RateLimited {
                provider: self.settings.id.clone(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP {}", status.as_u16())));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.malformed(e.to_string()))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| self.malformed("response contained no message content"))?;

        Ok(ProviderReply {
            text,
            counters,
            tokens_used: completion
                .usage
                .and_then(|usage| usage.total_tokens)
                .unwrap_or(0),
        })
    }
}
