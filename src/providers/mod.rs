//! Outbound LLM providers
//!
//! A [`Provider`] performs one completion and reports the rate-limit
//! counters the vendor returned. Health bookkeeping and fallback live in
//! the dispatcher; providers only translate HTTP into these types.

pub mod openai_compat;

pub use openai_compat::{CompletionSettings, OpenAiCompatProvider};

use crate::health::{ProviderKey, ResourceCounters};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// One completion request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderRequest {
    pub system: Option<String>,
    pub primer: Option<String>,
    pub prompt: String,
}

impl ProviderRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn with_primer(mut self, primer: Option<String>) -> Self {
        self.primer = primer;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub text: String,
    pub counters: ResourceCounters,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Explicit rate-limit rejection (HTTP 429)
    #[error("provider {provider} rate limited the request")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    /// Connection failure, timeout, or error status
    #[error("provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    /// Response did not match the completion schema
    #[error("provider {provider} returned a malformed response: {reason}")]
    Malformed { provider: String, reason: String },
}

impl ProviderError {
    /// Returns true if another attempt later (or elsewhere) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Unavailable { .. }
        )
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured destination id (e.g. "openai-mini")
    fn id(&self) -> &str;

    /// Health-tracking identity
    fn key(&self) -> &ProviderKey;

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError>;
}

/// Providers addressable by configured id
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
