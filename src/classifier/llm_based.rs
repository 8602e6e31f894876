//! Model-backed classification tiers
//!
//! Both the local and the remote tier send the same prompt through a
//! [`ClassifierBackend`]. Output is accepted either as a bare intent name or
//! as a small JSON object; anything else is a tier failure.

use super::{Complexity, Domain, Intent};
use crate::clock::Clock;
use crate::error::AppResult;
use crate::providers::{
    CompletionSettings, OpenAiCompatProvider, Provider, ProviderError, ProviderRequest,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Classifier output larger than this is rejected unparsed
const MAX_CLASSIFIER_RESPONSE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("classifier backend {backend} failed: {source}")]
    Provider {
        backend: String,
        #[source]
        source: ProviderError,
    },

    #[error("classifier backend {backend} returned an empty response")]
    Empty { backend: String },

    #[error("classifier backend {backend} response exceeded {max_size} bytes (got {size})")]
    SizeExceeded {
        backend: String,
        size: usize,
        max_size: usize,
    },

    #[error("classifier backend {backend} returned unparseable output: {output}")]
    Unparseable { backend: String, output: String },
}

impl BackendError {
    /// Transient failures; the others mean the model is not following the prompt
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Provider { source, .. } if source.is_retryable())
    }
}

#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Raw completion text for `prompt`
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Classifier backend over an OpenAI-compatible endpoint
pub struct HttpClassifierBackend {
    name: String,
    provider: OpenAiCompatProvider,
}

impl HttpClassifierBackend {
    pub fn new(
        name: impl Into<String>,
        settings: CompletionSettings,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        Ok(Self {
            name: name.into(),
            provider: OpenAiCompatProvider::new(settings, clock)?,
        })
    }
}

#[async_trait]
impl ClassifierBackend for HttpClassifierBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.provider
            .complete(&ProviderRequest::new(prompt))
            .await
            .map(|reply| reply.text)
            .map_err(|source| BackendError::Provider {
                backend: self.name.clone(),
                source,
            })
    }
}

/// Parsed model answer before tier defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVerdict {
    pub intent: Intent,
    pub complexity: Option<Complexity>,
    pub domain: Option<Domain>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct JsonVerdict {
    intent: String,
    complexity: Option<String>,
    domain: Option<String>,
    confidence: Option<f32>,
}

/// Prompt shared by the local and remote tiers
pub fn classification_prompt(message: &str) -> String {
    format!(
        "Classify the message below into exactly one category.\n\n\
        Categories:\n\
        - status_check: asks whether something is up, running or healthy\n\
        - how_to: asks for a command, guide or documentation\n\
        - trivial: thanks, acknowledgements, greetings\n\
        - code_review: asks for review or feedback on code or a pull request\n\
        - debugging: reports an error, crash or broken behaviour\n\
        - feature_work: asks to build, add or implement something\n\
        - architecture: system design, module boundaries, schemas, API contracts\n\
        - security: leaked secrets, vulnerabilities, authentication\n\
        - conversation: open-ended chat\n\
        - unknown: none of the above\n\n\
        Message: \"{}\"\n\n\
        Respond with ONLY the category name in lowercase, or a JSON object \
        {{\"intent\": ..., \"complexity\": \"low|medium|high|critical\", \"domain\": ...}}.",
        message
    )
}

/// Parse classifier output into a verdict
///
/// # Errors
///
/// Empty, oversized, or unrecognized output is a tier failure.
pub fn parse_verdict(backend: &str, raw: &str) -> Result<ModelVerdict, BackendError> {
    if raw.len() > MAX_CLASSIFIER_RESPONSE {
        return Err(BackendError::SizeExceeded {
            backend: backend.to_string(),
            size: raw.len(),
            max_size: MAX_CLASSIFIER_RESPONSE,
        });
    }

    let unparseable = || BackendError::Unparseable {
        backend: backend.to_string(),
        output: raw.chars().take(100).collect(),
    };

    let trimmed = strip_code_fence(raw.trim());
    if trimmed.is_empty() {
        return Err(BackendError::Empty {
            backend: backend.to_string(),
        });
    }

    if trimmed.starts_with('{') {
        let parsed: JsonVerdict = serde_json::from_str(trimmed).map_err(|_| unparseable())?;
        let intent = parsed.intent.parse::<Intent>().map_err(|_| unparseable())?;
        return Ok(ModelVerdict {
            intent,
            // Unknown complexity strings fall back to the intent default
            complexity: parsed.complexity.and_then(|c| c.parse().ok()),
            domain: parsed
                .domain
                .filter(|d| !d.trim().is_empty())
                .map(Domain::new),
            confidence: parsed.confidence,
        });
    }

    let word = trimmed
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .trim();
    let intent = word.parse::<Intent>().map_err(|_| unparseable())?;
    Ok(ModelVerdict {
        intent,
        complexity: None,
        domain: None,
        confidence: None,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
