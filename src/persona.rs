//! Optional persona collaborator
//!
//! The persona service may say whether a logical destination should take
//! work of a given complexity right now, and may supply extra prompt text.
//! It is advisory only: when it is absent, slow, or broken, every
//! destination accepts.

use crate::classifier::Complexity;
use crate::envelope::Priority;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaHint {
    #[serde(default = "default_accept")]
    pub accept: bool,
    /// Priority the destination would like this work treated as
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub prompt_supplement: Option<String>,
}

fn default_accept() -> bool {
    true
}

impl PersonaHint {
    pub fn accept() -> Self {
        Self {
            accept: true,
            priority: None,
            prompt_supplement: None,
        }
    }
}

#[async_trait]
pub trait PersonaAdvisor: Send + Sync {
    /// Advice for `destination`; `None` means no opinion (accept)
    async fn advise(&self, destination: &str, complexity: Complexity) -> Option<PersonaHint>;
}

/// Used when no persona service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersona;

#[async_trait]
impl PersonaAdvisor for NoPersona {
    async fn advise(&self, _destination: &str, _complexity: Complexity) -> Option<PersonaHint> {
        None
    }
}

#[derive(Debug, Serialize)]
struct AdviceRequest<'a> {
    destination: &'a str,
    complexity: Complexity,
}

/// Persona service over HTTP: `POST {base_url}/advise`
pub struct HttpPersonaAdvisor {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPersonaAdvisor {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build persona client: {}", e)))?;
        Ok(Self {
            endpoint: format!("{}/advise", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl PersonaAdvisor for HttpPersonaAdvisor {
    async fn advise(&self, destination: &str, complexity: Complexity) -> Option<PersonaHint> {
        let response = match self
            .client
            .post(&self.endpoint)
            .json(&AdviceRequest {
                destination,
                complexity,
            })
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(
                    destination = destination,
                    status = response.status().as_u16(),
                    "Persona service declined to advise, accepting"
                );
                return None;
            }
            Err(e) => {
                tracing::debug!(
                    destination = destination,
                    error = %e,
                    "Persona service unreachable, accepting"
                );
                return None;
            }
        };

        match response.json::<PersonaHint>().await {
            Ok(hint) => Some(hint),
            Err(e) => {
                tracing::warn!(
                    destination = destination,
                    error = %e,
                    "Persona service returned an unreadable hint, accepting"
                );
                None
            }
        }
    }
}
