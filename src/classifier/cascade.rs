//! Tiered classifier

use super::heuristic::derive_intent;
use super::llm_based::{classification_prompt, parse_verdict};
use super::markers::LONG_REQUEST_CHARS;
use super::{
    BackendError, Classification, ClassifierBackend, ClassifierTier, Domain, Intent,
    KeywordClassifier, detect_escalation,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Intent → domain routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMap {
    domains: HashMap<Intent, Domain>,
}

impl DomainMap {
    /// Built-in mapping with `overrides` applied on top
    pub fn with_overrides(overrides: &HashMap<Intent, String>) -> Self {
        let mut map = Self::default();
        for (intent, domain) in overrides {
            map.domains.insert(*intent, Domain::new(domain.as_str()));
        }
        map
    }

    pub fn domain_for(&self, intent: Intent) -> Domain {
        self.domains.get(&intent).cloned().unwrap_or_default()
    }
}

impl Default for DomainMap {
    fn default() -> Self {
        let engineering = Domain::new("engineering");
        let domains = HashMap::from([
            (Intent::CodeReview, engineering.clone()),
            (Intent::Debugging, engineering.clone()),
            (Intent::FeatureWork, engineering.clone()),
            (Intent::Architecture, engineering),
            (Intent::Security, Domain::new("security")),
            (Intent::StatusCheck, Domain::new("operations")),
        ]);
        Self { domains }
    }
}

/// Stateless classification cascade
///
/// Holds no per-message state: the same input and backend versions always
/// produce the same classification.
pub struct ClassifierCascade {
    keyword: KeywordClassifier,
    local: Option<Arc<dyn ClassifierBackend>>,
    remote: Option<Arc<dyn ClassifierBackend>>,
    min_confidence: f32,
    domains: DomainMap,
}

impl ClassifierCascade {
    pub fn new(min_confidence: f32, domains: DomainMap) -> Self {
        Self {
            keyword: KeywordClassifier::new(),
            local: None,
            remote: None,
            min_confidence,
            domains,
        }
    }

    pub fn with_local(mut self, backend: Arc<dyn ClassifierBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_remote(mut self, backend: Arc<dyn ClassifierBackend>) -> Self {
        self.remote = Some(backend);
        self
    }

    /// Classify `message`; never fails
    pub async fn classify(&self, message: &str) -> Classification {
        if let Some((intent, keyword)) = self.keyword.classify(message) {
            tracing::debug!(intent = %intent, keyword = keyword, "Keyword tier matched");
            return self.finish(Classification::new(intent, ClassifierTier::Keyword), message);
        }

        let report = detect_escalation(message);

        if let Some(backend) = &self.local {
            if let Some(classification) = self
                .model_tier(backend.as_ref(), ClassifierTier::Local, message)
                .await
            {
                return classification;
            }
        }

        match &self.remote {
            Some(backend) if report.triggered() => {
                tracing::debug!(
                    reasons = ?report.reasons(),
                    "Escalation markers tripped, consulting remote tier"
                );
                if let Some(classification) = self
                    .model_tier(backend.as_ref(), ClassifierTier::Remote, message)
                    .await
                {
                    return classification;
                }
            }
            Some(_) => {
                tracing::debug!("No escalation markers, remote tier skipped");
            }
            None => {}
        }

        if let Some(intent) = derive_intent(message, &report) {
            tracing::debug!(intent = %intent, "Heuristic tier matched");
            return self.finish(Classification::new(intent, ClassifierTier::Heuristic), message);
        }

        tracing::debug!("All classifier tiers failed, using safe default");
        Classification::safe_default()
    }

    /// Run one model tier; `None` means fall through to the next tier
    async fn model_tier(
        &self,
        backend: &dyn ClassifierBackend,
        tier: ClassifierTier,
        message: &str,
    ) -> Option<Classification> {
        let prompt = classification_prompt(message);
        let verdict = match backend.complete(&prompt).await {
            Ok(raw) => parse_verdict(backend.name(), &raw),
            Err(e) => Err(e),
        };

        match verdict {
            Ok(verdict) => {
                let mut classification = Classification::new(verdict.intent, tier);
                if let Some(confidence) = verdict.confidence {
                    classification = classification.with_confidence(confidence);
                }
                if let Some(complexity) = verdict.complexity {
                    classification = classification.with_complexity(complexity);
                }
                let domain = verdict.domain;
                let classification = self.finish_with_domain(classification, message, domain);

                if classification.confidence < self.min_confidence {
                    tracing::debug!(
                        backend = backend.name(),
                        tier = tier.as_str(),
                        confidence = classification.confidence,
                        min_confidence = self.min_confidence,
                        "Classifier tier below confidence threshold"
                    );
                    return None;
                }
                Some(classification)
            }
            Err(e) => {
                log_tier_failure(backend.name(), tier, &e);
                None
            }
        }
    }

    fn finish(&self, classification: Classification, message: &str) -> Classification {
        self.finish_with_domain(classification, message, None)
    }

    fn finish_with_domain(
        &self,
        mut classification: Classification,
        message: &str,
        domain: Option<Domain>,
    ) -> Classification {
        classification.domain =
            domain.unwrap_or_else(|| self.domains.domain_for(classification.intent));
        if message.chars().count() >= LONG_REQUEST_CHARS {
            classification.complexity = classification.complexity.escalate();
        }
        classification
    }
}

fn log_tier_failure(backend: &str, tier: ClassifierTier, error: &BackendError) {
    tracing::warn!(
        backend = backend,
        tier = tier.as_str(),
        retryable = error.is_retryable(),
        error = %error,
        "Classifier tier failed, advancing cascade"
    );
}
