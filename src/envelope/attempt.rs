//! Execution attempt records

use crate::dispatch::TierKind;
use crate::health::{HealthBucket, ProviderKey};
use serde::{Deserialize, Serialize};

/// Result of trying one cascade destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Provider signalled a rate limit
    Rejected { retry_after_seconds: Option<u64> },
    /// Connection failure or error status
    Unavailable { reason: String },
    /// Tier timeout elapsed; the call keeps running in the background
    TimedOut { after_ms: u64 },
    /// Response body did not match the expected schema
    Malformed { reason: String },
    /// Skipped by the admission rule
    Diverted { bucket: HealthBucket },
    /// Arbitration allowance used up for the current window
    BudgetExhausted,
    /// Persona collaborator declined work of this complexity
    PersonaDeclined,
    /// Arbitration closed to this request while in brownout
    BrownoutShed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected { .. } => "rejected",
            Self::Unavailable { .. } => "unavailable",
            Self::TimedOut { .. } => "timed_out",
            Self::Malformed { .. } => "malformed",
            Self::Diverted { .. } => "diverted",
            Self::BudgetExhausted => "budget_exhausted",
            Self::PersonaDeclined => "persona_declined",
            Self::BrownoutShed => "brownout_shed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// True if a provider call was actually dispatched
    pub fn was_dispatched(&self) -> bool {
        !matches!(
            self,
            Self::Diverted { .. }
                | Self::BudgetExhausted
                | Self::PersonaDeclined
                | Self::BrownoutShed
        )
    }
}

/// One entry in an envelope's execution chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    sequence: u32,
    destination: String,
    tier: TierKind,
    provider: ProviderKey,
    outcome: AttemptOutcome,
    tokens: u64,
    latency_ms: u64,
    started_at: i64,
}

impl ExecutionAttempt {
    /// Build an attempt; the envelope assigns its sequence number on append
    pub fn new(
        destination: impl Into<String>,
        tier: TierKind,
        provider: ProviderKey,
        outcome: AttemptOutcome,
        started_at: i64,
    ) -> Self {
        Self {
            sequence: 0,
            destination: destination.into(),
            tier,
            provider,
            outcome,
            tokens: 0,
            latency_ms: 0,
            started_at,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub(crate) fn started_no_earlier_than(mut self, floor: i64) -> Self {
        self.started_at = self.started_at.max(floor);
        self
    }

    pub(crate) fn sequenced(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }

    pub fn provider(&self) -> &ProviderKey {
        &self.provider
    }

    pub fn outcome(&self) -> &AttemptOutcome {
        &self.outcome
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_are_not_dispatched() {
        assert!(!AttemptOutcome::BudgetExhausted.was_dispatched());
        assert!(!AttemptOutcome::BrownoutShed.was_dispatched());
        assert!(
            !AttemptOutcome::Diverted {
                bucket: HealthBucket::Red
            }
            .was_dispatched()
        );
        assert!(AttemptOutcome::TimedOut { after_ms: 10 }.was_dispatched());
        assert!(AttemptOutcome::Success.was_dispatched());
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(AttemptOutcome::Rejected {
            retry_after_seconds: Some(30),
        })
        .expect("should serialize");
        assert_eq!(json["kind"], "rejected");
        assert_eq!(json["retry_after_seconds"], 30);
    }
}
