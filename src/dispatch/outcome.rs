use crate::envelope::{Envelope, ResponseSource};
use serde::{Deserialize, Serialize};

/// Result of one dispatch; the caller never sees anything else
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed {
        response: String,
        source: ResponseSource,
        envelope: Box<Envelope>,
    },
    /// Every tier was unavailable; retry after the estimate
    Deferred {
        retry_after_seconds: u64,
        reason: String,
        envelope: Box<Envelope>,
    },
}

impl DispatchOutcome {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Self::Completed { envelope, .. } | Self::Deferred { envelope, .. } => envelope,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Completed { response, .. } => Some(response),
            Self::Deferred { .. } => None,
        }
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::Deferred {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            Self::Completed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ArbitrationBudgetExhausted,
    CascadeExhausted,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArbitrationBudgetExhausted => "arbitration_budget_exhausted",
            Self::CascadeExhausted => "cascade_exhausted",
        }
    }
}

/// Operator-facing signal that the cascade shape is under strain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSignal {
    pub kind: SignalKind,
    pub destination: String,
    pub detail: String,
    pub at: i64,
}
