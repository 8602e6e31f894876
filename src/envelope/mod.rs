//! Request envelope
//!
//! The envelope threads one request through classify → cache → dispatch.
//! It is an immutable value: each stage calls a `with_*` method that
//! returns a new envelope carrying one more block. A block can be written
//! once, attempts are append-only and ordered by sequence, and a finalized
//! envelope accepts nothing further. Archived envelopes are never deleted.

pub mod attempt;
pub mod message;

pub use attempt::{AttemptOutcome, ExecutionAttempt};
pub use message::{InboundMessage, Priority};

use crate::cache::LookupKind;
use crate::classifier::Classification;
use crate::dispatch::{GatewayMode, TierGate};
use crate::health::{HealthSnapshot, ProviderKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope {id} already has a {block} block")]
    BlockAlreadyWritten { id: Uuid, block: &'static str },

    #[error("envelope {id} is finalized and cannot be extended")]
    Finalized { id: Uuid },
}

/// Cache lookup result as stamped on the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheBlock {
    pub lookup: LookupKind,
    pub key: Option<String>,
    pub similarity: Option<f32>,
    pub recorded_at: i64,
}

/// Context primer attached on a soft hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimerBlock {
    pub scope: String,
    pub text: String,
}

/// The cascade chosen for this request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingBlock {
    pub plan: Vec<String>,
    pub priority: Priority,
    pub persona_supplement: Option<String>,
    pub mode: GatewayMode,
    /// Whether arbitration tiers were open to this request
    pub arbitration: TierGate,
    pub decided_at: i64,
}

/// Where the final response came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseSource {
    Cache { lookup: LookupKind },
    Canned,
    Destination { id: String, provider: ProviderKey },
    /// Deferred; nothing answered
    None,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache { .. } => "cache",
            Self::Canned => "canned",
            Self::Destination { .. } => "destination",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Completed,
    Deferred,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Deferred => "deferred",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalBlock {
    pub status: FinalStatus,
    pub source: ResponseSource,
    pub response: Option<String>,
    pub retry_after_seconds: Option<u64>,
    pub finalized_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    id: Uuid,
    created_at: i64,
    message: InboundMessage,
    classification: Option<Classification>,
    cache: Option<CacheBlock>,
    primer: Option<PrimerBlock>,
    routing: Option<RoutingBlock>,
    health_snapshot: Option<Vec<HealthSnapshot>>,
    execution_chain: Vec<ExecutionAttempt>,
    finalized: Option<FinalBlock>,
}

impl Envelope {
    pub fn new(message: InboundMessage, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            message,
            classification: None,
            cache: None,
            primer: None,
            routing: None,
            health_snapshot: None,
            execution_chain: Vec::new(),
            finalized: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn cache(&self) -> Option<&CacheBlock> {
        self.cache.as_ref()
    }

    pub fn primer(&self) -> Option<&PrimerBlock> {
        self.primer.as_ref()
    }

    pub fn routing(&self) -> Option<&RoutingBlock> {
        self.routing.as_ref()
    }

    pub fn health_snapshot(&self) -> Option<&[HealthSnapshot]> {
        self.health_snapshot.as_deref()
    }

    pub fn execution_chain(&self) -> &[ExecutionAttempt] {
        &self.execution_chain
    }

    pub fn finalized(&self) -> Option<&FinalBlock> {
        self.finalized.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn with_classification(&self, classification: Classification) -> Result<Self, EnvelopeError> {
        self.extend("classification", self.classification.is_some(), |next| {
            next.classification = Some(classification);
        })
    }

    pub fn with_cache_result(&self, block: CacheBlock) -> Result<Self, EnvelopeError> {
        self.extend("cache", self.cache.is_some(), |next| {
            next.cache = Some(block);
        })
    }

    pub fn with_primer(&self, block: PrimerBlock) -> Result<Self, EnvelopeError> {
        self.extend("primer", self.primer.is_some(), |next| {
            next.primer = Some(block);
        })
    }

    pub fn with_routing(&self, block: RoutingBlock) -> Result<Self, EnvelopeError> {
        self.extend("routing", self.routing.is_some(), |next| {
            next.routing = Some(block);
        })
    }

    pub fn with_health_snapshot(&self, snapshot: Vec<HealthSnapshot>) -> Result<Self, EnvelopeError> {
        self.extend("health_snapshot", self.health_snapshot.is_some(), |next| {
            next.health_snapshot = Some(snapshot);
        })
    }

    /// Append an attempt; sequence numbers start at 1
    ///
    /// A start time earlier than the previous attempt's (the wall clock
    /// stepped back) is clamped to it, so timestamps never decrease along
    /// the chain and the attempt is still recorded.
    pub fn with_attempt(&self, attempt: ExecutionAttempt) -> Result<Self, EnvelopeError> {
        let floor = self.execution_chain.last().map(ExecutionAttempt::started_at);
        let sequence = u32::try_from(self.execution_chain.len() + 1).unwrap_or(u32::MAX);
        self.extend("execution_chain", false, |next| {
            let attempt = match floor {
                Some(floor) => attempt.started_no_earlier_than(floor),
                None => attempt,
            };
            next.execution_chain.push(attempt.sequenced(sequence));
        })
    }

    pub fn finalize(&self, block: FinalBlock) -> Result<Self, EnvelopeError> {
        self.extend("final", false, |next| {
            next.finalized = Some(block);
        })
    }

    fn extend(
        &self,
        block: &'static str,
        already_written: bool,
        write: impl FnOnce(&mut Self),
    ) -> Result<Self, EnvelopeError> {
        if self.is_finalized() {
            return Err(EnvelopeError::Finalized { id: self.id });
        }
        if already_written {
            return Err(EnvelopeError::BlockAlreadyWritten { id: self.id, block });
        }
        let mut next = self.clone();
        write(&mut next);
        Ok(next)
    }
}
