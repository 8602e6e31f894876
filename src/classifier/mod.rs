//! Classification cascade
//!
//! Maps a raw message to a [`Classification`] by trying progressively more
//! expensive tiers: keyword table, a cheap local model, a remote model
//! (only for messages that trip escalation markers), a deterministic
//! heuristic, and finally a fixed safe default. Classification is
//! stateless and never fails.

pub mod cascade;
pub mod heuristic;
pub mod keyword;
pub mod llm_based;
pub mod markers;

pub use cascade::{ClassifierCascade, DomainMap};
pub use keyword::KeywordClassifier;
pub use llm_based::{BackendError, ClassifierBackend, HttpClassifierBackend, ModelVerdict};
pub use markers::{EscalationReport, detect_escalation};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of request intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    StatusCheck,
    HowTo,
    Trivial,
    CodeReview,
    Debugging,
    FeatureWork,
    Architecture,
    Security,
    Conversation,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 10] = [
        Intent::StatusCheck,
        Intent::HowTo,
        Intent::Trivial,
        Intent::CodeReview,
        Intent::Debugging,
        Intent::FeatureWork,
        Intent::Architecture,
        Intent::Security,
        Intent::Conversation,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusCheck => "status_check",
            Self::HowTo => "how_to",
            Self::Trivial => "trivial",
            Self::CodeReview => "code_review",
            Self::Debugging => "debugging",
            Self::FeatureWork => "feature_work",
            Self::Architecture => "architecture",
            Self::Security => "security",
            Self::Conversation => "conversation",
            Self::Unknown => "unknown",
        }
    }

    /// Answers for these intents may be reused
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::StatusCheck | Self::HowTo | Self::Trivial)
    }

    pub fn base_complexity(&self) -> Complexity {
        match self {
            Self::StatusCheck | Self::HowTo | Self::Trivial => Complexity::Low,
            Self::Conversation | Self::Unknown => Complexity::Medium,
            Self::CodeReview | Self::Debugging | Self::FeatureWork | Self::Architecture => {
                Complexity::High
            }
            Self::Security => Complexity::Critical,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Intent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent '{}'", s.trim()))
    }
}

/// Ordered complexity scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Critical,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// One step up, saturating at critical
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown complexity '{}'", other)),
        }
    }
}

/// Target domain (department) for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    pub const GENERAL: &'static str = "general";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_ascii_lowercase())
    }

    pub fn general() -> Self {
        Self(Self::GENERAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::general()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which cascade tier produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierTier {
    Keyword,
    Local,
    Remote,
    Heuristic,
    Default,
}

impl ClassifierTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }

    /// Confidence ceiling for answers from this tier
    pub fn confidence_cap(&self) -> f32 {
        match self {
            Self::Keyword => 0.95,
            Self::Local => 0.80,
            Self::Remote => 0.90,
            Self::Heuristic => 0.50,
            Self::Default => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub complexity: Complexity,
    pub domain: Domain,
    pub cacheable: bool,
    pub confidence: f32,
    pub tier: ClassifierTier,
}

impl Classification {
    /// Classification with the intent's default complexity, general domain,
    /// and the tier's confidence ceiling
    pub fn new(intent: Intent, tier: ClassifierTier) -> Self {
        Self {
            intent,
            complexity: intent.base_complexity(),
            domain: Domain::general(),
            cacheable: intent.is_cacheable(),
            confidence: tier.confidence_cap(),
            tier,
        }
    }

    /// Fixed answer when every tier failed
    pub fn safe_default() -> Self {
        Self {
            intent: Intent::Unknown,
            complexity: Complexity::Medium,
            domain: Domain::general(),
            cacheable: false,
            confidence: 0.0,
            tier: ClassifierTier::Default,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    /// Clamp into [0, tier cap]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        let cap = self.tier.confidence_cap();
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, cap)
        } else {
            cap
        };
        self
    }
}
