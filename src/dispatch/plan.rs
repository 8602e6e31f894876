//! Escalation plan
//!
//! The ordered list of destinations is configuration data: operators
//! reorder or add tiers in `[[cascade]]` without a rebuild.

use crate::classifier::Domain;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Primary,
    DomainBuffer,
    GenericBuffer,
    /// Budget-capped; skipped when its call allowance is spent
    Arbitration,
    /// No further fallback
    LastResort,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::DomainBuffer => "domain_buffer",
            Self::GenericBuffer => "generic_buffer",
            Self::Arbitration => "arbitration",
            Self::LastResort => "last_resort",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "domain_buffer" => Ok(Self::DomainBuffer),
            "generic_buffer" => Ok(Self::GenericBuffer),
            "arbitration" => Ok(Self::Arbitration),
            "last_resort" => Ok(Self::LastResort),
            other => Err(format!(
                "unknown tier kind '{}' (expected primary, domain_buffer, generic_buffer, arbitration, or last_resort)",
                other
            )),
        }
    }
}

/// One tier of the cascade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub id: String,
    pub kind: TierKind,
    /// Key into the provider registry
    pub provider_id: String,
    pub timeout: Duration,
    /// Domains this tier serves; empty means every domain
    pub domains: Vec<Domain>,
}

impl Destination {
    pub fn new(
        id: impl Into<String>,
        kind: TierKind,
        provider_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            provider_id: provider_id.into(),
            timeout,
            domains: Vec::new(),
        }
    }

    pub fn with_domains(mut self, domains: Vec<Domain>) -> Self {
        self.domains = domains;
        self
    }

    pub fn serves(&self, domain: &Domain) -> bool {
        self.domains.is_empty() || self.domains.contains(domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPlan {
    tiers: Vec<Destination>,
}

impl EscalationPlan {
    pub fn new(tiers: Vec<Destination>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Destination] {
        &self.tiers
    }

    /// Tiers that apply to `domain`, in cascade order
    pub fn for_domain(&self, domain: &Domain) -> Vec<&Destination> {
        self.tiers.iter().filter(|d| d.serves(domain)).collect()
    }

    pub fn has_arbitration(&self) -> bool {
        self.tiers.iter().any(|d| d.kind == TierKind::Arbitration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> EscalationPlan {
        let t = Duration::from_secs(10);
        EscalationPlan::new(vec![
            Destination::new("primary", TierKind::Primary, "groq-fast", t),
            Destination::new("eng-buffer", TierKind::DomainBuffer, "moonshot", t)
                .with_domains(vec![Domain::new("engineering")]),
            Destination::new("generic", TierKind::GenericBuffer, "openai-mini", t),
            Destination::new("arbiter", TierKind::Arbitration, "openai-large", t),
            Destination::new("local", TierKind::LastResort, "ollama", t),
        ])
    }

    #[test]
    fn test_domain_buffer_only_for_its_domain() {
        let plan = plan();
        let engineering: Vec<_> = plan
            .for_domain(&Domain::new("engineering"))
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(engineering, ["primary", "eng-buffer", "generic", "arbiter", "local"]);

        let general: Vec<_> = plan
            .for_domain(&Domain::general())
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(general, ["primary", "generic", "arbiter", "local"]);
    }

    #[test]
    fn test_tier_kind_parse() {
        assert_eq!("Domain_Buffer".parse::<TierKind>(), Ok(TierKind::DomainBuffer));
        assert!("fallback".parse::<TierKind>().is_err());
        assert!(plan().has_arbitration());
    }
}
