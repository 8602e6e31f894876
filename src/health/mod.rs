//! Provider health tracking and circuit breaking
//!
//! Every outbound provider call reports back here. Health is kept per
//! (provider, model) pair and summarised into a [`HealthBucket`]:
//!
//! - **green**: more than 20% of both tracked resources remain
//! - **yellow**: the worse resource is between 5% and 20%
//! - **red**: the worse resource is at or below 5%, or the provider rejected us
//!
//! Rejections force red until the provider's reset time. Once that passes
//! the provider is promoted to yellow only; green comes back from a
//! successful call that reports a healthy percentage.

pub mod headers;
pub mod state;
pub mod store;
pub mod tracker;

pub use headers::{parse_rate_limit_headers, parse_reset_duration, parse_retry_after};
pub use state::{HealthCause, ProviderHealth};
pub use store::{HealthStore, MemoryHealthStore};
pub use tracker::{BreakerSettings, HealthSnapshot, HealthTracker};

use crate::envelope::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remaining percentage strictly above which a resource is green
pub const GREEN_ABOVE_PERCENT: f64 = 20.0;
/// Remaining percentage strictly above which a resource is yellow
pub const YELLOW_ABOVE_PERCENT: f64 = 5.0;

/// Capacity summary of a provider
///
/// Ordered worst to best, so `min` of two buckets is the worse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBucket {
    Red,
    Yellow,
    Green,
}

impl HealthBucket {
    /// Bucket a remaining-capacity percentage
    pub fn from_percent(percent: f64) -> Self {
        if percent > GREEN_ABOVE_PERCENT {
            Self::Green
        } else if percent > YELLOW_ABOVE_PERCENT {
            Self::Yellow
        } else {
            Self::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

impl fmt::Display for HealthBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(Self::Red),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            other => Err(format!(
                "unknown health bucket '{}', expected red, yellow or green",
                other
            )),
        }
    }
}

/// Identity of a tracked provider: the vendor plus the model served
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderKey {
    provider: String,
    model: String,
}

impl ProviderKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Which tracked resource limits a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Requests,
    Tokens,
}

/// Remaining/limit pair reported for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceWindow {
    remaining: u64,
    limit: u64,
}

impl ResourceWindow {
    pub fn new(remaining: u64, limit: u64) -> Self {
        Self { remaining, limit }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Percentage of the window still available
    ///
    /// A zero limit carries no information and reports 100%.
    pub fn percent_remaining(&self) -> f64 {
        if self.limit == 0 {
            return 100.0;
        }
        self.remaining.min(self.limit) as f64 / self.limit as f64 * 100.0
    }
}

/// Rate-limit metadata extracted from one provider response
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCounters {
    requests: Option<ResourceWindow>,
    tokens: Option<ResourceWindow>,
    reset_after_seconds: Option<u64>,
}

impl ResourceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests(mut self, remaining: u64, limit: u64) -> Self {
        self.requests = Some(ResourceWindow::new(remaining, limit));
        self
    }

    pub fn with_tokens(mut self, remaining: u64, limit: u64) -> Self {
        self.tokens = Some(ResourceWindow::new(remaining, limit));
        self
    }

    pub fn with_reset_after(mut self, seconds: u64) -> Self {
        self.reset_after_seconds = Some(seconds);
        self
    }

    pub fn requests(&self) -> Option<ResourceWindow> {
        self.requests
    }

    pub fn tokens(&self) -> Option<ResourceWindow> {
        self.tokens
    }

    pub fn reset_after_seconds(&self) -> Option<u64> {
        self.reset_after_seconds
    }

    /// True when the response carried no usable rate-limit metadata
    pub fn is_empty(&self) -> bool {
        self.requests.is_none() && self.tokens.is_none()
    }

    /// Health implied by these counters: the worse of the two resources
    pub fn bucket(&self) -> HealthBucket {
        let requests = self
            .requests
            .map(|w| HealthBucket::from_percent(w.percent_remaining()))
            .unwrap_or(HealthBucket::Green);
        let tokens = self
            .tokens
            .map(|w| HealthBucket::from_percent(w.percent_remaining()))
            .unwrap_or(HealthBucket::Green);
        requests.min(tokens)
    }

    /// The resource with the lower remaining percentage
    pub fn bottleneck(&self) -> Option<Resource> {
        match (self.requests, self.tokens) {
            (Some(r), Some(t)) => {
                if r.percent_remaining() <= t.percent_remaining() {
                    Some(Resource::Requests)
                } else {
                    Some(Resource::Tokens)
                }
            }
            (Some(_), None) => Some(Resource::Requests),
            (None, Some(_)) => Some(Resource::Tokens),
            (None, None) => None,
        }
    }
}

/// Priority-aware admission rule
///
/// Green never diverts, red always diverts, and yellow keeps its remaining
/// capacity for high and critical work.
pub fn should_divert(priority: Priority, bucket: HealthBucket) -> bool {
    match bucket {
        HealthBucket::Green => false,
        HealthBucket::Yellow => matches!(priority, Priority::Low | Priority::Normal),
        HealthBucket::Red => true,
    }
}
