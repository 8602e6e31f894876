//! Per-provider breaker state and its transitions

use super::{HealthBucket, ProviderKey, ResourceCounters, ResourceWindow};
use serde::{Deserialize, Serialize};

/// What last put a provider into its current bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCause {
    /// No observation yet
    Initial,
    /// Derived from reported rate-limit counters
    Observed,
    /// Provider explicitly rejected a call
    Rejected,
    /// Consecutive transport failures tripped the breaker
    Failures,
    /// Reset window passed after a red period
    Recovering,
}

impl HealthCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Observed => "observed",
            Self::Rejected => "rejected",
            Self::Failures => "failures",
            Self::Recovering => "recovering",
        }
    }
}

/// Health record for one (provider, model) pair
///
/// Fields are private; transitions go through the methods below so the
/// bucket can never be better than the worse of the reported resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    key: ProviderKey,
    bucket: HealthBucket,
    requests: Option<ResourceWindow>,
    tokens: Option<ResourceWindow>,
    reset_at: Option<i64>,
    consecutive_failures: u32,
    cause: HealthCause,
    override_bucket: Option<HealthBucket>,
    updated_at: i64,
}

impl ProviderHealth {
    /// Fresh record; no data means green
    pub fn new(key: ProviderKey, now: i64) -> Self {
        Self {
            key,
            bucket: HealthBucket::Green,
            requests: None,
            tokens: None,
            reset_at: None,
            consecutive_failures: 0,
            cause: HealthCause::Initial,
            override_bucket: None,
            updated_at: now,
        }
    }

    pub fn key(&self) -> &ProviderKey {
        &self.key
    }

    /// Bucket recorded by the last transition, ignoring any override
    pub fn recorded_bucket(&self) -> HealthBucket {
        self.bucket
    }

    pub fn requests(&self) -> Option<ResourceWindow> {
        self.requests
    }

    pub fn tokens(&self) -> Option<ResourceWindow> {
        self.tokens
    }

    pub fn reset_at(&self) -> Option<i64> {
        self.reset_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cause(&self) -> HealthCause {
        self.cause
    }

    pub fn override_bucket(&self) -> Option<HealthBucket> {
        self.override_bucket
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Bucket used for admission decisions
    pub fn effective_bucket(&self) -> HealthBucket {
        self.override_bucket.unwrap_or(self.bucket)
    }

    /// Counters view of the last reported windows
    pub fn counters(&self) -> ResourceCounters {
        let mut counters = ResourceCounters::new();
        if let Some(w) = self.requests {
            counters = counters.with_requests(w.remaining(), w.limit());
        }
        if let Some(w) = self.tokens {
            counters = counters.with_tokens(w.remaining(), w.limit());
        }
        counters
    }

    /// True once a red period's reset time has passed
    pub fn recovery_due(&self, now: i64) -> bool {
        self.bucket == HealthBucket::Red && self.reset_at.is_some_and(|reset| now >= reset)
    }

    /// Seconds until admission is possible again
    ///
    /// 0 when the provider is not red, or when no end is known.
    pub fn seconds_until_available(&self, now: i64) -> u64 {
        if self.effective_bucket() != HealthBucket::Red {
            return 0;
        }
        match (self.override_bucket, self.reset_at) {
            // Pinned red by an operator has no known end
            (Some(_), _) | (None, None) => 0,
            (None, Some(reset)) => u64::try_from((reset - now).max(1)).unwrap_or(1),
        }
    }

    /// Apply counters from a successful response
    ///
    /// Counters without metadata leave the bucket untouched and only clear
    /// the failure streak. A red result without a reported reset gets
    /// `default_reset` so it can still enter staged recovery.
    pub(crate) fn apply_observation(
        &mut self,
        counters: &ResourceCounters,
        now: i64,
        default_reset: u64,
    ) {
        self.consecutive_failures = 0;
        self.updated_at = now;
        if counters.is_empty() {
            return;
        }

        self.requests = counters.requests();
        self.tokens = counters.tokens();
        self.bucket = counters.bucket();
        self.cause = HealthCause::Observed;
        self.reset_at = match (self.bucket, counters.reset_after_seconds()) {
            (HealthBucket::Red, reset) => Some(now + seconds(reset.unwrap_or(default_reset))),
            (_, Some(reset)) => Some(now + seconds(reset)),
            (_, None) => None,
        };
    }

    pub(crate) fn apply_rejection(&mut self, retry_after: u64, now: i64) {
        self.bucket = HealthBucket::Red;
        self.cause = HealthCause::Rejected;
        self.reset_at = Some(now + seconds(retry_after.max(1)));
        self.updated_at = now;
    }

    /// Count a transport failure; returns true when this one tripped the breaker
    ///
    /// Tripping clears the streak, so a provider back in yellow needs a full
    /// `threshold` of fresh failures to trip again.
    pub(crate) fn apply_failure(&mut self, threshold: u32, cooldown: u64, now: i64) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.updated_at = now;
        if self.consecutive_failures < threshold {
            return false;
        }
        let tripped = self.bucket != HealthBucket::Red;
        self.consecutive_failures = 0;
        self.bucket = HealthBucket::Red;
        self.cause = HealthCause::Failures;
        self.reset_at = Some(now + seconds(cooldown.max(1)));
        tripped
    }

    /// Promote red to yellow after the reset time; returns true if promoted
    pub(crate) fn begin_recovery(&mut self, now: i64) -> bool {
        if !self.recovery_due(now) {
            return false;
        }
        self.bucket = HealthBucket::Yellow;
        self.cause = HealthCause::Recovering;
        self.reset_at = None;
        self.updated_at = now;
        true
    }

    pub(crate) fn set_override(&mut self, bucket: Option<HealthBucket>, now: i64) {
        self.override_bucket = bucket;
        self.updated_at = now;
    }
}

fn seconds(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX / 2)
}
