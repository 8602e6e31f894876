//! Circuit-breaking health tracker
//!
//! Applies the breaker rules on top of a [`HealthStore`]. Every state
//! change is logged with structured fields and, when an audit sink is
//! attached, persisted as a timestamped health snapshot.

use super::{
    HealthBucket, HealthCause, HealthStore, ProviderHealth, ProviderKey, Resource,
    ResourceCounters, should_divert,
};
use crate::audit::{AuditRecord, AuditSink};
use crate::clock::Clock;
use crate::envelope::Priority;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Breaker tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    failure_threshold: u32,
    failure_cooldown_seconds: u64,
    default_reset_seconds: u64,
}

impl BreakerSettings {
    pub fn new(
        failure_threshold: u32,
        failure_cooldown_seconds: u64,
        default_reset_seconds: u64,
    ) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            failure_cooldown_seconds,
            default_reset_seconds,
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn failure_cooldown_seconds(&self) -> u64 {
        self.failure_cooldown_seconds
    }

    pub fn default_reset_seconds(&self) -> u64 {
        self.default_reset_seconds
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::new(3, 30, 60)
    }
}

/// Point-in-time view of one provider, for the admin surface and audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub provider: String,
    pub model: String,
    pub bucket: HealthBucket,
    pub cause: HealthCause,
    pub requests_remaining_pct: Option<f64>,
    pub tokens_remaining_pct: Option<f64>,
    pub bottleneck: Option<Resource>,
    pub reset_at: Option<i64>,
    pub seconds_until_available: u64,
    pub consecutive_failures: u32,
    pub overridden: bool,
    pub observed_at: i64,
}

impl HealthSnapshot {
    fn from_record(record: &ProviderHealth, now: i64) -> Self {
        Self {
            provider: record.key().provider().to_string(),
            model: record.key().model().to_string(),
            bucket: record.effective_bucket(),
            cause: record.cause(),
            requests_remaining_pct: record.requests().map(|w| w.percent_remaining()),
            tokens_remaining_pct: record.tokens().map(|w| w.percent_remaining()),
            bottleneck: record.counters().bottleneck(),
            reset_at: record.reset_at(),
            seconds_until_available: record.seconds_until_available(now),
            consecutive_failures: record.consecutive_failures(),
            overridden: record.override_bucket().is_some(),
            observed_at: now,
        }
    }

    /// Snapshot for a provider that has never been observed
    fn unobserved(key: &ProviderKey, now: i64) -> Self {
        Self::from_record(&ProviderHealth::new(key.clone(), now), now)
    }
}

/// Health tracker shared by every in-flight request
pub struct HealthTracker {
    store: Arc<dyn HealthStore>,
    clock: Arc<dyn Clock>,
    settings: BreakerSettings,
    audit: Option<Arc<dyn AuditSink>>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn HealthStore>, clock: Arc<dyn Clock>, settings: BreakerSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            audit: None,
        }
    }

    /// Persist a snapshot to `sink` after every observation
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// Record counters from a successful response
    pub fn observe(&self, key: &ProviderKey, counters: &ResourceCounters) -> HealthBucket {
        let now = self.clock.now_epoch();
        let default_reset = self.settings.default_reset_seconds;
        let mut previous = HealthBucket::Green;
        let record = self.store.update(key, now, &mut |health| {
            previous = health.recorded_bucket();
            health.apply_observation(counters, now, default_reset);
        });

        let bucket = record.recorded_bucket();
        if bucket != previous {
            tracing::info!(
                provider = %key,
                from = %previous,
                to = %bucket,
                bottleneck = ?counters.bottleneck(),
                "Provider health changed"
            );
        } else {
            tracing::debug!(
                provider = %key,
                bucket = %bucket,
                metadata_present = !counters.is_empty(),
                "Provider observation recorded"
            );
        }
        self.persist(&record, now);
        record.effective_bucket()
    }

    /// Record an explicit rejection; always forces red
    ///
    /// `retry_after` of `None` uses the configured default reset.
    pub fn observe_rejection(&self, key: &ProviderKey, retry_after: Option<u64>) -> HealthBucket {
        let now = self.clock.now_epoch();
        let retry_after = retry_after.unwrap_or(self.settings.default_reset_seconds);
        let record = self
            .store
            .update(key, now, &mut |health| health.apply_rejection(retry_after, now));

        tracing::warn!(
            provider = %key,
            retry_after_seconds = retry_after,
            reset_at = ?record.reset_at(),
            "Provider rejected request, marked red"
        );
        self.persist(&record, now);
        record.effective_bucket()
    }

    /// Record a transport failure (timeout, connection error, bad response)
    pub fn observe_failure(&self, key: &ProviderKey) -> HealthBucket {
        let now = self.clock.now_epoch();
        let threshold = self.settings.failure_threshold;
        let cooldown = self.settings.failure_cooldown_seconds;
        let mut tripped = false;
        let record = self.store.update(key, now, &mut |health| {
            tripped = health.apply_failure(threshold, cooldown, now);
        });

        if tripped {
            tracing::warn!(
                provider = %key,
                failure_threshold = threshold,
                cooldown_seconds = cooldown,
                "Provider marked red after consecutive failures"
            );
        } else {
            tracing::debug!(
                provider = %key,
                consecutive_failures = record.consecutive_failures(),
                "Provider failure recorded"
            );
        }
        self.persist(&record, now);
        record.effective_bucket()
    }

    /// Current bucket, applying staged recovery
    ///
    /// A red provider whose reset time has passed is promoted to yellow
    /// here. Unobserved providers are green.
    pub fn health(&self, key: &ProviderKey) -> HealthBucket {
        self.current(key)
            .map(|record| record.effective_bucket())
            .unwrap_or(HealthBucket::Green)
    }

    pub fn should_divert(&self, key: &ProviderKey, priority: Priority) -> bool {
        should_divert(priority, self.health(key))
    }

    /// Seconds until `key` leaves red; 0 if it is admissible or no end is known
    pub fn seconds_until_available(&self, key: &ProviderKey) -> u64 {
        let now = self.clock.now_epoch();
        self.current(key)
            .map(|record| record.seconds_until_available(now))
            .unwrap_or(0)
    }

    /// Pin a provider's bucket, or clear the pin with `None`
    pub fn set_override(&self, key: &ProviderKey, bucket: Option<HealthBucket>) -> HealthSnapshot {
        let now = self.clock.now_epoch();
        let record = self
            .store
            .update(key, now, &mut |health| health.set_override(bucket, now));
        match bucket {
            Some(bucket) => tracing::warn!(
                provider = %key,
                bucket = %bucket,
                "Provider health manually overridden"
            ),
            None => tracing::info!(provider = %key, "Provider health override cleared"),
        }
        self.persist(&record, now);
        HealthSnapshot::from_record(&record, now)
    }

    /// Snapshot of every tracked provider, sorted by provider and model
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let now = self.clock.now_epoch();
        let mut keys: Vec<ProviderKey> = self
            .store
            .all()
            .into_iter()
            .map(|record| record.key().clone())
            .collect();
        keys.sort();
        self.snapshot_for(&keys, now)
    }

    /// Snapshot of specific providers, including ones never observed
    pub fn snapshot_of(&self, keys: &[ProviderKey]) -> Vec<HealthSnapshot> {
        self.snapshot_for(keys, self.clock.now_epoch())
    }

    fn snapshot_for(&self, keys: &[ProviderKey], now: i64) -> Vec<HealthSnapshot> {
        keys.iter()
            .map(|key| match self.current(key) {
                Some(record) => HealthSnapshot::from_record(&record, now),
                None => HealthSnapshot::unobserved(key, now),
            })
            .collect()
    }

    fn current(&self, key: &ProviderKey) -> Option<ProviderHealth> {
        let now = self.clock.now_epoch();
        let record = self.store.get(key)?;
        if !record.recovery_due(now) {
            return Some(record);
        }

        let mut promoted = false;
        let record = self.store.update(key, now, &mut |health| {
            promoted = health.begin_recovery(now);
        });
        if promoted {
            tracing::info!(
                provider = %key,
                "Reset window passed, provider promoted to yellow until a healthy observation"
            );
            self.persist(&record, now);
        }
        Some(record)
    }

    fn persist(&self, record: &ProviderHealth, now: i64) {
        let Some(sink) = &self.audit else {
            return;
        };
        let snapshot = HealthSnapshot::from_record(record, now);
        if let Err(e) = sink.append(&AuditRecord::HealthSnapshot(snapshot)) {
            tracing::warn!(
                provider = %record.key(),
                error = %e,
                "Failed to persist health snapshot"
            );
        }
    }
}
