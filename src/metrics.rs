//! Prometheus metrics collection for lobbyroute
//!
//! This module provides metrics instrumentation for tracking:
//! - Requests by final status and response source
//! - Which classifier tier answered
//! - Cache lookups by tier
//! - Dispatch attempts by cascade tier and outcome
//! - Architecture-health signals (arbitration budget, cascade exhaustion)
//! - End-to-end dispatch latency
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Every label is drawn from a closed enum, so cardinality is fixed at
//! compile time.

use crate::cache::LookupKind;
use crate::classifier::ClassifierTier;
use crate::dispatch::{SignalKind, TierKind};
use crate::envelope::{AttemptOutcome, FinalStatus, ResponseSource};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for lobbyroute
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    classifications_total: IntCounterVec,
    cache_lookups_total: IntCounterVec,
    attempts_total: IntCounterVec,
    architecture_signals_total: IntCounterVec,
    dispatch_duration: HistogramVec,
    metrics_recording_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 statuses × 4 sources = 8 time series
        let requests_total = IntCounterVec::new(
            Opts::new(
                "lobbyroute_requests_total",
                "Total chat requests by final status and response source",
            ),
            &["outcome", "source"],
        )?;

        let classifications_total = IntCounterVec::new(
            Opts::new(
                "lobbyroute_classifications_total",
                "Total classifications by the cascade tier that answered",
            ),
            &["tier"],
        )?;

        let cache_lookups_total = IntCounterVec::new(
            Opts::new(
                "lobbyroute_cache_lookups_total",
                "Total cache lookups by result (exact, similarity, primer, miss, bypassed)",
            ),
            &["result"],
        )?;

        // Cardinality: 5 tier kinds × 8 attempt outcomes = 40 time series
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "lobbyroute_attempts_total",
                "Total dispatch attempts by cascade tier kind and outcome",
            ),
            &["kind", "outcome"],
        )?;

        // Alert on a sustained rate: the cascade shape no longer fits demand
        let architecture_signals_total = IntCounterVec::new(
            Opts::new(
                "lobbyroute_architecture_signals_total",
                "Architecture-health signals raised for operators (arbitration budget exhausted, cascade exhausted)",
            ),
            &["signal"],
        )?;

        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "lobbyroute_dispatch_duration_ms",
                "End-to-end dispatch latency in milliseconds",
            )
            .buckets(vec![
                1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0,
            ]),
            &["outcome"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "lobbyroute_metrics_recording_failures_total",
                "Total metrics recording operation failures by operation. \
                Indicates Prometheus internal errors - frequent failures require investigation.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(classifications_total.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(architecture_signals_total.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            classifications_total,
            cache_lookups_total,
            attempts_total,
            architecture_signals_total,
            dispatch_duration,
            metrics_recording_failures,
        })
    }

    /// Record a finished request
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_request(
        &self,
        status: FinalStatus,
        source: &ResponseSource,
    ) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[status.as_str(), source.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_classification(&self, tier: ClassifierTier) -> Result<(), prometheus::Error> {
        self.classifications_total
            .get_metric_with_label_values(&[tier.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_cache_lookup(&self, result: LookupKind) -> Result<(), prometheus::Error> {
        self.cache_lookups_total
            .get_metric_with_label_values(&[result.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_attempt(
        &self,
        kind: TierKind,
        outcome: &AttemptOutcome,
    ) -> Result<(), prometheus::Error> {
        self.attempts_total
            .get_metric_with_label_values(&[kind.as_str(), outcome.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_signal(&self, signal: SignalKind) -> Result<(), prometheus::Error> {
        self.architecture_signals_total
            .get_metric_with_label_values(&[signal.as_str()])?
            .inc();
        Ok(())
    }

    /// Record end-to-end dispatch duration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The metric is not registered
    /// - `duration_ms` is NaN, infinite, or negative
    ///
    /// NaN and infinity values corrupt histogram statistics (all percentiles
    /// become NaN); negative durations are logically invalid.
    pub fn record_dispatch_duration(
        &self,
        status: FinalStatus,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }
        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative (duration cannot be negative), got: {}",
                duration_ms
            )));
        }

        self.dispatch_duration
            .get_metric_with_label_values(&[status.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    /// Record a metrics recording operation failure
    ///
    /// Requests continue normally when recording fails; this counter makes
    /// the gap in observability data visible.
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total metrics recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        let metric_families = self.registry.gather();
        metric_families
            .iter()
            .find(|mf| mf.name() == "lobbyroute_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            let metric_names: Vec<_> = metric_families.iter().map(|mf| mf.name()).collect();
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                metric_names = ?metric_names,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}

/// Log and count a failed recorder call without disturbing the request
pub fn record_or_log(metrics: &Metrics, operation: &str, result: Result<(), prometheus::Error>) {
    if let Err(e) = result {
        tracing::warn!(operation = operation, error = %e, "Failed to record metric");
        metrics.metrics_recording_failure(operation);
    }
}
