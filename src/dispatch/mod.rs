//! Dispatcher and escalation cascade
//!
//! Per request: classify → cache lookup → (hit: done) → walk the
//! configured cascade until one destination answers. Each provider call
//! runs as its own task: it records its result in the health tracker and
//! the cache even if the tier timeout fires first or the caller goes away.
//! Only exhaustion of the whole cascade is visible to the caller, as a
//! deferred outcome with a retry estimate.

pub mod budget;
pub mod canned;
pub mod mode;
pub mod outcome;
pub mod plan;

pub use budget::CallBudget;
pub use canned::canned_reply;
pub use mode::{GateReason, GatewayMode, TierGate};
pub use outcome::{ArchitectureSignal, DispatchOutcome, SignalKind};
pub use plan::{Destination, EscalationPlan, TierKind};

use crate::audit::{AuditRecord, AuditSink};
use crate::cache::{CacheLookup, CachedResponse, ResponseCache};
use crate::classifier::{Classification, ClassifierCascade, Intent, detect_escalation};
use crate::clock::Clock;
use crate::envelope::{
    AttemptOutcome, CacheBlock, Envelope, EnvelopeError, ExecutionAttempt, FinalBlock,
    FinalStatus, InboundMessage, PrimerBlock, Priority, ResponseSource, RoutingBlock,
};
use crate::health::{HealthTracker, ProviderKey};
use crate::metrics::{Metrics, record_or_log};
use crate::persona::{PersonaAdvisor, PersonaHint};
use crate::providers::{Provider, ProviderError, ProviderReply, ProviderRegistry, ProviderRequest};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub canned_trivial: bool,
    pub default_retry_seconds: u64,
    pub retry_jitter_seconds: u64,
    /// End-to-end budget; every tier timeout is capped by what remains
    pub request_timeout: Duration,
    pub system_prompt: Option<String>,
    pub arbitration_max_calls: u32,
    pub arbitration_window_seconds: u64,
    pub mode: GatewayMode,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            canned_trivial: true,
            default_retry_seconds: 60,
            retry_jitter_seconds: 5,
            request_timeout: Duration::from_secs(60),
            system_prompt: None,
            arbitration_max_calls: 20,
            arbitration_window_seconds: 3600,
            mode: GatewayMode::Normal,
        }
    }
}

/// Shared collaborators, injected rather than reached through globals
pub struct DispatchComponents {
    pub classifier: Arc<ClassifierCascade>,
    pub cache: Arc<ResponseCache>,
    pub health: Arc<HealthTracker>,
    pub providers: ProviderRegistry,
    pub plan: EscalationPlan,
    pub persona: Arc<dyn PersonaAdvisor>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

pub struct Dispatcher {
    classifier: Arc<ClassifierCascade>,
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    providers: ProviderRegistry,
    plan: EscalationPlan,
    budgets: HashMap<String, CallBudget>,
    persona: Arc<dyn PersonaAdvisor>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
    settings: DispatchSettings,
}

/// Result of one destination, as seen by the cascade walk
enum TierResult {
    Answered(ProviderReply),
    Failed(AttemptOutcome),
}

impl Dispatcher {
    pub fn new(components: DispatchComponents, settings: DispatchSettings) -> Self {
        let budgets = components
            .plan
            .tiers()
            .iter()
            .filter(|d| d.kind == TierKind::Arbitration)
            .map(|d| {
                (
                    d.id.clone(),
                    CallBudget::new(
                        settings.arbitration_max_calls,
                        settings.arbitration_window_seconds,
                        components.clock.clone(),
                    ),
                )
            })
            .collect();

        Self {
            classifier: components.classifier,
            cache: components.cache,
            health: components.health,
            providers: components.providers,
            plan: components.plan,
            budgets,
            persona: components.persona,
            audit: components.audit,
            clock: components.clock,
            metrics: None,
            settings,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn plan(&self) -> &EscalationPlan {
        &self.plan
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Remaining arbitration allowance per arbitration tier
    pub fn budget_remaining(&self, destination: &str) -> Option<u32> {
        self.budgets.get(destination).map(CallBudget::remaining)
    }

    /// Run one request through the pipeline; never fails
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let started = Instant::now();
        let deadline = started + self.settings.request_timeout;
        let mut envelope = Envelope::new(message, self.clock.now_epoch());
        let request_id = envelope.id();

        let classification = self.classifier.classify(envelope.message().text()).await;
        self.record("record_classification", |m| {
            m.record_classification(classification.tier)
        });
        tracing::debug!(
            request_id = %request_id,
            intent = %classification.intent,
            complexity = classification.complexity.as_str(),
            domain = %classification.domain,
            tier = classification.tier.as_str(),
            confidence = classification.confidence,
            "Request classified"
        );
        stamp(&mut envelope, |e| e.with_classification(classification.clone()));

        let state = envelope.message().state();
        if let (Some(project), Some(branch)) = (&state.project, &state.branch) {
            self.cache.observe_context(project, branch);
        }

        if self.settings.canned_trivial && classification.intent == Intent::Trivial {
            if let Some(reply) = canned_reply(envelope.message().text()) {
                return self.complete(envelope, reply.to_string(), ResponseSource::Canned, started);
            }
        }

        let lookup = self.cache.lookup(&classification, envelope.message());
        self.record("record_cache_lookup", |m| m.record_cache_lookup(lookup.kind()));
        let recorded_at = self.clock.now_epoch();
        stamp(&mut envelope, |e| {
            e.with_cache_result(CacheBlock {
                lookup: lookup.kind(),
                key: lookup.key().map(|k| k.as_str().to_string()),
                similarity: lookup.similarity(),
                recorded_at,
            })
        });

        let primer = match lookup {
            CacheLookup::Hit { kind, response, .. } => {
                tracing::debug!(
                    request_id = %request_id,
                    lookup = kind.as_str(),
                    "Served from cache"
                );
                return self.complete(
                    envelope,
                    response.text,
                    ResponseSource::Cache { lookup: kind },
                    started,
                );
            }
            CacheLookup::Primer { scope, text, .. } => {
                stamp(&mut envelope, |e| {
                    e.with_primer(PrimerBlock {
                        scope: scope.clone(),
                        text: text.clone(),
                    })
                });
                Some(text)
            }
            CacheLookup::Miss { .. } | CacheLookup::Bypassed => None,
        };

        let tiers = self.plan.for_domain(&classification.domain);
        let hint = self
            .persona
            .advise(classification.domain.as_str(), classification.complexity)
            .await
            .unwrap_or_else(PersonaHint::accept);
        let priority = effective_priority(envelope.message().priority(), hint.priority);
        let arbitration = TierGate::evaluate(
            self.settings.mode,
            &detect_escalation(envelope.message().text()),
            priority,
        );
        if !arbitration.allowed {
            tracing::debug!(
                request_id = %request_id,
                mode = %self.settings.mode,
                priority = priority.as_str(),
                "Brownout: arbitration tiers closed to this request"
            );
        }

        let keys: Vec<ProviderKey> = tiers
            .iter()
            .filter_map(|d| self.providers.get(&d.provider_id))
            .map(|p| p.key().clone())
            .collect();
        let snapshot = self.health.snapshot_of(&keys);
        stamp(&mut envelope, |e| e.with_health_snapshot(snapshot));

        let decided_at = self.clock.now_epoch();
        stamp(&mut envelope, |e| {
            e.with_routing(RoutingBlock {
                plan: tiers.iter().map(|d| d.id.clone()).collect(),
                priority,
                persona_supplement: hint.prompt_supplement.clone(),
                mode: self.settings.mode,
                arbitration,
                decided_at,
            })
        });

        let system = match (&self.settings.system_prompt, &hint.prompt_supplement) {
            (Some(base), Some(extra)) => Some(format!("{}\n\n{}", base, extra)),
            (Some(base), None) => Some(base.clone()),
            (None, extra) => extra.clone(),
        };
        let request = ProviderRequest::new(envelope.message().text())
            .with_system(system)
            .with_primer(primer);

        for destination in &tiers {
            let Some(provider) = self.providers.get(&destination.provider_id) else {
                tracing::error!(
                    request_id = %request_id,
                    destination = %destination.id,
                    provider = %destination.provider_id,
                    "Cascade tier references an unregistered provider, skipping"
                );
                continue;
            };
            let key = provider.key().clone();
            let attempted_at = self.clock.now_epoch();
            let attempt = |outcome| {
                ExecutionAttempt::new(
                    &destination.id,
                    destination.kind,
                    key.clone(),
                    outcome,
                    attempted_at,
                )
            };

            if !hint.accept && destination.kind == TierKind::DomainBuffer {
                tracing::debug!(
                    request_id = %request_id,
                    destination = %destination.id,
                    "Persona declined, skipping domain tier"
                );
                self.append_attempt(&mut envelope, attempt(AttemptOutcome::PersonaDeclined));
                continue;
            }

            if destination.kind == TierKind::Arbitration && !arbitration.allowed {
                self.append_attempt(&mut envelope, attempt(AttemptOutcome::BrownoutShed));
                continue;
            }

            if self.health.should_divert(&key, priority) {
                let bucket = self.health.health(&key);
                tracing::debug!(
                    request_id = %request_id,
                    destination = %destination.id,
                    provider = %key,
                    bucket = %bucket,
                    priority = priority.as_str(),
                    "Diverting away from degraded provider"
                );
                self.append_attempt(&mut envelope, attempt(AttemptOutcome::Diverted { bucket }));
                continue;
            }

            if let Some(budget) = self.budgets.get(&destination.id) {
                if !budget.try_acquire() {
                    self.budget_exhausted(destination, budget);
                    self.append_attempt(&mut envelope, attempt(AttemptOutcome::BudgetExhausted));
                    continue;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    request_id = %request_id,
                    destination = %destination.id,
                    "End-to-end budget spent before cascade finished"
                );
                break;
            }
            let timeout = destination.timeout.min(remaining);

            let call_started = Instant::now();
            let result = self
                .call(
                    provider,
                    destination,
                    &request,
                    &classification,
                    envelope.message(),
                    timeout,
                )
                .await;
            let latency_ms = u64::try_from(call_started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                TierResult::Answered(reply) => {
                    self.append_attempt(
                        &mut envelope,
                        attempt(AttemptOutcome::Success)
                            .with_tokens(reply.tokens_used)
                            .with_latency_ms(latency_ms),
                    );
                    let source = ResponseSource::Destination {
                        id: destination.id.clone(),
                        provider: key,
                    };
                    return self.complete(envelope, reply.text, source, started);
                }
                TierResult::Failed(outcome) => {
                    tracing::warn!(
                        request_id = %request_id,
                        destination = %destination.id,
                        provider = %key,
                        outcome = outcome.as_str(),
                        "Cascade tier failed, escalating"
                    );
                    self.append_attempt(
                        &mut envelope,
                        attempt(outcome).with_latency_ms(latency_ms),
                    );
                }
            }
        }

        self.defer(envelope, &tiers, started)
    }

    /// Run one provider call in its own task, bounded by `timeout`
    ///
    /// The task owns health and cache bookkeeping for the call, so a call
    /// that outlives its tier timeout still updates both when it finishes.
    async fn call(
        &self,
        provider: Arc<dyn Provider>,
        destination: &Destination,
        request: &ProviderRequest,
        classification: &Classification,
        message: &InboundMessage,
        timeout: Duration,
    ) -> TierResult {
        let health = self.health.clone();
        let cache = self.cache.clone();
        let request = request.clone();
        let classification = classification.clone();
        let message = message.clone();
        let destination_id = destination.id.clone();

        let handle = tokio::spawn(async move {
            let key = provider.key().clone();
            let result = provider.complete(&request).await;
            match &result {
                Ok(reply) => {
                    health.observe(&key, &reply.counters);
                    cache.store(
                        &classification,
                        &message,
                        &CachedResponse {
                            text: reply.text.clone(),
                            destination: Some(destination_id),
                            tokens: reply.tokens_used,
                        },
                    );
                }
                Err(ProviderError::RateLimited { retry_after, .. }) => {
                    health.observe_rejection(&key, *retry_after);
                }
                Err(ProviderError::Unavailable { .. } | ProviderError::Malformed { .. }) => {
                    health.observe_failure(&key);
                }
            }
            result
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(reply))) => TierResult::Answered(reply),
            Ok(Ok(Err(e))) => TierResult::Failed(match e {
                ProviderError::RateLimited { retry_after, .. } => AttemptOutcome::Rejected {
                    retry_after_seconds: retry_after,
                },
                ProviderError::Unavailable { reason, .. } => AttemptOutcome::Unavailable { reason },
                ProviderError::Malformed { reason, .. } => AttemptOutcome::Malformed { reason },
            }),
            Ok(Err(join_error)) => TierResult::Failed(AttemptOutcome::Unavailable {
                reason: format!("provider task failed: {}", join_error),
            }),
            Err(_) => TierResult::Failed(AttemptOutcome::TimedOut {
                after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn budget_exhausted(&self, destination: &Destination, budget: &CallBudget) {
        let signal = ArchitectureSignal {
            kind: SignalKind::ArbitrationBudgetExhausted,
            destination: destination.id.clone(),
            detail: format!(
                "{} calls per {}s spent, resets in {}s",
                budget.max_calls(),
                budget.window_seconds(),
                budget.resets_in()
            ),
            at: self.clock.now_epoch(),
        };
        tracing::warn!(
            destination = %destination.id,
            detail = %signal.detail,
            "Arbitration budget exhausted, routing to next tier"
        );
        self.emit_signal(signal);
    }

    fn emit_signal(&self, signal: ArchitectureSignal) {
        self.record("record_signal", |m| m.record_signal(signal.kind));
        if let Err(e) = self.audit.append(&AuditRecord::Signal(signal)) {
            tracing::warn!(error = %e, "Failed to record architecture signal");
        }
    }

    fn complete(
        &self,
        envelope: Envelope,
        response: String,
        source: ResponseSource,
        started: Instant,
    ) -> DispatchOutcome {
        let mut envelope = envelope;
        let finalized_at = self.clock.now_epoch();
        stamp(&mut envelope, |e| {
            e.finalize(FinalBlock {
                status: FinalStatus::Completed,
                source: source.clone(),
                response: Some(response.clone()),
                retry_after_seconds: None,
                finalized_at,
            })
        });
        self.finish(&envelope, FinalStatus::Completed, &source, started);
        DispatchOutcome::Completed {
            response,
            source,
            envelope: Box::new(envelope),
        }
    }

    /// Whole cascade exhausted: estimate when capacity returns
    fn defer(
        &self,
        envelope: Envelope,
        tiers: &[&Destination],
        started: Instant,
    ) -> DispatchOutcome {
        let mut envelope = envelope;
        let now = self.clock.now_epoch();

        let waits = tiers.iter().filter_map(|destination| {
            let provider_wait = self
                .providers
                .get(&destination.provider_id)
                .map(|p| self.health.seconds_until_available(p.key()))
                .filter(|wait| *wait > 0);
            let budget_wait = self
                .budgets
                .get(&destination.id)
                .filter(|b| b.remaining() == 0)
                .map(CallBudget::resets_in);
            match (provider_wait, budget_wait) {
                (Some(p), Some(b)) => Some(p.max(b)),
                (p, b) => p.or(b),
            }
        });
        let base = waits.min().unwrap_or(self.settings.default_retry_seconds);
        let jitter = if self.settings.retry_jitter_seconds > 0 {
            rand::rng().random_range(0..=self.settings.retry_jitter_seconds)
        } else {
            0
        };
        let retry_after_seconds = base.max(1).saturating_add(jitter);

        let attempts = envelope.execution_chain().len();
        let reason = format!(
            "all {} cascade tiers unavailable after {} attempts",
            tiers.len(),
            attempts
        );
        tracing::warn!(
            request_id = %envelope.id(),
            retry_after_seconds = retry_after_seconds,
            attempts = attempts,
            "Cascade exhausted, deferring request"
        );
        self.emit_signal(ArchitectureSignal {
            kind: SignalKind::CascadeExhausted,
            destination: tiers
                .last()
                .map(|d| d.id.clone())
                .unwrap_or_default(),
            detail: reason.clone(),
            at: now,
        });

        stamp(&mut envelope, |e| {
            e.finalize(FinalBlock {
                status: FinalStatus::Deferred,
                source: ResponseSource::None,
                response: None,
                retry_after_seconds: Some(retry_after_seconds),
                finalized_at: now,
            })
        });
        self.finish(&envelope, FinalStatus::Deferred, &ResponseSource::None, started);
        DispatchOutcome::Deferred {
            retry_after_seconds,
            reason,
            envelope: Box::new(envelope),
        }
    }

    /// Archive the envelope and record request metrics
    fn finish(
        &self,
        envelope: &Envelope,
        status: FinalStatus,
        source: &ResponseSource,
        started: Instant,
    ) {
        if let Err(e) = self
            .audit
            .append(&AuditRecord::Envelope(Box::new(envelope.clone())))
        {
            tracing::error!(request_id = %envelope.id(), error = %e, "Failed to archive envelope");
        }
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record("record_request", |m| m.record_request(status, source));
        self.record("record_dispatch_duration", |m| {
            m.record_dispatch_duration(status, duration_ms)
        });
        tracing::info!(
            request_id = %envelope.id(),
            status = status.as_str(),
            source = source.as_str(),
            attempts = envelope.execution_chain().len(),
            duration_ms = duration_ms,
            "Request finished"
        );
    }

    fn append_attempt(&self, envelope: &mut Envelope, attempt: ExecutionAttempt) {
        self.record("record_attempt", |m| {
            m.record_attempt(attempt.tier(), attempt.outcome())
        });
        stamp(envelope, |e| e.with_attempt(attempt));
    }

    fn record(&self, operation: &str, f: impl FnOnce(&Metrics) -> Result<(), prometheus::Error>) {
        if let Some(metrics) = &self.metrics {
            record_or_log(metrics, operation, f(metrics));
        }
    }
}

/// Apply one stage's stamp; a refused stamp keeps the prior envelope
fn stamp(
    envelope: &mut Envelope,
    write: impl FnOnce(&Envelope) -> Result<Envelope, EnvelopeError>,
) {
    match write(envelope) {
        Ok(next) => *envelope = next,
        Err(e) => {
            tracing::error!(request_id = %envelope.id(), error = %e, "Envelope stamp refused");
        }
    }
}

/// Admission priority after a persona hint; a hint can only raise it
pub fn effective_priority(requested: Priority, hint: Option<Priority>) -> Priority {
    hint.map_or(requested, |p| p.max(requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::cache::{HashingEmbedder, LookupKind, MemoryCacheStore, TtlTable};
    use crate::classifier::{Complexity, DomainMap};
    use crate::clock::ManualClock;
    use crate::health::{BreakerSettings, HealthBucket, MemoryHealthStore, ResourceCounters};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Behavior {
        Reply(&'static str),
        RateLimited(Option<u64>),
        Down,
        Slow(Duration),
    }

    struct MockProvider {
        id: String,
        key: ProviderKey,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(id: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                key: ProviderKey::new(id, "test-model"),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn key(&self) -> &ProviderKey {
            &self.key
        }

        async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Reply(text) => Ok(ProviderReply {
                    text: text.to_string(),
                    counters: ResourceCounters::new(),
                    tokens_used: 12,
                }),
                Behavior::RateLimited(retry_after) => Err(ProviderError::RateLimited {
                    provider: self.id.clone(),
                    retry_after: *retry_after,
                }),
                Behavior::Down => Err(ProviderError::Unavailable {
                    provider: self.id.clone(),
                    reason: "connection refused".to_string(),
                }),
                Behavior::Slow(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(ProviderReply {
                        text: "late".to_string(),
                        counters: ResourceCounters::new(),
                        tokens_used: 1,
                    })
                }
            }
        }
    }

    struct Declining;

    #[async_trait]
    impl PersonaAdvisor for Declining {
        async fn advise(&self, _destination: &str, _complexity: Complexity) -> Option<PersonaHint> {
            Some(PersonaHint {
                accept: false,
                priority: Some(Priority::High),
                prompt_supplement: Some("Answer as the on-call engineer.".to_string()),
            })
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        audit: Arc<MemoryAuditLog>,
        health: Arc<HealthTracker>,
    }

    fn quiet_settings() -> DispatchSettings {
        DispatchSettings {
            retry_jitter_seconds: 0,
            arbitration_max_calls: 1,
            ..DispatchSettings::default()
        }
    }

    fn tier(id: &str, kind: TierKind) -> Destination {
        Destination::new(id, kind, id, Duration::from_secs(5))
    }

    fn build(
        tiers: Vec<Destination>,
        providers: &[Arc<MockProvider>],
        persona: Arc<dyn PersonaAdvisor>,
    ) -> (Dispatcher, Harness) {
        build_with(tiers, providers, persona, quiet_settings())
    }

    fn build_with(
        tiers: Vec<Destination>,
        providers: &[Arc<MockProvider>],
        persona: Arc<dyn PersonaAdvisor>,
        settings: DispatchSettings,
    ) -> (Dispatcher, Harness) {
        let clock = Arc::new(ManualClock::new(1_000));
        let audit = Arc::new(MemoryAuditLog::new());
        let health = Arc::new(HealthTracker::new(
            Arc::new(MemoryHealthStore::new()),
            clock.clone(),
            BreakerSettings::default(),
        ));
        let cache = Arc::new(ResponseCache::new(
            Arc::new(MemoryCacheStore::new()),
            clock.clone(),
            Arc::new(HashingEmbedder::default()),
            TtlTable::default(),
            0.92,
        ));
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider.clone());
        }
        let dispatcher = Dispatcher::new(
            DispatchComponents {
                classifier: Arc::new(ClassifierCascade::new(0.7, DomainMap::default())),
                cache,
                health: health.clone(),
                providers: registry,
                plan: EscalationPlan::new(tiers),
                persona,
                audit: audit.clone(),
                clock: clock.clone(),
            },
            settings,
        );
        (
            dispatcher,
            Harness {
                clock,
                audit,
                health,
            },
        )
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage::new(text, "dev", "chat", 1_000)
    }

    fn outcomes(outcome: &DispatchOutcome) -> Vec<&'static str> {
        outcome
            .envelope()
            .execution_chain()
            .iter()
            .map(|a| a.outcome().as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_escalates_past_failing_tier() {
        let primary = MockProvider::new("primary", Behavior::Down);
        let buffer = MockProvider::new("buffer", Behavior::Reply("looks good"));
        let (dispatcher, _) = build(
            vec![
                tier("primary", TierKind::Primary),
                tier("buffer", TierKind::GenericBuffer),
            ],
            &[primary.clone(), buffer.clone()],
            Arc::new(crate::persona::NoPersona),
        );

        let outcome = dispatcher
            .dispatch(message("please review the pull request for auth"))
            .await;

        assert_eq!(outcome.response(), Some("looks good"));
        match &outcome {
            DispatchOutcome::Completed { source, .. } => assert_eq!(
                source,
                &ResponseSource::Destination {
                    id: "buffer".to_string(),
                    provider: ProviderKey::new("buffer", "test-model"),
                }
            ),
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(outcomes(&outcome), vec!["unavailable", "success"]);
        let chain = outcome.envelope().execution_chain();
        assert_eq!(chain[0].sequence(), 1);
        assert_eq!(chain[1].sequence(), 2);
        assert_eq!(chain[1].tokens(), 12);
        assert!(outcome.envelope().is_finalized());
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejections_defer_with_reset_estimate() {
        let primary = MockProvider::new("primary", Behavior::RateLimited(Some(120)));
        let buffer = MockProvider::new("buffer", Behavior::RateLimited(Some(300)));
        let (dispatcher, harness) = build(
            vec![
                tier("primary", TierKind::Primary),
                tier("buffer", TierKind::GenericBuffer),
            ],
            &[primary, buffer],
            Arc::new(crate::persona::NoPersona),
        );

        let outcome = dispatcher.dispatch(message("review this diff")).await;

        assert!(!outcome.is_completed());
        assert_eq!(outcome.retry_after_seconds(), Some(120));
        assert_eq!(outcomes(&outcome), vec!["rejected", "rejected"]);
        let finalized = outcome.envelope().finalized().expect("finalized");
        assert_eq!(finalized.status, FinalStatus::Deferred);
        assert_eq!(finalized.retry_after_seconds, Some(120));

        let signals = harness
            .audit
            .records()
            .into_iter()
            .filter(|r| matches!(r, AuditRecord::Signal(s) if s.kind == SignalKind::CascadeExhausted))
            .count();
        assert_eq!(signals, 1);
    }

    #[tokio::test]
    async fn test_red_provider_is_diverted_without_a_call() {
        let primary = MockProvider::new("primary", Behavior::Reply("unused"));
        let buffer = MockProvider::new("buffer", Behavior::Reply("from buffer"));
        let (dispatcher, harness) = build(
            vec![
                tier("primary", TierKind::Primary),
                tier("buffer", TierKind::GenericBuffer),
            ],
            &[primary.clone(), buffer],
            Arc::new(crate::persona::NoPersona),
        );
        harness
            .health
            .observe_rejection(&ProviderKey::new("primary", "test-model"), Some(60));

        let outcome = dispatcher.dispatch(message("review this diff")).await;

        assert_eq!(outcome.response(), Some("from buffer"));
        assert_eq!(primary.calls(), 0);
        assert_eq!(
            outcome.envelope().execution_chain()[0].outcome(),
            &AttemptOutcome::Diverted {
                bucket: HealthBucket::Red
            }
        );
        let snapshot = outcome.envelope().health_snapshot().expect("snapshot");
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_recovered_provider_is_tried_again() {
        let primary = MockProvider::new("primary", Behavior::Reply("back"));
        let (dispatcher, harness) = build(
            vec![tier("primary", TierKind::Primary)],
            &[primary.clone()],
            Arc::new(crate::persona::NoPersona),
        );
        let key = ProviderKey::new("primary", "test-model");
        harness.health.observe_rejection(&key, Some(30));

        let deferred = dispatcher
            .dispatch(message("review this diff").with_priority(Priority::High))
            .await;
        assert_eq!(deferred.retry_after_seconds(), Some(30));
        assert_eq!(primary.calls(), 0);

        // Reset passed: yellow admits high priority
        harness.clock.advance(31);
        let outcome = dispatcher
            .dispatch(message("review this diff").with_priority(Priority::High))
            .await;
        assert_eq!(outcome.response(), Some("back"));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_arbitration_budget_exhaustion_skips_tier() {
        let primary = MockProvider::new("primary", Behavior::Down);
        let arbiter = MockProvider::new("arbiter", Behavior::Reply("arbitrated"));
        let last = MockProvider::new("last", Behavior::Reply("last resort"));
        let (dispatcher, harness) = build(
            vec![
                tier("primary", TierKind::Primary),
                tier("arbiter", TierKind::Arbitration),
                tier("last", TierKind::LastResort),
            ],
            &[primary, arbiter.clone(), last.clone()],
            Arc::new(crate::persona::NoPersona),
        );

        let first = dispatcher.dispatch(message("review this diff")).await;
        assert_eq!(first.response(), Some("arbitrated"));
        assert_eq!(dispatcher.budget_remaining("arbiter"), Some(0));

        let second = dispatcher.dispatch(message("review that diff")).await;
        assert_eq!(second.response(), Some("last resort"));
        assert_eq!(
            outcomes(&second),
            vec!["unavailable", "budget_exhausted", "success"]
        );
        assert_eq!(arbiter.calls(), 1);
        assert_eq!(last.calls(), 1);

        let exhausted = harness.audit.records().into_iter().any(|r| {
            matches!(r, AuditRecord::Signal(s) if s.kind == SignalKind::ArbitrationBudgetExhausted && s.destination == "arbiter")
        });
        assert!(exhausted);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let primary = MockProvider::new("primary", Behavior::Reply("use logrotate"));
        let (dispatcher, _) = build(
            vec![tier("primary", TierKind::Primary)],
            &[primary.clone()],
            Arc::new(crate::persona::NoPersona),
        );

        let first = dispatcher.dispatch(message("how do I rotate logs")).await;
        assert_eq!(first.response(), Some("use logrotate"));
        assert_eq!(
            first.envelope().cache().map(|c| c.lookup),
            Some(LookupKind::Miss)
        );

        let second = dispatcher.dispatch(message("How do I rotate logs?")).await;
        assert_eq!(second.response(), Some("use logrotate"));
        assert_eq!(primary.calls(), 1);
        assert!(second.envelope().execution_chain().is_empty());
        match second {
            DispatchOutcome::Completed { source, .. } => assert_eq!(
                source,
                ResponseSource::Cache {
                    lookup: LookupKind::Exact
                }
            ),
            other => panic!("expected cache hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trivial_message_gets_canned_reply() {
        let primary = MockProvider::new("primary", Behavior::Reply("unused"));
        let (dispatcher, harness) = build(
            vec![tier("primary", TierKind::Primary)],
            &[primary.clone()],
            Arc::new(crate::persona::NoPersona),
        );

        let outcome = dispatcher.dispatch(message("thanks")).await;

        assert_eq!(outcome.response(), Some("You're welcome!"));
        assert_eq!(primary.calls(), 0);
        let archived = harness
            .audit
            .records()
            .into_iter()
            .filter(|r| matches!(r, AuditRecord::Envelope(_)))
            .count();
        assert_eq!(archived, 1);
    }

    #[tokio::test]
    async fn test_slow_tier_times_out_and_escalates() {
        let slow = MockProvider::new("slow", Behavior::Slow(Duration::from_secs(5)));
        let fast = MockProvider::new("fast", Behavior::Reply("quick"));
        let (dispatcher, _) = build(
            vec![
                Destination::new("slow", TierKind::Primary, "slow", Duration::from_millis(50)),
                tier("fast", TierKind::GenericBuffer),
            ],
            &[slow, fast],
            Arc::new(crate::persona::NoPersona),
        );

        let outcome = dispatcher.dispatch(message("review this diff")).await;

        assert_eq!(outcome.response(), Some("quick"));
        assert_eq!(
            outcome.envelope().execution_chain()[0].outcome(),
            &AttemptOutcome::TimedOut { after_ms: 50 }
        );
    }

    #[tokio::test]
    async fn test_persona_decline_skips_domain_tiers() {
        let domain = MockProvider::new("domain", Behavior::Reply("unused"));
        let generic = MockProvider::new("generic", Behavior::Reply("generic answer"));
        let (dispatcher, _) = build(
            vec![
                tier("domain", TierKind::DomainBuffer)
                    .with_domains(vec![crate::classifier::Domain::new("engineering")]),
                tier("generic", TierKind::GenericBuffer),
            ],
            &[domain.clone(), generic],
            Arc::new(Declining),
        );

        let outcome = dispatcher.dispatch(message("review this diff")).await;

        assert_eq!(outcome.response(), Some("generic answer"));
        assert_eq!(domain.calls(), 0);
        assert_eq!(outcomes(&outcome), vec!["persona_declined", "success"]);
        let routing = outcome.envelope().routing().expect("routing");
        assert_eq!(routing.priority, Priority::High);
        assert_eq!(
            routing.persona_supplement.as_deref(),
            Some("Answer as the on-call engineer.")
        );
    }

    fn brownout_cascade() -> (Dispatcher, Arc<MockProvider>, Arc<MockProvider>) {
        let primary = MockProvider::new("primary", Behavior::Down);
        let arbiter = MockProvider::new("arbiter", Behavior::Reply("arbitrated"));
        let last = MockProvider::new("last", Behavior::Reply("last resort"));
        let (dispatcher, _) = build_with(
            vec![
                tier("primary", TierKind::Primary),
                tier("arbiter", TierKind::Arbitration),
                tier("last", TierKind::LastResort),
            ],
            &[primary, arbiter.clone(), last.clone()],
            Arc::new(crate::persona::NoPersona),
            DispatchSettings {
                mode: GatewayMode::Brownout,
                ..quiet_settings()
            },
        );
        (dispatcher, arbiter, last)
    }

    #[tokio::test]
    async fn test_brownout_sheds_arbitration_for_unmarked_request() {
        let (dispatcher, arbiter, last) = brownout_cascade();

        let outcome = dispatcher
            .dispatch(message("tell me about the quarterly roadmap"))
            .await;

        assert_eq!(outcome.response(), Some("last resort"));
        assert_eq!(
            outcomes(&outcome),
            vec!["unavailable", "brownout_shed", "success"]
        );
        assert_eq!(arbiter.calls(), 0);
        assert_eq!(last.calls(), 1);
        assert_eq!(dispatcher.budget_remaining("arbiter"), Some(1));
        let routing = outcome.envelope().routing().expect("routing");
        assert_eq!(routing.mode, GatewayMode::Brownout);
        assert!(!routing.arbitration.allowed);
        assert_eq!(routing.arbitration.reason, GateReason::BrownoutDenied);
    }

    #[tokio::test]
    async fn test_brownout_keeps_arbitration_for_marked_request() {
        let (dispatcher, arbiter, _) = brownout_cascade();

        let outcome = dispatcher.dispatch(message("review this diff")).await;

        assert_eq!(outcome.response(), Some("arbitrated"));
        assert_eq!(arbiter.calls(), 1);
        let routing = outcome.envelope().routing().expect("routing");
        assert_eq!(routing.arbitration.reason, GateReason::EscalationMarkers);
    }

    #[tokio::test]
    async fn test_brownout_high_priority_reaches_arbitration() {
        let (dispatcher, arbiter, _) = brownout_cascade();

        let outcome = dispatcher
            .dispatch(message("tell me about the quarterly roadmap").with_priority(Priority::High))
            .await;

        assert_eq!(outcome.response(), Some("arbitrated"));
        assert_eq!(arbiter.calls(), 1);
        let routing = outcome.envelope().routing().expect("routing");
        assert!(routing.arbitration.allowed);
        assert_eq!(routing.arbitration.reason, GateReason::PriorityOverride);
    }

    #[tokio::test]
    async fn test_normal_mode_leaves_arbitration_open() {
        let primary = MockProvider::new("primary", Behavior::Down);
        let arbiter = MockProvider::new("arbiter", Behavior::Reply("arbitrated"));
        let (dispatcher, _) = build(
            vec![
                tier("primary", TierKind::Primary),
                tier("arbiter", TierKind::Arbitration),
            ],
            &[primary, arbiter.clone()],
            Arc::new(crate::persona::NoPersona),
        );

        let outcome = dispatcher
            .dispatch(message("tell me about the quarterly roadmap"))
            .await;

        assert_eq!(outcome.response(), Some("arbitrated"));
        let routing = outcome.envelope().routing().expect("routing");
        assert_eq!(routing.mode, GatewayMode::Normal);
        assert_eq!(routing.arbitration.reason, GateReason::NormalMode);
    }

    #[test]
    fn test_hint_only_raises_priority() {
        assert_eq!(
            effective_priority(Priority::Critical, Some(Priority::Low)),
            Priority::Critical
        );
        assert_eq!(
            effective_priority(Priority::Low, Some(Priority::High)),
            Priority::High
        );
        assert_eq!(effective_priority(Priority::Normal, None), Priority::Normal);
    }
}
