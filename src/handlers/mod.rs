//! HTTP request handlers for the lobbyroute API

use crate::audit::{AuditSink, JsonlAuditLog, MemoryAuditLog};
use crate::cache::{HashingEmbedder, MemoryCacheStore, ResponseCache};
use crate::classifier::{ClassifierCascade, HttpClassifierBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::{DispatchComponents, Dispatcher};
use crate::error::{AppError, AppResult};
use crate::health::{HealthTracker, MemoryHealthStore, ProviderKey};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::persona::{HttpPersonaAdvisor, NoPersona, PersonaAdvisor};
use crate::providers::{OpenAiCompatProvider, ProviderRegistry};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod chat;
pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build every component from configuration using the wall clock
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built, the audit log
    /// cannot be opened, or the metrics registry fails to initialize.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Arc<Config>, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?);

        let audit: Arc<dyn AuditSink> = match &config.audit.path {
            Some(path) => Arc::new(JsonlAuditLog::open(path)?),
            None => Arc::new(MemoryAuditLog::new()),
        };
        let default_reset = config.health.default_reset_seconds;

        let mut providers = ProviderRegistry::new();
        for provider in &config.providers {
            providers.register(Arc::new(OpenAiCompatProvider::new(
                provider.completion_settings(default_reset),
                clock.clone(),
            )?));
        }

        let mut classifier =
            ClassifierCascade::new(config.classifier.min_confidence, config.domain_map());
        if let Some(local) = &config.classifier.local {
            classifier = classifier.with_local(Arc::new(HttpClassifierBackend::new(
                "local",
                local.completion_settings("classifier-local", default_reset),
                clock.clone(),
            )?));
        }
        if let Some(remote) = &config.classifier.remote {
            classifier = classifier.with_remote(Arc::new(HttpClassifierBackend::new(
                "remote",
                remote.completion_settings("classifier-remote", default_reset),
                clock.clone(),
            )?));
        }

        let persona: Arc<dyn PersonaAdvisor> = match &config.persona {
            Some(persona) => Arc::new(HttpPersonaAdvisor::new(
                &persona.base_url,
                Duration::from_millis(persona.timeout_ms),
            )?),
            None => Arc::new(NoPersona),
        };

        let cache = ResponseCache::new(
            Arc::new(MemoryCacheStore::new()),
            clock.clone(),
            Arc::new(HashingEmbedder::default()),
            config.ttl_table(),
            config.cache.similarity_threshold,
        )
        .with_primer_ttl(config.cache.primer_ttl_seconds)
        .with_audit(audit.clone());

        let health = HealthTracker::new(
            Arc::new(MemoryHealthStore::new()),
            clock.clone(),
            config.breaker_settings(),
        )
        .with_audit(audit.clone());

        let dispatcher = Dispatcher::new(
            DispatchComponents {
                classifier: Arc::new(classifier),
                cache: Arc::new(cache),
                health: Arc::new(health),
                providers,
                plan: config.escalation_plan(),
                persona,
                audit,
                clock: clock.clone(),
            },
            config.dispatch_settings(),
        )
        .with_metrics(metrics.clone());

        Ok(Self::from_parts(config, Arc::new(dispatcher), metrics, clock))
    }

    /// Assemble state from prebuilt components
    pub fn from_parts(
        config: Arc<Config>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            metrics,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.dispatcher.cache()
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        self.dispatcher.health()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Health keys of every configured provider, deduplicated, in config order
    pub fn provider_keys(&self) -> Vec<ProviderKey> {
        let mut keys: Vec<ProviderKey> = Vec::new();
        for key in self.config.providers.iter().map(|p| p.key()) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Full HTTP surface with request-id and trace layers
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/admin/providers", get(admin::providers))
        .route("/admin/providers/override", post(admin::override_provider))
        .route("/admin/cache/clear", post(admin::clear_cache))
        .route("/admin/cache/invalidate", post(admin::invalidate_cache))
        .route("/admin/cache/context", post(admin::observe_context))
        .route("/admin/cache/stats", get(admin::cache_stats))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::create_test_state;
    use super::*;

    #[test]
    fn test_appstate_builds_from_config() {
        let state = create_test_state();
        assert_eq!(state.config().server.port, 3000);
        assert_eq!(state.dispatcher().providers().len(), 2);
        assert_eq!(state.dispatcher().plan().tiers().len(), 2);
    }

    #[test]
    fn test_appstate_is_clonable() {
        let state = create_test_state();
        let state2 = state.clone();
        assert!(Arc::ptr_eq(state.dispatcher(), state2.dispatcher()));
    }

    #[test]
    fn test_provider_keys_are_deduplicated() {
        let state = create_test_state();
        assert_eq!(
            state.provider_keys(),
            vec![
                ProviderKey::new("groq", "llama-3.1-8b-instant"),
                ProviderKey::new("local", "qwen3:32b"),
            ]
        );
    }
}
