//! Configuration management for lobbyroute
//!
//! Parses TOML configuration files and provides typed access to settings.
//! The cascade order, TTL table, breaker thresholds, and arbitration budget
//! are all configuration data.

use crate::cache::TtlTable;
use crate::classifier::{Domain, DomainMap, Intent};
use crate::dispatch::{Destination, DispatchSettings, EscalationPlan, GatewayMode, TierKind};
use crate::error::{AppError, AppResult};
use crate::health::{BreakerSettings, ProviderKey};
use crate::providers::CompletionSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every timeout in the file, in seconds
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub cascade: Vec<TierConfig>,
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub persona: Option<PersonaConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// End-to-end budget for one request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Classifier cascade configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Local-model verdicts below this confidence fall through
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default)]
    pub local: Option<BackendConfig>,
    #[serde(default)]
    pub remote: Option<BackendConfig>,
    /// Intent name → domain overrides
    #[serde(default)]
    pub domains: HashMap<String, String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            local: None,
            remote: None,
            domains: HashMap::new(),
        }
    }
}

fn default_min_confidence() -> f32 {
    0.6
}

/// One LLM classifier backend
///
/// Fields are private; the file is validated once by `Config::validate()`
/// and cannot be mutated afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    base_url: String,
    model: String,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_backend_timeout")]
    timeout_seconds: u64,
}

fn default_backend_timeout() -> u64 {
    5
}

impl BackendConfig {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env.as_deref()
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Completion settings for a classifier call
    ///
    /// Classification answers are short; a small token cap and zero
    /// temperature keep them parseable.
    pub fn completion_settings(&self, name: &str, default_reset_seconds: u64) -> CompletionSettings {
        CompletionSettings {
            id: name.to_string(),
            key: ProviderKey::new(name, &self.model),
            base_url: self.base_url.clone(),
            api_key: read_api_key(self.api_key_env.as_deref()),
            max_tokens: 256,
            temperature: 0.0,
            timeout: Duration::from_secs(self.timeout_seconds),
            default_reset_seconds,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// JSON snapshot restored at startup and written at shutdown
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_primer_ttl")]
    pub primer_ttl_seconds: u64,
    /// Intent name → TTL seconds; intents left out keep the built-in table
    #[serde(default)]
    pub ttl: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            snapshot_path: None,
            sweep_interval_seconds: default_sweep_interval(),
            primer_ttl_seconds: default_primer_ttl(),
            ttl: HashMap::new(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_primer_ttl() -> u64 {
    3600
}

/// Circuit-breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_seconds: u64,
    /// Reset used when a red observation carries no reset time
    #[serde(default = "default_reset_seconds")]
    pub default_reset_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_cooldown_seconds: default_failure_cooldown(),
            default_reset_seconds: default_reset_seconds(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_failure_cooldown() -> u64 {
    30
}

fn default_reset_seconds() -> u64 {
    60
}

/// One outbound provider endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    id: String,
    /// Logical provider name used for health keys
    provider: String,
    model: String,
    base_url: String,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_provider_timeout")]
    timeout_seconds: u64,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_provider_timeout() -> u64 {
    30
}

impl ProviderConfig {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn key(&self) -> ProviderKey {
        ProviderKey::new(&self.provider, &self.model)
    }

    pub fn completion_settings(&self, default_reset_seconds: u64) -> CompletionSettings {
        CompletionSettings {
            id: self.id.clone(),
            key: self.key(),
            base_url: self.base_url.clone(),
            api_key: read_api_key(self.api_key_env.as_deref()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_seconds),
            default_reset_seconds,
        }
    }
}

/// One cascade tier, in order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierConfig {
    id: String,
    kind: TierKind,
    /// Id of an entry in `[[providers]]`
    provider: String,
    #[serde(default = "default_tier_timeout")]
    timeout_seconds: u64,
    /// Domains served; empty means all
    #[serde(default)]
    domains: Vec<String>,
}

fn default_tier_timeout() -> u64 {
    30
}

impl TierConfig {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    fn destination(&self) -> Destination {
        Destination::new(
            &self.id,
            self.kind,
            &self.provider,
            Duration::from_secs(self.timeout_seconds),
        )
        .with_domains(self.domains.iter().map(Domain::new).collect())
    }
}

/// Call allowance applied to each arbitration tier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArbitrationConfig {
    #[serde(default = "default_arbitration_calls")]
    pub max_calls: u32,
    #[serde(default = "default_arbitration_window")]
    pub window_seconds: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            max_calls: default_arbitration_calls(),
            window_seconds: default_arbitration_window(),
        }
    }
}

fn default_arbitration_calls() -> u32 {
    20
}

fn default_arbitration_window() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_canned_trivial")]
    pub canned_trivial: bool,
    #[serde(default = "default_retry_seconds")]
    pub default_retry_seconds: u64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter_seconds: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// `brownout` closes arbitration tiers to unmarked, non-urgent requests
    #[serde(default)]
    pub mode: GatewayMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            canned_trivial: default_canned_trivial(),
            default_retry_seconds: default_retry_seconds(),
            retry_jitter_seconds: default_retry_jitter(),
            system_prompt: None,
            mode: GatewayMode::default(),
        }
    }
}

fn default_canned_trivial() -> bool {
    true
}

fn default_retry_seconds() -> u64 {
    60
}

fn default_retry_jitter() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersonaConfig {
    pub base_url: String,
    #[serde(default = "default_persona_timeout")]
    pub timeout_ms: u64,
}

fn default_persona_timeout() -> u64 {
    500
}

/// Audit sink; without a path records stay in memory
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn read_api_key(env: Option<&str>) -> Option<String> {
    let name = env?;
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            tracing::warn!(env = name, "API key environment variable is unset or empty");
            None
        }
    }
}

/// Re-key a table by intent; unknown intent names are an error
fn by_intent<V: Clone>(table: &HashMap<String, V>, section: &str) -> AppResult<HashMap<Intent, V>> {
    table
        .iter()
        .map(|(name, value)| {
            Intent::from_str(name)
                .map(|intent| (intent, value.clone()))
                .map_err(|e| AppError::Config(format!("Configuration error: {}: {}", section, e)))
        })
        .collect()
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Look up a provider entry by id
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn escalation_plan(&self) -> EscalationPlan {
        EscalationPlan::new(self.cascade.iter().map(TierConfig::destination).collect())
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings::new(
            self.health.failure_threshold,
            self.health.failure_cooldown_seconds,
            self.health.default_reset_seconds,
        )
    }

    /// TTL table with `[cache.ttl]` applied; names are checked by `validate()`
    pub fn ttl_table(&self) -> TtlTable {
        TtlTable::with_overrides(&by_intent(&self.cache.ttl, "cache.ttl").unwrap_or_default())
    }

    pub fn domain_map(&self) -> DomainMap {
        DomainMap::with_overrides(
            &by_intent(&self.classifier.domains, "classifier.domains").unwrap_or_default(),
        )
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            canned_trivial: self.dispatch.canned_trivial,
            default_retry_seconds: self.dispatch.default_retry_seconds,
            retry_jitter_seconds: self.dispatch.retry_jitter_seconds,
            request_timeout: Duration::from_secs(self.server.request_timeout_seconds),
            system_prompt: self.dispatch.system_prompt.clone(),
            arbitration_max_calls: self.arbitration.max_calls,
            arbitration_window_seconds: self.arbitration.window_seconds,
            mode: self.dispatch.mode,
        }
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`; tests that build a
    /// `Config` by other means should call it explicitly.
    pub fn validate(&self) -> AppResult<()> {
        self.validate_server()?;
        self.validate_providers()?;
        self.validate_cascade()?;
        self.validate_tunables()?;
        Ok(())
    }

    fn validate_server(&self) -> AppResult<()> {
        let budget = self.server.request_timeout_seconds;
        if budget == 0 || budget > MAX_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "Configuration error: server.request_timeout_seconds must be in (0, {}], got {}",
                MAX_TIMEOUT_SECONDS, budget
            )));
        }
        let level = self.observability.log_level.as_str();
        if !["trace", "debug", "info", "warn", "error"].contains(&level) {
            return Err(AppError::Config(format!(
                "Configuration error: observability.log_level '{}' is not a tracing level",
                level
            )));
        }
        Ok(())
    }

    fn validate_providers(&self) -> AppResult<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Configuration error: provider id '{}' is defined more than once",
                    provider.id
                )));
            }
            if !is_http_url(&provider.base_url) {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    provider.id, provider.base_url
                )));
            }
            if provider.max_tokens == 0 {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has max_tokens=0. \
                    max_tokens must be greater than 0.",
                    provider.id
                )));
            }
            if !provider.temperature.is_finite() || !(0.0..=2.0).contains(&provider.temperature)
            {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' has invalid temperature {}. \
                    temperature must be a finite number between 0.0 and 2.0.",
                    provider.id, provider.temperature
                )));
            }
            if provider.timeout_seconds == 0 || provider.timeout_seconds > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "Configuration error: provider '{}' timeout_seconds must be in (0, {}], got {}",
                    provider.id, MAX_TIMEOUT_SECONDS, provider.timeout_seconds
                )));
            }
        }

        for (name, backend) in [
            ("local", &self.classifier.local),
            ("remote", &self.classifier.remote),
        ] {
            let Some(backend) = backend else { continue };
            if !is_http_url(&backend.base_url) {
                return Err(AppError::Config(format!(
                    "Configuration error: classifier.{} has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    name, backend.base_url
                )));
            }
            if backend.timeout_seconds == 0 || backend.timeout_seconds > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "Configuration error: classifier.{} timeout_seconds must be in (0, {}], got {}",
                    name, MAX_TIMEOUT_SECONDS, backend.timeout_seconds
                )));
            }
        }

        if let Some(persona) = &self.persona {
            if !is_http_url(&persona.base_url) {
                return Err(AppError::Config(format!(
                    "Configuration error: persona.base_url '{}' must start with 'http://' or 'https://'",
                    persona.base_url
                )));
            }
        }
        Ok(())
    }

    fn validate_cascade(&self) -> AppResult<()> {
        if self.cascade.is_empty() {
            return Err(AppError::Config(
                "Configuration error: [[cascade]] has no tiers. At least one tier is required.\n\n\
                Example fix - add to config.toml:\n\
                [[cascade]]\n\
                id = \"primary\"\n\
                kind = \"primary\"\n\
                provider = \"my-provider\""
                    .to_string(),
            ));
        }

        let last_index = self.cascade.len() - 1;
        let mut seen = std::collections::HashSet::new();
        for (index, tier) in self.cascade.iter().enumerate() {
            if !seen.insert(tier.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Configuration error: cascade tier id '{}' is used more than once",
                    tier.id
                )));
            }
            if self.provider(&tier.provider).is_none() {
                return Err(AppError::Config(format!(
                    "Configuration error: cascade tier '{}' references unknown provider '{}'",
                    tier.id, tier.provider
                )));
            }
            if tier.kind == TierKind::LastResort && index != last_index {
                return Err(AppError::Config(format!(
                    "Configuration error: cascade tier '{}' is last_resort but is not the final tier",
                    tier.id
                )));
            }
            if tier.kind == TierKind::DomainBuffer && tier.domains.is_empty() {
                return Err(AppError::Config(format!(
                    "Configuration error: domain_buffer tier '{}' must list at least one domain",
                    tier.id
                )));
            }
            if tier.timeout_seconds == 0 || tier.timeout_seconds > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "Configuration error: cascade tier '{}' timeout_seconds must be in (0, {}], got {}",
                    tier.id, MAX_TIMEOUT_SECONDS, tier.timeout_seconds
                )));
            }
            if tier.timeout_seconds > self.server.request_timeout_seconds {
                return Err(AppError::Config(format!(
                    "Configuration error: cascade tier '{}' timeout ({}s) exceeds \
                    server.request_timeout_seconds ({}s)",
                    tier.id, tier.timeout_seconds, self.server.request_timeout_seconds
                )));
            }
        }

        let has_arbitration = self.cascade.iter().any(|t| t.kind == TierKind::Arbitration);
        if has_arbitration && self.arbitration.max_calls == 0 {
            return Err(AppError::Config(
                "Configuration error: arbitration.max_calls must be greater than 0 \
                when the cascade has an arbitration tier"
                    .to_string(),
            ));
        }
        if has_arbitration && self.arbitration.window_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: arbitration.window_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_tunables(&self) -> AppResult<()> {
        by_intent(&self.cache.ttl, "cache.ttl")?;
        by_intent(&self.classifier.domains, "classifier.domains")?;
        let threshold = self.cache.similarity_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(AppError::Config(format!(
                "Configuration error: cache.similarity_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        let confidence = self.classifier.min_confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(AppError::Config(format!(
                "Configuration error: classifier.min_confidence must be in [0, 1], got {}",
                confidence
            )));
        }
        if self.cache.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: cache.sweep_interval_seconds must be greater than 0"
                    .to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(AppError::Config(
                "Configuration error: health.failure_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
