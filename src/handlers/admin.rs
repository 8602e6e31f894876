//! Operator endpoints
//!
//! Read-only provider health, manual bucket overrides, and cache
//! invalidation. Every invalidation lands in the audit log through the
//! cache layer.

use crate::cache::{CacheStats, InvalidationReason, InvalidationRecord, InvalidationScope};
use crate::classifier::Intent;
use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::health::{HealthBucket, HealthSnapshot, ProviderKey};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<HealthSnapshot>,
}

/// GET /admin/providers
pub async fn providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let keys = state.provider_keys();
    Json(ProvidersResponse {
        providers: state.health().snapshot_of(&keys),
    })
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub provider: String,
    pub model: String,
    /// `null` clears the pin
    pub bucket: Option<HealthBucket>,
}

/// POST /admin/providers/override
pub async fn override_provider(
    State(state): State<AppState>,
    Json(request): Json<OverrideRequest>,
) -> AppResult<Json<HealthSnapshot>> {
    let key = ProviderKey::new(request.provider, request.model);
    if !state.provider_keys().contains(&key) {
        return Err(AppError::UnknownProvider(key.to_string()));
    }
    let snapshot = state.health().set_override(&key, request.bucket);
    tracing::info!(
        provider = %key,
        bucket = ?request.bucket,
        "Provider override updated"
    );
    Ok(Json(snapshot))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearTarget {
    All,
    Project,
    Intent,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub scope: ClearTarget,
    #[serde(default)]
    pub value: Option<String>,
}

impl ClearRequest {
    fn scope(&self) -> AppResult<InvalidationScope> {
        let value = || {
            self.value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Validation("value is required for this scope".to_string()))
        };
        match self.scope {
            ClearTarget::All => Ok(InvalidationScope::All),
            ClearTarget::Project => Ok(InvalidationScope::Project {
                project: value()?.to_string(),
            }),
            ClearTarget::Intent => Ok(InvalidationScope::Intent {
                intent: parse_intent(value()?)?,
            }),
        }
    }
}

fn parse_intent(raw: &str) -> AppResult<Intent> {
    Intent::from_str(raw).map_err(AppError::Validation)
}

/// POST /admin/cache/clear
pub async fn clear_cache(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> AppResult<Json<InvalidationRecord>> {
    let scope = request.scope()?;
    Ok(Json(state.cache().invalidate(scope, InvalidationReason::Manual)))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    /// e.g. "commit", "deploy"
    pub event: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
}

/// POST /admin/cache/invalidate
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> AppResult<Json<InvalidationRecord>> {
    if request.event.trim().is_empty() {
        return Err(AppError::Validation("event cannot be empty".to_string()));
    }
    let intent = request.intent.as_deref().map(parse_intent).transpose()?;
    let scope = match (request.project, intent) {
        (Some(project), Some(intent)) => InvalidationScope::ProjectIntent { project, intent },
        (Some(project), None) => InvalidationScope::Project { project },
        (None, Some(intent)) => InvalidationScope::Intent { intent },
        (None, None) => InvalidationScope::All,
    };
    Ok(Json(state.cache().invalidate_for_event(request.event, scope)))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub project: String,
    pub context: String,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub switched: bool,
    pub invalidation: Option<InvalidationRecord>,
}

/// POST /admin/cache/context
pub async fn observe_context(
    State(state): State<AppState>,
    Json(request): Json<ContextRequest>,
) -> AppResult<Json<ContextResponse>> {
    if request.project.trim().is_empty() || request.context.trim().is_empty() {
        return Err(AppError::Validation(
            "project and context cannot be empty".to_string(),
        ));
    }
    let invalidation = state
        .cache()
        .observe_context(&request.project, &request.context);
    Ok(Json(ContextResponse {
        switched: invalidation.is_some(),
        invalidation,
    }))
}

/// GET /admin/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache().stats())
}
