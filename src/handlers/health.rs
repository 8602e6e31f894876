//! Liveness endpoint for monitoring and load balancers

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// "degraded" once any metric failed to record
    pub metrics_status: &'static str,
    pub cascade_tiers: usize,
}

/// Always 200 while the process serves requests
///
/// Provider health lives at `/admin/providers`; a gateway with every
/// provider red is still alive and deferring.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics_status = if state.metrics().metrics_recording_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            metrics_status,
            cascade_tiers: state.dispatcher().plan().tiers().len(),
        }),
    )
}
