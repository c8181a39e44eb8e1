//! Health check endpoints
//!
//! Provides endpoints for monitoring and container orchestration:
//! - `/health` - Full health check with per-target status
//! - `/health/ready` - Readiness probe
//! - `/health/live` - Liveness probe

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::{
    health::{HealthRecord, HealthState},
    AppState,
};

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Application statistics
#[derive(Debug, Serialize)]
pub struct HealthStats {
    pub uptime_seconds: u64,
    pub audited_decisions: usize,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub targets: Vec<HealthRecord>,
    pub stats: HealthStats,
}

/// Simple health response for liveness/readiness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

/// Overall status from the health of every tracked id.
///
/// The service is unhealthy only when neither scoring candidate can be
/// called.
fn overall_status(state: &AppState, records: &[HealthRecord]) -> HealthStatus {
    let usable = |id: &str| {
        records
            .iter()
            .find(|r| r.target_id == id)
            .map(|r| r.state.is_usable())
            .unwrap_or(false)
    };

    let privacy = usable(state.rules.privacy_target().as_str());
    let capability = usable(state.rules.capability_target().as_str());

    if !privacy && !capability {
        HealthStatus::Unhealthy
    } else if records.iter().any(|r| r.state != HealthState::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Full health check endpoint
///
/// Returns overall status, version, uptime and the health record of every
/// target and workflow component.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (overall, targets) = match state.health.snapshot().await {
        Ok(records) => (overall_status(&state, &records), records),
        Err(_) => (HealthStatus::Unhealthy, Vec::new()),
    };

    let uptime = state.start_time.elapsed().as_secs();

    let response = HealthResponse {
        status: overall.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        timestamp: chrono::Utc::now().to_rfc3339(),
        targets,
        stats: HealthStats {
            uptime_seconds: uptime,
            audited_decisions: state.audit.len(),
        },
    };

    let status_code = match overall {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Readiness probe endpoint
///
/// Ready while at least one scoring candidate is callable.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SimpleHealthResponse>) {
    let ready = match state.health.snapshot().await {
        Ok(records) => overall_status(&state, &records) != HealthStatus::Unhealthy,
        Err(_) => false,
    };

    if !ready {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SimpleHealthResponse {
                status: HealthStatus::Unhealthy,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}

/// Liveness probe endpoint
///
/// Returns 200 OK if the application is alive.
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}
