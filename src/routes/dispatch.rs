//! Dispatch endpoints
//!
//! - `POST /v1/dispatch` - route and run a request through the tier chain
//! - `POST /v1/route` - routing decision only
//! - `GET /v1/targets` - health of every target and workflow component
//! - `GET /v1/audit` - recent routing decisions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    audit::AuditEntry,
    dispatch::{DispatchRequest, DispatchResponse},
    error::{AppError, AppResult},
    health::HealthRecord,
    profile::RequirementProfile,
    routing::RoutingDecision,
    AppState,
};

/// Default number of audit entries returned
const DEFAULT_AUDIT_LIMIT: usize = 50;

/// Dispatch request body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchBody {
    pub profile: Value,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub components: Vec<String>,
}

/// Route (explain) request body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteBody {
    pub profile: Value,
}

#[derive(Debug, Serialize)]
pub struct TargetsResponse {
    pub privacy_target: String,
    pub capability_target: String,
    pub targets: Vec<HealthRecord>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub capacity: usize,
    pub entries: Vec<AuditEntry>,
}

/// Route and dispatch a request
///
/// The body is the terminal dispatch response whether the dispatch
/// succeeded or not, including requests refused before routing; the status
/// code reflects the innermost error.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DispatchBody>,
) -> (StatusCode, Json<DispatchResponse>) {
    debug!(
        components = body.components.len(),
        timeout_ms = ?body.timeout_ms,
        "Dispatch request received"
    );

    let request = match parse_dispatch(body) {
        Ok(request) => request,
        Err(error) => {
            warn!(code = error.code(), error = %error, "Dispatch request rejected");
            return (
                error.status_code(),
                Json(DispatchResponse::rejected(&error)),
            );
        }
    };

    let outcome = state.supervisor.dispatch(request).await;

    let status = outcome
        .error
        .as_ref()
        .map(AppError::status_code)
        .unwrap_or(StatusCode::OK);

    (status, Json(outcome.response))
}

fn parse_dispatch(body: DispatchBody) -> AppResult<DispatchRequest> {
    let profile = RequirementProfile::from_value(body.profile)?;
    let timeout = match body.timeout_ms {
        Some(0) => {
            return Err(AppError::BadRequest(
                "timeout_ms must be greater than zero".to_string(),
            ))
        }
        Some(ms) => Some(Duration::from_millis(ms)),
        None => None,
    };

    Ok(DispatchRequest {
        profile,
        payload: body.payload,
        timeout,
        components: body.components,
    })
}

/// Explain the routing decision for a profile without dispatching
pub async fn route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RouteBody>,
) -> AppResult<Json<RoutingDecision>> {
    let profile = RequirementProfile::from_value(body.profile)?;
    let decision = state.supervisor.explain(&profile)?;
    Ok(Json(decision))
}

/// Health records of every target and workflow component
pub async fn list_targets(State(state): State<Arc<AppState>>) -> AppResult<Json<TargetsResponse>> {
    let targets = state.health.snapshot().await?;
    Ok(Json(TargetsResponse {
        privacy_target: state.rules.privacy_target().to_string(),
        capability_target: state.rules.capability_target().to_string(),
        targets,
    }))
}

/// Most recent audited decisions, newest first
pub async fn recent_decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Json<AuditResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    Json(AuditResponse {
        capacity: state.audit.capacity(),
        entries: state.audit.recent(limit),
    })
}
