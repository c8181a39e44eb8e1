//! Messages passed between tiers and back to the caller

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    error::AppError,
    profile::RequirementProfile,
    routing::RoutingDecision,
    rules::TargetId,
};

use super::{DispatchState, Tier};

/// Request travelling down the tier chain.
///
/// Everything heavy sits behind an `Arc` so forwarding and fan-out clone
/// cheaply.
#[derive(Debug, Clone)]
pub struct TierRequest {
    pub correlation_id: Uuid,
    pub profile: Arc<RequirementProfile>,
    pub deadline: Instant,
    pub payload: Arc<Value>,
    pub decision: Arc<RoutingDecision>,
    /// Target resolved before entering the chain
    pub target: TargetId,
    /// Model picked from a special route's model list
    pub model: Option<String>,
    /// Workflow components named by the caller
    pub components: Vec<String>,
    /// The single component this branch of a fan-out is for
    pub component: Option<String>,
    /// Position of this request in the chain; advanced on every hop
    pub state: DispatchState,
}

impl TierRequest {
    pub fn new(
        correlation_id: Uuid,
        profile: Arc<RequirementProfile>,
        deadline: Instant,
        payload: Arc<Value>,
        decision: Arc<RoutingDecision>,
        target: TargetId,
    ) -> Self {
        Self {
            correlation_id,
            profile,
            deadline,
            payload,
            decision,
            target,
            model: None,
            components: Vec::new(),
            component: None,
            state: DispatchState::Created,
        }
    }

    /// Budget left before the deadline
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Special category driving the retry policy
    pub fn category(&self) -> Option<&str> {
        self.decision.special_category()
    }

    /// Copy of this request scoped to one workflow component
    pub fn for_component(&self, component: &str) -> Self {
        Self {
            component: Some(component.to_string()),
            ..self.clone()
        }
    }
}

/// Successful result of a tier
#[derive(Debug, Clone)]
pub struct TierReply {
    pub value: Value,
    /// Tiers the result passed through, outermost first
    pub trace: Vec<Tier>,
    pub target: TargetId,
    pub model: Option<String>,
}

impl TierReply {
    pub fn new(value: Value, target: TargetId, model: Option<String>) -> Self {
        Self {
            value,
            trace: Vec::new(),
            target,
            model,
        }
    }
}

/// Failure of a tier, with the tiers it passed through
#[derive(Debug)]
pub struct TierFault {
    pub error: AppError,
    pub trace: Vec<Tier>,
}

impl TierFault {
    /// Attribute the failure to the tier it came out of
    pub fn wrap(self, tier: Tier) -> Self {
        Self {
            error: self.error.at_tier(tier),
            trace: self.trace,
        }
    }
}

impl From<AppError> for TierFault {
    fn from(error: AppError) -> Self {
        Self {
            error,
            trace: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Ok,
    Error,
}

/// Innermost failure reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_tier: Option<Tier>,
    /// Display of the full wrapped error chain
    pub chain: String,
}

impl ErrorDetail {
    pub fn from_error(error: &AppError) -> Self {
        let root = error.root_cause();
        let message = match root {
            AppError::Internal(_) => "Internal server error".to_string(),
            _ => root.to_string(),
        };
        Self {
            code: root.code().to_string(),
            message,
            failing_tier: error.failing_tier(),
            chain: error.to_string(),
        }
    }
}

/// Terminal answer of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub correlation_id: Uuid,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    pub tier_trace: Vec<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl DispatchResponse {
    /// Response for a request refused before it was routed
    pub fn rejected(error: &AppError) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            status: DispatchStatus::Error,
            result: None,
            error_detail: Some(ErrorDetail::from_error(error)),
            tier_trace: Vec::new(),
            decision_id: None,
            target: None,
            model: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == DispatchStatus::Ok
    }
}
