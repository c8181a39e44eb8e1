//! Error types for the dispatch service
//!
//! One error enum covers routing, configuration and dispatch failures so that
//! a failure raised at any tier can be wrapped and carried back to the caller
//! unchanged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::dispatch::Tier;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Routing weights sum to {sum}, expected 1.0")]
    MisconfiguredWeights { sum: f64 },

    #[error("Invalid rule table: {0}")]
    InvalidRuleTable(String),

    #[error("Tier skip violation: {from} tier may not call {to} tier")]
    TierSkipViolation { from: Tier, to: Tier },

    #[error("No healthy target: {0}")]
    NoHealthyTarget(String),

    #[error("Fallback exhausted for special category {0}")]
    FallbackExhausted(String),

    #[error("Timed out at {tier} tier")]
    TimedOut { tier: Tier },

    #[error("{tier} tier failed: {source}")]
    DownstreamFailure {
        tier: Tier,
        #[source]
        source: Box<AppError>,
    },

    #[error("Backend {target} failed: {message}")]
    Backend { target: String, message: String },

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Wrap this error with the identity of the tier it came out of
    pub fn at_tier(self, tier: Tier) -> Self {
        AppError::DownstreamFailure {
            tier,
            source: Box::new(self),
        }
    }

    /// Innermost cause, skipping every downstream wrapper
    pub fn root_cause(&self) -> &AppError {
        let mut current = self;
        while let AppError::DownstreamFailure { source, .. } = current {
            current = source;
        }
        current
    }

    /// Deepest tier a failure was attributed to
    pub fn failing_tier(&self) -> Option<Tier> {
        let mut current = self;
        let mut tier = None;
        while let AppError::DownstreamFailure { tier: t, source } = current {
            tier = Some(*t);
            current = source;
        }
        match current {
            AppError::TimedOut { tier: t } => Some(*t),
            AppError::TierSkipViolation { from, .. } => Some(*from),
            _ => tier,
        }
    }

    /// Whether the tier that observed this error directly may retry it.
    ///
    /// Failures already wrapped by a lower tier were handled there.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Backend { .. } | AppError::TimedOut { .. })
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidProfile(_) => "INVALID_PROFILE",
            AppError::MisconfiguredWeights { .. } => "MISCONFIGURED_WEIGHTS",
            AppError::InvalidRuleTable(_) => "INVALID_RULE_TABLE",
            AppError::TierSkipViolation { .. } => "TIER_SKIP_VIOLATION",
            AppError::NoHealthyTarget(_) => "NO_HEALTHY_TARGET",
            AppError::FallbackExhausted(_) => "FALLBACK_EXHAUSTED",
            AppError::TimedOut { .. } => "TIMED_OUT",
            AppError::DownstreamFailure { .. } => "DOWNSTREAM_FAILURE",
            AppError::Backend { .. } => "BACKEND_ERROR",
            AppError::UnknownTarget(_) => "UNKNOWN_TARGET",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error, judged by its root cause
    pub fn status_code(&self) -> StatusCode {
        match self.root_cause() {
            AppError::InvalidProfile(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownTarget(_) => StatusCode::NOT_FOUND,
            AppError::NoHealthyTarget(_) | AppError::FallbackExhausted(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Backend { .. } => StatusCode::BAD_GATEWAY,
            AppError::MisconfiguredWeights { .. }
            | AppError::InvalidRuleTable(_)
            | AppError::TierSkipViolation { .. }
            | AppError::DownstreamFailure { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let root = self.root_cause();
        let message = match root {
            AppError::Internal(_) => "Internal server error".to_string(),
            _ => root.to_string(),
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: root.code().to_string(),
                message,
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
