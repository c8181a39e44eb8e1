//! Health-aware target resolution
//!
//! Turns a routing decision into the target that will actually be called.
//! Degraded targets are still attempted; only unreachable ones are skipped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, AppResult},
    health::HealthRegistry,
    routing::RoutingDecision,
    rules::{RuleSet, SpecialRoute, TargetId},
};

/// How a target was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResolutionPath {
    /// The scored winner was usable
    Direct,
    /// The scored winner was unreachable and the privacy candidate took over
    PrivacyFailover,
    Primary,
    Fallback,
    /// Entry of the ordered model list at this position
    ModelList { index: usize },
}

/// Target chosen for a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    pub target: TargetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub path: ResolutionPath,
}

impl ResolvedTarget {
    fn new(target: TargetId, path: ResolutionPath) -> Self {
        Self {
            target,
            model: None,
            path,
        }
    }
}

/// Walks primary, fallback and model list against the health registry
#[derive(Clone)]
pub struct FallbackResolver {
    rules: Arc<RuleSet>,
    health: HealthRegistry,
}

impl FallbackResolver {
    pub fn new(rules: Arc<RuleSet>, health: HealthRegistry) -> Self {
        Self { rules, health }
    }

    /// Resolve the target a decision should be dispatched to
    pub async fn resolve(&self, decision: &RoutingDecision) -> AppResult<ResolvedTarget> {
        match decision.special_route.as_ref() {
            Some(route) if decision.is_special_override => self.resolve_special(route).await,
            _ => self.resolve_scored(&decision.chosen_target).await,
        }
    }

    async fn resolve_special(&self, route: &SpecialRoute) -> AppResult<ResolvedTarget> {
        if self.usable(&route.primary_target).await? {
            return Ok(ResolvedTarget::new(
                route.primary_target.clone(),
                ResolutionPath::Primary,
            ));
        }

        if self.usable(&route.fallback_target).await? {
            info!(
                category = %route.category,
                primary = %route.primary_target,
                fallback = %route.fallback_target,
                "Primary target unreachable, using fallback"
            );
            return Ok(ResolvedTarget::new(
                route.fallback_target.clone(),
                ResolutionPath::Fallback,
            ));
        }

        for (index, candidate) in route.ordered_model_list.iter().enumerate() {
            if self.usable(&candidate.target).await? {
                info!(
                    category = %route.category,
                    model = %candidate.model,
                    target_id = %candidate.target,
                    index,
                    "Primary and fallback unreachable, using model list entry"
                );
                return Ok(ResolvedTarget {
                    target: candidate.target.clone(),
                    model: Some(candidate.model.clone()),
                    path: ResolutionPath::ModelList { index },
                });
            }
            debug!(
                category = %route.category,
                model = %candidate.model,
                target_id = %candidate.target,
                "Model list entry unreachable"
            );
        }

        warn!(
            category = %route.category,
            models = route.ordered_model_list.len(),
            "Every candidate of the special route is unreachable"
        );
        Err(AppError::FallbackExhausted(route.category.clone()))
    }

    async fn resolve_scored(&self, chosen: &TargetId) -> AppResult<ResolvedTarget> {
        if self.usable(chosen).await? {
            return Ok(ResolvedTarget::new(chosen.clone(), ResolutionPath::Direct));
        }

        // Failover only ever moves data towards the local target.
        let privacy = self.rules.privacy_target();
        if chosen != privacy && self.usable(privacy).await? {
            warn!(
                chosen = %chosen,
                failover = %privacy,
                "Chosen target unreachable, failing over to privacy target"
            );
            return Ok(ResolvedTarget::new(
                privacy.clone(),
                ResolutionPath::PrivacyFailover,
            ));
        }

        Err(AppError::NoHealthyTarget(format!(
            "{} is unreachable and no failover applies",
            chosen
        )))
    }

    async fn usable(&self, target: &TargetId) -> AppResult<bool> {
        self.health.is_usable(target.as_str()).await
    }
}
