//! Multi-criteria routing engine
//!
//! Scores the two candidate targets by summing the weights of the profile
//! dimensions that vote for each. Special categories bypass scoring entirely.
//! Decisions are a pure function of the profile and the loaded rule set.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    profile::{Dimension, RequirementProfile},
    rules::{RuleSet, SpecialRoute, TargetId, UnknownCategoryPolicy},
};

/// Scores closer than this are a tie
const SCORE_EPSILON: f64 = 1e-9;

/// Outcome of routing one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub decision_id: Uuid,
    pub chosen_target: TargetId,
    /// Accumulated weight per candidate
    pub score_per_target: BTreeMap<TargetId, f64>,
    /// Dimensions that voted for the chosen target, in priority order
    pub contributing_dimensions: Vec<Dimension>,
    pub is_special_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_route: Option<SpecialRoute>,
}

impl RoutingDecision {
    pub fn special_category(&self) -> Option<&str> {
        self.special_route.as_ref().map(|r| r.category.as_str())
    }

    pub fn score_of(&self, target: &TargetId) -> f64 {
        self.score_per_target.get(target).copied().unwrap_or(0.0)
    }
}

/// One dimension's vote
#[derive(Debug, Clone, PartialEq)]
struct Vote<'a> {
    dimension: Dimension,
    target: &'a TargetId,
}

/// Weighted router over a shared, immutable rule set
#[derive(Clone)]
pub struct RoutingEngine {
    rules: Arc<RuleSet>,
}

impl RoutingEngine {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Decide the target for a profile
    pub fn decide(&self, profile: &RequirementProfile) -> AppResult<RoutingDecision> {
        let votes = self.collect_votes(profile)?;
        let scores = self.score(&votes);

        if let Some(category) = profile.special_category.as_deref() {
            match self.rules.special_route(category) {
                Some(route) => {
                    debug!(
                        category = %category,
                        primary = %route.primary_target,
                        fallback = %route.fallback_target,
                        models = route.ordered_model_list.len(),
                        "Special category override"
                    );
                    record_decision(&route.primary_target, true);
                    return Ok(RoutingDecision {
                        decision_id: Uuid::new_v4(),
                        chosen_target: route.primary_target.clone(),
                        score_per_target: scores,
                        contributing_dimensions: Vec::new(),
                        is_special_override: true,
                        special_route: Some(route.clone()),
                    });
                }
                None => debug!(
                    category = %category,
                    "Special category has no configured route, scoring normally"
                ),
            }
        }

        let privacy = self.rules.privacy_target();
        let capability = self.rules.capability_target();
        let privacy_score = scores.get(privacy).copied().unwrap_or(0.0);
        let capability_score = scores.get(capability).copied().unwrap_or(0.0);

        let winner = if (privacy_score - capability_score).abs() > SCORE_EPSILON {
            if privacy_score > capability_score {
                privacy
            } else {
                capability
            }
        } else {
            // Tie: the highest-priority dimension that voted decides, and
            // with no votes at all the privacy candidate wins.
            votes.first().map(|v| v.target).unwrap_or(privacy)
        };

        let contributing_dimensions: Vec<Dimension> = votes
            .iter()
            .filter(|v| v.target == winner)
            .map(|v| v.dimension)
            .collect();

        debug!(
            chosen = %winner,
            privacy_score,
            capability_score,
            contributing = ?contributing_dimensions,
            "Routing decision"
        );
        record_decision(winner, false);

        Ok(RoutingDecision {
            decision_id: Uuid::new_v4(),
            chosen_target: winner.clone(),
            score_per_target: scores,
            contributing_dimensions,
            is_special_override: false,
            special_route: None,
        })
    }

    /// Votes of every present dimension, in priority order
    fn collect_votes(&self, profile: &RequirementProfile) -> AppResult<Vec<Vote<'_>>> {
        let mut votes = Vec::new();

        for dimension in Dimension::PRIORITY {
            let Some(value) = profile.value(dimension) else {
                continue;
            };
            if !self.rules.has_rules(dimension) {
                continue;
            }

            let target = match self.rules.target_for(dimension, value) {
                Some(target) => target,
                None => match self.rules.unknown_category() {
                    UnknownCategoryPolicy::Reject => {
                        return Err(AppError::InvalidProfile(format!(
                            "'{}' is not a recognised {}",
                            value, dimension
                        )));
                    }
                    UnknownCategoryPolicy::Privacy => {
                        warn!(dimension = %dimension, value = %value, "Unknown category routed to privacy target");
                        self.rules.privacy_target()
                    }
                    UnknownCategoryPolicy::Capability => {
                        warn!(dimension = %dimension, value = %value, "Unknown category routed to capability target");
                        self.rules.capability_target()
                    }
                },
            };

            votes.push(Vote { dimension, target });
        }

        Ok(votes)
    }

    fn score(&self, votes: &[Vote<'_>]) -> BTreeMap<TargetId, f64> {
        let mut scores = BTreeMap::new();
        scores.insert(self.rules.privacy_target().clone(), 0.0);
        scores.insert(self.rules.capability_target().clone(), 0.0);

        let weights = self.rules.weights();
        for vote in votes {
            *scores.entry(vote.target.clone()).or_insert(0.0) += weights.get(vote.dimension);
        }
        scores
    }
}

fn record_decision(target: &TargetId, special: bool) {
    metrics::counter!(
        "routing_decisions_total",
        "target" => target.to_string(),
        "special" => if special { "true" } else { "false" }
    )
    .increment(1);
}
