//! Routing rule store
//!
//! Loads the rules document once at startup, validates it, and exposes it as
//! an immutable [`RuleSet`] shared behind an `Arc`. A rule set that fails
//! validation never exists: the process refuses to start instead.

pub mod document;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    dispatch::RetryPolicy,
    error::{AppError, AppResult},
    profile::Dimension,
};

pub use document::RulesDocument;

/// Tolerance on the weight sum
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Identifier of an execution target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What to do with a domain value the rule table does not map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategoryPolicy {
    /// Fail the decision with `InvalidProfile`
    #[default]
    Reject,
    /// Vote for the privacy-preserving candidate
    Privacy,
    /// Vote for the cloud-capable candidate
    Capability,
}

/// Entry of an ordered model preference list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub model: String,
    pub target: TargetId,
}

/// Override route for a special category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialRoute {
    pub category: String,
    pub primary_target: TargetId,
    pub fallback_target: TargetId,
    /// Priority order, preserved exactly as configured
    pub ordered_model_list: Vec<ModelCandidate>,
}

/// Per-dimension weights summing to 1.0
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingWeights {
    weights: HashMap<Dimension, f64>,
}

impl RoutingWeights {
    /// Validate and build weights.
    ///
    /// Every weight must be finite and non-negative and the sum must be 1.0
    /// within [`WEIGHT_TOLERANCE`].
    pub fn new(weights: HashMap<Dimension, f64>) -> AppResult<Self> {
        if let Some((dimension, weight)) = weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(AppError::InvalidRuleTable(format!(
                "weight for {} must be a non-negative number, got {}",
                dimension, weight
            )));
        }

        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(AppError::MisconfiguredWeights { sum });
        }

        Ok(Self { weights })
    }

    /// Weight of a dimension; absent dimensions weigh nothing
    pub fn get(&self, dimension: Dimension) -> f64 {
        self.weights.get(&dimension).copied().unwrap_or(0.0)
    }
}

/// Validated, immutable routing configuration
#[derive(Debug, Clone)]
pub struct RuleSet {
    privacy_target: TargetId,
    capability_target: TargetId,
    /// Every declared target, candidates first
    targets: Vec<TargetId>,
    endpoints: HashMap<TargetId, String>,
    components: BTreeMap<String, Option<String>>,
    rules: HashMap<Dimension, HashMap<String, TargetId>>,
    unknown_category: UnknownCategoryPolicy,
    special_routes: HashMap<String, SpecialRoute>,
    weights: RoutingWeights,
    coordinator_workers: usize,
    default_retry: RetryPolicy,
    category_retry: HashMap<String, RetryPolicy>,
}

impl RuleSet {
    /// Load and validate a rules document from disk
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::InvalidRuleTable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let rules = Self::from_yaml_str(&text)?;
        info!(
            path = %path.display(),
            special_routes = rules.special_routes.len(),
            targets = rules.targets.len(),
            "Routing rules loaded"
        );
        Ok(rules)
    }

    /// Parse and validate a YAML rules document
    pub fn from_yaml_str(text: &str) -> AppResult<Self> {
        let document: RulesDocument = serde_yaml::from_str(text)
            .map_err(|e| AppError::InvalidRuleTable(format!("malformed rules document: {}", e)))?;
        Self::from_document(document)
    }

    /// Validate a parsed document
    pub fn from_document(document: RulesDocument) -> AppResult<Self> {
        let privacy_target = TargetId::new(document.targets.privacy);
        let capability_target = TargetId::new(document.targets.capability);
        if privacy_target == capability_target {
            return Err(AppError::InvalidRuleTable(format!(
                "privacy and capability candidates are both {}",
                privacy_target
            )));
        }

        let mut targets = vec![privacy_target.clone(), capability_target.clone()];
        let mut endpoints = HashMap::new();
        for (id, url) in document.targets.endpoints {
            let id = TargetId::new(id);
            if !targets.contains(&id) {
                targets.push(id.clone());
            }
            endpoints.insert(id, url);
        }

        let is_declared = |id: &TargetId| targets.contains(id);

        // Weights first: a bad sum is the most common mistake.
        let mut weights = HashMap::new();
        for (name, weight) in document.routing_weights {
            let dimension = parse_dimension(&name, "routing_weights")?;
            weights.insert(dimension, weight);
        }
        let weights = RoutingWeights::new(weights)?;

        let mut rules = HashMap::new();
        for (name, table) in document.routing_rules {
            let dimension = parse_dimension(&name, "routing_rules")?;
            let mut mapped = HashMap::new();
            for (value, target) in table {
                if let Some(allowed) = dimension.closed_values() {
                    if !allowed.contains(&value.as_str()) {
                        return Err(AppError::InvalidRuleTable(format!(
                            "'{}' is not a {} value (expected one of {})",
                            value,
                            dimension,
                            allowed.join(", ")
                        )));
                    }
                }
                let target = TargetId::new(target);
                if target != privacy_target && target != capability_target {
                    return Err(AppError::InvalidRuleTable(format!(
                        "{}.{} maps to {}, which is not a scoring candidate",
                        dimension, value, target
                    )));
                }
                mapped.insert(value, target);
            }
            if let Some(allowed) = dimension.closed_values() {
                let missing: Vec<&str> = allowed
                    .iter()
                    .copied()
                    .filter(|v| !mapped.contains_key(*v))
                    .collect();
                if !missing.is_empty() {
                    return Err(AppError::InvalidRuleTable(format!(
                        "{} has no target for: {}",
                        dimension,
                        missing.join(", ")
                    )));
                }
            }
            rules.insert(dimension, mapped);
        }

        for dimension in Dimension::PRIORITY {
            if weights.get(dimension) > 0.0 && !rules.contains_key(&dimension) {
                return Err(AppError::InvalidRuleTable(format!(
                    "{} carries weight {} but has no routing rules",
                    dimension,
                    weights.get(dimension)
                )));
            }
        }

        let mut special_routes = HashMap::new();
        for (category, entry) in document.special_routing {
            let primary_target = TargetId::new(entry.primary);
            let fallback_target = TargetId::new(entry.fallback);
            for target in [&primary_target, &fallback_target] {
                if !is_declared(target) {
                    return Err(AppError::InvalidRuleTable(format!(
                        "special route {} references undeclared target {}",
                        category, target
                    )));
                }
            }
            if primary_target == fallback_target {
                warn!(
                    category = %category,
                    target_id = %primary_target,
                    "Special route uses the same primary and fallback target"
                );
            }

            let ordered_model_list = match entry.models {
                None => Vec::new(),
                Some(models) if models.is_empty() => {
                    return Err(AppError::InvalidRuleTable(format!(
                        "special route {} declares an empty model list",
                        category
                    )));
                }
                Some(models) => models
                    .into_iter()
                    .map(|m| {
                        let target = TargetId::new(m.target);
                        if !is_declared(&target) {
                            return Err(AppError::InvalidRuleTable(format!(
                                "model {} of special route {} references undeclared target {}",
                                m.model, category, target
                            )));
                        }
                        Ok(ModelCandidate {
                            model: m.model,
                            target,
                        })
                    })
                    .collect::<AppResult<Vec<_>>>()?,
            };

            special_routes.insert(
                category.clone(),
                SpecialRoute {
                    category,
                    primary_target,
                    fallback_target,
                    ordered_model_list,
                },
            );
        }

        let dispatch = document.dispatch;
        if dispatch.coordinator_workers == 0 {
            return Err(AppError::InvalidRuleTable(
                "dispatch.coordinator_workers must be at least 1".to_string(),
            ));
        }
        dispatch
            .default_retry
            .validate()
            .map_err(|e| AppError::InvalidRuleTable(format!("dispatch.default_retry: {}", e)))?;
        for (category, policy) in &dispatch.category_retry {
            policy.validate().map_err(|e| {
                AppError::InvalidRuleTable(format!("dispatch.category_retry.{}: {}", category, e))
            })?;
            if !special_routes.contains_key(category) {
                warn!(
                    category = %category,
                    "Retry policy configured for a category without a special route"
                );
            }
        }

        Ok(Self {
            privacy_target,
            capability_target,
            targets,
            endpoints,
            components: document.workflow_components,
            rules,
            unknown_category: document.unknown_category,
            special_routes,
            weights,
            coordinator_workers: dispatch.coordinator_workers,
            default_retry: dispatch.default_retry,
            category_retry: dispatch.category_retry.into_iter().collect(),
        })
    }

    /// Local, privacy-preserving scoring candidate
    pub fn privacy_target(&self) -> &TargetId {
        &self.privacy_target
    }

    /// Cloud-capable scoring candidate
    pub fn capability_target(&self) -> &TargetId {
        &self.capability_target
    }

    /// Every declared target
    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn endpoint(&self, target: &TargetId) -> Option<&str> {
        self.endpoints.get(target).map(String::as_str)
    }

    /// Declared workflow components and their probe endpoints
    pub fn workflow_components(&self) -> &BTreeMap<String, Option<String>> {
        &self.components
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Whether the dimension has a rule table at all
    pub fn has_rules(&self, dimension: Dimension) -> bool {
        self.rules.contains_key(&dimension)
    }

    /// Configured target for a category value
    pub fn target_for(&self, dimension: Dimension, value: &str) -> Option<&TargetId> {
        self.rules.get(&dimension).and_then(|table| table.get(value))
    }

    pub fn unknown_category(&self) -> UnknownCategoryPolicy {
        self.unknown_category
    }

    pub fn weights(&self) -> &RoutingWeights {
        &self.weights
    }

    pub fn special_route(&self, category: &str) -> Option<&SpecialRoute> {
        self.special_routes.get(category)
    }

    pub fn coordinator_workers(&self) -> usize {
        self.coordinator_workers
    }

    /// Retry policy for a request's special category, or the default
    pub fn retry_policy(&self, category: Option<&str>) -> &RetryPolicy {
        category
            .and_then(|c| self.category_retry.get(c))
            .unwrap_or(&self.default_retry)
    }
}

fn parse_dimension(name: &str, section: &str) -> AppResult<Dimension> {
    Dimension::from_name(name).ok_or_else(|| {
        AppError::InvalidRuleTable(format!("unknown dimension '{}' in {}", name, section))
    })
}
