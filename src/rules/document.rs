//! Raw rules document
//!
//! Mirrors the YAML layout one to one. Nothing here is validated; see
//! [`RuleSet::from_document`](super::RuleSet::from_document).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dispatch::RetryPolicy;

use super::UnknownCategoryPolicy;

/// Top-level rules document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesDocument {
    pub targets: TargetsSection,
    /// Workflow components the coordinator may fan out to, with optional
    /// probe endpoints
    #[serde(default)]
    pub workflow_components: BTreeMap<String, Option<String>>,
    /// dimension name -> category value -> target id
    pub routing_rules: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub unknown_category: UnknownCategoryPolicy,
    #[serde(default)]
    pub special_routing: BTreeMap<String, SpecialRouteEntry>,
    /// dimension name -> weight
    pub routing_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

/// Target declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetsSection {
    /// Local, privacy-preserving scoring candidate
    pub privacy: String,
    /// Cloud-capable scoring candidate
    pub capability: String,
    /// target id -> base URL; also declares extra targets
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

/// One special-category override
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecialRouteEntry {
    pub primary: String,
    pub fallback: String,
    #[serde(default)]
    pub models: Option<Vec<ModelEntry>>,
}

/// One entry of an ordered model preference list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    pub model: String,
    pub target: String,
}

/// Dispatch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSection {
    /// Concurrent workflow-component calls across all requests
    pub coordinator_workers: usize,
    pub default_retry: RetryPolicy,
    /// special category -> retry policy
    pub category_retry: BTreeMap<String, RetryPolicy>,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            coordinator_workers: 4,
            default_retry: RetryPolicy::default(),
            category_retry: BTreeMap::new(),
        }
    }
}
