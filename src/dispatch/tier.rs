//! Coordination tiers
//!
//! The call hierarchy is fixed: each tier may call exactly one tier, the one
//! immediately below it. The adjacency table below is the only source of
//! truth for that relation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One level of the coordination hierarchy, ordered top to bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Product,
    Workflow,
    Coordinator,
    WorkflowComponent,
    Adapter,
}

/// Permitted caller -> callee pairs
const ADJACENCY: [(Tier, Tier); 4] = [
    (Tier::Product, Tier::Workflow),
    (Tier::Workflow, Tier::Coordinator),
    (Tier::Coordinator, Tier::WorkflowComponent),
    (Tier::WorkflowComponent, Tier::Adapter),
];

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Product,
        Tier::Workflow,
        Tier::Coordinator,
        Tier::WorkflowComponent,
        Tier::Adapter,
    ];

    /// The single tier this tier is permitted to call
    pub fn next(self) -> Option<Tier> {
        ADJACENCY
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    /// Whether a call from `self` to `to` respects the hierarchy
    pub fn may_call(self, to: Tier) -> bool {
        ADJACENCY.contains(&(self, to))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Product => "product",
            Tier::Workflow => "workflow",
            Tier::Coordinator => "coordinator",
            Tier::WorkflowComponent => "workflow_component",
            Tier::Adapter => "adapter",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
