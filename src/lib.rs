//! Tiered Dispatch - multi-criteria routing with a supervised tier chain
//!
//! Routes requests to a local privacy-preserving target or a cloud-capable
//! target by weighted requirement scoring, then drives each request through
//! the Product, Workflow, Coordinator, WorkflowComponent and Adapter tiers
//! while tracking the health of every target.

pub mod audit;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod profile;
pub mod routes;
pub mod routing;
pub mod rules;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

pub use crate::audit::DecisionLog;
pub use crate::backend::{BackendRegistry, TargetBackend};
pub use crate::config::Config;
pub use crate::dispatch::{DispatchSupervisor, Tier};
pub use crate::health::{HealthProbe, HealthRegistry, HttpProbe};
pub use crate::rules::RuleSet;

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub rules: Arc<RuleSet>,
    pub health: HealthRegistry,
    pub supervisor: Arc<DispatchSupervisor>,
    pub audit: Arc<DecisionLog>,
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Every target and workflow component with an endpoint gets an HTTP
    /// probe; targets with an endpoint get an HTTP backend.
    pub async fn new(config: Config, rules: Arc<RuleSet>) -> Result<Self> {
        // Per-call timeouts are set from the request deadline; this is the ceiling
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .timeout(config.backend_timeout())
            .build()?;

        let mut builder = HealthRegistry::builder(config.health_thresholds())
            .probe_timeout(config.probe_timeout())
            .track_rules(&rules);

        for target in rules.targets() {
            if let Some(endpoint) = rules.endpoint(target) {
                let probe = HttpProbe::new(http_client.clone(), target.as_str(), endpoint);
                builder = builder.probe(target.as_str(), Arc::new(probe));
            }
        }
        for (component, endpoint) in rules.workflow_components() {
            if let Some(endpoint) = endpoint {
                let probe = HttpProbe::new(http_client.clone(), component.as_str(), endpoint);
                builder = builder.probe(component.as_str(), Arc::new(probe));
            }
        }
        let health = builder.spawn();

        let backends = BackendRegistry::from_rules(&rules, http_client);
        Ok(Self::assemble(config, rules, health, backends))
    }

    /// Create an application state with injected backends and probes
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(
        config: Config,
        rules: Arc<RuleSet>,
        backends: BackendRegistry,
        probes: Vec<(String, Arc<dyn HealthProbe>)>,
    ) -> Self {
        let mut builder = HealthRegistry::builder(config.health_thresholds())
            .probe_timeout(config.probe_timeout())
            .track_rules(&rules);
        for (id, probe) in probes {
            builder = builder.probe(id, probe);
        }
        let health = builder.spawn();

        Self::assemble(config, rules, health, backends)
    }

    fn assemble(
        config: Config,
        rules: Arc<RuleSet>,
        health: HealthRegistry,
        backends: BackendRegistry,
    ) -> Self {
        let audit = Arc::new(DecisionLog::new(config.audit_capacity));
        let supervisor = Arc::new(
            DispatchSupervisor::builder(rules.clone(), health.clone())
                .backends(backends)
                .audit(audit.clone())
                .default_timeout(config.default_timeout())
                .build(),
        );

        Self {
            config,
            rules,
            health,
            supervisor,
            audit,
            start_time: Instant::now(),
        }
    }
}
