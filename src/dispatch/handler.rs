//! Tier handlers
//!
//! A handler implements what one tier does with a request. It can only reach
//! the rest of the chain through the [`Downstream`] handle it is given, which
//! routes every call back through the supervisor's adjacency guard.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendCall, BackendRegistry},
    error::AppError,
    health::{HealthRegistry, HealthState},
    routing::FallbackResolver,
};

use super::{DispatchSupervisor, Tier, TierFault, TierReply, TierRequest};

/// Behaviour of one tier
#[async_trait]
pub trait TierHandler: Send + Sync {
    async fn handle(
        &self,
        request: TierRequest,
        downstream: Downstream<'_>,
    ) -> Result<TierReply, TierFault>;
}

/// Guarded handle to the tiers below the current one
#[derive(Clone, Copy)]
pub struct Downstream<'a> {
    supervisor: &'a DispatchSupervisor,
    from: Tier,
}

impl<'a> Downstream<'a> {
    pub(crate) fn new(supervisor: &'a DispatchSupervisor, from: Tier) -> Self {
        Self { supervisor, from }
    }

    /// Forward to `to`. Anything but the adjacent tier is refused.
    pub fn forward(
        &self,
        to: Tier,
        request: TierRequest,
    ) -> BoxFuture<'a, Result<TierReply, TierFault>> {
        let supervisor = self.supervisor;
        let from = self.from;
        async move { supervisor.forward(from, to, request).await }.boxed()
    }

    /// Forward to the tier directly below
    pub fn forward_next(&self, request: TierRequest) -> BoxFuture<'a, Result<TierReply, TierFault>> {
        match self.from.next() {
            Some(next) => self.forward(next, request),
            None => {
                let error = AppError::Internal(anyhow::anyhow!(
                    "{} tier has no tier below it",
                    self.from
                ));
                async move { Err(TierFault::from(error)) }.boxed()
            }
        }
    }
}

/// Hands the request to the next tier unchanged (Product, Workflow)
pub struct PassThrough;

#[async_trait]
impl TierHandler for PassThrough {
    async fn handle(
        &self,
        request: TierRequest,
        downstream: Downstream<'_>,
    ) -> Result<TierReply, TierFault> {
        downstream.forward_next(request).await
    }
}

/// Coordinator: fans a request out to its workflow components.
///
/// At most `workers` component calls run at once across all requests.
/// Results come back in the order the components were named.
pub struct FanOutHandler {
    workers: Arc<Semaphore>,
}

impl FanOutHandler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

#[async_trait]
impl TierHandler for FanOutHandler {
    async fn handle(
        &self,
        request: TierRequest,
        downstream: Downstream<'_>,
    ) -> Result<TierReply, TierFault> {
        if request.components.is_empty() {
            return downstream.forward(Tier::WorkflowComponent, request).await;
        }

        debug!(
            correlation_id = %request.correlation_id,
            components = request.components.len(),
            "Fanning out to workflow components"
        );

        let branches = request.components.iter().map(|component| {
            let branch = request.for_component(component);
            let workers = self.workers.clone();
            async move {
                let _permit = workers.acquire_owned().await.map_err(|_| {
                    TierFault::from(AppError::Internal(anyhow::anyhow!(
                        "coordinator worker pool closed"
                    )))
                })?;
                downstream.forward(Tier::WorkflowComponent, branch).await
            }
        });
        let results = join_all(branches).await;

        let mut items = Vec::with_capacity(results.len());
        let mut first: Option<TierReply> = None;
        for (component, result) in request.components.iter().zip(results) {
            // First failure in component order fails the whole request.
            let reply = result?;
            items.push(json!({
                "component": component,
                "target": reply.target,
                "model": reply.model,
                "result": reply.value.clone(),
            }));
            if first.is_none() {
                first = Some(reply);
            }
        }

        let first = first.ok_or_else(|| {
            TierFault::from(AppError::Internal(anyhow::anyhow!("fan-out produced no results")))
        })?;

        Ok(TierReply {
            value: json!(items),
            trace: first.trace,
            target: first.target,
            model: first.model,
        })
    }
}

/// Workflow component: refuses components that are unreachable and feeds
/// component outcomes to the health registry.
pub struct ComponentHandler {
    health: HealthRegistry,
}

impl ComponentHandler {
    pub fn new(health: HealthRegistry) -> Self {
        Self { health }
    }
}

#[async_trait]
impl TierHandler for ComponentHandler {
    async fn handle(
        &self,
        request: TierRequest,
        downstream: Downstream<'_>,
    ) -> Result<TierReply, TierFault> {
        let Some(component) = request.component.clone() else {
            return downstream.forward(Tier::Adapter, request).await;
        };

        if !self.health.is_usable(&component).await? {
            warn!(
                correlation_id = %request.correlation_id,
                component = %component,
                "Workflow component unreachable"
            );
            return Err(AppError::NoHealthyTarget(format!(
                "workflow component {} is unreachable",
                component
            ))
            .into());
        }

        let result = downstream.forward(Tier::Adapter, request).await;

        // Target failures are charged to the target by the adapter. The
        // component only answers for running out of time, and that report
        // must not wait: the caller's deadline has already passed.
        match &result {
            Ok(_) => {
                self.health.report_outcome(&component, true).await?;
            }
            Err(fault) if matches!(fault.error.root_cause(), AppError::TimedOut { .. }) => {
                self.health.record_outcome(&component, false);
            }
            Err(_) => {}
        }

        result
    }
}

/// Adapter: invokes the execution target.
///
/// If the target resolved at entry has become unreachable since, the
/// decision is resolved again before calling. A call still running at the
/// deadline is cut off and counts as a failure of the target.
pub struct AdapterHandler {
    backends: BackendRegistry,
    resolver: FallbackResolver,
    health: HealthRegistry,
}

impl AdapterHandler {
    pub fn new(backends: BackendRegistry, resolver: FallbackResolver, health: HealthRegistry) -> Self {
        Self {
            backends,
            resolver,
            health,
        }
    }
}

#[async_trait]
impl TierHandler for AdapterHandler {
    async fn handle(
        &self,
        request: TierRequest,
        _downstream: Downstream<'_>,
    ) -> Result<TierReply, TierFault> {
        let mut target = request.target.clone();
        let mut model = request.model.clone();

        if !self.health.is_usable(target.as_str()).await? {
            let resolved = self.resolver.resolve(&request.decision).await?;
            info!(
                correlation_id = %request.correlation_id,
                previous = %target,
                resolved = %resolved.target,
                path = ?resolved.path,
                "Target became unreachable, re-resolved"
            );
            target = resolved.target;
            model = resolved.model;
        }

        let backend = self
            .backends
            .get(&target)
            .ok_or_else(|| AppError::UnknownTarget(target.to_string()))?;

        let call = BackendCall {
            correlation_id: request.correlation_id,
            target: target.clone(),
            model: model.clone(),
            component: request.component.clone(),
            payload: request.payload.clone(),
            timeout: request.remaining(),
        };

        let outcome = match tokio::time::timeout_at(request.deadline, backend.invoke(call)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Out of budget: nothing after this point may wait.
                self.health.record_outcome(target.as_str(), false);
                warn!(
                    correlation_id = %request.correlation_id,
                    target_id = %target,
                    "Target call cut off by the deadline"
                );
                return Err(AppError::TimedOut {
                    tier: Tier::Adapter,
                }
                .into());
            }
        };

        match outcome {
            Ok(value) => {
                self.health.report_outcome(target.as_str(), true).await?;
                Ok(TierReply::new(value, target, model))
            }
            Err(error) => {
                let record = self.health.report_outcome(target.as_str(), false).await?;
                if record.state == HealthState::Unreachable {
                    warn!(
                        correlation_id = %request.correlation_id,
                        target_id = %target,
                        consecutive_failures = record.consecutive_failures,
                        "Target is unreachable after repeated failures"
                    );
                }
                Err(error.into())
            }
        }
    }
}
