//! Tier dispatch supervisor
//!
//! Owns the tier chain. Every hop goes through [`DispatchSupervisor::forward`],
//! which enforces adjacency, bounds the call by the request deadline, retries
//! failures of the callee it observed directly and wraps whatever comes back
//! with the callee's tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::{
    audit::{AuditEntry, DecisionLog},
    backend::BackendRegistry,
    error::{AppError, AppResult},
    health::HealthRegistry,
    profile::RequirementProfile,
    routing::{FallbackResolver, ResolvedTarget, RoutingDecision, RoutingEngine},
    rules::RuleSet,
};

use super::{
    handler::{AdapterHandler, ComponentHandler, Downstream, FanOutHandler, PassThrough, TierHandler},
    DispatchResponse, DispatchState, DispatchStatus, ErrorDetail, Tier, TierFault, TierReply,
    TierRequest,
};

/// Caller-facing dispatch request
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub profile: RequirementProfile,
    pub payload: Value,
    /// Overall budget; the supervisor default applies when absent
    pub timeout: Option<Duration>,
    /// Workflow components the Coordinator should fan out to
    pub components: Vec<String>,
}

impl DispatchRequest {
    pub fn new(profile: RequirementProfile, payload: Value) -> Self {
        Self {
            profile,
            payload,
            timeout: None,
            components: Vec::new(),
        }
    }
}

/// Terminal response plus the error that produced it, if any
#[derive(Debug)]
pub struct DispatchOutcome {
    pub response: DispatchResponse,
    pub error: Option<AppError>,
}

/// Builder for [`DispatchSupervisor`]
pub struct DispatchSupervisorBuilder {
    rules: Arc<RuleSet>,
    health: HealthRegistry,
    backends: BackendRegistry,
    audit: Option<Arc<DecisionLog>>,
    default_timeout: Duration,
    overrides: HashMap<Tier, Arc<dyn TierHandler>>,
}

impl DispatchSupervisorBuilder {
    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn audit(mut self, audit: Arc<DecisionLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Budget for requests that do not carry their own (default: 30s)
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Replace the handler of a tier
    pub fn handler(mut self, tier: Tier, handler: Arc<dyn TierHandler>) -> Self {
        self.overrides.insert(tier, handler);
        self
    }

    pub fn build(self) -> DispatchSupervisor {
        let engine = RoutingEngine::new(self.rules.clone());
        let resolver = FallbackResolver::new(self.rules.clone(), self.health.clone());

        let mut handlers: HashMap<Tier, Arc<dyn TierHandler>> = HashMap::new();
        handlers.insert(Tier::Product, Arc::new(PassThrough));
        handlers.insert(Tier::Workflow, Arc::new(PassThrough));
        handlers.insert(
            Tier::Coordinator,
            Arc::new(FanOutHandler::new(self.rules.coordinator_workers())),
        );
        handlers.insert(
            Tier::WorkflowComponent,
            Arc::new(ComponentHandler::new(self.health.clone())),
        );
        handlers.insert(
            Tier::Adapter,
            Arc::new(AdapterHandler::new(
                self.backends,
                resolver.clone(),
                self.health.clone(),
            )),
        );
        handlers.extend(self.overrides);

        DispatchSupervisor {
            rules: self.rules,
            engine,
            resolver,
            handlers,
            audit: self.audit,
            default_timeout: self.default_timeout,
        }
    }
}

/// Drives requests through Product -> Workflow -> Coordinator ->
/// WorkflowComponent -> Adapter
pub struct DispatchSupervisor {
    rules: Arc<RuleSet>,
    engine: RoutingEngine,
    resolver: FallbackResolver,
    handlers: HashMap<Tier, Arc<dyn TierHandler>>,
    audit: Option<Arc<DecisionLog>>,
    default_timeout: Duration,
}

impl DispatchSupervisor {
    pub fn builder(rules: Arc<RuleSet>, health: HealthRegistry) -> DispatchSupervisorBuilder {
        DispatchSupervisorBuilder {
            rules,
            health,
            backends: BackendRegistry::new(),
            audit: None,
            default_timeout: Duration::from_secs(30),
            overrides: HashMap::new(),
        }
    }

    pub fn audit(&self) -> Option<&Arc<DecisionLog>> {
        self.audit.as_ref()
    }

    /// Routing decision for a profile, without dispatching
    pub fn explain(&self, profile: &RequirementProfile) -> AppResult<RoutingDecision> {
        self.engine.decide(profile)
    }

    /// Route a profile and run it through the whole chain
    pub async fn route_and_dispatch(
        &self,
        profile: RequirementProfile,
        payload: Value,
        deadline: Instant,
    ) -> DispatchResponse {
        self.dispatch_until(profile, payload, deadline, Vec::new())
            .await
            .response
    }

    /// Dispatch a caller request, keeping the error for status mapping
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let deadline = Instant::now() + request.timeout.unwrap_or(self.default_timeout);
        self.dispatch_until(request.profile, request.payload, deadline, request.components)
            .await
    }

    async fn dispatch_until(
        &self,
        profile: RequirementProfile,
        payload: Value,
        deadline: Instant,
        components: Vec<String>,
    ) -> DispatchOutcome {
        let correlation_id = Uuid::new_v4();
        let span = info_span!("dispatch", correlation_id = %correlation_id);
        self.run(correlation_id, profile, payload, deadline, components)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        correlation_id: Uuid,
        profile: RequirementProfile,
        payload: Value,
        deadline: Instant,
        components: Vec<String>,
    ) -> DispatchOutcome {
        let started = std::time::Instant::now();
        let mut state = DispatchState::Created;

        let (decision, resolved) = match self.prepare(&profile, &components).await {
            Ok(prepared) => prepared,
            Err((decision, error)) => {
                let fault = match transition(&mut state, DispatchState::Failed) {
                    Ok(()) => TierFault::from(error),
                    Err(illegal) => TierFault::from(illegal),
                };
                return self.finish(correlation_id, started, decision.as_deref(), None, Err(fault));
            }
        };

        let mut request = TierRequest::new(
            correlation_id,
            Arc::new(profile),
            deadline,
            Arc::new(payload),
            decision.clone(),
            resolved.target.clone(),
        );
        request.model = resolved.model.clone();
        request.components = components;

        let outcome = match transition(&mut state, DispatchState::Forwarded(Tier::Product)) {
            Ok(()) => {
                request.state = state;
                match tokio::time::timeout_at(deadline, self.invoke(Tier::Product, request)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TierFault {
                        error: AppError::TimedOut {
                            tier: Tier::Product,
                        },
                        trace: vec![Tier::Product],
                    }),
                }
            }
            Err(illegal) => Err(illegal.into()),
        };

        // Product accepted the request if it shows up in the trace
        let accepted = match &outcome {
            Ok(reply) => !reply.trace.is_empty(),
            Err(fault) => !fault.trace.is_empty(),
        };
        let terminal = match &outcome {
            Ok(_) => DispatchState::Completed,
            Err(fault) if matches!(fault.error.root_cause(), AppError::TimedOut { .. }) => {
                DispatchState::TimedOut
            }
            Err(_) => DispatchState::Failed,
        };
        let settled = if accepted {
            transition(&mut state, DispatchState::Awaiting(Tier::Product))
                .and_then(|()| transition(&mut state, terminal))
        } else {
            transition(&mut state, terminal)
        };
        let outcome = match settled {
            Ok(()) => outcome,
            Err(illegal) => Err(illegal.into()),
        };

        self.finish(correlation_id, started, Some(decision.as_ref()), Some(&resolved), outcome)
    }

    /// Decide and resolve before entering the chain
    async fn prepare(
        &self,
        profile: &RequirementProfile,
        components: &[String],
    ) -> Result<(Arc<RoutingDecision>, ResolvedTarget), (Option<Arc<RoutingDecision>>, AppError)> {
        if let Some(unknown) = components.iter().find(|c| !self.rules.has_component(c)) {
            return Err((
                None,
                AppError::BadRequest(format!("unknown workflow component: {}", unknown)),
            ));
        }

        let decision = Arc::new(self.engine.decide(profile).map_err(|e| (None, e))?);
        let resolved = self
            .resolver
            .resolve(&decision)
            .await
            .map_err(|e| (Some(decision.clone()), e))?;

        debug!(
            chosen = %decision.chosen_target,
            resolved = %resolved.target,
            path = ?resolved.path,
            "Target resolved"
        );
        Ok((decision, resolved))
    }

    /// Forward a request from one tier to another.
    ///
    /// Refuses anything but the adjacent tier before making any attempt.
    #[instrument(level = "debug", skip_all, fields(from = %from, to = %to))]
    pub async fn forward(
        &self,
        from: Tier,
        to: Tier,
        request: TierRequest,
    ) -> Result<TierReply, TierFault> {
        if !DispatchState::Awaiting(from).can_transition_to(DispatchState::Forwarded(to)) {
            error!(
                correlation_id = %request.correlation_id,
                from = %from,
                to = %to,
                "Tier skip violation"
            );
            metrics::counter!(
                "tier_skip_violations_total",
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);
            return Err(AppError::TierSkipViolation { from, to }.into());
        }

        // Only the tier holding the request may pass it on
        let mut request = request;
        transition(&mut request.state, DispatchState::Forwarded(to))?;

        let policy = self.rules.retry_policy(request.category());
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if request.is_expired() {
                return Err(AppError::TimedOut { tier: from }.into());
            }

            let outcome =
                match tokio::time::timeout_at(request.deadline, self.invoke(to, request.clone()))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TierFault {
                        error: AppError::TimedOut { tier: to },
                        trace: vec![to],
                    }),
                };

            let fault = match outcome {
                Ok(reply) => return Ok(reply),
                Err(fault) => fault,
            };

            if fault.error.is_retryable() && attempt <= policy.max_retries {
                let backoff = policy.backoff(attempt);
                if Instant::now() + backoff < request.deadline {
                    warn!(
                        correlation_id = %request.correlation_id,
                        tier = %to,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %fault.error,
                        "Downstream call failed, retrying"
                    );
                    metrics::counter!("dispatch_retries_total", "tier" => to.as_str())
                        .increment(1);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            return Err(fault.wrap(to));
        }
    }

    /// Run a tier's handler; the tier prepends itself to the trace
    async fn invoke(&self, tier: Tier, request: TierRequest) -> Result<TierReply, TierFault> {
        let traced = |mut fault: TierFault| {
            fault.trace.insert(0, tier);
            fault
        };

        let mut request = request;
        if let Err(illegal) = transition(&mut request.state, DispatchState::Awaiting(tier)) {
            return Err(traced(illegal.into()));
        }

        if request.is_expired() {
            return Err(traced(AppError::TimedOut { tier }.into()));
        }

        let Some(handler) = self.handlers.get(&tier).cloned() else {
            return Err(traced(
                AppError::Internal(anyhow::anyhow!("no handler for {} tier", tier)).into(),
            ));
        };

        debug!(tier = %tier, "Tier handling request");
        match handler.handle(request, Downstream::new(self, tier)).await {
            Ok(mut reply) => {
                reply.trace.insert(0, tier);
                Ok(reply)
            }
            Err(fault) => Err(traced(fault)),
        }
    }

    fn finish(
        &self,
        correlation_id: Uuid,
        started: std::time::Instant,
        decision: Option<&RoutingDecision>,
        resolved: Option<&ResolvedTarget>,
        outcome: Result<TierReply, TierFault>,
    ) -> DispatchOutcome {
        let elapsed = started.elapsed();

        let (response, error) = match outcome {
            Ok(reply) => {
                info!(
                    target_id = %reply.target,
                    model = ?reply.model,
                    duration_ms = elapsed.as_millis() as u64,
                    "Dispatch completed"
                );
                let response = DispatchResponse {
                    correlation_id,
                    status: DispatchStatus::Ok,
                    result: Some(reply.value),
                    error_detail: None,
                    tier_trace: reply.trace,
                    decision_id: decision.map(|d| d.decision_id),
                    target: Some(reply.target),
                    model: reply.model,
                };
                (response, None)
            }
            Err(fault) => {
                let detail = ErrorDetail::from_error(&fault.error);
                warn!(
                    code = %detail.code,
                    failing_tier = ?detail.failing_tier,
                    error = %fault.error,
                    duration_ms = elapsed.as_millis() as u64,
                    "Dispatch failed"
                );
                let response = DispatchResponse {
                    correlation_id,
                    status: DispatchStatus::Error,
                    result: None,
                    error_detail: Some(detail),
                    tier_trace: fault.trace,
                    decision_id: decision.map(|d| d.decision_id),
                    target: resolved.map(|r| r.target.clone()),
                    model: resolved.and_then(|r| r.model.clone()),
                };
                (response, Some(fault.error))
            }
        };

        let status = match response.status {
            DispatchStatus::Ok => "ok",
            DispatchStatus::Error => "error",
        };
        let target = response
            .target
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string());
        metrics::counter!(
            "dispatch_requests_total",
            "status" => status,
            "target" => target
        )
        .increment(1);
        metrics::histogram!("dispatch_duration_seconds", "status" => status)
            .record(elapsed.as_secs_f64());

        if let Some(audit) = &self.audit {
            audit.record(AuditEntry {
                recorded_at: chrono::Utc::now(),
                correlation_id,
                decision_id: decision.map(|d| d.decision_id),
                chosen_target: decision.map(|d| d.chosen_target.clone()),
                resolved_target: resolved.map(|r| r.target.clone()),
                resolution: resolved.map(|r| r.path),
                special_category: decision.and_then(|d| d.special_category().map(str::to_string)),
                contributing_dimensions: decision
                    .map(|d| d.contributing_dimensions.clone())
                    .unwrap_or_default(),
                status: response.status,
                error_code: response.error_detail.as_ref().map(|d| d.code.clone()),
            });
        }

        DispatchOutcome { response, error }
    }
}

/// Advance a dispatch state; an illegal move is an internal error
fn transition(state: &mut DispatchState, next: DispatchState) -> AppResult<()> {
    match state.advance(next) {
        Ok(()) => {
            debug!(state = ?next, "Dispatch state");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Dispatch state machine rejected transition");
            Err(AppError::Internal(anyhow::anyhow!(e)))
        }
    }
}
