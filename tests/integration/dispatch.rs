//! Tier chain integration tests
//!
//! Drives the supervisor end to end: retries, health-driven failover, tier
//! skip enforcement, deadlines and Coordinator fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tiered_dispatch::{
    dispatch::{
        DispatchRequest, DispatchStatus, DispatchSupervisor, Downstream, Tier, TierFault,
        TierHandler, TierReply, TierRequest,
    },
    error::AppError,
    health::{HealthRegistry, HealthState},
    profile::{ComplexityLevel, PrivacyLevel, RequirementProfile, ResponseTime},
    testing::ScriptedBackend,
    BackendRegistry, TargetBackend,
};

use crate::common::{test_config, test_rules, TestApp, CLOUD, LOCAL, OCR};

fn cloud_profile() -> RequirementProfile {
    RequirementProfile::new()
        .with_complexity(ComplexityLevel::Complex)
        .with_domain("ai")
        .with_privacy(PrivacyLevel::Normal)
        .with_response_time(ResponseTime::Normal)
}

fn ocr_profile() -> RequirementProfile {
    RequirementProfile::new().with_special_category("traditional_chinese_ocr")
}

fn request(profile: RequirementProfile) -> DispatchRequest {
    DispatchRequest::new(profile, json!({"document": "invoice-42.pdf"}))
}

#[tokio::test]
async fn test_cloud_scenario_runs_through_every_tier() {
    let app = TestApp::healthy();

    let outcome = app.state.supervisor.dispatch(request(cloud_profile())).await;
    let response = outcome.response;

    assert_eq!(response.status, DispatchStatus::Ok);
    assert_eq!(response.tier_trace, Tier::ALL.to_vec());
    assert_eq!(response.target.as_ref().unwrap().as_str(), CLOUD);
    assert_eq!(response.result.as_ref().unwrap()["served_by"], CLOUD);
    assert!(response.decision_id.is_some());
    assert_eq!(app.backend(CLOUD).calls(), 1);
    assert_eq!(app.backend(LOCAL).calls(), 0);

    let seen = app.backend(CLOUD).seen();
    assert_eq!(seen[0].correlation_id, response.correlation_id);
    assert_eq!(seen[0].payload["document"], "invoice-42.pdf");
}

#[tokio::test]
async fn test_transient_failures_are_retried_by_the_adapter_caller() {
    let app = TestApp::with_backends(vec![(CLOUD, ScriptedBackend::ok(CLOUD).then_fail(2))]);

    let outcome = app.state.supervisor.dispatch(request(cloud_profile())).await;

    assert!(outcome.response.is_ok());
    assert!(outcome.error.is_none());
    assert_eq!(app.backend(CLOUD).calls(), 3);

    // The final success restored the degraded target
    let record = app.state.health.get_state(CLOUD).await.unwrap();
    assert_eq!(record.state, HealthState::Healthy);
}

#[tokio::test]
async fn test_k_failures_make_target_unreachable_and_fail_over_to_privacy() {
    let app = TestApp::with_backends(vec![(CLOUD, ScriptedBackend::failing(CLOUD))]);

    let outcome = app.state.supervisor.dispatch(request(cloud_profile())).await;

    // First attempt plus two retries, then the budget is spent
    assert_eq!(app.backend(CLOUD).calls(), 3);
    let response = outcome.response;
    assert_eq!(response.status, DispatchStatus::Error);
    assert_eq!(response.tier_trace, Tier::ALL.to_vec());
    let detail = response.error_detail.unwrap();
    assert_eq!(detail.code, "BACKEND_ERROR");
    assert_eq!(detail.failing_tier, Some(Tier::Adapter));
    assert!(matches!(
        outcome.error.as_ref().map(AppError::root_cause),
        Some(AppError::Backend { .. })
    ));

    let record = app.state.health.get_state(CLOUD).await.unwrap();
    assert_eq!(record.state, HealthState::Unreachable);
    assert_eq!(record.consecutive_failures, 3);

    // The next request for the cloud target moves to the local target
    let outcome = app.state.supervisor.dispatch(request(cloud_profile())).await;
    assert!(outcome.response.is_ok());
    assert_eq!(outcome.response.target.unwrap().as_str(), LOCAL);
    assert_eq!(app.backend(CLOUD).calls(), 3);
    assert_eq!(app.backend(LOCAL).calls(), 1);
}

#[tokio::test]
async fn test_special_category_falls_back_when_primary_becomes_unreachable() {
    let app = TestApp::with_backends(vec![(OCR, ScriptedBackend::failing(OCR))]);

    let outcome = app.state.supervisor.dispatch(request(ocr_profile())).await;

    // Three failures take the primary down; the fourth attempt re-resolves
    let response = outcome.response;
    assert!(response.is_ok(), "unexpected failure: {:?}", response.error_detail);
    assert_eq!(response.target.unwrap().as_str(), LOCAL);
    assert_eq!(app.backend(OCR).calls(), 3);
    assert_eq!(app.backend(LOCAL).calls(), 1);
}

#[tokio::test]
async fn test_unreachable_primary_routes_to_fallback_directly() {
    let app = TestApp::healthy();
    app.take_down(OCR).await;

    let response = app
        .state
        .supervisor
        .route_and_dispatch(
            ocr_profile(),
            json!({}),
            tokio::time::Instant::now() + Duration::from_secs(5),
        )
        .await;

    assert!(response.is_ok());
    assert_eq!(response.target.unwrap().as_str(), LOCAL);
    assert_eq!(app.backend(OCR).calls(), 0);
}

#[tokio::test]
async fn test_model_list_used_after_primary_and_fallback() {
    let app = TestApp::healthy();
    app.take_down(OCR).await;
    app.take_down(LOCAL).await;

    let outcome = app.state.supervisor.dispatch(request(ocr_profile())).await;

    let response = outcome.response;
    assert!(response.is_ok());
    assert_eq!(response.target.unwrap().as_str(), CLOUD);
    assert_eq!(response.model.as_deref(), Some("gemini-1.5-pro"));
    assert_eq!(app.backend(CLOUD).seen()[0].model.as_deref(), Some("gemini-1.5-pro"));
}

#[tokio::test]
async fn test_everything_unreachable_exhausts_fallback() {
    let app = TestApp::healthy();
    for target in [OCR, LOCAL, CLOUD] {
        app.take_down(target).await;
    }

    let outcome = app.state.supervisor.dispatch(request(ocr_profile())).await;

    let response = outcome.response;
    assert_eq!(response.status, DispatchStatus::Error);
    assert!(response.tier_trace.is_empty());
    assert_eq!(response.error_detail.unwrap().code, "FALLBACK_EXHAUSTED");
    assert!(matches!(outcome.error, Some(AppError::FallbackExhausted(_))));
    assert_eq!(app.total_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_local_target_has_no_cloud_failover() {
    let app = TestApp::healthy();
    app.take_down(LOCAL).await;

    let profile = RequirementProfile::new().with_privacy(PrivacyLevel::Sensitive);
    let outcome = app.state.supervisor.dispatch(request(profile)).await;

    assert_eq!(outcome.response.error_detail.unwrap().code, "NO_HEALTHY_TARGET");
    assert_eq!(app.total_calls(), 0);
}

/// Coordinator that tries to reach the Adapter directly
struct SkippingCoordinator;

#[async_trait]
impl TierHandler for SkippingCoordinator {
    async fn handle(
        &self,
        request: TierRequest,
        downstream: Downstream<'_>,
    ) -> Result<TierReply, TierFault> {
        downstream.forward(Tier::Adapter, request).await
    }
}

#[tokio::test]
async fn test_tier_skip_fails_without_reaching_any_backend() {
    let rules = test_rules();
    let health = HealthRegistry::builder(test_config().health_thresholds())
        .track_rules(&rules)
        .spawn();
    let local = Arc::new(ScriptedBackend::ok(LOCAL));
    let cloud = Arc::new(ScriptedBackend::ok(CLOUD));
    let backends = BackendRegistry::new()
        .with(LOCAL, local.clone() as Arc<dyn TargetBackend>)
        .with(CLOUD, cloud.clone() as Arc<dyn TargetBackend>);

    let supervisor = DispatchSupervisor::builder(rules, health)
        .backends(backends)
        .handler(Tier::Coordinator, Arc::new(SkippingCoordinator))
        .build();

    let outcome = supervisor.dispatch(request(cloud_profile())).await;

    let response = outcome.response;
    assert_eq!(response.status, DispatchStatus::Error);
    assert_eq!(
        response.tier_trace,
        vec![Tier::Product, Tier::Workflow, Tier::Coordinator]
    );
    let detail = response.error_detail.unwrap();
    assert_eq!(detail.code, "TIER_SKIP_VIOLATION");
    assert_eq!(detail.failing_tier, Some(Tier::Coordinator));
    assert!(matches!(
        outcome.error.as_ref().map(AppError::root_cause),
        Some(AppError::TierSkipViolation {
            from: Tier::Coordinator,
            to: Tier::Adapter
        })
    ));
    assert_eq!(local.calls() + cloud.calls(), 0);
}

#[tokio::test]
async fn test_deadline_exceeded_times_out_at_the_adapter() {
    let app = TestApp::with_backends(vec![(
        CLOUD,
        ScriptedBackend::ok(CLOUD).with_delay(Duration::from_secs(10)),
    )]);

    let mut dispatch = request(cloud_profile());
    dispatch.timeout = Some(Duration::from_millis(50));
    let started = std::time::Instant::now();
    let outcome = app.state.supervisor.dispatch(dispatch).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let detail = outcome.response.error_detail.unwrap();
    assert_eq!(detail.code, "TIMED_OUT");
    assert_eq!(detail.failing_tier, Some(Tier::Adapter));
    assert_eq!(
        outcome.error.map(|e| e.status_code()),
        Some(axum::http::StatusCode::GATEWAY_TIMEOUT)
    );
}

#[tokio::test]
async fn test_hung_target_is_charged_until_unreachable() {
    let app = TestApp::with_backends(vec![(
        CLOUD,
        ScriptedBackend::ok(CLOUD).with_delay(Duration::from_secs(10)),
    )]);
    let short = || {
        let mut dispatch = request(cloud_profile());
        dispatch.timeout = Some(Duration::from_millis(30));
        dispatch
    };

    let outcome = app.state.supervisor.dispatch(short()).await;
    assert_eq!(outcome.response.error_detail.unwrap().code, "TIMED_OUT");
    let record = app.state.health.get_state(CLOUD).await.unwrap();
    assert_eq!(record.state, HealthState::Degraded);

    for _ in 0..2 {
        app.state.supervisor.dispatch(short()).await;
    }
    let record = app.state.health.get_state(CLOUD).await.unwrap();
    assert_eq!(record.state, HealthState::Unreachable);
    assert_eq!(record.consecutive_failures, 3);
    assert_eq!(app.backend(CLOUD).calls(), 3);

    // The hung target is out of rotation; the privacy target takes over
    let outcome = app.state.supervisor.dispatch(short()).await;
    assert!(outcome.response.is_ok(), "unexpected failure: {:?}", outcome.response.error_detail);
    assert_eq!(outcome.response.target.unwrap().as_str(), LOCAL);
    assert_eq!(app.backend(CLOUD).calls(), 3);
}

#[tokio::test]
async fn test_component_without_health_check_recovers_after_timeouts() {
    let app = TestApp::without_component_probes(vec![(
        CLOUD,
        ScriptedBackend::ok(CLOUD).with_delay(Duration::from_millis(200)),
    )]);
    let with_budget = |budget: Duration| {
        let mut dispatch = request(cloud_profile());
        dispatch.components = vec!["test_manager_mcp".to_string()];
        dispatch.timeout = Some(budget);
        dispatch
    };

    for _ in 0..3 {
        let outcome = app.state.supervisor.dispatch(with_budget(Duration::from_millis(30))).await;
        assert_eq!(outcome.response.error_detail.unwrap().code, "TIMED_OUT");
    }

    // Nothing would ever revive the component, so it stops at degraded
    let component = app.state.health.get_state("test_manager_mcp").await.unwrap();
    assert_eq!(component.state, HealthState::Degraded);
    assert!(!component.probed);
    assert!(app.state.health.is_usable("test_manager_mcp").await.unwrap());

    let cloud = app.state.health.get_state(CLOUD).await.unwrap();
    assert_eq!(cloud.state, HealthState::Unreachable);
    app.state.health.probe_all().await.unwrap();
    let cloud = app.state.health.get_state(CLOUD).await.unwrap();
    assert_eq!(cloud.state, HealthState::Healthy);

    let outcome = app.state.supervisor.dispatch(with_budget(Duration::from_secs(5))).await;
    let response = outcome.response;
    assert!(response.is_ok(), "unexpected failure: {:?}", response.error_detail);
    assert_eq!(response.result.unwrap()[0]["component"], "test_manager_mcp");
    let component = app.state.health.get_state("test_manager_mcp").await.unwrap();
    assert_eq!(component.state, HealthState::Healthy);
}

#[tokio::test]
async fn test_fan_out_keeps_component_order() {
    let app = TestApp::healthy();

    let mut dispatch = request(cloud_profile());
    dispatch.components = vec![
        "release_manager_mcp".to_string(),
        "test_manager_mcp".to_string(),
        "test_execution_engine".to_string(),
    ];
    let outcome = app.state.supervisor.dispatch(dispatch).await;

    let response = outcome.response;
    assert!(response.is_ok());
    assert_eq!(response.tier_trace, Tier::ALL.to_vec());
    let items = response.result.unwrap();
    let components: Vec<&str> = items
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["component"].as_str().unwrap())
        .collect();
    assert_eq!(
        components,
        vec!["release_manager_mcp", "test_manager_mcp", "test_execution_engine"]
    );
    assert_eq!(items[1]["result"]["component"], "test_manager_mcp");
    assert_eq!(app.backend(CLOUD).calls(), 3);
}

#[tokio::test]
async fn test_fan_out_fails_on_unreachable_component() {
    let app = TestApp::healthy();
    app.take_down("test_execution_engine").await;

    let mut dispatch = request(cloud_profile());
    dispatch.components = vec![
        "test_manager_mcp".to_string(),
        "test_execution_engine".to_string(),
    ];
    let outcome = app.state.supervisor.dispatch(dispatch).await;

    let detail = outcome.response.error_detail.unwrap();
    assert_eq!(detail.code, "NO_HEALTHY_TARGET");
    assert_eq!(detail.failing_tier, Some(Tier::WorkflowComponent));
    assert!(detail.message.contains("test_execution_engine"));
}

#[tokio::test]
async fn test_concurrent_dispatches_keep_their_correlation_ids() {
    let app = TestApp::healthy();

    let dispatches = (0..16).map(|_| app.state.supervisor.dispatch(request(cloud_profile())));
    let outcomes = futures::future::join_all(dispatches).await;

    let mut ids: Vec<_> = outcomes.iter().map(|o| o.response.correlation_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert!(outcomes.iter().all(|o| o.response.is_ok()));
    assert_eq!(app.backend(CLOUD).calls(), 16);
    assert_eq!(app.state.audit.len(), 16);
}
