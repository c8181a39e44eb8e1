//! Rule loading and routing decision tests

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};
use tiered_dispatch::{
    error::AppError,
    profile::{
        AnalysisDepth, ComplexityLevel, Dimension, LanguageType, PrivacyLevel,
        RequirementProfile, ResponseTime,
    },
    routing::RoutingEngine,
    rules::TargetId,
    RuleSet,
};

use crate::common::{test_rules, CLOUD, LOCAL, OCR, TEST_RULES};

fn with_weights(complexity: &str) -> String {
    TEST_RULES.replace("complexity_level: 0.3", &format!("complexity_level: {}", complexity))
}

#[test]
fn test_shipped_rules_file_loads() {
    let rules = assert_ok!(RuleSet::from_path("config/routing_rules.yaml"));
    assert_eq!(rules.privacy_target().as_str(), LOCAL);
    assert_eq!(rules.capability_target().as_str(), CLOUD);
    assert!(rules.special_route("traditional_chinese_ocr").is_some());
}

#[test]
fn test_missing_rules_file_is_an_error() {
    assert_err!(RuleSet::from_path("config/does_not_exist.yaml"));
}

#[test]
fn test_weight_sums_off_by_a_few_percent_are_rejected() {
    // 0.27 -> sum 0.97, 0.35 -> sum 1.05
    for weight in ["0.27", "0.35"] {
        let err = RuleSet::from_yaml_str(&with_weights(weight)).unwrap_err();
        assert!(
            matches!(err, AppError::MisconfiguredWeights { .. }),
            "weight {} gave {:?}",
            weight,
            err
        );
    }
}

#[test]
fn test_weight_sum_within_tolerance_is_accepted() {
    assert_ok!(RuleSet::from_yaml_str(&with_weights("0.300000001")));
}

#[test]
fn test_unknown_dimension_is_rejected() {
    let text = TEST_RULES.replace("  response_time: 0.1", "  response_time: 0.05\n  mood: 0.05");
    let err = RuleSet::from_yaml_str(&text).unwrap_err();
    assert!(matches!(err, AppError::InvalidRuleTable(ref m) if m.contains("mood")));
}

#[test]
fn test_scenario_complex_ai_routes_to_cloud() {
    let engine = RoutingEngine::new(test_rules());
    let profile = RequirementProfile::new()
        .with_complexity(ComplexityLevel::Complex)
        .with_domain("ai")
        .with_privacy(PrivacyLevel::Normal)
        .with_response_time(ResponseTime::Normal);

    let decision = engine.decide(&profile).unwrap();

    assert_eq!(decision.chosen_target.as_str(), CLOUD);
    assert!(decision.score_of(&TargetId::from(CLOUD)) >= 0.65);
    assert!(!decision.is_special_override);
}

#[test]
fn test_decisions_are_deterministic() {
    let engine = RoutingEngine::new(test_rules());
    let profile = RequirementProfile::new()
        .with_complexity(ComplexityLevel::Medium)
        .with_domain("web")
        .with_language(LanguageType::Multilingual)
        .with_analysis_depth(AnalysisDepth::Basic)
        .with_privacy(PrivacyLevel::Public);

    let first = engine.decide(&profile).unwrap();
    for _ in 0..20 {
        let again = engine.decide(&profile).unwrap();
        assert_eq!(again.chosen_target, first.chosen_target);
        assert_eq!(again.score_per_target, first.score_per_target);
        assert_eq!(again.contributing_dimensions, first.contributing_dimensions);
    }
}

#[test]
fn test_special_category_ignores_other_dimensions() {
    let engine = RoutingEngine::new(test_rules());
    let profile = RequirementProfile::new()
        .with_complexity(ComplexityLevel::Complex)
        .with_domain("web")
        .with_language(LanguageType::English)
        .with_privacy(PrivacyLevel::Public)
        .with_response_time(ResponseTime::Batch)
        .with_special_category("traditional_chinese_ocr");

    let decision = engine.decide(&profile).unwrap();

    assert!(decision.is_special_override);
    assert_eq!(decision.chosen_target.as_str(), OCR);
    assert!(decision.contributing_dimensions.is_empty());
    let models: Vec<&str> = decision
        .special_route
        .as_ref()
        .unwrap()
        .ordered_model_list
        .iter()
        .map(|m| m.model.as_str())
        .collect();
    assert_eq!(models, vec!["qwen2.5-vl-7b", "mistral-ocr", "gemini-1.5-pro"]);
}

#[test]
fn test_contributing_dimensions_reproduce_winner() {
    let engine = RoutingEngine::new(Arc::clone(&test_rules()));
    let profile = RequirementProfile::new()
        .with_complexity(ComplexityLevel::Simple)
        .with_domain("ai")
        .with_language(LanguageType::Chinese)
        .with_privacy(PrivacyLevel::Sensitive)
        .with_response_time(ResponseTime::Batch);

    let decision = engine.decide(&profile).unwrap();
    assert_eq!(decision.chosen_target.as_str(), LOCAL);
    assert_eq!(
        decision.contributing_dimensions,
        vec![
            Dimension::ComplexityLevel,
            Dimension::LanguageType,
            Dimension::PrivacyLevel
        ]
    );

    let reduced = profile.only(&decision.contributing_dimensions);
    assert_eq!(engine.decide(&reduced).unwrap().chosen_target.as_str(), LOCAL);
}

#[test]
fn test_unrecognised_value_is_invalid_profile() {
    let err = RequirementProfile::from_value(serde_json::json!({
        "complexity_level": "galactic"
    }))
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidProfile(_)));

    let engine = RoutingEngine::new(test_rules());
    let err = engine
        .decide(&RequirementProfile::new().with_domain("astrology"))
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidProfile(_)));
}
