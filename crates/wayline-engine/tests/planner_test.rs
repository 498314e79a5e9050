use async_trait::async_trait;
use std::sync::Arc;
use wayline_common::{
    AutomationIntent, AutomationStep, CommandParameters, FallbackCondition, IntentKind,
    RawAction, RawTarget, ResourceKind, StepKind,
};
use wayline_engine::planner::route::RouteIntent;
use wayline_engine::planner::{ExecutionPlanner, PlannerError};
use wayline_engine::services::{RuleClassifier, ServiceError, SiteSelector};

struct FixedSelector(String);

#[async_trait]
impl SiteSelector for FixedSelector {
    async fn select_sites(&self, _text: &str, _route: &RouteIntent) -> Result<String, ServiceError> {
        Ok(self.0.clone())
    }
}

struct FailingSelector;

#[async_trait]
impl SiteSelector for FailingSelector {
    async fn select_sites(&self, _text: &str, _route: &RouteIntent) -> Result<String, ServiceError> {
        Err(ServiceError::Unavailable("offline".into()))
    }
}

fn signature(steps: &[AutomationStep]) -> Vec<(StepKind, Option<String>, String)> {
    steps
        .iter()
        .map(|s| (s.kind, s.value.clone(), s.target.describe()))
        .collect()
}

const FLIGHT_COMMAND: &str = "Search for cheapest flights from LHR to Mumbai Sept 1-16";

#[tokio::test]
async fn test_flight_scenario_plans_at_least_three_sites() {
    let c = RuleClassifier::new().classify_text(FLIGHT_COMMAND);
    let plan = ExecutionPlanner::default()
        .create_plan(FLIGHT_COMMAND, &c.intent, &c.parameters, None)
        .await
        .unwrap();

    let urls = plan.target_urls();
    assert!(urls.len() >= 3, "{:?}", urls);
    assert!(urls.iter().any(|u| u.contains("LHR") && u.contains("BOM")));
    assert!(urls.iter().any(|u| u.contains("makemytrip")));
    assert!(plan.validate().is_ok());
}

#[tokio::test]
async fn test_site_selector_failure_falls_back_to_defaults() {
    let c = RuleClassifier::new().classify_text(FLIGHT_COMMAND);
    let defaults = ExecutionPlanner::default()
        .create_plan(FLIGHT_COMMAND, &c.intent, &c.parameters, None)
        .await
        .unwrap();

    for selector in [
        Arc::new(FailingSelector) as Arc<dyn SiteSelector>,
        Arc::new(FixedSelector("I'd recommend Kayak!".into())),
        Arc::new(FixedSelector(
            r#"[{"name":"Kayak","url":"https://www.kayak.com","reason":"x"}]"#.into(),
        )),
    ] {
        let plan = ExecutionPlanner::default()
            .with_site_selector(selector)
            .create_plan(FLIGHT_COMMAND, &c.intent, &c.parameters, None)
            .await
            .unwrap();
        assert_eq!(plan.target_urls(), defaults.target_urls());
    }
}

#[tokio::test]
async fn test_site_selector_list_is_capped_at_four() {
    let raw = r#"```json
[
  {"name": "Kayak", "url": "https://www.kayak.com", "reason": "a"},
  {"name": "Momondo", "url": "https://www.momondo.com", "reason": "b"},
  {"name": "Skyscanner", "url": "https://www.skyscanner.net", "reason": "c"},
  {"name": "Trip Finder", "url": "https://tripfinder.example/flights", "reason": "d"},
  {"name": "Expedia", "url": "https://www.expedia.com", "reason": "e"}
]
```"#;
    let c = RuleClassifier::new().classify_text(FLIGHT_COMMAND);
    let plan = ExecutionPlanner::default()
        .with_site_selector(Arc::new(FixedSelector(raw.into())))
        .create_plan(FLIGHT_COMMAND, &c.intent, &c.parameters, None)
        .await
        .unwrap();

    let urls = plan.target_urls();
    assert_eq!(urls.len(), 4);
    assert!(urls[0].starts_with("https://www.kayak.com/flights/LHR-BOM"));
    assert_eq!(urls[3], "https://tripfinder.example/flights");
    assert!(plan.steps.iter().any(|s| s.kind == StepKind::SmartFill));
}

#[tokio::test]
async fn test_generators_are_valid_and_idempotent() {
    let planner = ExecutionPlanner::default();
    let mut params = CommandParameters {
        urls: vec!["https://example.com".into()],
        search_terms: vec!["rust".into()],
        extraction_targets: vec!["links".into()],
        ..Default::default()
    };
    params.form_data.insert("email".into(), "a@example.com".into());

    for kind in [
        IntentKind::Search,
        IntentKind::FormFill,
        IntentKind::DataExtract,
        IntentKind::Research,
        IntentKind::Navigate,
        IntentKind::Monitor,
    ] {
        let intent = AutomationIntent::new(kind, "do the thing");
        let a = planner.create_plan("cmd", &intent, &params, None).await.unwrap();
        let b = planner.create_plan("cmd", &intent, &params, None).await.unwrap();
        assert!(!a.steps.is_empty());
        assert!(a.navigate_count() >= 1, "{:?} has no navigate", kind);
        assert_eq!(signature(&a.steps), signature(&b.steps), "{:?}", kind);
        assert_ne!(a.steps[0].id, b.steps[0].id);
    }
}

#[tokio::test]
async fn test_plan_metadata() {
    let intent = AutomationIntent::new(IntentKind::Navigate, "open example");
    let params = CommandParameters {
        urls: vec!["https://example.com".into()],
        ..Default::default()
    };
    let plan = ExecutionPlanner::default()
        .create_plan("open example.com", &intent, &params, None)
        .await
        .unwrap();

    assert_eq!(plan.goal, "open example.com");
    // navigate + 3000ms settle wait + screenshot
    assert_eq!(plan.estimated_duration_ms, 5000 + 3000 + 2000);
    let browser = plan
        .required_resources
        .iter()
        .find(|r| r.kind == ResourceKind::Browser)
        .unwrap();
    assert_eq!(browser.amount, 1);
    let fallback = plan.fallback_for(FallbackCondition::ElementNotFound).unwrap();
    assert!(fallback.retry_failed_step);
    assert_eq!(fallback.alternative_steps[0].kind, StepKind::Wait);
    assert_eq!(
        plan.fallback_for(FallbackCondition::Timeout).unwrap().alternative_steps[0].kind,
        StepKind::Screenshot
    );
}

#[tokio::test]
async fn test_unknown_intent_without_actions_is_rejected() {
    let intent = AutomationIntent::new(IntentKind::Unknown, "??");
    let err = ExecutionPlanner::default()
        .create_plan("??", &intent, &CommandParameters::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PlannerError::UnsupportedIntent(_)));
}

#[tokio::test]
async fn test_suggested_actions_are_normalized() {
    let actions = vec![
        RawAction {
            kind: "goto".into(),
            url: Some("https://example.com".into()),
            ..Default::default()
        },
        RawAction {
            kind: "input".into(),
            target: Some(RawTarget::Css("#q".into())),
            value: Some("rust".into()),
            ..Default::default()
        },
        RawAction {
            kind: "teleport".into(),
            ..Default::default()
        },
        RawAction {
            kind: "click".into(),
            ..Default::default()
        },
        RawAction {
            kind: "press".into(),
            value: Some("Enter".into()),
            ..Default::default()
        },
    ];
    let intent = AutomationIntent::new(IntentKind::Unknown, "search example");
    let plan = ExecutionPlanner::default()
        .create_plan("search example", &intent, &CommandParameters::default(), Some(&actions))
        .await
        .unwrap();

    let kinds: Vec<_> = plan.steps.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![StepKind::Navigate, StepKind::Wait, StepKind::Type, StepKind::KeyPress]
    );
    assert_eq!(plan.steps[2].timeout_ms, 10_000);
    assert_eq!(plan.steps[2].retry_count, 3);
}

#[tokio::test]
async fn test_navigate_is_synthesized_when_missing() {
    let actions = vec![RawAction {
        kind: "type".into(),
        target: Some(RawTarget::Css("#q".into())),
        value: Some("rust".into()),
        ..Default::default()
    }];
    let intent = AutomationIntent::new(IntentKind::Unknown, "look up rust");
    let plan = ExecutionPlanner::default()
        .create_plan("look up rust", &intent, &CommandParameters::default(), Some(&actions))
        .await
        .unwrap();

    assert_eq!(plan.steps[0].kind, StepKind::Navigate);
    assert_eq!(
        plan.steps[0].url(),
        Some("https://www.google.com/search?q=look+up+rust")
    );
    assert_eq!(plan.steps[1].kind, StepKind::Wait);
}

#[tokio::test]
async fn test_flight_like_suggestions_are_rewritten() {
    let actions = vec![
        RawAction {
            kind: "navigate".into(),
            url: Some("https://www.google.com/travel/flights?q=flights%20from%20LHR%20to%20BOM".into()),
            ..Default::default()
        },
        RawAction {
            kind: "extract".into(),
            target: Some(RawTarget::Css(".result".into())),
            ..Default::default()
        },
    ];
    let intent = AutomationIntent::new(IntentKind::Search, "flights");
    let plan = ExecutionPlanner::default()
        .create_plan("flights", &intent, &CommandParameters::default(), Some(&actions))
        .await
        .unwrap();

    assert!(plan.target_urls().len() >= 3);
}
