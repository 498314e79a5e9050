mod common;

use async_trait::async_trait;
use common::{MockPage, PageEngine};
use std::sync::Arc;
use wayline_common::{
    AutomationIntent, AutomationResult, AutomationStep, Classification, CommandParameters,
    ElementSelector, ElementSnapshot, ExecutionPlan, ExtractionKind, FallbackCondition, IntentKind,
    StepKind,
};
use wayline_engine::engine::{self, EngineKind};
use wayline_engine::page::Locator;
use wayline_engine::pipeline::{Automation, PipelineError, is_multi_target};
use wayline_engine::planner::fallback_strategies;
use wayline_engine::runner::{PlanRunner, RunContext, RunEvent, StopSignal};
use wayline_engine::services::{IntentClassifier, JsonDirSink, ServiceError};

fn table_page() -> MockPage {
    let mut page = MockPage::new()
        .with_element(Locator::Css("table".into()), "1")
        .with_table(&["Year", "Visitors"], &[&["2023", "1200"]]);
    page.snapshots.push(ElementSnapshot {
        tag: "table".into(),
        text: "Year Visitors 2023 1200".into(),
        ..Default::default()
    });
    page
}

#[tokio::test(start_paused = true)]
async fn test_data_extract_over_one_table() {
    let engine = engine::shared(Box::new(PageEngine::new(table_page())));
    let automation = Automation::new(engine, EngineKind::DirectDriver);

    let result = automation
        .run("extract the table from https://example.com/stats", &RunContext::default())
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.intent.kind, IntentKind::DataExtract);
    let kinds: Vec<_> = result.extracted_data.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![ExtractionKind::Structured, ExtractionKind::Table]);
    assert_eq!(result.extracted_data[1].source.url, "https://example.com/stats");
    assert_eq!(result.screenshots.len(), 1);
    assert!(!result.metadata.multi_target);
    assert_eq!(result.metadata.steps_total, result.execution_plan.steps.len());
    assert_eq!(result.metadata.steps_failed, 0);
    assert_eq!(result.metadata.engine, "direct_driver");
}

#[tokio::test(start_paused = true)]
async fn test_results_are_written_to_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonDirSink::new(dir.path().join("results")));
    let engine = engine::shared(Box::new(PageEngine::new(table_page())));
    let automation = Automation::new(engine, EngineKind::DirectDriver).with_sink(sink.clone());

    let result = automation
        .run("extract the table from https://example.com/stats", &RunContext::default())
        .await
        .unwrap();

    let saved = std::fs::read_to_string(sink.path_for(&result)).unwrap();
    let parsed: AutomationResult = serde_json::from_str(&saved).unwrap();
    assert_eq!(parsed.id, result.id);
    assert_eq!(parsed.extracted_data.len(), 2);
    assert!(saved.contains("\"executionPlan\""));
}

#[tokio::test]
async fn test_empty_command_is_rejected() {
    let engine = engine::shared(Box::new(PageEngine::default()));
    let automation = Automation::new(engine, EngineKind::DirectDriver);
    assert!(matches!(
        automation.plan("   ").await,
        Err(PipelineError::EmptyCommand)
    ));
}

struct DownClassifier;

#[async_trait]
impl IntentClassifier for DownClassifier {
    async fn classify(&self, _command: &str) -> Result<Classification, ServiceError> {
        Err(ServiceError::Unavailable("503".into()))
    }
}

#[tokio::test]
async fn test_classifier_failure_falls_back_to_rules() {
    let engine = engine::shared(Box::new(PageEngine::default()));
    let automation = Automation::new(engine, EngineKind::DirectDriver)
        .with_classifier(Arc::new(DownClassifier));

    let (classification, plan) = automation.plan("open https://example.com").await.unwrap();
    assert_eq!(classification.intent.kind, IntentKind::Navigate);
    assert_eq!(plan.steps[0].url(), Some("https://example.com"));
}

#[tokio::test(start_paused = true)]
async fn test_runner_applies_fallback_and_reports_once() {
    let mut page = MockPage::new();
    let mut plan = ExecutionPlan::new(
        "click missing",
        vec![
            AutomationStep::navigate("https://example.com", "open"),
            AutomationStep::new(StepKind::Click, ElementSelector::css("#missing"), "click")
                .with_timeout(500)
                .with_retries(1),
        ],
    );
    plan.fallback_strategies = fallback_strategies();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = RunContext::default().with_events(tx);
    let outcome = PlanRunner::default().run(&plan, &mut page, &ctx).await;
    drop(ctx);

    assert_eq!(outcome.step_results.len(), 2);
    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);

    let mut fallbacks = Vec::new();
    while let Some(event) = rx.recv().await {
        if let RunEvent::FallbackApplied { condition, .. } = event {
            fallbacks.push(condition);
        }
    }
    assert_eq!(fallbacks, vec![FallbackCondition::ElementNotFound]);
}

#[tokio::test(start_paused = true)]
async fn test_runner_honors_stop_signal() {
    let mut page = MockPage::new();
    let plan = ExecutionPlan::new(
        "open",
        vec![AutomationStep::navigate("https://example.com", "open")],
    );
    let stop = StopSignal::new();
    stop.stop();

    let outcome = PlanRunner::default()
        .run(&plan, &mut page, &RunContext::new(stop))
        .await;

    assert!(outcome.stopped);
    assert!(outcome.step_results.is_empty());
    assert!(page.navigations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_with_data_still_succeeds() {
    let mut page = table_page();
    let plan = ExecutionPlan::new(
        "extract",
        vec![
            AutomationStep::navigate("https://example.com", "open"),
            AutomationStep::new(StepKind::Click, ElementSelector::css("#cookie-ok"), "dismiss")
                .with_timeout(200)
                .with_retries(1),
            AutomationStep::new(StepKind::Extract, ElementSelector::css("table"), "extract"),
        ],
    );

    let outcome = PlanRunner::default()
        .run(&plan, &mut page, &RunContext::default())
        .await;

    assert_eq!(outcome.failed_steps(), 1);
    assert!(outcome.success);
}

fn two_page_plan(first: &str, second: &str) -> ExecutionPlan {
    ExecutionPlan::new(
        "collect both reports",
        vec![
            AutomationStep::navigate(first, "open first report"),
            AutomationStep::new(StepKind::Extract, ElementSelector::css("table"), "extract first"),
            AutomationStep::navigate(second, "open second report"),
            AutomationStep::new(StepKind::Extract, ElementSelector::css("table"), "extract second"),
        ],
    )
}

#[test]
fn test_multi_target_counts_sites_not_pages() {
    assert!(!is_multi_target(&two_page_plan(
        "https://example.com/a",
        "https://www.example.com/b"
    )));
    assert!(is_multi_target(&two_page_plan(
        "https://example.com/a",
        "https://example.org/a"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_pages_of_one_site_all_run() {
    let engine = engine::shared(Box::new(PageEngine::new(table_page())));
    let automation = Automation::new(engine, EngineKind::DirectDriver);
    let classification = Classification {
        intent: AutomationIntent::new(IntentKind::DataExtract, "collect both reports"),
        parameters: CommandParameters::default(),
        suggested_actions: None,
        confidence: 1.0,
    };
    let plan = two_page_plan("https://example.com/a", "https://example.com/b");

    let result = automation
        .execute("collect both reports", &classification, plan, &RunContext::default())
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert!(!result.metadata.multi_target);
    assert_eq!(result.metadata.steps_total, 4);
    let tables = result
        .extracted_data
        .iter()
        .filter(|d| d.kind == ExtractionKind::Table)
        .count();
    assert_eq!(tables, 2);
}
