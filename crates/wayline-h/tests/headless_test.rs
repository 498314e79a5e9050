use serial_test::serial;
use wayline_common::{AutomationStep, ElementSelector, ExecutionPlan, StepKind};
use wayline_engine::engine::{Engine, EngineConfig};
use wayline_engine::runner::RunContext;
use wayline_h::DirectDriverEngine;

const FORM_PAGE: &str = "data:text/html,<html><head><title>Test Page</title></head><body>\
<input id='q' placeholder='Search'><button id='go' onclick=\"document.title='clicked:'+document.getElementById('q').value\">Go</button>\
<table><tr><th>City</th><th>Price</th></tr><tr><td>Paris</td><td>120</td></tr></table></body></html>";

async fn launched() -> Option<DirectDriverEngine> {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init()
        .ok();

    let mut engine = DirectDriverEngine::new(EngineConfig::default());
    match engine.launch().await {
        Ok(()) => Some(engine),
        Err(e) => {
            eprintln!("Failed to launch browser (is Chromium installed?): {}", e);
            None
        }
    }
}

#[tokio::test]
#[serial]
async fn test_headless_plan_round_trip() {
    let Some(mut engine) = launched().await else {
        return;
    };

    engine.self_test().await.expect("self-test failed");

    let plan = ExecutionPlan::new(
        "fill and read the test page",
        vec![
            AutomationStep::navigate(FORM_PAGE, "open test page"),
            AutomationStep::new(StepKind::Type, ElementSelector::css("#q"), "type query")
                .with_value("rust"),
            AutomationStep::new(StepKind::Click, ElementSelector::text("Go"), "press go"),
            AutomationStep::new(StepKind::Extract, ElementSelector::css("table"), "read table"),
            AutomationStep::screenshot("capture"),
        ],
    );

    let outcome = engine.run(&plan, &RunContext::default()).await.expect("run failed");
    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.screenshots.len(), 1);
    assert!(!outcome.extracted.is_empty());

    let page = engine.page().expect("page available after launch");
    assert_eq!(page.title().await.expect("title"), "clicked:rust");

    engine.close().await.expect("close failed");
}

#[tokio::test]
#[serial]
async fn test_headless_missing_element_fails_step() {
    let Some(mut engine) = launched().await else {
        return;
    };

    let plan = ExecutionPlan::new(
        "click something absent",
        vec![
            AutomationStep::navigate(FORM_PAGE, "open test page"),
            AutomationStep::new(StepKind::Click, ElementSelector::css("#absent"), "click absent")
                .with_timeout(1000)
                .with_retries(0),
        ],
    );

    let outcome = engine.run(&plan, &RunContext::default()).await.expect("run failed");
    assert!(!outcome.success);
    assert_eq!(outcome.failed_steps(), 1);

    engine.close().await.expect("close failed");
}
