#![cfg(unix)]

use std::time::Duration;
use wayline_common::bridge::{BridgeRequest, ResponseKind};
use wayline_common::{AutomationStep, ExecutionPlan, ExtractionKind, StepError};
use wayline_engine::engine::{Engine, EngineConfig, EngineError};
use wayline_engine::runner::{RunContext, StopSignal};
use wayline_bridge::{AgentBridgeEngine, BridgeChannel, ChannelState};

/// Answers like the browser-use bridge: `ready` first, then one reply per line.
const FAKE_BRIDGE: &str = r#"
echo 'starting fake bridge' >&2
echo '{"type":"ready","message":"Browser-use bridge is ready"}'
while IFS= read -r line; do
  case "$line" in
    *'"type":"ping"'*) echo '{"type":"pong","message":"Bridge is alive"}' ;;
    *'"type":"test"'*) echo '{"type":"test_success","message":"Browser-use is working correctly"}' ;;
    *'captcha'*) echo '{"type":"error","message":"Bot detection encountered: captcha page"}' ;;
    *'"type":"execute_task"'*) echo '{"type":"success","data":{"success":true,"actions_taken":["open","read"],"final_state":{"url":"https://example.com/done"},"screenshots":["iVBORw=="],"extracted_data":["AI131 LHR-BOM 420"]}}' ;;
  esac
done
"#;

fn config(script: &str) -> EngineConfig {
    EngineConfig {
        timeout_ms: 5000,
        bridge_command: vec!["sh".into(), "-c".into(), script.into()],
        ..Default::default()
    }
}

fn plan(goal: &str) -> ExecutionPlan {
    ExecutionPlan::new(
        goal,
        vec![AutomationStep::navigate("https://example.com", "open example")],
    )
}

#[tokio::test]
async fn test_bridge_lifecycle_and_task() {
    let mut engine = AgentBridgeEngine::new(config(FAKE_BRIDGE));
    engine.launch().await.unwrap();
    engine.self_test().await.unwrap();

    let outcome = engine
        .run(&plan("find flights"), &RunContext::default())
        .await
        .unwrap();

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.step_results.len(), 1);
    assert_eq!(outcome.extracted.len(), 1);
    assert_eq!(outcome.extracted[0].kind, ExtractionKind::Text);
    assert_eq!(outcome.extracted[0].source.url, "https://example.com/done");
    assert_eq!(outcome.screenshots.len(), 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_bot_detection_reply_is_critical() {
    let mut engine = AgentBridgeEngine::new(config(FAKE_BRIDGE));
    engine.launch().await.unwrap();

    let outcome = engine
        .run(&plan("solve the captcha"), &RunContext::default())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.critical_failure);
    assert!(matches!(
        outcome.step_results[0].error,
        Some(StepError::Blocked { .. })
    ));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_exit_before_ready_fails_launch() {
    let mut engine = AgentBridgeEngine::new(config(
        r#"echo '{"type":"error","message":"Failed to import browser-use"}'; exit 1"#,
    ));
    assert!(matches!(engine.launch().await, Err(EngineError::Launch(_))));
}

#[tokio::test]
async fn test_silent_bridge_times_out() {
    let mut silent = config("sleep 30");
    silent.timeout_ms = 1000;
    let mut engine = AgentBridgeEngine::new(silent);
    assert!(matches!(engine.launch().await, Err(EngineError::Launch(_))));
}

#[tokio::test]
async fn test_exit_mid_task_fails_pending_request() {
    let mut engine = AgentBridgeEngine::new(config(
        r#"echo '{"type":"ready"}'; read -r line; exit 0"#,
    ));
    engine.launch().await.unwrap();

    let result = engine.run(&plan("find flights"), &RunContext::default()).await;
    assert!(matches!(result, Err(EngineError::Unavailable(_))));
}

#[tokio::test]
async fn test_run_requires_launch_and_honors_stop() {
    let mut engine = AgentBridgeEngine::new(config(FAKE_BRIDGE));
    assert!(matches!(
        engine.run(&plan("x"), &RunContext::default()).await,
        Err(EngineError::NotLaunched)
    ));

    let stop = StopSignal::new();
    stop.stop();
    let outcome = engine
        .run(&plan("x"), &RunContext::new(stop))
        .await
        .unwrap();
    assert!(outcome.stopped);
    assert!(outcome.step_results.is_empty());
}

#[tokio::test]
async fn test_channel_state_reaches_exited() {
    let command: Vec<String> = vec!["sh".into(), "-c".into(), r#"echo '{"type":"ready"}'; sleep 1"#.into()];
    let channel = BridgeChannel::spawn(&command).unwrap();
    channel
        .wait_ready(std::time::Duration::from_secs(5))
        .await
        .unwrap();

    for _ in 0..50 {
        if channel.state() == ChannelState::Exited {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(channel.state(), ChannelState::Exited);
    channel.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_task_reply_does_not_answer_next_request() {
    let script = r#"
echo '{"type":"ready"}'
while IFS= read -r line; do
  case "$line" in
    *'"type":"execute_task"'*) sleep 2; echo '{"type":"success","data":{"success":true}}' ;;
    *'"type":"ping"'*) echo '{"type":"pong"}' ;;
  esac
done
"#;
    let command: Vec<String> = vec!["sh".into(), "-c".into(), script.into()];
    let channel = BridgeChannel::spawn(&command).unwrap();
    channel.wait_ready(Duration::from_secs(5)).await.unwrap();

    let task = BridgeRequest::execute_task("task-1", "find flights", None, 60);
    let timed_out = channel.request(&task, Duration::from_millis(500)).await;
    assert!(matches!(timed_out, Err(wayline_bridge::BridgeError::Timeout(500))));

    let reply = channel
        .request(&BridgeRequest::ping("ping-1"), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(reply.kind, ResponseKind::Pong);

    channel.shutdown().await.unwrap();
}
