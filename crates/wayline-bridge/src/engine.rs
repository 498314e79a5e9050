use crate::channel::{BridgeChannel, BridgeError};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;
use wayline_common::bridge::{BridgeRequest, BridgeResponse, ResponseKind, TaskReport};
use wayline_common::{
    AutomationStep, DataSource, ElementSelector, ExecutionPlan, ExtractedData, ExtractionKind,
    FailureTag, Screenshot, StepError, StepKind, StepOutput, StepResult,
};
use wayline_engine::engine::{Engine, EngineConfig, EngineError, EngineKind, EngineProvider};
use wayline_engine::orchestrator::tag_text;
use wayline_engine::runner::{RunContext, RunEvent, RunOutcome};

/// Time allowed for the reply on top of the task timeout the bridge enforces.
const REPLY_GRACE: Duration = Duration::from_secs(30);

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Agent output is unverified free text.
const AGENT_CONFIDENCE: f32 = 0.6;

/// Delegates whole tasks to an external natural-language agent.
pub struct AgentBridgeEngine {
    config: EngineConfig,
    channel: Option<BridgeChannel>,
}

impl AgentBridgeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            channel: None,
        }
    }

    async fn call(
        &self,
        request: &BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeResponse, EngineError> {
        let channel = self.channel.as_ref().ok_or(EngineError::NotLaunched)?;
        channel.request(request, timeout).await.map_err(|e| match e {
            BridgeError::Timeout(ms) => EngineError::Timeout(ms),
            BridgeError::Exited | BridgeError::NotReady => EngineError::Unavailable(e.to_string()),
            other => EngineError::Protocol(other.to_string()),
        })
    }

    fn task_timeout_secs(&self) -> u64 {
        (self.config.timeout_ms / 1000).max(1)
    }
}

#[async_trait]
impl Engine for AgentBridgeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::AgentBridge
    }

    async fn launch(&mut self) -> Result<(), EngineError> {
        if self.channel.is_some() {
            return Ok(());
        }
        let channel = BridgeChannel::spawn(&self.config.bridge_command)
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        if let Err(e) = channel.wait_ready(self.config.timeout()).await {
            let _ = channel.shutdown().await;
            return Err(EngineError::Launch(format!("bridge never became ready: {}", e)));
        }
        self.channel = Some(channel);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if let Some(channel) = self.channel.take() {
            channel
                .shutdown()
                .await
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
        }
        Ok(())
    }

    async fn self_test(&mut self) -> Result<(), EngineError> {
        let pong = self
            .call(&BridgeRequest::ping(Uuid::new_v4().to_string()), CONTROL_TIMEOUT)
            .await?;
        if pong.kind != ResponseKind::Pong {
            return Err(EngineError::Protocol(format!(
                "expected pong, got {:?}",
                pong.kind
            )));
        }
        let test = self
            .call(&BridgeRequest::test(Uuid::new_v4().to_string()), CONTROL_TIMEOUT)
            .await?;
        match test.kind {
            ResponseKind::TestSuccess => Ok(()),
            _ => Err(EngineError::Unavailable(
                test.message.unwrap_or_else(|| format!("{:?}", test.kind)),
            )),
        }
    }

    async fn run(
        &mut self,
        plan: &ExecutionPlan,
        ctx: &RunContext,
    ) -> Result<RunOutcome, EngineError> {
        let mut outcome = RunOutcome::default();
        if ctx.stop.is_stopped() {
            outcome.stopped = true;
            ctx.emit(RunEvent::Stopped);
            return Ok(outcome.finish());
        }

        let step = AutomationStep::new(StepKind::Extract, ElementSelector::page(), plan.goal.clone());
        let url = plan.target_urls().first().map(|u| u.to_string());
        let request = BridgeRequest::execute_task(
            Uuid::new_v4().to_string(),
            plan.goal.clone(),
            url.clone(),
            self.task_timeout_secs(),
        );
        let task_secs = request.data.as_ref().map_or(1, |d| d.timeout);

        info!("Handing task to agent bridge: {}", plan.goal);
        ctx.emit(RunEvent::StepStarted {
            index: 0,
            step_id: step.id.clone(),
            description: step.description.clone(),
        });

        let started = Instant::now();
        let reply = match self
            .call(&request, Duration::from_secs(task_secs) + REPLY_GRACE)
            .await
        {
            Ok(response) => Ok(response),
            Err(EngineError::Timeout(ms)) => Err(StepError::Timeout { ms }),
            Err(e) => return Err(e),
        };
        let source = url.unwrap_or_default();
        let (result, pngs) = task_result(&step, reply, &source, task_secs * 1000);
        let result = StepResult {
            duration_ms: started.elapsed().as_millis() as u64,
            ..result
        };

        ctx.emit(RunEvent::StepFinished {
            index: 0,
            result: result.clone(),
        });
        outcome.record(&step, result);
        outcome
            .screenshots
            .extend(pngs.iter().map(|png| Screenshot::from_png(&step.id, png)));
        Ok(outcome.finish())
    }
}

/// Turns the bridge's reply into a step result plus decoded screenshots.
fn task_result(
    step: &AutomationStep,
    reply: Result<BridgeResponse, StepError>,
    source: &str,
    timeout_ms: u64,
) -> (StepResult, Vec<Vec<u8>>) {
    let mut result = StepResult {
        step_id: step.id.clone(),
        kind: step.kind,
        success: false,
        data: None,
        screenshot: None,
        error: None,
        attempts: 1,
        duration_ms: 0,
    };
    let response = match reply {
        Ok(response) => response,
        Err(e) => {
            result.error = Some(e);
            return (result, Vec::new());
        }
    };

    match response.kind {
        ResponseKind::Success => {
            let report = response.task_report().unwrap_or_default();
            let pngs = decode_screenshots(&report);
            if report.success {
                let source = report.final_state.url.as_deref().unwrap_or(source);
                result.success = true;
                result.data = Some(StepOutput::Extracted {
                    items: extracted_items(&report.extracted_data, source),
                });
            } else {
                result.error = Some(failure(
                    report.error.as_deref().unwrap_or("agent reported failure"),
                    timeout_ms,
                ));
            }
            (result, pngs)
        }
        kind => {
            let message = response
                .message
                .unwrap_or_else(|| format!("unexpected bridge reply {:?}", kind));
            result.error = Some(failure(&message, timeout_ms));
            (result, Vec::new())
        }
    }
}

fn failure(message: &str, timeout_ms: u64) -> StepError {
    match tag_text(message) {
        FailureTag::BotDetection => StepError::Blocked {
            reason: message.to_string(),
        },
        FailureTag::Timeout => StepError::Timeout { ms: timeout_ms },
        FailureTag::Other => StepError::PageUnavailable {
            reason: message.to_string(),
        },
    }
}

fn extracted_items(value: &Value, source: &str) -> Vec<ExtractedData> {
    let item = |kind, content: &Value| {
        ExtractedData::new(
            kind,
            content.clone(),
            DataSource::now(source, "agent"),
            AGENT_CONFIDENCE,
        )
    };
    let blank = |v: &Value| match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    };
    match value {
        v if blank(v) => Vec::new(),
        Value::Array(entries) => entries
            .iter()
            .filter(|v| !blank(v))
            .map(|v| match v {
                Value::String(_) => item(ExtractionKind::Text, v),
                _ => item(ExtractionKind::Structured, v),
            })
            .collect(),
        Value::String(_) => vec![item(ExtractionKind::Text, value)],
        _ => vec![item(ExtractionKind::Structured, value)],
    }
}

fn decode_screenshots(report: &TaskReport) -> Vec<Vec<u8>> {
    report
        .screenshots
        .iter()
        .filter_map(|encoded| match STANDARD.decode(encoded) {
            Ok(png) => Some(png),
            Err(e) => {
                warn!("Dropping undecodable bridge screenshot: {}", e);
                None
            }
        })
        .collect()
}

/// True when the program exists and any script path it is handed does too.
pub fn command_available(command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };
    let scripts_present = args
        .iter()
        .filter(|a| [".py", ".js", ".sh"].iter().any(|ext| a.ends_with(ext)))
        .all(|a| Path::new(a).is_file());
    scripts_present && program_on_path(program)
}

fn program_on_path(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .is_some_and(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
}

#[derive(Debug, Clone)]
pub struct AgentBridgeProvider {
    command: Vec<String>,
}

impl AgentBridgeProvider {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl EngineProvider for AgentBridgeProvider {
    fn kind(&self) -> EngineKind {
        EngineKind::AgentBridge
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(AgentBridgeEngine::new(config.clone())))
    }

    fn is_available(&self) -> bool {
        command_available(&self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> AutomationStep {
        AutomationStep::new(StepKind::Extract, ElementSelector::page(), "find fares")
    }

    fn response(kind: ResponseKind, data: Option<Value>, message: Option<&str>) -> BridgeResponse {
        BridgeResponse {
            kind,
            data,
            message: message.map(str::to_string),
            id: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_extracted_items_shapes() {
        assert!(extracted_items(&Value::Null, "u").is_empty());
        assert!(extracted_items(&json!([]), "u").is_empty());

        let items = extracted_items(&json!(["£420 AI131", "", {"price": 510}]), "u");
        let kinds: Vec<_> = items.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![ExtractionKind::Text, ExtractionKind::Structured]);

        let single = extracted_items(&json!({"price": "£420"}), "https://example.com");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].source.url, "https://example.com");
    }

    #[test]
    fn test_bot_detection_reply_blocks() {
        let reply = response(
            ResponseKind::Error,
            None,
            Some("Bot detection encountered: captcha shown"),
        );
        let (result, _) = task_result(&step(), Ok(reply), "u", 60_000);
        assert!(matches!(result.error, Some(StepError::Blocked { .. })));
    }

    #[test]
    fn test_timeout_reply_maps_to_timeout() {
        let reply = response(
            ResponseKind::Error,
            None,
            Some("Task timed out after 90 seconds."),
        );
        let (result, _) = task_result(&step(), Ok(reply), "u", 90_000);
        assert_eq!(result.error, Some(StepError::Timeout { ms: 90_000 }));
    }

    #[test]
    fn test_reported_failure_inside_success_envelope() {
        let reply = response(
            ResponseKind::Success,
            Some(json!({"success": false, "error": "could not parse agent history"})),
            None,
        );
        let (result, _) = task_result(&step(), Ok(reply), "u", 60_000);
        assert!(!result.success);
        assert!(matches!(result.error, Some(StepError::PageUnavailable { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_availability() {
        assert!(command_available(&["sh".to_string()]));
        assert!(!command_available(&[]));
        assert!(!command_available(&["wayline-no-such-program".to_string()]));
        assert!(!command_available(&[
            "sh".to_string(),
            "/nonexistent/browser_use_bridge.py".to_string(),
        ]));
    }
}
