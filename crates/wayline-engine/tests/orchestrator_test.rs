use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wayline_common::{
    AutomationStep, DataSource, ElementSelector, ExecutionPlan, ExtractedData, ExtractionKind,
    FailureTag, StepKind, TargetState,
};
use wayline_engine::engine::{self, Engine, EngineError, EngineKind};
use wayline_engine::orchestrator::{MultiTargetOrchestrator, OrchestratorConfig};
use wayline_engine::runner::{RunContext, RunEvent, RunOutcome};

const GOOGLE: &str = "https://www.google.com/travel/flights?q=LHR+BOM";
const KAYAK: &str = "https://www.kayak.com/flights/LHR-BOM";
const MOMONDO: &str = "https://www.momondo.com/flight-search/LHR-BOM";
const SKYSCANNER: &str = "https://www.skyscanner.net/transport/flights/lhr/bom/";
const EXPEDIA: &str = "https://www.expedia.com/Flights-Search";

#[derive(Debug, Clone)]
enum Behaviour {
    Data,
    Empty,
    Fail(&'static str),
    Hang(Duration),
    /// `n` steps of the given length, honouring the stop signal between them.
    Steps(usize, Duration),
}

#[derive(Debug, Default)]
struct MockEngine {
    behaviours: HashMap<String, Behaviour>,
    visited: Arc<Mutex<Vec<String>>>,
    steps_run: Arc<Mutex<usize>>,
}

impl MockEngine {
    fn with(mut self, url: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(url.to_string(), behaviour);
        self
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DirectDriver
    }

    async fn launch(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn run(&mut self, plan: &ExecutionPlan, ctx: &RunContext) -> Result<RunOutcome, EngineError> {
        let url = plan.steps[0].url().unwrap_or_default().to_string();
        self.visited.lock().unwrap().push(url.clone());
        match self.behaviours.get(&url).cloned().unwrap_or(Behaviour::Empty) {
            Behaviour::Data => Ok(RunOutcome {
                extracted: vec![ExtractedData::new(
                    ExtractionKind::Structured,
                    json!({"price": "£420"}),
                    DataSource::now(&url, ".result"),
                    0.9,
                )],
                success: true,
                ..Default::default()
            }),
            Behaviour::Empty => Ok(RunOutcome {
                success: true,
                ..Default::default()
            }),
            Behaviour::Fail(reason) => Err(EngineError::Task(reason.to_string())),
            Behaviour::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(RunOutcome::default())
            }
            Behaviour::Steps(n, d) => {
                for _ in 0..n {
                    if ctx.stop.is_stopped() {
                        return Ok(RunOutcome {
                            stopped: true,
                            ..Default::default()
                        });
                    }
                    tokio::time::sleep(d).await;
                    *self.steps_run.lock().unwrap() += 1;
                }
                Ok(RunOutcome {
                    success: true,
                    ..Default::default()
                })
            }
        }
    }
}

fn plan(urls: &[&str]) -> ExecutionPlan {
    let steps = urls
        .iter()
        .flat_map(|u| {
            vec![
                AutomationStep::navigate(*u, format!("Open {}", u)),
                AutomationStep::new(StepKind::Extract, ElementSelector::css(".result"), "extract"),
            ]
        })
        .collect();
    ExecutionPlan::new("flights LHR to BOM", steps)
}

fn orchestrator() -> MultiTargetOrchestrator {
    MultiTargetOrchestrator::new(OrchestratorConfig {
        target_timeout: Duration::from_secs(1),
        inter_target_delay: Duration::ZERO,
        ..Default::default()
    })
}

fn state_of<'a>(run: &'a wayline_engine::orchestrator::OrchestratedRun, name: &str) -> &'a TargetState {
    &run.targets.iter().find(|t| t.name == name).unwrap().state
}

#[tokio::test(start_paused = true)]
async fn test_early_stop_leaves_later_targets_pending() {
    let mock = MockEngine::default().with(GOOGLE, Behaviour::Data);
    let visited = mock.visited.clone();
    let run = orchestrator()
        .run(&plan(&[KAYAK, GOOGLE, MOMONDO]), engine::shared(Box::new(mock)), &RunContext::default())
        .await;

    assert!(run.success);
    assert_eq!(*visited.lock().unwrap(), vec![GOOGLE.to_string()]);
    assert_eq!(*state_of(&run, "Google Flights"), TargetState::Succeeded);
    for name in ["Kayak", "Momondo"] {
        let report = run.targets.iter().find(|t| t.name == name).unwrap();
        assert_eq!(report.history, vec![TargetState::Pending]);
    }
    assert_eq!(run.extracted.len(), 1);
    assert!(run.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bot_hostile_targets_are_never_attempted() {
    // Momondo ranks first; without data it does not trigger an early stop.
    let mock = MockEngine::default().with(MOMONDO, Behaviour::Empty);
    let visited = mock.visited.clone();
    let run = orchestrator()
        .run(
            &plan(&[SKYSCANNER, EXPEDIA, MOMONDO]),
            engine::shared(Box::new(mock)),
            &RunContext::default(),
        )
        .await;

    assert!(run.success);
    assert_eq!(*visited.lock().unwrap(), vec![MOMONDO.to_string()]);
    for name in ["Skyscanner", "Expedia"] {
        let report = run.targets.iter().find(|t| t.name == name).unwrap();
        assert_eq!(report.state, TargetState::Skipped);
        assert!(!report.was_attempted());
    }
    assert_eq!(run.errors.len(), 2);
    assert!(run.errors.iter().all(|e| e.contains("bot_detection_avoidance")));
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_tagged_and_do_not_abort() {
    let mock = MockEngine::default()
        .with(GOOGLE, Behaviour::Fail("captcha wall"))
        .with(KAYAK, Behaviour::Empty)
        .with(MOMONDO, Behaviour::Data);
    let run = orchestrator()
        .run(&plan(&[GOOGLE, KAYAK, MOMONDO]), engine::shared(Box::new(mock)), &RunContext::default())
        .await;

    assert!(run.success);
    let google = run.targets.iter().find(|t| t.name == "Google Flights").unwrap();
    assert_eq!(google.state, TargetState::Failed);
    assert_eq!(google.failure, Some(FailureTag::BotDetection));
    assert!(run.errors[0].starts_with("Google Flights: Bot detection encountered"));
    // A success without data does not stop the run.
    assert_eq!(*state_of(&run, "Kayak"), TargetState::Succeeded);
    assert_eq!(*state_of(&run, "Momondo"), TargetState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_target_does_not_block_the_next() {
    let mock = MockEngine::default()
        .with(GOOGLE, Behaviour::Hang(Duration::from_millis(1500)))
        .with(KAYAK, Behaviour::Data);
    let run = orchestrator()
        .run(&plan(&[GOOGLE, KAYAK]), engine::shared(Box::new(mock)), &RunContext::default())
        .await;

    let google = run.targets.iter().find(|t| t.name == "Google Flights").unwrap();
    assert_eq!(google.failure, Some(FailureTag::Timeout));
    assert_eq!(*state_of(&run, "Kayak"), TargetState::Succeeded);
    assert!(run.success);
}

#[tokio::test(start_paused = true)]
async fn test_overrunning_target_does_not_eat_the_next_budget() {
    const SLOW: &str = "https://a.example/search";
    const STEADY: &str = "https://b.example/search";
    let mock = MockEngine::default()
        .with(SLOW, Behaviour::Steps(15, Duration::from_secs(10)))
        .with(STEADY, Behaviour::Steps(10, Duration::from_secs(10)));
    let steps_run = mock.steps_run.clone();
    let orchestrator = MultiTargetOrchestrator::new(OrchestratorConfig {
        target_timeout: Duration::from_secs(120),
        inter_target_delay: Duration::ZERO,
        ..Default::default()
    });

    let run = orchestrator
        .run(&plan(&[SLOW, STEADY]), engine::shared(Box::new(mock)), &RunContext::default())
        .await;

    let slow = run.targets.iter().find(|t| t.name == "a.example").unwrap();
    assert_eq!(slow.state, TargetState::Failed);
    assert_eq!(slow.failure, Some(FailureTag::Timeout));
    let steady = run.targets.iter().find(|t| t.name == "b.example").unwrap();
    assert_eq!(steady.state, TargetState::Succeeded, "{:?}", steady.error);
    assert!(run.success);
    // The slow target stopped after its budget instead of running all 15 steps.
    assert!(*steps_run.lock().unwrap() < 15 + 10);
}

#[tokio::test(start_paused = true)]
async fn test_all_failed_is_a_normal_outcome() {
    let mock = MockEngine::default()
        .with(GOOGLE, Behaviour::Fail("connection reset"))
        .with(KAYAK, Behaviour::Fail("connection reset"));
    let run = orchestrator()
        .run(&plan(&[GOOGLE, KAYAK]), engine::shared(Box::new(mock)), &RunContext::default())
        .await;

    assert!(!run.success);
    assert_eq!(run.errors.len(), 2);
    assert!(run.targets.iter().all(|t| t.failure == Some(FailureTag::Other)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_signal_between_targets() {
    let ctx = RunContext::default();
    ctx.stop.stop();
    let mock = MockEngine::default();
    let visited = mock.visited.clone();
    let run = orchestrator()
        .run(&plan(&[GOOGLE, KAYAK]), engine::shared(Box::new(mock)), &ctx)
        .await;

    assert!(run.stopped);
    assert!(!run.success);
    assert!(visited.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_target_events_are_emitted() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = RunContext::default().with_events(tx);
    let mock = MockEngine::default().with(GOOGLE, Behaviour::Data);
    orchestrator()
        .run(&plan(&[GOOGLE]), engine::shared(Box::new(mock)), &ctx)
        .await;
    drop(ctx);

    let mut states = Vec::new();
    while let Some(event) = rx.recv().await {
        if let RunEvent::TargetChanged { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(states, vec![TargetState::Attempting, TargetState::Succeeded]);
}
