pub mod bridge;
pub mod intent;
pub mod observation;
pub mod plan;
pub mod result;
pub mod step;

pub use intent::{
    AutomationIntent, Classification, CommandParameters, Complexity, IntentKind, RawAction,
    RawTarget,
};
pub use observation::{ChallengeProbe, ElementSnapshot, FieldCandidate, PageSummary, TableSnapshot};
pub use plan::{
    ExecutionPlan, FallbackCondition, FallbackStrategy, PlanValidationError, ResourceKind,
    ResourceRequirement,
};
pub use result::{
    AutomationResult, DataSource, ExtractedData, ExtractionKind, FailureTag, RunMetadata,
    Screenshot, StepError, StepOutput, StepResult, TargetReport, TargetState,
};
pub use step::{AutomationStep, ElementSelector, StepKind, StepValidationError};
