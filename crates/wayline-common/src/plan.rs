use crate::step::{AutomationStep, StepKind, StepValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Browser,
    Memory,
    Network,
}

/// Advisory estimate of what a plan needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub amount: u64,
    pub unit: String,
}

impl ResourceRequirement {
    pub fn new(kind: ResourceKind, amount: u64, unit: impl Into<String>) -> Self {
        Self {
            kind,
            amount,
            unit: unit.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackCondition {
    ElementNotFound,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackStrategy {
    pub condition: FallbackCondition,
    pub alternative_steps: Vec<AutomationStep>,
    #[serde(default)]
    pub retry_failed_step: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan has no steps")]
    Empty,
    #[error("plan has no navigate step")]
    NoNavigate,
    #[error(transparent)]
    Step(#[from] StepValidationError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    #[serde(default)]
    pub goal: String,
    pub steps: Vec<AutomationStep>,
    pub estimated_duration_ms: u64,
    pub required_resources: Vec<ResourceRequirement>,
    pub fallback_strategies: Vec<FallbackStrategy>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(goal: impl Into<String>, steps: Vec<AutomationStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps,
            estimated_duration_ms: 0,
            required_resources: Vec::new(),
            fallback_strategies: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn navigate_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Navigate)
            .count()
    }

    /// URLs of every navigate step, in plan order.
    pub fn target_urls(&self) -> Vec<&str> {
        self.steps.iter().filter_map(|s| s.url()).collect()
    }

    pub fn fallback_for(&self, condition: FallbackCondition) -> Option<&FallbackStrategy> {
        self.fallback_strategies
            .iter()
            .find(|f| f.condition == condition)
    }

    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::Empty);
        }
        if self.navigate_count() == 0 {
            return Err(PlanValidationError::NoNavigate);
        }
        for step in &self.steps {
            step.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::ElementSelector;

    #[test]
    fn test_validate_requires_navigate() {
        let plan = ExecutionPlan::new(
            "click around",
            vec![AutomationStep::new(
                StepKind::Click,
                ElementSelector::css("#go"),
                "click go",
            )],
        );
        assert_eq!(plan.validate(), Err(PlanValidationError::NoNavigate));
        assert_eq!(
            ExecutionPlan::new("nothing", vec![]).validate(),
            Err(PlanValidationError::Empty)
        );
    }

    #[test]
    fn test_target_urls_in_order() {
        let plan = ExecutionPlan::new(
            "two sites",
            vec![
                AutomationStep::navigate("https://a.example", "a"),
                AutomationStep::screenshot("shot"),
                AutomationStep::navigate("https://b.example", "b"),
            ],
        );
        assert!(plan.validate().is_ok());
        assert_eq!(plan.target_urls(), vec!["https://a.example", "https://b.example"]);
    }
}
