//! Planned steps, their task types, and the per-task execution context.

use crate::capability::Action;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Coarse classification of a request or a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    UiDesign,
    ApiDevelopment,
    DatabaseDesign,
    TestAutomation,
    Deployment,
    Analysis,
    Refactoring,
    Complex,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "code_generation",
            TaskType::UiDesign => "ui_design",
            TaskType::ApiDevelopment => "api_development",
            TaskType::DatabaseDesign => "database_design",
            TaskType::TestAutomation => "test_automation",
            TaskType::Deployment => "deployment",
            TaskType::Analysis => "analysis",
            TaskType::Refactoring => "refactoring",
            TaskType::Complex => "complex",
        }
    }

    /// The action a step of this type asks its primary capability for.
    pub fn action(self) -> Action {
        match self {
            TaskType::CodeGeneration => Action::GenerateCode,
            TaskType::UiDesign => Action::GenerateUi,
            TaskType::ApiDevelopment => Action::GenerateApi,
            TaskType::TestAutomation => Action::GenerateTests,
            TaskType::Analysis => Action::Analyze,
            TaskType::Refactoring => Action::Refactor,
            TaskType::Deployment => Action::Deploy,
            TaskType::DatabaseDesign | TaskType::Complex => Action::Execute,
        }
    }

    /// Fallback catalog query when a step's own text finds nothing.
    pub fn search_hint(self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "code generation",
            TaskType::UiDesign => "ui design",
            TaskType::ApiDevelopment => "api code",
            TaskType::DatabaseDesign => "database architecture",
            TaskType::TestAutomation => "testing",
            TaskType::Deployment => "deployment operations",
            TaskType::Analysis => "analysis",
            TaskType::Refactoring => "refactoring code",
            TaskType::Complex => "reasoning complex",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step expects from its surroundings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequirements {
    /// The step consumes the previous step's output.
    pub input_from_previous: bool,
    /// The step would benefit from the user's input (requirements and
    /// design-planning steps).
    pub user_input_needed: bool,
}

/// One unit of a decomposed task. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    /// `step_1`, `step_2`, ...
    pub id: String,
    pub name: String,
    pub description: String,
    pub task_type: TaskType,
    /// Capability ids, best match first. The first one that loads is the
    /// step's primary capability.
    pub required_capabilities: Vec<String>,
    pub estimated_seconds: u64,
    /// Step ids that must complete before this one.
    pub dependencies: Vec<String>,
    pub context_requirements: ContextRequirements,
    /// 1 to 10; earlier steps rank higher.
    pub priority: u8,
}

/// State of one running task. Owned by the engine worker driving it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub request: String,
    pub current_step: Option<String>,
    /// Step ids in completion order.
    pub completed: Vec<String>,
    pub outputs: HashMap<String, serde_json::Value>,
    pub tokens_used: usize,
    started_at: Instant,
}

impl TaskContext {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            current_step: None,
            completed: Vec::new(),
            outputs: HashMap::new(),
            tokens_used: 0,
            started_at: Instant::now(),
        }
    }

    /// Wall time since the task started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed.iter().any(|s| s == step_id)
    }

    /// Whether every dependency of `step` has completed.
    pub fn is_ready(&self, step: &TaskStep) -> bool {
        step.dependencies.iter().all(|d| self.is_completed(d))
    }
}
