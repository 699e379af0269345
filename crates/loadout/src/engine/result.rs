//! Step and task results, compiled artifacts, and status reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Output keys collected as artifacts when a step returns a JSON object.
pub const ARTIFACT_KEYS: &[&str] = &["code", "ui", "api", "tests"];

/// Outcome of a single step. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Capabilities that loaded for this step, primary first.
    pub capabilities_used: Vec<String>,
    pub elapsed_seconds: f64,
    pub tokens_used: usize,
}

impl StepResult {
    pub(crate) fn failed(step_id: &str, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.to_string(),
            success: false,
            output: None,
            error: Some(error.into()),
            capabilities_used: Vec::new(),
            elapsed_seconds: 0.0,
            tokens_used: 0,
        }
    }
}

/// Which execution option stopped the step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    MaxTokens,
    MaxTime,
    MaxSteps,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Limit::MaxTokens => "max_tokens",
            Limit::MaxTime => "max_time",
            Limit::MaxSteps => "max_steps",
        })
    }
}

/// An artifact pulled out of a step's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub step_id: String,
    pub content: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompiledSummary {
    pub total_artifacts: usize,
    /// Distinct artifact types, sorted.
    pub artifact_types: Vec<String>,
}

/// Step outputs grouped for the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompiledResults {
    pub summary: CompiledSummary,
    /// Output of every successful step, by step id.
    pub details: BTreeMap<String, Value>,
    pub artifacts: Vec<Artifact>,
}

impl CompiledResults {
    /// Compile the outputs of the successful steps in `steps`, in order.
    pub fn compile(steps: &[StepResult]) -> Self {
        let mut compiled = Self::default();
        for step in steps.iter().filter(|s| s.success) {
            let Some(output) = &step.output else {
                continue;
            };
            compiled.details.insert(step.step_id.clone(), output.clone());
            if let Value::Object(map) = output {
                for key in ARTIFACT_KEYS {
                    if let Some(content) = map.get(*key) {
                        compiled.artifacts.push(Artifact {
                            kind: key.to_string(),
                            step_id: step.step_id.clone(),
                            content: content.clone(),
                        });
                    }
                }
            }
        }

        let mut types: Vec<String> = compiled.artifacts.iter().map(|a| a.kind.clone()).collect();
        types.sort();
        types.dedup();
        compiled.summary = CompiledSummary {
            total_artifacts: compiled.artifacts.len(),
            artifact_types: types,
        };
        compiled
    }
}

/// Outcome of a whole task. Kept in the engine's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub request: String,
    /// No step failed and no engine fault occurred. A loop stopped by a
    /// limit still succeeds.
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub errors: Vec<String>,
    pub tokens_used: usize,
    pub elapsed_seconds: f64,
    pub cost_estimate: f64,
    pub halted_by: Option<Limit>,
    pub compiled: CompiledResults,
    pub finished_at: DateTime<Utc>,
}

/// Lifecycle state reported by
/// [`Engine::task_status`](super::Engine::task_status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Paused)
    }
}

/// Progress of an active task, or final figures of a finished one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub task_id: String,
    pub status: TaskStatus,
    /// Set while the task is active.
    pub current_step: Option<String>,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub tokens_used: usize,
    /// Running estimate for active tasks, final estimate otherwise.
    pub cost_estimate: f64,
    pub elapsed_seconds: f64,
    pub errors: Vec<String>,
}

impl From<&ExecutionResult> for StatusReport {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            task_id: result.task_id.clone(),
            status: if result.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            },
            current_step: None,
            steps_completed: result.steps_completed,
            total_steps: result.total_steps,
            tokens_used: result.tokens_used,
            cost_estimate: result.cost_estimate,
            elapsed_seconds: result.elapsed_seconds,
            errors: result.errors.clone(),
        }
    }
}
