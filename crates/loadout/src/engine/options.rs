//! Per-task execution options.

use super::result::Limit;
use crate::error::{Error, Result};
use crate::planner::TaskContext;
use serde::{Deserialize, Serialize};

/// Options for a single [`Engine::execute_task`](super::Engine::execute_task)
/// call.
///
/// Deserializes from a camelCase JSON object. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Stop once cumulative tokens reach this.
    pub max_tokens: Option<usize>,
    /// Stop once this many wall seconds have passed since the task started.
    pub max_time: Option<f64>,
    /// Stop once this many steps have completed.
    pub max_steps: Option<usize>,
    pub stop_on_error: bool,
    /// Re-prioritize the context budget for this workflow before running.
    pub workflow_type: Option<String>,
    /// Advisory; steps always run sequentially within a task.
    pub parallel_execution: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_time: None,
            max_steps: None,
            stop_on_error: true,
            workflow_type: None,
            parallel_execution: false,
        }
    }
}

impl ExecutionOptions {
    /// Parse an options map.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidOptions(e.to_string()))
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_max_time(mut self, seconds: f64) -> Self {
        self.max_time = Some(seconds);
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_workflow_type(mut self, workflow: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow.into());
        self
    }

    /// The first limit `context` has reached, checked in token, time, step
    /// order. Thresholds are inclusive.
    pub fn limit_reached(&self, context: &TaskContext) -> Option<Limit> {
        if self.max_tokens.is_some_and(|max| context.tokens_used >= max) {
            return Some(Limit::MaxTokens);
        }
        if self
            .max_time
            .is_some_and(|max| context.elapsed().as_secs_f64() >= max)
        {
            return Some(Limit::MaxTime);
        }
        if self
            .max_steps
            .is_some_and(|max| context.completed.len() >= max)
        {
            return Some(Limit::MaxSteps);
        }
        None
    }
}
