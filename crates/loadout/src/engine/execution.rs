use super::events::EngineEvent;
use super::options::ExecutionOptions;
use super::result::{CompiledResults, ExecutionResult, Limit, StepResult};
use super::Engine;
use crate::capability::{Action, Capability};
use crate::context::ContextWindow;
use crate::error::Result;
use crate::planner::{TaskContext, TaskStep};
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Token charge per capability a step requires.
const TOKENS_PER_CAPABILITY: usize = 500;
/// Token charge per character of step description and serialized output.
const TOKENS_PER_CHAR: f64 = 0.3;

impl Engine {
    /// The step loop for one task.
    pub(super) async fn run_task(
        &self,
        task_id: &str,
        request: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let mut context = TaskContext::new(request);

        if let Some(workflow) = &options.workflow_type
            && let Err(e) = self.budget.optimize_for_workflow(workflow)
        {
            warn!(task_id, error = %e, "workflow optimization skipped");
        }
        if options.parallel_execution {
            debug!(task_id, "parallel execution requested; steps run sequentially");
        }

        let steps = self.planner.decompose(request)?;
        let complexity = self.planner.estimate_complexity(&steps);
        self.events.on_event(&EngineEvent::Decomposed {
            task_id,
            steps: &steps,
            complexity: &complexity,
        });
        self.update_active(task_id, |t| {
            t.total_steps = steps.len();
            t.capabilities = steps
                .iter()
                .flat_map(|s| s.required_capabilities.iter().cloned())
                .collect();
        });

        let mut remaining = steps.clone();
        let mut results: Vec<StepResult> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut halted_by: Option<Limit> = None;

        loop {
            self.wait_if_paused(task_id).await;

            let Some(step) = self.planner.plan_next_step(&context, &remaining).await else {
                break;
            };
            remaining.retain(|s| s.id != step.id);
            context.current_step = Some(step.id.clone());
            self.update_active(task_id, |t| t.current_step = Some(step.id.clone()));
            self.events.on_event(&EngineEvent::StepStarted {
                task_id,
                step: &step,
                index: context.completed.len(),
                total: steps.len(),
            });

            let result = self.execute_step(task_id, &step, &context).await;

            context.completed.push(step.id.clone());
            context.tokens_used += result.tokens_used;
            if let Some(output) = &result.output {
                context.outputs.insert(step.id.clone(), output.clone());
            }
            let error = (!result.success).then(|| {
                format!(
                    "{}: {}",
                    step.id,
                    result.error.as_deref().unwrap_or("unknown error")
                )
            });
            self.events.on_event(&EngineEvent::StepFinished {
                task_id,
                result: &result,
            });
            results.push(result);

            self.update_active(task_id, |t| {
                t.steps_completed = context.completed.len();
                t.tokens_used = context.tokens_used;
                if let Some(error) = &error {
                    t.errors.push(error.clone());
                }
            });

            if let Some(error) = error {
                errors.push(error);
                if options.stop_on_error {
                    break;
                }
            }
            if let Some(limit) = options.limit_reached(&context) {
                self.events
                    .on_event(&EngineEvent::LimitReached { task_id, limit });
                halted_by = Some(limit);
                break;
            }
        }

        info!(
            task_id,
            completed = context.completed.len(),
            total = steps.len(),
            tokens = context.tokens_used,
            "step loop finished"
        );

        Ok(ExecutionResult {
            task_id: task_id.to_string(),
            request: request.to_string(),
            success: errors.is_empty(),
            steps_completed: context.completed.len(),
            total_steps: steps.len(),
            compiled: CompiledResults::compile(&results),
            steps: results,
            errors,
            tokens_used: context.tokens_used,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            cost_estimate: self.cost.estimate(context.tokens_used),
            halted_by,
            finished_at: Utc::now(),
        })
    }

    /// Load the step's capabilities and dispatch it to the first one that
    /// loaded. Failures are returned in the result, never as an error.
    pub(super) async fn execute_step(
        &self,
        task_id: &str,
        step: &TaskStep,
        context: &TaskContext,
    ) -> StepResult {
        let started = Instant::now();

        // Dependencies among the step's own capabilities load first. The
        // primary capability is still the best-ranked one that loaded.
        let load_order = self
            .catalog
            .topological_order(&step.required_capabilities)
            .unwrap_or_else(|e| {
                warn!(task_id, step = %step.id, error = %e, "loading in search order");
                step.required_capabilities.clone()
            });
        let mut instances: HashMap<String, Arc<dyn Capability>> = HashMap::new();
        for id in &load_order {
            match self.catalog.load(id).await {
                Ok(instance) => {
                    instances.insert(id.clone(), instance);
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!(task_id, step = %step.id, capability = %id, "skipping capability: {error}");
                    self.events.on_event(&EngineEvent::CapabilityLoadFailed {
                        task_id,
                        step_id: &step.id,
                        capability: id,
                        error: &error,
                    });
                }
            }
        }
        let loaded: Vec<(&String, &Arc<dyn Capability>)> = step
            .required_capabilities
            .iter()
            .filter_map(|id| instances.get(id).map(|instance| (id, instance)))
            .collect();
        let capabilities_used: Vec<String> = loaded.iter().map(|(id, _)| (*id).clone()).collect();
        let Some(&(primary_id, primary)) = loaded.first() else {
            let mut result = StepResult::failed(&step.id, "no capability available");
            result.elapsed_seconds = started.elapsed().as_secs_f64();
            return result;
        };

        let mut params = self.step_params(task_id, step, context);
        let action = step.task_type.action();
        let outcome = if primary.supports(action) {
            primary.execute(action, params).await
        } else {
            debug!(capability = %primary_id, %action, "no native operation; using execute");
            params["action"] = json!(action.as_str());
            primary.execute(Action::Execute, params).await
        };

        let mut result = match outcome {
            Ok(output) => {
                let tokens_used = estimate_tokens(step, &output);
                let window = ContextWindow::new(
                    window_content(&output),
                    tokens_used,
                    step.priority,
                    &step.id,
                )
                .with_owner(task_id);
                let admitted = self.budget.add_window(window);
                let error = admitted.err().map(|e| e.to_string());
                StepResult {
                    step_id: step.id.clone(),
                    success: error.is_none(),
                    output: Some(output),
                    error,
                    capabilities_used,
                    elapsed_seconds: 0.0,
                    tokens_used,
                }
            }
            Err(e) => {
                let mut result =
                    StepResult::failed(&step.id, e.into_failure(primary_id).to_string());
                result.capabilities_used = capabilities_used;
                result
            }
        };
        result.elapsed_seconds = started.elapsed().as_secs_f64();
        result
    }

    /// Invocation parameters: the request, the step description, the
    /// outputs of the step's dependencies, and the budgeted context text
    /// drawn from this task's windows and the shared ones.
    fn step_params(&self, task_id: &str, step: &TaskStep, context: &TaskContext) -> Value {
        let dependency_outputs: Map<String, Value> = step
            .dependencies
            .iter()
            .filter_map(|dep| {
                context
                    .outputs
                    .get(dep)
                    .map(|output| (dep.clone(), output.clone()))
            })
            .collect();

        json!({
            "request": context.request,
            "step_description": step.description,
            "context": dependency_outputs,
            "context_text": self
                .budget
                .get_context_for_task(task_id, &step.id, &step.dependencies),
            "context_requirements": step.context_requirements,
        })
    }

    /// Block at a step boundary while `task_id` is paused.
    async fn wait_if_paused(&self, task_id: &str) {
        let mut announced = false;
        loop {
            let resume = {
                let active = self.lock_active();
                match active.get(task_id) {
                    Some(task) if task.paused => Arc::clone(&task.resume),
                    _ => break,
                }
            };
            if !announced {
                self.events.on_event(&EngineEvent::Paused { task_id });
                announced = true;
            }
            resume.notified().await;
        }
        if announced {
            self.events.on_event(&EngineEvent::Resumed { task_id });
        }
    }
}

/// `0.3 * (description chars + serialized output chars) + 500 per
/// required capability`.
fn estimate_tokens(step: &TaskStep, output: &Value) -> usize {
    let serialized = serde_json::to_string(output).unwrap_or_default();
    let chars = step.description.chars().count() + serialized.chars().count();
    (TOKENS_PER_CHAR * chars as f64) as usize
        + TOKENS_PER_CAPABILITY * step.required_capabilities.len()
}

/// Text admitted to the context budget for a step's output: its `content`
/// string when there is one, else the serialized output.
fn window_content(output: &Value) -> String {
    match output.get("content").and_then(Value::as_str) {
        Some(content) => content.to_string(),
        None => match output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}
