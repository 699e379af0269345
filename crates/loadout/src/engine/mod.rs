//! Task execution: decomposition, the step loop, pause/resume, cleanup.
//!
//! The [`Engine`] ties the [`Catalog`], the [`ContextBudgetManager`] and the
//! [`Planner`] together. Each call to [`Engine::execute_task`] runs one task
//! as a sequential worker; any number of tasks may run concurrently against
//! the same engine.
//!
//! ```text
//! Planning ─▶ Executing(step i) ─┬─▶ Executing(step i+1)
//!                                ├─▶ Paused ─▶ Executing(step i+1)
//!                                ├─▶ Failed
//!                                └─▶ Completed
//! ```
//!
//! # Submodules
//!
//! - [`events`]: [`EngineEvent`] and the [`EventHandler`] trait.
//! - [`options`]: per-task [`ExecutionOptions`].
//! - [`result`]: [`StepResult`], [`ExecutionResult`], [`StatusReport`].
//! - [`cost`]: the [`CostModel`].
//! - `execution`: the step loop and step dispatch.

pub mod cost;
pub mod events;
mod execution;
pub mod options;
pub mod result;

pub use cost::CostModel;
pub use events::{
    CompositeEventHandler, EngineEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
pub use options::ExecutionOptions;
pub use result::{
    Artifact, CompiledResults, CompiledSummary, ExecutionResult, Limit, StatusReport, StepResult,
    TaskStatus,
};

use crate::capability::Catalog;
use crate::config::EngineConfig;
use crate::context::ContextBudgetManager;
use crate::error::{Error, Result};
use crate::planner::Planner;
use chrono::Utc;
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Default number of finished tasks kept for [`Engine::task_status`].
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Bookkeeping for a task that is still running.
struct ActiveTask {
    current_step: Option<String>,
    steps_completed: usize,
    total_steps: usize,
    tokens_used: usize,
    errors: Vec<String>,
    /// Union of the capabilities its planned steps need.
    capabilities: HashSet<String>,
    started_at: Instant,
    paused: bool,
    resume: Arc<Notify>,
}

impl ActiveTask {
    fn new() -> Self {
        Self {
            current_step: None,
            steps_completed: 0,
            total_steps: 0,
            tokens_used: 0,
            errors: Vec::new(),
            capabilities: HashSet::new(),
            started_at: Instant::now(),
            paused: false,
            resume: Arc::new(Notify::new()),
        }
    }
}

/// Runs decomposed tasks against a shared catalog and context budget.
pub struct Engine {
    catalog: Arc<Catalog>,
    budget: Arc<ContextBudgetManager>,
    planner: Planner,
    cost: CostModel,
    history_limit: usize,
    events: Arc<dyn EventHandler>,
    active: Mutex<HashMap<String, ActiveTask>>,
    history: Mutex<VecDeque<ExecutionResult>>,
    counter: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("catalog", &self.catalog)
            .field("cost", &self.cost)
            .field("history_limit", &self.history_limit)
            .field("active", &self.lock_active().len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, budget: Arc<ContextBudgetManager>) -> Self {
        Self {
            planner: Planner::new(Arc::clone(&catalog)),
            catalog,
            budget,
            cost: CostModel::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            events: Arc::new(NoopHandler),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Build an engine over `catalog` with a fresh budget manager and the
    /// cost and history settings from `config`.
    pub fn from_config(config: &EngineConfig, catalog: Arc<Catalog>) -> Self {
        let budget = Arc::new(ContextBudgetManager::new(config.budget.clone()));
        Self::new(catalog, budget)
            .with_cost_model(config.cost)
            .with_history_limit(config.history_limit)
    }

    pub fn with_cost_model(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.events = Arc::new(handler);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn budget(&self) -> &Arc<ContextBudgetManager> {
        &self.budget
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost
    }

    // ── Task execution ─────────────────────────────────────────────

    /// Parse `options` from a JSON map and run the task.
    pub async fn execute_task_json(
        &self,
        request: &str,
        options: serde_json::Value,
    ) -> Result<ExecutionResult> {
        let options = ExecutionOptions::from_value(options)?;
        Ok(self.execute_task(request, options).await)
    }

    /// Decompose `request` and run its steps until they are exhausted, a
    /// step fails (unless `stop_on_error` is off), or a limit is reached.
    ///
    /// Always returns a result. Engine faults, including panics raised by
    /// a capability, force every non-P0 capability out and yield a failed
    /// result carrying the fault message and the progress made before it.
    /// Either way the context windows the task admitted are released.
    pub async fn execute_task(&self, request: &str, options: ExecutionOptions) -> ExecutionResult {
        let task_id = self.next_task_id();
        self.lock_active().insert(task_id.clone(), ActiveTask::new());
        self.events.on_event(&EngineEvent::TaskStarted {
            task_id: &task_id,
            request,
        });
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.run_task(&task_id, request, &options))
            .catch_unwind()
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => Err(Error::EngineFault(panic_message(panic.as_ref()))),
        };

        let progress = self.lock_active().remove(&task_id);
        let result = match outcome {
            Ok(result) => {
                self.cleanup(&task_id).await;
                result
            }
            Err(err) => {
                let message = err.to_string();
                self.emergency_cleanup(&task_id, &message).await;
                // Report the progress made before the fault.
                let (steps_completed, total_steps, tokens_used, mut errors) = match progress {
                    Some(task) => (
                        task.steps_completed,
                        task.total_steps,
                        task.tokens_used,
                        task.errors,
                    ),
                    None => (0, 0, 0, Vec::new()),
                };
                errors.push(message);
                ExecutionResult {
                    task_id: task_id.clone(),
                    request: request.to_string(),
                    success: false,
                    steps: Vec::new(),
                    steps_completed,
                    total_steps,
                    errors,
                    tokens_used,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                    cost_estimate: self.cost.estimate(tokens_used),
                    halted_by: None,
                    compiled: CompiledResults::default(),
                    finished_at: Utc::now(),
                }
            }
        };

        self.events.on_event(&EngineEvent::TaskFinished {
            task_id: &task_id,
            success: result.success,
            steps_completed: result.steps_completed,
            tokens_used: result.tokens_used,
        });
        self.record(result.clone());
        result
    }

    // ── Status & control ───────────────────────────────────────────

    /// Live progress of an active task, or the final figures of a finished
    /// one still in history.
    pub fn task_status(&self, task_id: &str) -> Result<StatusReport> {
        if let Some(task) = self.lock_active().get(task_id) {
            return Ok(StatusReport {
                task_id: task_id.to_string(),
                status: if task.paused {
                    TaskStatus::Paused
                } else {
                    TaskStatus::Running
                },
                current_step: task.current_step.clone(),
                steps_completed: task.steps_completed,
                total_steps: task.total_steps,
                tokens_used: task.tokens_used,
                cost_estimate: self.cost.estimate(task.tokens_used),
                elapsed_seconds: task.started_at.elapsed().as_secs_f64(),
                errors: task.errors.clone(),
            });
        }

        self.lock_history()
            .iter()
            .rev()
            .find(|r| r.task_id == task_id)
            .map(StatusReport::from)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Ask an active task to stop at its next step boundary. Returns
    /// `false` if the task is not active.
    pub fn pause_task(&self, task_id: &str) -> bool {
        match self.lock_active().get_mut(task_id) {
            Some(task) => {
                task.paused = true;
                info!(task_id, "pause requested");
                true
            }
            None => false,
        }
    }

    /// Let a paused task continue from its last completed step. Returns
    /// `false` if the task is not active or not paused.
    pub fn resume_task(&self, task_id: &str) -> bool {
        match self.lock_active().get_mut(task_id) {
            Some(task) if task.paused => {
                task.paused = false;
                task.resume.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Ids of the tasks currently running or paused.
    pub fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Finished tasks, oldest first.
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.lock_history().iter().cloned().collect()
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Drop the task's context windows, then unload every loaded non-P0
    /// capability that no active task needs. Dependents go first so their
    /// dependencies can follow.
    async fn cleanup(&self, task_id: &str) {
        self.budget.release_task(task_id);

        let in_use: HashSet<String> = self
            .lock_active()
            .values()
            .flat_map(|t| t.capabilities.iter().cloned())
            .collect();

        let mut loaded = self.catalog.loaded_ids().await;
        loaded.reverse();
        for id in loaded {
            if in_use.contains(&id) {
                continue;
            }
            let essential = self
                .catalog
                .metadata(&id)
                .is_some_and(|m| m.tier.is_essential());
            if essential {
                continue;
            }
            match self.catalog.unload(&id).await {
                Ok(true) => debug!(capability = %id, "released after task"),
                Ok(false) => debug!(capability = %id, "kept: another capability depends on it"),
                Err(e) => warn!(capability = %id, error = %e, "cleanup unload failed"),
            }
        }
    }

    /// Drop the task's context windows and force every loaded non-P0
    /// capability out. Errors are logged only.
    async fn emergency_cleanup(&self, task_id: &str, reason: &str) {
        self.events
            .on_event(&EngineEvent::EmergencyCleanup { task_id, reason });
        let released = self.budget.release_task(task_id);
        debug!(task_id, released, "released context after fault");

        let mut loaded = self.catalog.loaded_ids().await;
        loaded.reverse();
        for id in loaded {
            let essential = self
                .catalog
                .metadata(&id)
                .is_some_and(|m| m.tier.is_essential());
            if essential {
                continue;
            }
            if let Err(e) = self.catalog.force_unload(&id).await {
                warn!(capability = %id, error = %e, "emergency unload reported an error");
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn next_task_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let n = self.counter.fetch_add(1, Ordering::Relaxed) & 0xffff;
        format!("task-{nanos:x}-{n:04x}")
    }

    fn record(&self, result: ExecutionResult) {
        let mut history = self.lock_history();
        history.push_back(result);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// Apply `f` to the bookkeeping of `task_id`, if it is still active.
    fn update_active(&self, task_id: &str, f: impl FnOnce(&mut ActiveTask)) {
        if let Some(task) = self.lock_active().get_mut(task_id) {
            f(task);
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, ActiveTask>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<ExecutionResult>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}
