//! Admission-controlled pool of context windows.
//!
//! [`ContextBudgetManager`] keeps every admitted [`ContextWindow`] in one
//! list ordered by priority (descending) then age, and guarantees that the
//! summed token count never exceeds [`BudgetConfig::max_tokens`] once
//! [`add`](ContextBudgetManager::add) returns `Ok`. When a window doesn't
//! fit, the [eviction cascade](super::eviction) makes room or the window is
//! refused with [`Error::CapacityExceeded`].
//!
//! All mutation happens under one `std::sync::Mutex`; no lock is held
//! across an `.await`.

use super::eviction::{EvictionConfig, run_cascade};
use super::summarizer::{Summarizer, TruncatingSummarizer};
use super::window::{ContextWindow, MAX_PRIORITY, WindowSnapshot};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Default pool size in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 100_000;

/// Budget manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_tokens: usize,
    /// Share of `max_tokens` one step may pull through
    /// [`get_context_for_step`](ContextBudgetManager::get_context_for_step).
    pub step_context_fraction: f64,
    /// Windows at or above this priority are always included in step
    /// context and survive `clear(true)`.
    pub high_priority_floor: u8,
    pub eviction: EvictionConfig,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            step_context_fraction: 0.5,
            high_priority_floor: 8,
            eviction: EvictionConfig::default(),
        }
    }
}

impl BudgetConfig {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_step_context_fraction(mut self, fraction: f64) -> Self {
        self.step_context_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }
}

/// Window count and token sum for one priority level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityBucket {
    pub count: usize,
    pub tokens: usize,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetUsage {
    pub current_tokens: usize,
    pub max_tokens: usize,
    pub usage_percent: f64,
    pub window_count: usize,
    pub by_priority: BTreeMap<u8, PriorityBucket>,
}

/// Every admitted window, for debugging or persistence by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetExport {
    pub exported_at: DateTime<Utc>,
    pub current_tokens: usize,
    pub windows: Vec<WindowSnapshot>,
}

/// Priority adjustments for one workflow.
struct WorkflowRules {
    keep: &'static [&'static str],
    boosts: &'static [(&'static str, u8)],
}

fn workflow_rules(workflow: &str) -> Option<WorkflowRules> {
    match workflow {
        "code_generation" => Some(WorkflowRules {
            keep: &["requirements", "architecture", "previous_code"],
            boosts: &[("requirements", 2), ("architecture", 1)],
        }),
        "ui_design" => Some(WorkflowRules {
            keep: &["design_spec", "components", "theme"],
            boosts: &[("design_spec", 3), ("theme", 2)],
        }),
        "testing" => Some(WorkflowRules {
            keep: &["code", "test_spec", "coverage"],
            boosts: &[("code", 2), ("test_spec", 2)],
        }),
        _ => None,
    }
}

#[derive(Default)]
struct PoolState {
    /// Sorted by [`ContextWindow::pool_order`].
    windows: Vec<ContextWindow>,
    current_tokens: usize,
    next_seq: u64,
}

impl PoolState {
    fn resort(&mut self) {
        self.windows.sort_by_key(ContextWindow::pool_order);
    }

    fn recount(&mut self) {
        self.current_tokens = self.windows.iter().map(|w| w.tokens).sum();
    }
}

/// Bounded, prioritized pool of context windows.
pub struct ContextBudgetManager {
    config: BudgetConfig,
    state: Mutex<PoolState>,
    summarizer: Arc<dyn Summarizer>,
}

impl std::fmt::Debug for ContextBudgetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBudgetManager")
            .field("config", &self.config)
            .field("current_tokens", &self.current_tokens())
            .finish()
    }
}

impl Default for ContextBudgetManager {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl ContextBudgetManager {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            summarizer: Arc::new(TruncatingSummarizer),
        }
    }

    /// Replace the summarizer used by the first eviction stage.
    pub fn with_summarizer(mut self, summarizer: impl Summarizer + 'static) -> Self {
        self.summarizer = Arc::new(summarizer);
        self
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_tokens(&self) -> usize {
        self.lock().current_tokens
    }

    pub fn window_count(&self) -> usize {
        self.lock().windows.len()
    }

    // ── Admission ──────────────────────────────────────────────────

    /// Admit a window built from the arguments. See [`add_window`](Self::add_window).
    pub fn add(
        &self,
        content: impl Into<String>,
        tokens: usize,
        priority: u8,
        source: impl Into<String>,
    ) -> Result<()> {
        self.add_window(ContextWindow::new(content, tokens, priority, source))
    }

    /// Admit `window`, running the eviction cascade if it doesn't fit.
    ///
    /// On `Err(CapacityExceeded)` nothing is admitted, though the cascade
    /// may already have evicted or summarized other windows. A window
    /// larger than the whole pool is refused without evicting anything.
    pub fn add_window(&self, mut window: ContextWindow) -> Result<()> {
        let max = self.config.max_tokens;
        let tokens = window.tokens;
        let mut state = self.lock();

        if tokens > max {
            warn!(source = %window.source, tokens, max, "context window larger than the pool");
            return Err(Error::CapacityExceeded {
                requested: tokens,
                available: max.saturating_sub(state.current_tokens),
            });
        }

        if state.current_tokens + tokens > max {
            info!(
                source = %window.source,
                tokens,
                current = state.current_tokens,
                max,
                "context pool full, running eviction"
            );
            let current = state.current_tokens;
            let report = run_cascade(
                &mut state.windows,
                current,
                tokens,
                max,
                &self.config.eviction,
                self.summarizer.as_ref(),
                Utc::now(),
            );
            state.recount();
            debug!(freed = report.freed, stages = ?report.stages, "eviction finished");

            if state.current_tokens + tokens > max {
                let available = max.saturating_sub(state.current_tokens);
                warn!(source = %window.source, tokens, available, "could not free enough context");
                return Err(Error::CapacityExceeded {
                    requested: tokens,
                    available,
                });
            }
        }

        window.seq = state.next_seq;
        state.next_seq += 1;
        let key = window.pool_order();
        let at = state.windows.partition_point(|w| w.pool_order() <= key);
        info!(
            source = %window.source,
            tokens,
            priority = window.priority,
            "admitted context window"
        );
        state.windows.insert(at, window);
        state.current_tokens += tokens;
        Ok(())
    }

    // ── Retrieval ──────────────────────────────────────────────────

    /// Context text for a step: unexpired windows whose source is in
    /// `required_sources` or whose priority is high, best and newest first,
    /// each as `[source]\ncontent\n`, joined by blank lines. Windows that
    /// would push the total past the per-step share are skipped.
    ///
    /// Considers every window in the pool. Use
    /// [`get_context_for_task`](Self::get_context_for_task) to keep other
    /// tasks' windows out.
    pub fn get_context_for_step(&self, step_id: &str, required_sources: &[String]) -> String {
        self.assemble_context(None, step_id, required_sources)
    }

    /// Like [`get_context_for_step`](Self::get_context_for_step), but only
    /// windows owned by `task` or by no task are considered.
    pub fn get_context_for_task(
        &self,
        task: &str,
        step_id: &str,
        required_sources: &[String],
    ) -> String {
        self.assemble_context(Some(task), step_id, required_sources)
    }

    fn assemble_context(
        &self,
        task: Option<&str>,
        step_id: &str,
        required_sources: &[String],
    ) -> String {
        let cap = (self.config.max_tokens as f64 * self.config.step_context_fraction) as usize;
        let now = Utc::now();
        let state = self.lock();

        let mut relevant: Vec<&ContextWindow> = state
            .windows
            .iter()
            .filter(|w| !w.is_expired(now))
            .filter(|w| task.is_none_or(|task| w.visible_to(task)))
            .filter(|w| {
                w.priority >= self.config.high_priority_floor
                    || required_sources.iter().any(|s| *s == w.source)
            })
            .collect();
        relevant.sort_by(|a, b| {
            (b.priority, b.created_at, b.seq).cmp(&(a.priority, a.created_at, a.seq))
        });

        let mut total = 0;
        let mut parts = Vec::new();
        for window in relevant {
            if total + window.tokens <= cap {
                parts.push(format!("[{}]\n{}\n", window.source, window.content));
                total += window.tokens;
            }
        }
        debug!(step_id, windows = parts.len(), tokens = total, "assembled step context");
        parts.join("\n")
    }

    // ── Priorities ─────────────────────────────────────────────────

    /// Set the priority of every window from `source`. Returns how many
    /// windows changed.
    pub fn update_priority(&self, source: &str, priority: u8) -> usize {
        let priority = priority.min(MAX_PRIORITY);
        let mut state = self.lock();
        let mut updated = 0;
        for window in state.windows.iter_mut().filter(|w| w.source == source) {
            window.priority = priority;
            updated += 1;
        }
        state.resort();
        if updated > 0 {
            info!(source, priority, updated, "updated context priority");
        }
        updated
    }

    /// Re-prioritize for a workflow: boost the sources it names, then
    /// demote by one every window matching none of its kept sources.
    /// Sources match by substring.
    pub fn optimize_for_workflow(&self, workflow: &str) -> Result<()> {
        let rules =
            workflow_rules(workflow).ok_or_else(|| Error::UnknownWorkflow(workflow.to_string()))?;
        let mut state = self.lock();

        for (source, boost) in rules.boosts {
            for window in state
                .windows
                .iter_mut()
                .filter(|w| w.source.contains(source))
            {
                window.priority = (window.priority + boost).min(MAX_PRIORITY);
            }
        }
        for window in state
            .windows
            .iter_mut()
            .filter(|w| !rules.keep.iter().any(|keep| w.source.contains(keep)))
        {
            window.priority = window.priority.saturating_sub(1);
        }

        state.resort();
        info!(workflow, "optimized context for workflow");
        Ok(())
    }

    // ── Inspection & reset ─────────────────────────────────────────

    pub fn usage_stats(&self) -> BudgetUsage {
        let state = self.lock();
        let mut by_priority: BTreeMap<u8, PriorityBucket> = BTreeMap::new();
        for window in &state.windows {
            let bucket = by_priority.entry(window.priority).or_default();
            bucket.count += 1;
            bucket.tokens += window.tokens;
        }
        let usage_percent = if self.config.max_tokens == 0 {
            0.0
        } else {
            state.current_tokens as f64 / self.config.max_tokens as f64 * 100.0
        };

        BudgetUsage {
            current_tokens: state.current_tokens,
            max_tokens: self.config.max_tokens,
            usage_percent,
            window_count: state.windows.len(),
            by_priority,
        }
    }

    pub fn export(&self) -> BudgetExport {
        let state = self.lock();
        BudgetExport {
            exported_at: Utc::now(),
            current_tokens: state.current_tokens,
            windows: state.windows.iter().map(WindowSnapshot::from).collect(),
        }
    }

    /// Drop every window owned by `task`. Returns how many went.
    pub fn release_task(&self, task: &str) -> usize {
        let mut state = self.lock();
        let before = state.windows.len();
        state.windows.retain(|w| w.owner.as_deref() != Some(task));
        let released = before - state.windows.len();
        state.recount();
        if released > 0 {
            debug!(task, released, tokens = state.current_tokens, "released task context");
        }
        released
    }

    /// Drop every window, or only those below the high-priority floor.
    pub fn clear(&self, keep_high_priority: bool) {
        let floor = self.config.high_priority_floor;
        let mut state = self.lock();
        if keep_high_priority {
            state.windows.retain(|w| w.priority >= floor);
        } else {
            state.windows.clear();
        }
        state.recount();
        info!(
            kept = state.windows.len(),
            tokens = state.current_tokens,
            "cleared context pool"
        );
    }
}
