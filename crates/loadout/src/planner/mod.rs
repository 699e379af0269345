//! Task decomposition and step scheduling.
//!
//! The [`Planner`] turns a free-text request into an ordered list of
//! [`TaskStep`]s, attaches the catalog capabilities each step needs, and
//! picks the next runnable step while a task executes.
//!
//! # Submodules
//!
//! - [`step`]: [`TaskStep`], [`TaskType`], [`TaskContext`].
//! - [`templates`]: request classification and the canonical step
//!   templates.
//! - [`complexity`]: complexity scoring and parallel grouping.

pub mod complexity;
pub mod step;
pub mod templates;

pub use complexity::{ComplexityEstimate, ParallelPotential};
pub use step::{ContextRequirements, TaskContext, TaskStep, TaskType};

use crate::capability::{Catalog, dag};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Capabilities attached to a template step.
const TEMPLATE_STEP_CAPABILITIES: usize = 3;
/// Capabilities attached to a generic-flow step.
const GENERIC_STEP_CAPABILITIES: usize = 2;

/// Decomposes requests and schedules their steps against a catalog.
#[derive(Debug, Clone)]
pub struct Planner {
    catalog: Arc<Catalog>,
}

impl Planner {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Split `request` into a linear chain of steps.
    ///
    /// Uses the first matching template, or the generic
    /// understand/plan/execute/verify flow. Fails only if the final
    /// ordering pass finds a dependency cycle.
    pub fn decompose(&self, request: &str) -> Result<Vec<TaskStep>> {
        let task_type = templates::classify(request);

        let steps: Vec<TaskStep> = match templates::match_template(request) {
            Some(template) => {
                debug!(template = template.name, "matched step template");
                template
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(i, t)| {
                        let step_type = t.task_type.unwrap_or(task_type);
                        let capabilities = self.find_capabilities(
                            &format!("{} {request}", t.name),
                            step_type,
                            TEMPLATE_STEP_CAPABILITIES,
                        );
                        let mut step = chained_step(i, t.name, request, step_type, capabilities);
                        step.estimated_seconds = templates::estimate_seconds(t.name);
                        step.context_requirements = ContextRequirements {
                            input_from_previous: i > 0,
                            user_input_needed: templates::USER_INPUT_STEPS.contains(&t.name),
                        };
                        step
                    })
                    .collect()
            }
            None => templates::GENERIC_FLOW
                .iter()
                .enumerate()
                .map(|(i, (name, description))| {
                    let capabilities = self.find_capabilities(
                        &format!("{description} {request}"),
                        task_type,
                        GENERIC_STEP_CAPABILITIES,
                    );
                    let mut step = chained_step(i, name, request, task_type, capabilities);
                    step.description = format!("{description}: {request}");
                    step
                })
                .collect(),
        };

        let steps = order_steps(steps)?;
        info!(
            task_type = %task_type,
            steps = steps.len(),
            "decomposed request"
        );
        Ok(steps)
    }

    fn find_capabilities(&self, query: &str, task_type: TaskType, max: usize) -> Vec<String> {
        let hits = self.catalog.search(query, max);
        if !hits.is_empty() {
            return hits;
        }
        let hits = self.catalog.search(task_type.search_hint(), max);
        if hits.is_empty() {
            warn!(query, "no capability matches step");
        }
        hits
    }

    /// First step in `remaining` whose dependencies have all completed.
    ///
    /// If the chosen step's capabilities need more context than the catalog
    /// has free, unloads non-essential capabilities (P2 before P1, never
    /// P0, never the step's own) until the deficit is covered. The step is
    /// returned either way.
    pub async fn plan_next_step(
        &self,
        context: &TaskContext,
        remaining: &[TaskStep],
    ) -> Option<TaskStep> {
        let step = remaining.iter().find(|s| context.is_ready(s))?.clone();

        let needed = self.catalog.context_cost_of(&step.required_capabilities);
        let available = self.catalog.available_context().await;
        if needed > available {
            let freed = self
                .free_context(needed - available, &step.required_capabilities)
                .await;
            info!(
                step = %step.id,
                needed,
                available,
                freed,
                "freed capability context for step"
            );
        }
        Some(step)
    }

    async fn free_context(&self, deficit: usize, keep: &[String]) -> usize {
        let mut candidates: Vec<(String, crate::capability::PriorityTier, usize)> = Vec::new();
        for id in self.catalog.loaded_ids().await {
            if keep.contains(&id) {
                continue;
            }
            let Some(meta) = self.catalog.metadata(&id) else {
                continue;
            };
            if !meta.tier.is_essential() {
                candidates.push((id, meta.tier, meta.context_cost));
            }
        }
        // P2 first; most recently loaded first within a tier.
        candidates.reverse();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut freed = 0;
        for (id, _, cost) in candidates {
            if freed >= deficit {
                break;
            }
            match self.catalog.unload(&id).await {
                Ok(true) => freed += cost,
                Ok(false) => debug!(capability = %id, "skipped: still required"),
                Err(e) => warn!(capability = %id, error = %e, "unload failed while freeing context"),
            }
        }
        freed
    }

    /// Aggregate figures for a plan.
    pub fn estimate_complexity(&self, steps: &[TaskStep]) -> ComplexityEstimate {
        let estimated_seconds: u64 = steps.iter().map(|s| s.estimated_seconds).sum();
        let max_context_needed = steps
            .iter()
            .map(|s| self.catalog.context_cost_of(&s.required_capabilities))
            .max()
            .unwrap_or(0);

        ComplexityEstimate {
            total_steps: steps.len(),
            estimated_seconds,
            estimated_minutes: estimated_seconds as f64 / 60.0,
            unique_capabilities: complexity::unique_capabilities(steps),
            max_context_needed,
            complexity_score: complexity::complexity_score(steps),
            parallel: complexity::parallel_potential(steps),
        }
    }
}

/// Step `i` of a linear chain: depends on step `i - 1`, priority `10 - i`.
fn chained_step(
    i: usize,
    name: &str,
    request: &str,
    task_type: TaskType,
    required_capabilities: Vec<String>,
) -> TaskStep {
    TaskStep {
        id: format!("step_{}", i + 1),
        name: name.to_string(),
        description: format!("{name}: {request}"),
        task_type,
        required_capabilities,
        estimated_seconds: templates::estimate_seconds(name),
        dependencies: if i > 0 {
            vec![format!("step_{i}")]
        } else {
            Vec::new()
        },
        context_requirements: ContextRequirements::default(),
        priority: 10u8.saturating_sub(i as u8).max(1),
    }
}

/// Stable topological re-order of `steps` by their dependency edges.
fn order_steps(steps: Vec<TaskStep>) -> Result<Vec<TaskStep>> {
    let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
    let order = {
        let deps: HashMap<&str, &[String]> = steps
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.as_slice()))
            .collect();
        dag::topological_order(&ids, |id| deps.get(id).copied())?
    };

    let mut by_id: HashMap<String, TaskStep> =
        steps.into_iter().map(|s| (s.id.clone(), s)).collect();
    Ok(order.iter().filter_map(|id| by_id.remove(id)).collect())
}
