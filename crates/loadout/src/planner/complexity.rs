//! Complexity scoring and parallelism analysis for a planned step list.

use super::step::TaskStep;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Summary of how heavy a plan is. Informational only.
#[derive(Debug, Clone, Serialize)]
pub struct ComplexityEstimate {
    pub total_steps: usize,
    pub estimated_seconds: u64,
    pub estimated_minutes: f64,
    pub unique_capabilities: usize,
    /// Largest summed capability context cost of any single step.
    pub max_context_needed: usize,
    /// 0 to 10.
    pub complexity_score: f64,
    pub parallel: ParallelPotential,
}

/// Steps that could run side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelPotential {
    pub can_parallelize: bool,
    /// Groups of two or more mutually independent step ids.
    pub groups: Vec<Vec<String>>,
    pub max_parallel_steps: usize,
    pub time_saved_percent: f64,
}

/// `min(steps/3, 3) + min(max_dependencies, 3) + min(unique_capabilities/5, 4)`,
/// capped at 10.
pub fn complexity_score(steps: &[TaskStep]) -> f64 {
    let step_score = (steps.len() as f64 / 3.0).min(3.0);
    let max_deps = steps.iter().map(|s| s.dependencies.len()).max().unwrap_or(0);
    let dep_score = (max_deps as f64).min(3.0);
    let capability_score = (unique_capabilities(steps) as f64 / 5.0).min(4.0);
    (step_score + dep_score + capability_score).clamp(0.0, 10.0)
}

pub fn unique_capabilities(steps: &[TaskStep]) -> usize {
    steps
        .iter()
        .flat_map(|s| s.required_capabilities.iter())
        .collect::<HashSet<_>>()
        .len()
}

/// Transitive dependency set of every step, within `steps`.
fn ancestors(steps: &[TaskStep]) -> HashMap<&str, HashSet<&str>> {
    let direct: HashMap<&str, &[String]> = steps
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.as_slice()))
        .collect();

    steps
        .iter()
        .map(|step| {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut stack: Vec<&str> = step.dependencies.iter().map(String::as_str).collect();
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(deps) = direct.get(id) {
                    stack.extend(deps.iter().map(String::as_str));
                }
            }
            (step.id.as_str(), seen)
        })
        .collect()
}

/// Greedily group steps that don't depend on each other, directly or
/// transitively. Each step joins at most one group, and only if it is
/// independent of every member already in it.
pub fn parallel_potential(steps: &[TaskStep]) -> ParallelPotential {
    let ancestors = ancestors(steps);
    let related = |a: &str, b: &str| {
        ancestors.get(a).is_some_and(|s| s.contains(b))
            || ancestors.get(b).is_some_and(|s| s.contains(a))
    };

    let mut grouped: HashSet<&str> = HashSet::new();
    let mut groups: Vec<Vec<&TaskStep>> = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        if grouped.contains(step.id.as_str()) {
            continue;
        }
        let mut group = vec![step];
        for other in &steps[i + 1..] {
            if grouped.contains(other.id.as_str()) {
                continue;
            }
            if group.iter().all(|member| !related(&member.id, &other.id)) {
                group.push(other);
            }
        }
        if group.len() > 1 {
            grouped.extend(group.iter().map(|s| s.id.as_str()));
            groups.push(group);
        }
    }

    let sequential: u64 = steps.iter().map(|s| s.estimated_seconds).sum();
    let grouped_time: u64 = groups
        .iter()
        .map(|g| g.iter().map(|s| s.estimated_seconds).max().unwrap_or(0))
        .sum();
    let ungrouped_time: u64 = steps
        .iter()
        .filter(|s| !grouped.contains(s.id.as_str()))
        .map(|s| s.estimated_seconds)
        .sum();
    let time_saved_percent = if groups.is_empty() || sequential == 0 {
        0.0
    } else {
        let parallel = grouped_time + ungrouped_time;
        sequential.saturating_sub(parallel) as f64 / sequential as f64 * 100.0
    };

    ParallelPotential {
        can_parallelize: !groups.is_empty(),
        max_parallel_steps: groups.iter().map(Vec::len).max().unwrap_or(1),
        groups: groups
            .into_iter()
            .map(|g| g.into_iter().map(|s| s.id.clone()).collect())
            .collect(),
        time_saved_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::step::{ContextRequirements, TaskType};

    fn step(id: &str, deps: &[&str], secs: u64, caps: &[&str]) -> TaskStep {
        TaskStep {
            id: id.into(),
            name: id.into(),
            description: id.into(),
            task_type: TaskType::Complex,
            required_capabilities: caps.iter().map(|c| c.to_string()).collect(),
            estimated_seconds: secs,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            context_requirements: ContextRequirements::default(),
            priority: 5,
        }
    }

    #[test]
    fn linear_chain_has_no_parallelism() {
        let steps = vec![
            step("s1", &[], 100, &[]),
            step("s2", &["s1"], 100, &[]),
            step("s3", &["s2"], 100, &[]),
        ];
        let p = parallel_potential(&steps);
        assert!(!p.can_parallelize);
        assert_eq!(p.max_parallel_steps, 1);
        assert_eq!(p.time_saved_percent, 0.0);
    }

    #[test]
    fn fan_out_groups_independent_steps() {
        let steps = vec![
            step("root", &[], 100, &[]),
            step("a", &["root"], 300, &[]),
            step("b", &["root"], 100, &[]),
            step("join", &["a", "b"], 100, &[]),
        ];
        let p = parallel_potential(&steps);
        assert_eq!(p.groups, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(p.max_parallel_steps, 2);
        // 600 sequential vs 100 + 300 + 100.
        assert!((p.time_saved_percent - 100.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn score_components() {
        let steps: Vec<TaskStep> = (0..7)
            .map(|i| step(&format!("s{i}"), &[], 10, &["x", "y"]))
            .collect();
        // 7/3 + 0 + 2/5
        assert!((complexity_score(&steps) - (7.0 / 3.0 + 0.4)).abs() < 1e-9);
    }

    #[test]
    fn score_is_capped() {
        let caps: Vec<String> = (0..40).map(|i| format!("c{i}")).collect();
        let cap_refs: Vec<&str> = caps.iter().map(String::as_str).collect();
        let steps: Vec<TaskStep> = (0..20)
            .map(|i| step(&format!("s{i}"), &["a", "b", "c", "d"], 10, &cap_refs))
            .collect();
        assert_eq!(complexity_score(&steps), 10.0);
        assert_eq!(complexity_score(&[]), 0.0);
    }
}
