//! End-to-end scenarios through the public API: template decomposition,
//! budget eviction, dependency-aware loading, and step limits.

use std::sync::Arc;

use loadout::capability::{
    CapabilityMetadata, Catalog, CatalogConfig, PriorityTier, echo_factory, reference_catalog,
};
use loadout::context::{BudgetConfig, ContextBudgetManager, WindowState};
use loadout::engine::{Engine, ExecutionOptions, Limit};
use loadout::planner::Planner;

#[test]
fn full_application_request_becomes_seven_chained_steps() {
    let planner = Planner::new(Arc::new(reference_catalog(CatalogConfig::default())));
    let steps = planner.decompose("创建完整应用").unwrap();

    let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "requirements analysis",
            "architecture design",
            "database design",
            "api development",
            "frontend development",
            "test writing",
            "deployment configuration",
        ]
    );
    for pair in steps.windows(2) {
        assert_eq!(pair[1].dependencies, vec![pair[0].id.clone()]);
    }

    let estimate = planner.estimate_complexity(&steps);
    assert!((0.0..=10.0).contains(&estimate.complexity_score));
    assert!(!estimate.parallel.can_parallelize);
}

#[test]
fn third_window_evicts_low_priority_windows_before_admission() {
    let budget = ContextBudgetManager::new(BudgetConfig::default().with_max_tokens(50_000));

    budget.add("requirements", 40_000, 1, "requirements").unwrap();
    budget.add("draft architecture", 30_000, 2, "architecture").unwrap();
    assert!(budget.current_tokens() <= 50_000);

    budget.add("current step", 20_000, 9, "step_3").unwrap();
    assert!(budget.current_tokens() <= 50_000);
    assert_eq!(budget.current_tokens(), 12_000 + 9_000 + 20_000);

    let export = budget.export();
    let state_of = |source: &str| {
        export
            .windows
            .iter()
            .find(|w| w.source == source)
            .map(|w| w.state)
    };
    assert_eq!(state_of("requirements"), Some(WindowState::Summarized));
    assert_eq!(state_of("architecture"), Some(WindowState::Summarized));
    assert_eq!(state_of("step_3"), Some(WindowState::Admitted));
}

#[tokio::test]
async fn dependency_loads_first_and_cannot_be_unloaded_under_a_dependent() {
    let catalog = Catalog::new(CatalogConfig::default())
        .with(
            CapabilityMetadata::new("A", "base module", PriorityTier::P1),
            echo_factory(),
        )
        .with(
            CapabilityMetadata::new("B", "dependent module", PriorityTier::P1)
                .with_dependencies(["A"]),
            echo_factory(),
        );

    catalog.load("B").await.unwrap();
    assert_eq!(catalog.loaded_ids().await, vec!["A", "B"]);

    assert!(!catalog.unload("A").await.unwrap());
    assert!(catalog.is_loaded("A").await);
    assert_eq!(catalog.reverse_dependencies("A").await, vec!["B"]);

    assert!(catalog.unload("B").await.unwrap());
    assert!(catalog.unload("A").await.unwrap());
    assert!(catalog.loaded_ids().await.is_empty());
}

#[tokio::test]
async fn max_steps_stops_after_one_step_without_failing() {
    let catalog = Arc::new(reference_catalog(CatalogConfig::default()));
    let engine = Engine::new(
        catalog,
        Arc::new(ContextBudgetManager::new(BudgetConfig::default())),
    );

    let result = engine
        .execute_task("创建完整应用", ExecutionOptions::default().with_max_steps(1))
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.steps_completed, 1);
    assert_eq!(result.total_steps, 7);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.halted_by, Some(Limit::MaxSteps));
    assert!(result.errors.is_empty());
}
