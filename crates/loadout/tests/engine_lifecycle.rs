//! Engine lifecycle: full runs, failure policy, engine faults, pause and
//! resume, status lookups, and concurrent tasks sharing one catalog.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{GENERIC_REQUEST, worker_engine};
use loadout::Error;
use loadout::capability::{CatalogConfig, EchoCapability, reference_catalog};
use loadout::context::{BudgetConfig, ContextBudgetManager};
use loadout::engine::{Engine, EngineEvent, ExecutionOptions, FnEventHandler, TaskStatus};
use serde_json::json;

#[tokio::test]
async fn full_run_compiles_outputs_and_keeps_only_essential_capabilities() {
    let catalog = Arc::new(reference_catalog(CatalogConfig::default()));
    let engine = Engine::new(
        Arc::clone(&catalog),
        Arc::new(ContextBudgetManager::new(BudgetConfig::default())),
    );

    let result = engine
        .execute_task("创建完整应用", ExecutionOptions::default())
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.steps_completed, 7);
    assert_eq!(result.compiled.details.len(), 7);
    assert!(result.tokens_used > 0);
    assert!(result.cost_estimate > 0.0);
    assert!(result.task_id.starts_with("task-"));
    // Step outputs lived in the budget only while the task ran.
    assert_eq!(engine.budget().window_count(), 0);
    assert_eq!(engine.budget().current_tokens(), 0);

    for id in catalog.loaded_ids().await {
        let tier = catalog.metadata(&id).unwrap().tier;
        assert!(tier.is_essential(), "{id} left loaded after cleanup");
    }

    let status = engine.task_status(&result.task_id).unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.steps_completed, 7);
    assert!(engine.active_task_ids().is_empty());
}

#[tokio::test]
async fn failed_step_stops_the_task_by_default() {
    let worker = Arc::new(EchoCapability::failing_execute("model unavailable"));
    let engine = worker_engine(Arc::clone(&worker));

    let result = engine
        .execute_task(GENERIC_REQUEST, ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.total_steps, 4);
    assert_eq!(result.steps_completed, 1);
    assert_eq!(
        result.errors,
        vec!["step_1: capability worker failed: model unavailable"]
    );
    assert_eq!(worker.executions(), 1);
    // The P1 worker was released afterwards.
    assert_eq!(worker.cleanups(), 1);
    assert_eq!(
        engine.task_status(&result.task_id).unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn continue_on_error_runs_every_step() {
    let worker = Arc::new(EchoCapability::failing_execute("model unavailable"));
    let engine = worker_engine(Arc::clone(&worker));

    let result = engine
        .execute_task(
            GENERIC_REQUEST,
            ExecutionOptions::default().with_stop_on_error(false),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.steps_completed, 4);
    assert_eq!(result.errors.len(), 4);
    assert_eq!(worker.executions(), 4);
    assert_eq!(result.compiled.summary.total_artifacts, 0);
}

#[tokio::test]
async fn panicking_capability_triggers_emergency_cleanup() {
    let worker = Arc::new(EchoCapability::panicking());
    let cleanups = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&cleanups);
    let engine = worker_engine(Arc::clone(&worker)).with_event_handler(FnEventHandler::new(
        move |event| {
            if let EngineEvent::EmergencyCleanup { .. } = event {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        },
    ));

    let result = engine
        .execute_task(GENERIC_REQUEST, ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.total_steps, 4);
    assert_eq!(result.steps_completed, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("engine fault: panic:"));
    assert_eq!(cleanups.load(Ordering::Relaxed), 1);
    assert!(engine.catalog().loaded_ids().await.is_empty());
    assert_eq!(worker.cleanups(), 1);
    assert_eq!(
        engine.task_status(&result.task_id).unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn fault_result_keeps_progress_made_before_it() {
    let worker = Arc::new(EchoCapability::panicking_after(1));
    let engine = worker_engine(Arc::clone(&worker));

    let result = engine
        .execute_task(GENERIC_REQUEST, ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(worker.executions(), 2);
    assert_eq!(result.steps_completed, 1);
    assert_eq!(result.total_steps, 4);
    assert!(result.tokens_used > 0);
    assert_eq!(
        result.cost_estimate,
        engine.cost_model().estimate(result.tokens_used)
    );
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("engine fault: panic:"));
    // The window step 1 admitted went with the emergency cleanup.
    assert_eq!(engine.budget().window_count(), 0);

    let status = engine.task_status(&result.task_id).unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert_eq!(status.steps_completed, 1);
    assert_eq!(status.tokens_used, result.tokens_used);
}

#[tokio::test]
async fn repeated_tasks_do_not_exhaust_the_budget() {
    let engine = Engine::new(
        Arc::new(reference_catalog(CatalogConfig::default())),
        Arc::new(ContextBudgetManager::new(BudgetConfig::default())),
    );

    for run in 0..12 {
        let result = engine
            .execute_task("创建完整应用", ExecutionOptions::default())
            .await;
        assert!(result.success, "run {run}: {:?}", result.errors);
        assert_eq!(result.steps_completed, 7);
        assert_eq!(engine.budget().window_count(), 0);
    }
}

#[tokio::test]
async fn concurrent_tasks_do_not_see_each_others_context() {
    let worker = Arc::new(
        EchoCapability::new("worker", Vec::<String>::new()).with_delay(Duration::from_millis(20)),
    );
    let engine = Arc::new(worker_engine(Arc::clone(&worker)));

    let runner = Arc::clone(&engine);
    let first = tokio::spawn(async move {
        runner
            .execute_task("write a haiku about lighthouses", ExecutionOptions::default())
            .await
    });

    // Hold the first task once it has admitted two windows.
    let first_id = loop {
        let progressed = engine.active_task_ids().into_iter().find(|id| {
            engine
                .task_status(id)
                .is_ok_and(|status| status.steps_completed >= 2)
        });
        if let Some(id) = progressed {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    };
    assert!(engine.pause_task(&first_id));
    let owned = engine
        .budget()
        .export()
        .windows
        .iter()
        .filter(|w| w.owner.as_deref() == Some(first_id.as_str()))
        .count();
    assert!(owned >= 2);

    let second = engine
        .execute_task(
            "write a haiku about the sea",
            ExecutionOptions::default().with_max_steps(2),
        )
        .await;
    assert!(second.success, "{:?}", second.errors);
    assert_eq!(second.steps.len(), 2);
    for step in &second.steps {
        let text = step.output.as_ref().unwrap()["params"]["context_text"]
            .as_str()
            .unwrap();
        assert!(!text.contains("lighthouses"), "{}: {text}", step.step_id);
    }
    let second_step_context = second.steps[1].output.as_ref().unwrap()["params"]
        ["context_text"]
        .as_str()
        .unwrap();
    assert!(second_step_context.contains("the sea"));

    assert!(engine.resume_task(&first_id));
    let first = first.await.unwrap();
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(engine.budget().window_count(), 0);
}

#[tokio::test]
async fn paused_task_resumes_without_repeating_steps() {
    let worker = Arc::new(
        EchoCapability::new("worker", Vec::<String>::new()).with_delay(Duration::from_millis(30)),
    );
    let paused = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&paused);
    let engine = Arc::new(worker_engine(Arc::clone(&worker)).with_event_handler(
        FnEventHandler::new(move |event| {
            if let EngineEvent::Paused { .. } = event {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        }),
    ));

    let runner = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        runner
            .execute_task(GENERIC_REQUEST, ExecutionOptions::default())
            .await
    });

    let task_id = loop {
        if let Some(id) = engine.active_task_ids().into_iter().next() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    };
    assert!(engine.pause_task(&task_id));
    while paused.load(Ordering::Relaxed) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let before = engine.task_status(&task_id).unwrap();
    assert_eq!(before.status, TaskStatus::Paused);
    assert_eq!(before.total_steps, 4);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = engine.task_status(&task_id).unwrap();
    assert_eq!(after.steps_completed, before.steps_completed);
    assert_eq!(worker.executions(), before.steps_completed);

    assert!(engine.resume_task(&task_id));
    assert!(!engine.resume_task(&task_id));

    let result = handle.await.unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.task_id, task_id);
    assert_eq!(result.steps_completed, 4);
    assert_eq!(worker.executions(), 4);
    assert!(!engine.pause_task(&task_id));
}

#[tokio::test]
async fn cleanup_keeps_capabilities_other_tasks_still_need() {
    let worker = Arc::new(
        EchoCapability::new("worker", Vec::<String>::new()).with_delay(Duration::from_millis(40)),
    );
    let engine = worker_engine(Arc::clone(&worker));

    let (long, short) = tokio::join!(
        engine.execute_task(GENERIC_REQUEST, ExecutionOptions::default()),
        engine.execute_task(GENERIC_REQUEST, ExecutionOptions::default().with_max_steps(1)),
    );

    assert!(long.success && short.success);
    assert_ne!(long.task_id, short.task_id);
    assert_eq!(short.steps_completed, 1);
    assert_eq!(long.steps_completed, 4);

    // The short task finished first but left the shared worker loaded.
    let stats = engine.catalog().usage_stats("worker").await.unwrap();
    assert_eq!(stats.load_count, 1);
    assert_eq!(stats.unload_count, 1);
    assert_eq!(worker.initializations(), 1);

    let order: Vec<String> = engine.history().into_iter().map(|r| r.task_id).collect();
    assert_eq!(order, vec![short.task_id, long.task_id]);
}

#[tokio::test]
async fn options_map_is_validated() {
    let engine = worker_engine(Arc::new(EchoCapability::new("worker", Vec::<String>::new())));

    let err = engine
        .execute_task_json(GENERIC_REQUEST, json!({ "maxSteps": "two" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOptions(_)));
    assert!(engine.history().is_empty());

    let result = engine
        .execute_task_json(
            GENERIC_REQUEST,
            json!({ "maxSteps": 2, "workflowType": "testing", "parallelExecution": true }),
        )
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.steps_completed, 2);
}

#[test]
fn unknown_task_is_not_found() {
    let engine = worker_engine(Arc::new(EchoCapability::new("worker", Vec::<String>::new())));
    assert_eq!(
        engine.task_status("task-missing").unwrap_err(),
        Error::TaskNotFound("task-missing".into())
    );
}
