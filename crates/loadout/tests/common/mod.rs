//! Shared fixtures for the integration tests.

use std::sync::Arc;

use loadout::capability::{
    Capability, CapabilityMetadata, Catalog, CatalogConfig, EchoCapability, PriorityTier,
};
use loadout::context::{BudgetConfig, ContextBudgetManager};
use loadout::engine::Engine;

/// A request no template matches: it runs the four generic steps.
pub const GENERIC_REQUEST: &str = "write a haiku";

/// A catalog with one P1 capability, `worker`, whose description matches
/// every generic step. Every load returns the same `instance`, so its
/// counters see the whole run.
pub fn worker_catalog(instance: Arc<EchoCapability>) -> Catalog {
    Catalog::new(CatalogConfig::default()).with(
        CapabilityMetadata::new("worker", "handles the request", PriorityTier::P1)
            .with_context_cost(1000),
        Arc::new(move |_: &CapabilityMetadata| Ok(Arc::clone(&instance) as Arc<dyn Capability>)),
    )
}

/// Engine over [`worker_catalog`] with a default budget.
pub fn worker_engine(instance: Arc<EchoCapability>) -> Engine {
    Engine::new(
        Arc::new(worker_catalog(instance)),
        Arc::new(ContextBudgetManager::new(BudgetConfig::default())),
    )
}
