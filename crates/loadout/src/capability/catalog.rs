//! The capability catalog: registered metadata, live instances, and usage
//! statistics.
//!
//! Metadata lives behind a `std::sync::RwLock` and is read without touching
//! the load state, so [`Catalog::search`] never waits on a slow
//! `initialize()`. Loading and unloading go through a single
//! `tokio::sync::Mutex` held across the lifecycle calls, which serializes
//! every mutation of the loaded set.
//!
//! At most one instance per id exists at a time. [`Catalog::load`] is
//! idempotent and returns the existing `Arc` if the id is already loaded.

use super::core::{Capability, CapabilityFactory, CapabilityMetadata};
use super::dag;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default ceiling for the summed context cost of loaded capabilities.
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 100_000;

/// Catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Context ceiling that loaded capabilities share. Used for
    /// [`LoadedContextUsage::percent_of_max`] and by the planner to decide
    /// whether a step fits.
    pub max_context_tokens: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }
}

/// Per-capability load/unload counters.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub load_count: u64,
    pub unload_count: u64,
    /// Accumulated time spent loaded, over completed load/unload cycles.
    pub total_usage_time: Duration,
    /// When the current (or most recent) load happened.
    pub last_loaded: Option<Instant>,
}

impl UsageStats {
    fn record_load(&mut self) {
        self.load_count += 1;
        self.last_loaded = Some(Instant::now());
    }

    fn record_unload(&mut self) {
        self.unload_count += 1;
        if let Some(at) = self.last_loaded {
            self.total_usage_time += at.elapsed();
        }
    }
}

/// Context occupied by the currently loaded capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedContextUsage {
    pub total_context_size: usize,
    pub per_capability: BTreeMap<String, usize>,
    pub loaded_count: usize,
    pub percent_of_max: f64,
}

struct CatalogEntry {
    metadata: CapabilityMetadata,
    factory: CapabilityFactory,
}

#[derive(Default)]
struct Entries {
    /// Registration order; search ties are broken by position here.
    list: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl Entries {
    fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.index.get(id).and_then(|&i| self.list.get(i))
    }

    fn dependencies(&self, id: &str) -> Option<&[String]> {
        self.get(id).map(|e| e.metadata.dependencies.as_slice())
    }
}

#[derive(Default)]
struct LoadedState {
    instances: HashMap<String, Arc<dyn Capability>>,
    /// Ids in the order they were loaded. Dependencies always precede
    /// their dependents.
    load_order: Vec<String>,
    usage: HashMap<String, UsageStats>,
}

impl LoadedState {
    fn remove(&mut self, id: &str) {
        self.instances.remove(id);
        self.load_order.retain(|x| x != id);
        self.usage.entry(id.to_string()).or_default().record_unload();
    }
}

/// Registry of capability metadata and the live instances built from it.
pub struct Catalog {
    entries: RwLock<Entries>,
    state: Mutex<LoadedState>,
    config: CatalogConfig,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("ids", &self.ids())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(CatalogConfig::default())
    }
}

impl Catalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            state: Mutex::new(LoadedState::default()),
            config,
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register a capability. Re-registering an id replaces its metadata
    /// and factory but keeps its original position for tie-breaking.
    pub fn register(&self, metadata: CapabilityMetadata, factory: CapabilityFactory) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let id = metadata.id.clone();
        let entry = CatalogEntry { metadata, factory };
        if let Some(&i) = entries.index.get(&id) {
            entries.list[i] = entry;
        } else {
            let i = entries.list.len();
            entries.list.push(entry);
            entries.index.insert(id.clone(), i);
        }
        debug!(capability = %id, "registered capability");
    }

    /// Register a capability (builder pattern).
    pub fn with(self, metadata: CapabilityMetadata, factory: CapabilityFactory) -> Self {
        self.register(metadata, factory);
        self
    }

    pub fn metadata(&self, id: &str) -> Option<CapabilityMetadata> {
        self.read_entries().get(id).map(|e| e.metadata.clone())
    }

    /// All registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.read_entries()
            .list
            .iter()
            .map(|e| e.metadata.id.clone())
            .collect()
    }

    /// Sum of `context_cost` over `ids`. Unknown ids contribute nothing.
    pub fn context_cost_of(&self, ids: &[String]) -> usize {
        let entries = self.read_entries();
        ids.iter()
            .filter_map(|id| entries.get(id))
            .map(|e| e.metadata.context_cost)
            .sum()
    }

    // ── Search & ordering ──────────────────────────────────────────

    /// Rank capabilities against free text and return up to `max_results`
    /// ids, best first. Ties keep registration order. Entries scoring zero
    /// are never returned.
    pub fn search(&self, query: &str, max_results: usize) -> Vec<String> {
        let keywords: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if keywords.is_empty() || max_results == 0 {
            return Vec::new();
        }

        let entries = self.read_entries();
        let mut scored: Vec<(usize, f64)> = entries
            .list
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.metadata.relevance(&keywords)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // Stable sort keeps registration order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let hits: Vec<String> = scored
            .into_iter()
            .take(max_results)
            .map(|(i, _)| entries.list[i].metadata.id.clone())
            .collect();
        debug!(query, hits = hits.len(), "capability search");
        hits
    }

    /// Order `ids` so that dependencies (among `ids`) come first.
    pub fn topological_order(&self, ids: &[String]) -> Result<Vec<String>> {
        let entries = self.read_entries();
        dag::topological_order(ids, |id| entries.dependencies(id))
    }

    /// Union of the top three search hits for each step description, in
    /// dependency order.
    pub fn optimize_loading_order<S: AsRef<str>>(&self, steps: &[S]) -> Result<Vec<String>> {
        let mut needed: Vec<String> = Vec::new();
        for step in steps {
            for id in self.search(step.as_ref(), 3) {
                if !needed.contains(&id) {
                    needed.push(id);
                }
            }
        }
        self.topological_order(&needed)
    }

    /// Capabilities recommended for a named workflow stage.
    pub fn suggest_for_workflow(&self, workflow: &str) -> Vec<String> {
        let ids: &[&str] = match workflow {
            "requirement_analysis" => &["codeflow_mcp", "stagewise_mcp"],
            "architecture_design" => &["smartui_mcp", "ag_ui_mcp", "deepgraph_mcp"],
            "coding_implementation" => &["codeflow_mcp", "smartui_mcp", "ag_ui_mcp"],
            "testing_validation" => &["test_mcp", "stagewise_mcp", "security_mcp"],
            "deployment_release" => &["release_trigger_mcp", "intelligent_monitoring_mcp"],
            "monitoring_operations" => &["operations_mcp", "intelligent_monitoring_mcp"],
            _ => &[],
        };
        ids.iter().map(|s| s.to_string()).collect()
    }

    // ── Load / unload ──────────────────────────────────────────────

    /// Load `id` and, first, every capability it depends on.
    ///
    /// Returns the existing instance if `id` is already loaded. The full
    /// dependency closure is resolved before anything is constructed, so a
    /// cycle or unknown dependency fails without side effects. If a
    /// dependency's construction or `initialize()` fails, dependencies
    /// loaded before it stay loaded.
    pub async fn load(&self, id: &str) -> Result<Arc<dyn Capability>> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.instances.get(id) {
            debug!(capability = %id, "already loaded");
            return Ok(Arc::clone(existing));
        }

        let sequence = {
            let entries = self.read_entries();
            dag::load_sequence(id, |dep| entries.dependencies(dep))?
        };

        for cap_id in sequence {
            if state.instances.contains_key(&cap_id) {
                continue;
            }
            let (metadata, factory) = {
                let entries = self.read_entries();
                let entry = entries
                    .get(&cap_id)
                    .ok_or_else(|| Error::CapabilityNotFound(cap_id.clone()))?;
                (entry.metadata.clone(), Arc::clone(&entry.factory))
            };

            let instance = factory(&metadata).map_err(|e| e.into_failure(&cap_id))?;
            instance
                .initialize()
                .await
                .map_err(|e| e.into_failure(&cap_id))?;

            state.instances.insert(cap_id.clone(), instance);
            state.load_order.push(cap_id.clone());
            state.usage.entry(cap_id.clone()).or_default().record_load();
            info!(
                capability = %cap_id,
                context_cost = metadata.context_cost,
                "loaded capability"
            );
        }

        state
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| Error::CapabilityNotFound(id.to_string()))
    }

    /// Unload `id`.
    ///
    /// Returns `Ok(false)` without side effects if another loaded
    /// capability depends on `id`, and `Ok(true)` if `id` was unloaded or
    /// was not loaded to begin with. A failing `cleanup()` leaves the
    /// instance loaded and returns the error.
    pub async fn unload(&self, id: &str) -> Result<bool> {
        if self.metadata(id).is_none() {
            return Err(Error::CapabilityNotFound(id.to_string()));
        }

        let mut state = self.state.lock().await;
        let Some(instance) = state.instances.get(id).cloned() else {
            return Ok(true);
        };

        let dependents = self.loaded_dependents(&state, id);
        if !dependents.is_empty() {
            warn!(
                capability = %id,
                dependents = ?dependents,
                "cannot unload: still required by loaded capabilities"
            );
            return Ok(false);
        }

        instance.cleanup().await.map_err(|e| e.into_failure(id))?;
        state.remove(id);
        info!(capability = %id, "unloaded capability");
        Ok(true)
    }

    /// Unload `id` regardless of dependents. The instance is always
    /// removed; a `cleanup()` failure is reported afterwards.
    pub async fn force_unload(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(instance) = state.instances.get(id).cloned() else {
            return Ok(());
        };
        let cleanup = instance.cleanup().await;
        state.remove(id);
        warn!(capability = %id, "force-unloaded capability");
        cleanup.map_err(|e| e.into_failure(id))
    }

    fn loaded_dependents(&self, state: &LoadedState, id: &str) -> Vec<String> {
        let entries = self.read_entries();
        state
            .load_order
            .iter()
            .filter(|other| {
                entries
                    .dependencies(other)
                    .is_some_and(|deps| deps.iter().any(|d| d == id))
            })
            .cloned()
            .collect()
    }

    // ── Loaded-state queries ───────────────────────────────────────

    /// Loaded ids whose dependency list contains `id`.
    pub async fn reverse_dependencies(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        self.loaded_dependents(&state, id)
    }

    /// Loaded ids in load order.
    pub async fn loaded_ids(&self) -> Vec<String> {
        self.state.lock().await.load_order.clone()
    }

    pub async fn is_loaded(&self, id: &str) -> bool {
        self.state.lock().await.instances.contains_key(id)
    }

    pub async fn usage_stats(&self, id: &str) -> Option<UsageStats> {
        self.state.lock().await.usage.get(id).cloned()
    }

    /// Context occupied by loaded capabilities.
    pub async fn context_usage(&self) -> LoadedContextUsage {
        let loaded = self.loaded_ids().await;
        let entries = self.read_entries();
        let per_capability: BTreeMap<String, usize> = loaded
            .iter()
            .filter_map(|id| entries.get(id).map(|e| (id.clone(), e.metadata.context_cost)))
            .collect();
        let total_context_size: usize = per_capability.values().sum();
        let percent_of_max = if self.config.max_context_tokens > 0 {
            total_context_size as f64 / self.config.max_context_tokens as f64 * 100.0
        } else {
            100.0
        };

        LoadedContextUsage {
            total_context_size,
            per_capability,
            loaded_count: loaded.len(),
            percent_of_max,
        }
    }

    /// Context still available under [`CatalogConfig::max_context_tokens`].
    pub async fn available_context(&self) -> usize {
        let used = self.context_usage().await.total_context_size;
        self.config.max_context_tokens.saturating_sub(used)
    }
}
