//! Engine configuration.
//!
//! Every section has defaults; a JSON file only needs to name what it
//! overrides:
//!
//! ```json
//! {
//!   "budget": { "max_tokens": 50000 },
//!   "cost": { "output_per_million": 10.0 },
//!   "history_limit": 200
//! }
//! ```

use crate::capability::CatalogConfig;
use crate::context::BudgetConfig;
use crate::engine::{CostModel, DEFAULT_HISTORY_LIMIT};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Settings for the catalog, the context budget, and the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub catalog: CatalogConfig,
    pub budget: BudgetConfig,
    pub cost: CostModel,
    /// Finished tasks kept for status lookups.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            budget: BudgetConfig::default(),
            cost: CostModel::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: EngineConfig = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn with_catalog(mut self, catalog: CatalogConfig) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "budget": {{ "max_tokens": 50000, "eviction": {{ "truncation": {{ "keep_recent": 5 }} }} }},
                "cost": {{ "output_per_million": 10.0 }},
                "history_limit": 7
            }}"#
        )
        .unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.budget.max_tokens, 50_000);
        assert_eq!(config.budget.high_priority_floor, 8);
        assert_eq!(config.budget.eviction.truncation.keep_recent, 5);
        assert_eq!(config.budget.eviction.truncation.min_priority, 3);
        assert_eq!(config.cost.output_per_million, 10.0);
        assert_eq!(config.cost.input_per_million, 2.0);
        assert_eq!(config.catalog.max_context_tokens, 100_000);
        assert_eq!(config.history_limit, 7);
    }

    #[test]
    fn missing_or_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = EngineConfig::from_json_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, Error::Config(msg) if msg.starts_with("failed to read")));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let malformed = EngineConfig::from_json_file(&bad).unwrap_err();
        assert!(matches!(malformed, Error::Config(msg) if msg.starts_with("failed to parse")));
    }

    #[test]
    fn builders_replace_sections() {
        let config = EngineConfig::default()
            .with_budget(BudgetConfig::default().with_max_tokens(1234))
            .with_history_limit(3);
        assert_eq!(config.budget.max_tokens, 1234);
        assert_eq!(config.history_limit, 3);
        assert_eq!(EngineConfig::default().history_limit, 1000);
    }
}
