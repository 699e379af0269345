//! The capability contract and the metadata the catalog keeps about each one.
//!
//! A [`Capability`] is a pluggable unit of work. The core never looks inside
//! one: it constructs it through a [`CapabilityFactory`], calls
//! [`initialize`](Capability::initialize) once when it is loaded, dispatches
//! [`execute`](Capability::execute) with a typed [`Action`], and calls
//! [`cleanup`](Capability::cleanup) when it is retired.

use crate::error::CapabilityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by the [`Capability`] lifecycle methods.
///
/// Type alias to keep the trait dyn-compatible and its implementations
/// readable.
pub type CapabilityFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CapabilityError>> + Send + 'a>>;

/// Constructor registered with the catalog for one capability id.
pub type CapabilityFactory =
    Arc<dyn Fn(&CapabilityMetadata) -> Result<Arc<dyn Capability>, CapabilityError> + Send + Sync>;

// ── Capability trait ───────────────────────────────────────────────

/// A loadable capability module.
///
/// # Example
///
/// ```ignore
/// struct Linter;
///
/// impl Capability for Linter {
///     fn initialize(&self) -> CapabilityFuture<'_, ()> {
///         Box::pin(async { Ok(()) })
///     }
///
///     fn execute(&self, action: Action, params: Value) -> CapabilityFuture<'_, Value> {
///         Box::pin(async move { Ok(json!({ "action": action.as_str() })) })
///     }
///
///     fn cleanup(&self) -> CapabilityFuture<'_, ()> {
///         Box::pin(async { Ok(()) })
///     }
///
///     fn capabilities(&self) -> Vec<String> {
///         vec!["analyze".into()]
///     }
/// }
/// ```
pub trait Capability: Send + Sync {
    /// Prepare the instance. Called exactly once, right after construction.
    fn initialize(&self) -> CapabilityFuture<'_, ()>;

    /// Perform `action` with the given parameters.
    ///
    /// When the engine falls back to [`Action::Execute`], the name of the
    /// action it originally wanted is in `params["action"]`.
    fn execute(
        &self,
        action: Action,
        params: serde_json::Value,
    ) -> CapabilityFuture<'_, serde_json::Value>;

    /// Release resources. Called when the catalog unloads the instance.
    fn cleanup(&self) -> CapabilityFuture<'_, ()>;

    /// Operation names this instance supports natively.
    fn capabilities(&self) -> Vec<String>;

    /// Whether `action` is listed in [`capabilities`](Self::capabilities).
    fn supports(&self, action: Action) -> bool {
        self.capabilities().iter().any(|c| c == action.as_str())
    }
}

// ── Action ─────────────────────────────────────────────────────────

/// Operations the engine can ask a capability to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    GenerateCode,
    GenerateUi,
    GenerateApi,
    GenerateTests,
    Analyze,
    Refactor,
    Deploy,
    /// Generic entry point every capability must accept.
    Execute,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::GenerateCode => "generate_code",
            Action::GenerateUi => "generate_ui",
            Action::GenerateApi => "generate_api",
            Action::GenerateTests => "generate_tests",
            Action::Analyze => "analyze",
            Action::Refactor => "refactor",
            Action::Deploy => "deploy",
            Action::Execute => "execute",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metadata ───────────────────────────────────────────────────────

/// Priority tier of a capability.
///
/// Governs search weighting and who gets retired first when space is
/// needed. `P0` capabilities are never unloaded opportunistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityTier {
    P0,
    P1,
    P2,
}

impl PriorityTier {
    /// Multiplier applied to search scores.
    pub fn search_weight(self) -> f64 {
        match self {
            PriorityTier::P0 => 2.0,
            PriorityTier::P1 => 1.0,
            PriorityTier::P2 => 0.5,
        }
    }

    pub fn is_essential(self) -> bool {
        self == PriorityTier::P0
    }
}

/// Static description of a catalog entry. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub id: String,
    pub description: String,
    /// Operation keywords, matched by search.
    pub keywords: Vec<String>,
    /// Context units the instance occupies while loaded.
    pub context_cost: usize,
    pub tier: PriorityTier,
    /// Ids that must be loaded before this one.
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    /// 0.0 to 1.0.
    pub performance_score: f64,
    /// 0.0 to 1.0.
    pub success_rate: f64,
}

impl CapabilityMetadata {
    /// Metadata with neutral scores and no keywords, tags, or dependencies.
    pub fn new(id: impl Into<String>, description: impl Into<String>, tier: PriorityTier) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            keywords: Vec::new(),
            context_cost: 0,
            tier,
            dependencies: Vec::new(),
            tags: Vec::new(),
            performance_score: 1.0,
            success_rate: 1.0,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context_cost(mut self, cost: usize) -> Self {
        self.context_cost = cost;
        self
    }

    /// Set performance score and success rate, clamped to `[0, 1]`.
    pub fn with_scores(mut self, performance: f64, success_rate: f64) -> Self {
        self.performance_score = performance.clamp(0.0, 1.0);
        self.success_rate = success_rate.clamp(0.0, 1.0);
        self
    }

    /// Keyword relevance of this entry to a tokenized query.
    ///
    /// Each query keyword contributes 2.0 per description hit, 3.0 per
    /// capability-keyword hit, and 1.5 per tag hit. The sum is weighted by
    /// tier and performance score.
    pub fn relevance(&self, query_keywords: &[String]) -> f64 {
        let description = self.description.to_lowercase();
        let mut score = 0.0;

        for keyword in query_keywords {
            if description.contains(keyword.as_str()) {
                score += 2.0;
            }
            for capability in &self.keywords {
                if capability.to_lowercase().contains(keyword.as_str()) {
                    score += 3.0;
                }
            }
            for tag in &self.tags {
                if tag.to_lowercase().contains(keyword.as_str()) {
                    score += 1.5;
                }
            }
        }

        score * self.tier.search_weight() * self.performance_score
    }
}
