//! Convenience re-exports for common `loadout` types.
//!
//! ```ignore
//! use loadout::prelude::*;
//! ```
//!
//! Eviction stages, DAG helpers, and result sub-types are left out; import
//! those from their modules.

// ── Capabilities ────────────────────────────────────────────────────
pub use crate::capability::{
    Action, Capability, CapabilityFactory, CapabilityFuture, CapabilityMetadata, Catalog,
    CatalogConfig, EchoCapability, PriorityTier, echo_factory, reference_catalog,
};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{BudgetConfig, ContextBudgetManager, Summarizer, TruncatingSummarizer};

// ── Planning ────────────────────────────────────────────────────────
pub use crate::planner::{Planner, TaskContext, TaskStep, TaskType};

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::config::EngineConfig;
pub use crate::engine::{
    CompositeEventHandler, CostModel, Engine, EngineEvent, EventHandler, ExecutionOptions,
    ExecutionResult, FnEventHandler, LoggingHandler, NoopHandler, StatusReport, StepResult,
    TaskStatus,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{CapabilityError, Error};
