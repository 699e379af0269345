//! Context budget management: windows, admission, and eviction.
//!
//! Every step output and piece of working context the engine keeps is a
//! [`ContextWindow`] in a single bounded pool:
//!
//! 1. **[`budget`]**: [`ContextBudgetManager`] admits windows while the pool
//!    total stays under `max_tokens`, serves per-step context, and applies
//!    workflow-specific re-prioritization.
//!
//! 2. **[`eviction`]**: the four-stage cascade (expire, summarize, truncate,
//!    remove) that runs when a window doesn't fit.
//!
//! 3. **[`summarizer`]**: the [`Summarizer`] seam used by the summarize
//!    stage. The default truncates.
//!
//! 4. **[`window`]**: [`ContextWindow`] itself and its export snapshot.

pub mod budget;
pub mod eviction;
pub mod summarizer;
pub mod window;

pub use budget::{BudgetConfig, BudgetExport, BudgetUsage, ContextBudgetManager, PriorityBucket};
pub use eviction::{EvictionConfig, EvictionStage};
pub use summarizer::{Summarizer, Summary, TruncatingSummarizer};
pub use window::{ContextWindow, WindowSnapshot, WindowState};
