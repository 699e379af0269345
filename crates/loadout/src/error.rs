//! Crate-wide error type.
//!
//! Every public operation on the catalog, budget manager, planner, and
//! engine returns [`Result`]. Unload conflicts are deliberately *not* an
//! error: [`Catalog::unload`](crate::capability::Catalog::unload) reports
//! them as `Ok(false)` so callers can retry after unloading dependents.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core components.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// No catalog entry with this id.
    #[error("unknown capability: {0}")]
    CapabilityNotFound(String),

    /// No active or historical task with this id.
    #[error("unknown task: {0}")]
    TaskNotFound(String),

    /// The context budget could not admit a window even after the full
    /// eviction cascade.
    #[error("context budget exceeded: requested {requested} tokens, {available} available")]
    CapacityExceeded { requested: usize, available: usize },

    /// A capability's `initialize`, `execute`, or `cleanup` failed.
    #[error("capability {id} failed: {message}")]
    CapabilityFailure { id: String, message: String },

    /// The capability dependency graph (or a step graph) contains a cycle.
    #[error("dependency cycle among: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// `optimize_for_workflow` was called with a name that has no rule set.
    #[error("no optimization rules for workflow: {0}")]
    UnknownWorkflow(String),

    /// The options map had a key with the wrong type.
    #[error("invalid execution options: {0}")]
    InvalidOptions(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected failure inside the orchestration loop itself.
    #[error("engine fault: {0}")]
    EngineFault(String),
}

/// Error returned by [`Capability`](crate::capability::Capability)
/// implementations. The catalog and engine attach the capability id.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Attach the capability id, producing the crate-level error.
    pub fn into_failure(self, id: &str) -> Error {
        Error::CapabilityFailure {
            id: id.to_string(),
            message: self.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = Error::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "dependency cycle among: a -> b -> a");
    }

    #[test]
    fn capability_error_carries_id() {
        let err = CapabilityError::new("boom").into_failure("codeflow");
        assert_eq!(err.to_string(), "capability codeflow failed: boom");
    }
}
