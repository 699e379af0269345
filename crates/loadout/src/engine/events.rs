//! Lifecycle events emitted by the [`Engine`](super::Engine).
//!
//! The engine reports every task transition through [`EngineEvent`]. Callers
//! implement [`EventHandler`] to observe them for logging, progress
//! display, or metrics.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use super::result::{Limit, StepResult};
use crate::planner::{ComplexityEstimate, TaskStep};
use tracing::{debug, error, info, warn};

/// Events emitted while a task runs.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    TaskStarted {
        task_id: &'a str,
        request: &'a str,
    },
    /// The request was split into steps.
    Decomposed {
        task_id: &'a str,
        steps: &'a [TaskStep],
        complexity: &'a ComplexityEstimate,
    },
    StepStarted {
        task_id: &'a str,
        step: &'a TaskStep,
        index: usize,
        total: usize,
    },
    /// A required capability could not be loaded; the step continues with
    /// the others.
    CapabilityLoadFailed {
        task_id: &'a str,
        step_id: &'a str,
        capability: &'a str,
        error: &'a str,
    },
    StepFinished {
        task_id: &'a str,
        result: &'a StepResult,
    },
    LimitReached {
        task_id: &'a str,
        limit: Limit,
    },
    Paused {
        task_id: &'a str,
    },
    Resumed {
        task_id: &'a str,
    },
    /// An engine fault forced non-essential capabilities out.
    EmergencyCleanup {
        task_id: &'a str,
        reason: &'a str,
    },
    TaskFinished {
        task_id: &'a str,
        success: bool,
        steps_completed: usize,
        tokens_used: usize,
    },
}

/// Observer for engine events. The default implementation ignores them.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EngineEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// # Example
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let EngineEvent::StepFinished { result, .. } = event {
///         println!("{} done", result.step_id);
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&EngineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add `handler` only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        match event {
            EngineEvent::TaskStarted { task_id, request } => {
                let preview: String = request.chars().take(80).collect();
                info!(task_id, "task started: {preview}");
            }
            EngineEvent::Decomposed {
                task_id,
                steps,
                complexity,
            } => {
                info!(
                    task_id,
                    steps = steps.len(),
                    score = complexity.complexity_score,
                    minutes = complexity.estimated_minutes,
                    "task decomposed"
                );
            }
            EngineEvent::StepStarted {
                task_id,
                step,
                index,
                total,
            } => {
                info!(task_id, step = %step.id, "[{}/{}] {}", index + 1, total, step.name);
            }
            EngineEvent::CapabilityLoadFailed {
                task_id,
                step_id,
                capability,
                error,
            } => {
                warn!(task_id, step_id, capability, "capability load failed: {error}");
            }
            EngineEvent::StepFinished { task_id, result } => {
                if result.success {
                    debug!(
                        task_id,
                        step = %result.step_id,
                        tokens = result.tokens_used,
                        "step finished"
                    );
                } else {
                    warn!(
                        task_id,
                        step = %result.step_id,
                        "step failed: {}",
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            EngineEvent::LimitReached { task_id, limit } => {
                warn!(task_id, limit = %limit, "execution limit reached");
            }
            EngineEvent::Paused { task_id } => info!(task_id, "task paused"),
            EngineEvent::Resumed { task_id } => info!(task_id, "task resumed"),
            EngineEvent::EmergencyCleanup { task_id, reason } => {
                error!(task_id, "emergency cleanup: {reason}");
            }
            EngineEvent::TaskFinished {
                task_id,
                success,
                steps_completed,
                tokens_used,
            } => {
                info!(
                    task_id,
                    success,
                    steps_completed,
                    tokens = tokens_used,
                    "task finished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_calls_every_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&count), Arc::clone(&count));
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| {
                a.fetch_add(1, Ordering::Relaxed);
            }))
            .with(NoopHandler)
            .with_if(false, LoggingHandler)
            .with(FnEventHandler::new(move |_| {
                b.fetch_add(1, Ordering::Relaxed);
            }));

        handler.on_event(&EngineEvent::Paused { task_id: "t" });
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
