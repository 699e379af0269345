//! A single prioritized chunk of working context.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Highest window priority. Values above are clamped.
pub const MAX_PRIORITY: u8 = 10;

/// Lifecycle state of an admitted window.
///
/// Expired, truncated, and removed windows leave the pool entirely, so
/// only the two states a window can be observed in are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Admitted,
    /// Content was replaced by a shorter summary. Never summarized twice.
    Summarized,
}

/// A token-costed, prioritized chunk of context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    pub content: String,
    pub tokens: usize,
    /// 0 to [`MAX_PRIORITY`], higher is more important.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    /// Where the content came from: a step id, a capability id, a named
    /// input such as `requirements`.
    pub source: String,
    /// Task that admitted the window. Unowned windows are shared by every
    /// task.
    pub owner: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: WindowState,
    /// Admission sequence number, the tiebreak for equal timestamps.
    pub(crate) seq: u64,
}

impl ContextWindow {
    pub fn new(
        content: impl Into<String>,
        tokens: usize,
        priority: u8,
        source: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            tokens,
            priority: priority.min(MAX_PRIORITY),
            created_at: Utc::now(),
            source: source.into(),
            owner: None,
            expires_at: None,
            state: WindowState::Admitted,
            seq: 0,
        }
    }

    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Whether `task` may see this window: it owns it, or nobody does.
    pub fn visible_to(&self, task: &str) -> bool {
        self.owner.as_deref().is_none_or(|owner| owner == task)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Key for pool order: priority descending, then oldest first.
    pub(crate) fn pool_order(&self) -> (std::cmp::Reverse<u8>, DateTime<Utc>, u64) {
        (std::cmp::Reverse(self.priority), self.created_at, self.seq)
    }
}

/// Read-only view of a window for [`export`](super::ContextBudgetManager::export).
#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub tokens: usize,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: WindowState,
    /// First 100 characters, with `...` appended if anything was cut.
    pub content_preview: String,
}

const PREVIEW_CHARS: usize = 100;

impl From<&ContextWindow> for WindowSnapshot {
    fn from(window: &ContextWindow) -> Self {
        let mut content_preview: String = window.content.chars().take(PREVIEW_CHARS).collect();
        if window.content.chars().count() > PREVIEW_CHARS {
            content_preview.push_str("...");
        }
        Self {
            source: window.source.clone(),
            owner: window.owner.clone(),
            tokens: window.tokens,
            priority: window.priority,
            created_at: window.created_at,
            expires_at: window.expires_at,
            state: window.state,
            content_preview,
        }
    }
}
