//! The admission eviction cascade.
//!
//! When a new window does not fit, four stages run in fixed order, each
//! only while the window still doesn't fit:
//!
//! 1. **expire**: drop windows whose expiry has passed. Always runs.
//! 2. **summarize**: shrink windows below `summarization.min_priority`
//!    through the [`Summarizer`], once usage ≥ `summarization.threshold`.
//! 3. **truncate**: among windows below `truncation.min_priority`, keep
//!    the `keep_recent` newest and drop the rest, once usage ≥
//!    `truncation.threshold`.
//! 4. **remove**: drop every window below `removal.min_priority`, once
//!    usage ≥ `removal.threshold`.
//!
//! Usage is measured once, after the expiry stage. A window whose priority
//! is at or above every stage's `min_priority` is never touched.

use super::summarizer::Summarizer;
use super::window::{ContextWindow, WindowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Settings for the summarization stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationStage {
    pub threshold: f64,
    /// Target size as a fraction of the original.
    pub ratio: f64,
    pub min_priority: u8,
}

impl Default for SummarizationStage {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            ratio: 0.3,
            min_priority: 5,
        }
    }
}

/// Settings for the truncation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationStage {
    pub threshold: f64,
    pub keep_recent: usize,
    pub min_priority: u8,
}

impl Default for TruncationStage {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            keep_recent: 20,
            min_priority: 3,
        }
    }
}

/// Settings for the removal stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalStage {
    pub threshold: f64,
    pub min_priority: u8,
}

impl Default for RemovalStage {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            min_priority: 2,
        }
    }
}

/// Configuration for the eviction cascade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub summarization: SummarizationStage,
    pub truncation: TruncationStage,
    pub removal: RemovalStage,
}

impl EvictionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summarization(mut self, stage: SummarizationStage) -> Self {
        self.summarization = stage;
        self
    }

    pub fn with_truncation(mut self, stage: TruncationStage) -> Self {
        self.truncation = stage;
        self
    }

    pub fn with_removal(mut self, stage: RemovalStage) -> Self {
        self.removal = stage;
        self
    }
}

/// A stage of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStage {
    Expire,
    Summarize,
    Truncate,
    Remove,
}

/// What one cascade run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub freed: usize,
    /// Stages that ran and freed something, in order.
    pub stages: Vec<EvictionStage>,
}

/// Drop expired windows. Returns tokens freed.
pub fn remove_expired(windows: &mut Vec<ContextWindow>, now: DateTime<Utc>) -> usize {
    let mut freed = 0;
    windows.retain(|w| {
        if w.is_expired(now) {
            info!(source = %w.source, tokens = w.tokens, "expired context window");
            freed += w.tokens;
            false
        } else {
            true
        }
    });
    freed
}

/// Summarize admitted windows below the stage's priority floor.
pub fn summarize_low_priority(
    windows: &mut [ContextWindow],
    stage: &SummarizationStage,
    summarizer: &dyn Summarizer,
) -> usize {
    let mut freed = 0;
    for window in windows
        .iter_mut()
        .filter(|w| w.priority < stage.min_priority && w.state == WindowState::Admitted)
    {
        let summary = summarizer.summarize(&window.content, window.tokens, stage.ratio);
        // A summarizer that grows the window is ignored.
        if summary.tokens >= window.tokens {
            continue;
        }
        info!(
            source = %window.source,
            from = window.tokens,
            to = summary.tokens,
            "summarized context window"
        );
        freed += window.tokens - summary.tokens;
        window.content = summary.content;
        window.tokens = summary.tokens;
        window.state = WindowState::Summarized;
    }
    freed
}

/// Keep only the `keep_recent` newest windows below the stage's floor.
pub fn truncate_low_priority(windows: &mut Vec<ContextWindow>, stage: &TruncationStage) -> usize {
    let mut low: Vec<(DateTime<Utc>, u64)> = windows
        .iter()
        .filter(|w| w.priority < stage.min_priority)
        .map(|w| (w.created_at, w.seq))
        .collect();
    if low.len() <= stage.keep_recent {
        return 0;
    }
    // Newest first; everything past keep_recent goes.
    low.sort_by(|a, b| b.cmp(a));
    let cutoff = low[stage.keep_recent];

    let mut freed = 0;
    let mut dropped = 0;
    windows.retain(|w| {
        let evict = w.priority < stage.min_priority && (w.created_at, w.seq) <= cutoff;
        if evict {
            freed += w.tokens;
            dropped += 1;
        }
        !evict
    });
    info!(dropped, freed, "truncated low-priority context windows");
    freed
}

/// Drop every window below the stage's floor.
pub fn remove_low_priority(windows: &mut Vec<ContextWindow>, stage: &RemovalStage) -> usize {
    let mut freed = 0;
    windows.retain(|w| {
        if w.priority < stage.min_priority {
            info!(source = %w.source, tokens = w.tokens, "removed low-priority context window");
            freed += w.tokens;
            false
        } else {
            true
        }
    });
    freed
}

fn record(report: &mut CascadeReport, stage: EvictionStage, freed: usize) {
    if freed > 0 {
        report.freed += freed;
        report.stages.push(stage);
    }
    debug!(?stage, freed, "eviction stage finished");
}

/// Run the cascade until `needed` more tokens fit under `max_tokens`.
///
/// `current` is the pool total before the run. The caller checks the
/// resulting total; the cascade only reports what it freed.
pub fn run_cascade(
    windows: &mut Vec<ContextWindow>,
    current: usize,
    needed: usize,
    max_tokens: usize,
    config: &EvictionConfig,
    summarizer: &dyn Summarizer,
    now: DateTime<Utc>,
) -> CascadeReport {
    let mut report = CascadeReport::default();
    let fits = |freed: usize| current.saturating_sub(freed) + needed <= max_tokens;

    let freed = remove_expired(windows, now);
    record(&mut report, EvictionStage::Expire, freed);
    if fits(report.freed) {
        return report;
    }

    let usage = if max_tokens == 0 {
        1.0
    } else {
        current.saturating_sub(report.freed) as f64 / max_tokens as f64
    };

    if usage >= config.summarization.threshold {
        let freed = summarize_low_priority(windows, &config.summarization, summarizer);
        record(&mut report, EvictionStage::Summarize, freed);
        if fits(report.freed) {
            return report;
        }
    }

    if usage >= config.truncation.threshold {
        let freed = truncate_low_priority(windows, &config.truncation);
        record(&mut report, EvictionStage::Truncate, freed);
        if fits(report.freed) {
            return report;
        }
    }

    if usage >= config.removal.threshold {
        let freed = remove_low_priority(windows, &config.removal);
        record(&mut report, EvictionStage::Remove, freed);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::summarizer::TruncatingSummarizer;
    use chrono::Duration;

    fn window(tokens: usize, priority: u8, seq: u64) -> ContextWindow {
        let mut w = ContextWindow::new("x".repeat(100), tokens, priority, format!("w{seq}"));
        w.seq = seq;
        w
    }

    fn total(windows: &[ContextWindow]) -> usize {
        windows.iter().map(|w| w.tokens).sum()
    }

    #[test]
    fn expire_runs_first_and_can_be_enough() {
        let now = Utc::now();
        let mut windows = vec![
            window(60, 1, 0).with_expiry(now - Duration::seconds(5)),
            window(30, 1, 1),
        ];
        let report = run_cascade(
            &mut windows,
            90,
            20,
            100,
            &EvictionConfig::default(),
            &TruncatingSummarizer,
            now,
        );
        assert_eq!(report.stages, vec![EvictionStage::Expire]);
        assert_eq!(report.freed, 60);
        // The surviving low-priority window was not summarized.
        assert_eq!(windows[0].state, WindowState::Admitted);
    }

    #[test]
    fn summarize_skips_high_priority_and_already_summarized() {
        let mut windows = vec![window(100, 9, 0), window(100, 4, 1)];
        let stage = SummarizationStage::default();
        assert_eq!(
            summarize_low_priority(&mut windows, &stage, &TruncatingSummarizer),
            70
        );
        assert_eq!(windows[0].tokens, 100);
        assert_eq!(windows[1].tokens, 30);
        assert_eq!(windows[1].source, "w1");
        assert_eq!(
            summarize_low_priority(&mut windows, &stage, &TruncatingSummarizer),
            0
        );
    }

    #[test]
    fn truncate_keeps_newest_low_priority() {
        let mut windows: Vec<_> = (0..5).map(|i| window(10, 1, i)).collect();
        windows.push(window(10, 7, 5));
        let stage = TruncationStage {
            keep_recent: 2,
            ..TruncationStage::default()
        };
        assert_eq!(truncate_low_priority(&mut windows, &stage), 30);
        let seqs: Vec<u64> = windows.iter().map(|w| w.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn stages_gate_on_usage() {
        // 70% usage: no stage beyond expiry may run.
        let mut windows = vec![window(70, 0, 0)];
        let report = run_cascade(
            &mut windows,
            70,
            40,
            100,
            &EvictionConfig::default(),
            &TruncatingSummarizer,
            Utc::now(),
        );
        assert_eq!(report, CascadeReport::default());
        assert_eq!(total(&windows), 70);
    }

    #[test]
    fn full_cascade_reaches_removal() {
        // 96% usage, one unsummarizable big window at priority 1.
        let mut windows = vec![window(90, 1, 0), window(6, 9, 1)];
        let config = EvictionConfig::default().with_summarization(SummarizationStage {
            ratio: 1.0,
            ..SummarizationStage::default()
        });
        let report = run_cascade(
            &mut windows,
            96,
            50,
            100,
            &config,
            &TruncatingSummarizer,
            Utc::now(),
        );
        assert_eq!(report.stages, vec![EvictionStage::Remove]);
        assert_eq!(total(&windows), 6);
    }

    #[test]
    fn high_priority_windows_survive_everything() {
        let mut windows = vec![window(96, 8, 0)];
        let report = run_cascade(
            &mut windows,
            96,
            50,
            100,
            &EvictionConfig::default(),
            &TruncatingSummarizer,
            Utc::now(),
        );
        assert_eq!(report.freed, 0);
        assert_eq!(windows[0].tokens, 96);
        assert_eq!(windows[0].state, WindowState::Admitted);
    }
}
