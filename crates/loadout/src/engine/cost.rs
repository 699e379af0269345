//! Token cost estimation.

use serde::{Deserialize, Serialize};

/// Prices used to turn a task's token count into a dollar estimate.
///
/// Engine steps only report a single token total, so the model assumes a
/// fixed input share and prices the rest as output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Price per 1M input tokens.
    pub input_per_million: f64,
    /// Price per 1M output tokens.
    pub output_per_million: f64,
    /// Fraction of tokens counted as input (0.25 for a 1:3 split).
    pub input_share: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_per_million: 2.0,
            output_per_million: 8.0,
            input_share: 0.25,
        }
    }
}

impl CostModel {
    pub fn with_prices(mut self, input_per_million: f64, output_per_million: f64) -> Self {
        self.input_per_million = input_per_million;
        self.output_per_million = output_per_million;
        self
    }

    pub fn with_input_share(mut self, share: f64) -> Self {
        self.input_share = share.clamp(0.0, 1.0);
        self
    }

    /// Estimated cost of `tokens`, rounded to four decimal places.
    pub fn estimate(&self, tokens: usize) -> f64 {
        let tokens = tokens as f64;
        let input = tokens * self.input_share;
        let output = tokens - input;
        let cost = (input / 1_000_000.0) * self.input_per_million
            + (output / 1_000_000.0) * self.output_per_million;
        (cost * 10_000.0).round() / 10_000.0
    }
}
