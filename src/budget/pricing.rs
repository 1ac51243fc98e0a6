//! Per-model price table.
//!
//! Prices are USD per million tokens. Unknown models fall back to the row of
//! the configured default model; if that row is missing too, the built-in
//! default model's row is used so cost computation never fails.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// One row of the price table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
    /// Human-readable model name for reports.
    pub display_name: String,
}

impl ModelPrice {
    pub fn new(input_per_million: f64, output_per_million: f64, display_name: &str) -> Self {
        Self {
            input_per_million,
            output_per_million,
            display_name: display_name.to_string(),
        }
    }

    /// `input/1e6 * input_price + output/1e6 * output_price`.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input + output
    }
}

/// Model name → price row, with a designated fallback model.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    rows: HashMap<String, ModelPrice>,
    default_model: String,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::builtin(DEFAULT_MODEL)
    }
}

impl PriceTable {
    /// Built-in Anthropic price rows with the given fallback model.
    pub fn builtin(default_model: &str) -> Self {
        let rows = [
            (
                "claude-opus-4-20250514",
                ModelPrice::new(15.0, 75.0, "Claude Opus 4"),
            ),
            (
                "claude-sonnet-4-20250514",
                ModelPrice::new(3.0, 15.0, "Claude Sonnet 4"),
            ),
            (
                "claude-3-7-sonnet-20250219",
                ModelPrice::new(3.0, 15.0, "Claude Sonnet 3.7"),
            ),
            (
                "claude-3-5-sonnet-20241022",
                ModelPrice::new(3.0, 15.0, "Claude Sonnet 3.5"),
            ),
            (
                "claude-3-5-haiku-20241022",
                ModelPrice::new(0.8, 4.0, "Claude Haiku 3.5"),
            ),
            (
                "claude-3-haiku-20240307",
                ModelPrice::new(0.25, 1.25, "Claude Haiku 3"),
            ),
        ]
        .into_iter()
        .map(|(name, price)| (name.to_string(), price))
        .collect();

        Self {
            rows,
            default_model: default_model.to_string(),
        }
    }

    /// Insert or replace a row. Only affects costs computed afterwards.
    pub fn set(&mut self, model: &str, price: ModelPrice) {
        self.rows.insert(model.to_string(), price);
    }

    pub fn with_overrides(mut self, overrides: &HashMap<String, ModelPrice>) -> Self {
        for (model, price) in overrides {
            self.set(model, price.clone());
        }
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Exact row for `model`, if present.
    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.rows.get(model)
    }

    /// Row for `model`, falling back to the default model's row.
    pub fn resolve(&self, model: &str) -> ModelPrice {
        if let Some(price) = self.rows.get(model) {
            return price.clone();
        }
        if let Some(price) = self.rows.get(&self.default_model) {
            return price.clone();
        }
        // Default model not priced: use the built-in default row.
        ModelPrice::new(3.0, 15.0, DEFAULT_MODEL)
    }

    /// Model names with display names, sorted by model name.
    pub fn models(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .rows
            .iter()
            .map(|(k, v)| (k.as_str(), v.display_name.as_str()))
            .collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}
