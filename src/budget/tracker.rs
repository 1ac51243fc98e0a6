//! Running cost ledger with a pre-flight budget gate.
//!
//! Every successful remote call is recorded with its cost computed once from
//! the price table in effect at that moment. Later price changes never touch
//! existing records. All totals and reports are folded from the records on
//! demand; the ledger is the only source of truth.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::pricing::{ModelPrice, PriceTable};
use crate::config::Config;
use crate::error::{Result, TallyError};
use crate::utils::atomic_write;

/// CSV header for [`BudgetTracker::export_csv`].
pub const CSV_HEADER: &str = "timestamp,request_id,model,input_tokens,output_tokens,total_tokens,cost";

/// One billed remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    /// USD, fixed at record time.
    pub cost: f64,
}

impl CallRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub current_cost: f64,
    pub limit: f64,
    /// Never negative.
    pub remaining: f64,
    /// `current_cost / limit * 100`.
    pub usage_percentage: f64,
    /// `current_cost >= limit`.
    pub is_over_budget: bool,
    /// `current_cost >= limit * warn_fraction`.
    pub is_near_limit: bool,
}

impl BudgetStatus {
    fn evaluate(current_cost: f64, limit: f64, warn_fraction: f64) -> Self {
        Self {
            current_cost,
            limit,
            remaining: (limit - current_cost).max(0.0),
            usage_percentage: if limit > 0.0 {
                current_cost / limit * 100.0
            } else {
                100.0
            },
            is_over_budget: current_cost >= limit,
            is_near_limit: current_cost >= limit * warn_fraction,
        }
    }
}

/// Per-model aggregate in a [`BudgetReport`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelUsage {
    pub display_name: String,
    pub calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Derived view over the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetReport {
    pub status: BudgetStatus,
    pub warn_fraction: f64,
    pub total_calls: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub by_model: BTreeMap<String, ModelUsage>,
    /// Most recent records, oldest first.
    pub recent: Vec<CallRecord>,
}

/// Session cost ledger.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    limit: f64,
    warn_fraction: f64,
    recent_window: usize,
    prices: PriceTable,
    calls: Vec<CallRecord>,
}

impl BudgetTracker {
    pub fn new(limit: f64, warn_fraction: f64, prices: PriceTable) -> Self {
        Self {
            limit,
            warn_fraction,
            recent_window: 10,
            prices,
            calls: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let prices = PriceTable::builtin(&config.pricing.default_model)
            .with_overrides(&config.pricing.overrides);
        Self::new(config.budget.limit_usd, config.budget.warn_fraction, prices)
            .with_recent_window(config.budget.recent_window)
    }

    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window;
        self
    }

    /// Cost of one call under the current price table. Unknown models are
    /// priced with the default model's row.
    pub fn calculate_single_call_cost(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        model: &str,
    ) -> f64 {
        self.prices.resolve(model).cost(input_tokens, output_tokens)
    }

    /// Append a record for a completed call and log the resulting status.
    ///
    /// The status check here is informational; the call has already been made.
    pub fn record_call(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        model: &str,
        request_id: Option<&str>,
    ) -> CallRecord {
        let record = CallRecord {
            timestamp: Utc::now(),
            request_id: request_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4().simple())),
            input_tokens,
            output_tokens,
            model: model.to_string(),
            cost: self.calculate_single_call_cost(input_tokens, output_tokens, model),
        };
        self.calls.push(record.clone());

        let status = self.check_budget();
        info!(
            request_id = %record.request_id,
            model = %record.model,
            input_tokens,
            output_tokens,
            cost = record.cost,
            total = status.current_cost,
            "Recorded call"
        );
        if status.is_over_budget {
            error!(
                spent = status.current_cost,
                limit = status.limit,
                "Budget exceeded; further requests will be denied"
            );
        } else if status.is_near_limit {
            warn!(
                spent = status.current_cost,
                limit = status.limit,
                usage = %format!("{:.0}%", status.usage_percentage),
                "Approaching budget limit"
            );
        }
        record
    }

    /// Current spend against the limit. Pure; safe to call any number of times.
    pub fn check_budget(&self) -> BudgetStatus {
        BudgetStatus::evaluate(self.current_cost(), self.limit, self.warn_fraction)
    }

    /// `Err(BudgetExceeded)` when the limit has been reached.
    pub fn ensure_within_budget(&self) -> Result<BudgetStatus> {
        let status = self.check_budget();
        if status.is_over_budget {
            return Err(TallyError::BudgetExceeded {
                current_cost: status.current_cost,
                limit: status.limit,
            });
        }
        Ok(status)
    }

    /// Status as it would be after a hypothetical call. Does not record anything.
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64, model: &str) -> BudgetStatus {
        let projected =
            self.current_cost() + self.calculate_single_call_cost(input_tokens, output_tokens, model);
        BudgetStatus::evaluate(projected, self.limit, self.warn_fraction)
    }

    /// Drop every record. Limit, threshold and prices are kept.
    pub fn reset(&mut self) {
        self.calls.clear();
    }

    /// Sum of recorded costs.
    pub fn current_cost(&self) -> f64 {
        self.calls.iter().map(|c| c.cost).sum()
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// Last `n` records, oldest first.
    pub fn recent_calls(&self, n: usize) -> &[CallRecord] {
        let start = self.calls.len().saturating_sub(n);
        &self.calls[start..]
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn warn_fraction(&self) -> f64 {
        self.warn_fraction
    }

    /// Raise or lower the limit.
    pub fn set_limit(&mut self, limit: f64) -> Result<()> {
        if limit.is_nan() || limit <= 0.0 {
            return Err(TallyError::Config(format!(
                "budget limit must be greater than 0, got {}",
                limit
            )));
        }
        self.limit = limit;
        Ok(())
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Change a price row. Affects only calls recorded afterwards.
    pub fn set_price(&mut self, model: &str, price: ModelPrice) {
        self.prices.set(model, price);
    }

    /// Aggregate view: totals, per-model breakdown and the recent window.
    pub fn report(&self) -> BudgetReport {
        let mut by_model: BTreeMap<String, ModelUsage> = BTreeMap::new();
        for call in &self.calls {
            let usage = by_model.entry(call.model.clone()).or_insert_with(|| ModelUsage {
                display_name: self
                    .prices
                    .get(&call.model)
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| call.model.clone()),
                ..Default::default()
            });
            usage.calls += 1;
            usage.input_tokens += call.input_tokens;
            usage.output_tokens += call.output_tokens;
            usage.cost += call.cost;
        }

        BudgetReport {
            status: self.check_budget(),
            warn_fraction: self.warn_fraction,
            total_calls: self.calls.len(),
            total_input_tokens: self.calls.iter().map(|c| c.input_tokens).sum(),
            total_output_tokens: self.calls.iter().map(|c| c.output_tokens).sum(),
            by_model,
            recent: self.recent_calls(self.recent_window).to_vec(),
        }
    }

    /// The ledger as CSV, one row per call.
    pub fn to_csv(&self) -> String {
        let mut out = String::from(CSV_HEADER);
        out.push('\n');
        for call in &self.calls {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{:.6}",
                call.timestamp.to_rfc3339(),
                csv_field(&call.request_id),
                csv_field(&call.model),
                call.input_tokens,
                call.output_tokens,
                call.total_tokens(),
                call.cost
            );
        }
        out
    }

    /// Write the ledger as CSV to `path`. Returns the number of rows.
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        atomic_write(path, self.to_csv().as_bytes()).map_err(|e| {
            TallyError::Persistence(format!("failed to write {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), rows = self.calls.len(), "Exported call records");
        Ok(self.calls.len())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
