//! Cost accounting: price table and per-session call ledger.

pub mod pricing;
pub mod tracker;

pub use pricing::{ModelPrice, PriceTable, DEFAULT_MODEL};
pub use tracker::{BudgetReport, BudgetStatus, BudgetTracker, CallRecord, ModelUsage};
