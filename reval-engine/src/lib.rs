//! Revaluation effect engine.
//!
//! Estimates the revenue and profit effect of planned price changes on a set
//! of test products against a control basket of products whose prices were
//! not changed:
//!
//! - `cost_resolver` attaches a unit cost to every sale
//! - `weekly` buckets sales and stock into Monday-aligned weeks
//! - `pretest` picks baseline weeks with enough stock
//! - `activation` decides week by week whether the planned price reached the shelf
//! - `effect` compares each product's uplift with the control group's
//!
//! The analytical core never fails. Missing data degrades to zeros and
//! exclusions recorded on the output rows.

pub mod activation;
pub mod cost_resolver;
pub mod data_loader;
pub mod dataset;
pub mod effect;
pub mod error;
pub mod params;
pub mod pretest;
pub mod revaluation;
pub mod rounding;
pub mod selector;
pub mod summary;
pub mod thresholds;
pub mod timeline;
pub mod types;
pub mod weekly;

pub use activation::{classify_activation, classify_all};
pub use cost_resolver::{backfill_cost_history, resolve_costs};
pub use dataset::{Dataset, TestCalendar};
pub use effect::{estimate_effect, EffectReport};
pub use error::{RevalError, RevalResult};
pub use params::{ActivationParams, EffectParams, PreTestParams, RoundingPolicy, RunParams};
pub use pretest::{select_pretest_window, selection_report};
pub use revaluation::{analyze_revaluations, RevaluationReport};
pub use summary::PortfolioSummary;
pub use timeline::product_timeline;
pub use types::*;
pub use weekly::{aggregate_weekly, format_week, WeeklyTables};
