use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Input rows
// ---------------------------------------------------------------------------

/// One sale line from the sales dataset, before cost resolution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SaleRecord {
    pub product_id: String,
    pub date: NaiveDate,
    pub unit_price: f64,
    pub quantity: f64,
    pub product_name: String,
}

/// A point in a product's cost/stock history. Sparse in time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostRecord {
    pub product_id: String,
    pub date: NaiveDate,
    pub unit_cost: f64,
    pub stock_level: f64,
}

/// A planned price change for a test product.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceChangeOrder {
    pub product_id: String,
    pub effective_date: NaiveDate,
    pub planned_price: f64,
    pub price_before_change: f64,
}

// ---------------------------------------------------------------------------
// Resolved sales
// ---------------------------------------------------------------------------

/// Where the unit cost of a sale came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CostSource {
    /// Latest cost record on or before the sale date.
    Backward,
    /// Earliest cost record after the sale date (history starts too late).
    Forward,
    /// No cost record for the product at all; cost degraded to zero.
    Missing,
}

/// A sale with its unit cost attached. Immutable once resolved.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SaleTransaction {
    pub product_id: String,
    pub date: NaiveDate,
    pub unit_price: f64,
    pub quantity: f64,
    pub product_name: String,
    pub unit_cost_at_sale: f64,
    pub cost_source: CostSource,
}

impl SaleTransaction {
    pub fn revenue(&self) -> f64 {
        self.unit_price * self.quantity
    }

    pub fn cost_volume(&self) -> f64 {
        self.unit_cost_at_sale * self.quantity
    }
}

// ---------------------------------------------------------------------------
// Weekly aggregates
// ---------------------------------------------------------------------------

/// Which series a weekly aggregate belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Scope {
    Product(String),
    /// Union of all products that never received a price-change order.
    Control,
}

/// Sales and stock totals for one scope in one Monday-aligned week.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeeklyAggregate {
    pub scope: Scope,
    pub week_start: NaiveDate,
    pub revenue: f64,
    pub quantity: f64,
    pub cost_volume: f64,
    pub avg_stock: f64,
    /// Distinct days in the week with stock > 0 (0..=7).
    pub stock_days: u32,
}

impl WeeklyAggregate {
    pub fn empty(scope: Scope, week_start: NaiveDate) -> Self {
        Self {
            scope,
            week_start,
            revenue: 0.0,
            quantity: 0.0,
            cost_volume: 0.0,
            avg_stock: 0.0,
            stock_days: 0,
        }
    }

    pub fn profit(&self) -> f64 {
        self.revenue - self.cost_volume
    }

    /// Weighted average price, or `None` when nothing was sold.
    pub fn wap(&self) -> Option<f64> {
        if self.quantity > 0.0 {
            Some(self.revenue / self.quantity)
        } else {
            None
        }
    }

    /// Weighted average unit cost, 0 when nothing was sold.
    pub fn unit_cost(&self) -> f64 {
        if self.quantity > 0.0 {
            self.cost_volume / self.quantity
        } else {
            0.0
        }
    }
}

/// Stock observations for one product in one week.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StockWeek {
    pub avg_stock: f64,
    pub stock_days: u32,
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

/// Outcome of comparing a week's realized price with the plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ActivationStatus {
    /// WAP matches the plan price in force this week.
    ConfirmedCurrent,
    /// WAP matches an earlier plan price of the same product.
    ConfirmedPrevious,
    /// No sales, but the last week with sales was confirmed.
    ConfirmedNoSales,
    /// WAP matches no known plan price.
    MismatchedOffPlan,
    /// No sales and the last week with sales was not confirmed.
    MismatchedNoSales,
    /// WAP never moved away from the pre-test price.
    MismatchedCoincidence,
}

impl ActivationStatus {
    pub fn can_use_in_analysis(self) -> bool {
        matches!(
            self,
            ActivationStatus::ConfirmedCurrent
                | ActivationStatus::ConfirmedPrevious
                | ActivationStatus::ConfirmedNoSales
        )
    }

    pub fn is_mismatched(self) -> bool {
        !self.can_use_in_analysis()
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationStatus::ConfirmedCurrent => write!(f, "confirmed (current)"),
            ActivationStatus::ConfirmedPrevious => write!(f, "confirmed (previous)"),
            ActivationStatus::ConfirmedNoSales => write!(f, "confirmed price, no sales"),
            ActivationStatus::MismatchedOffPlan => write!(f, "mismatched (off plan)"),
            ActivationStatus::MismatchedNoSales => write!(f, "mismatched (no sales)"),
            ActivationStatus::MismatchedCoincidence => write!(f, "mismatched (coincidence)"),
        }
    }
}

/// Which transactions fed the fact price in a price-change week.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WapBasis {
    /// Only transactions from the first sale at the new price onward.
    FromFirstMatch,
    /// The whole week (new price not found, or found too late).
    FullWeek,
}

impl fmt::Display for WapBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WapBasis::FromFirstMatch => write!(f, "from first match"),
            WapBasis::FullWeek => write!(f, "full week"),
        }
    }
}

/// Classifier verdict for one product in one test week.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivationRecord {
    pub product_id: String,
    pub product_name: String,
    pub week_start: NaiveDate,
    pub plan_price_current: f64,
    /// Empty on the first test week.
    pub plan_price_previous: Option<f64>,
    /// The plan price variant not used for matching (raw when rounding is on,
    /// rounded when it is off).
    pub plan_price_unused: Option<f64>,
    pub fact_price: f64,
    pub fact_cost: f64,
    pub fact_price_prev: Option<f64>,
    pub fact_price_change_pct: Option<f64>,
    pub is_fact_change: bool,
    pub fact_price_changed: bool,
    pub fact_matches_plan: bool,
    pub deviation_from_current_pct: Option<f64>,
    pub deviation_from_previous_pct: Option<f64>,
    pub deviation_from_unused_pct: Option<f64>,
    pub has_sales: bool,
    pub status: ActivationStatus,
    pub can_use_in_analysis: bool,
    pub is_price_change_week: bool,
    pub is_first_period: bool,
    pub wap_basis: Option<WapBasis>,
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

/// Why a test week was zeroed out of the effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExclusionReason {
    /// Average stock fell below the baseline-derived floor.
    LowStock,
    /// The classifier could not confirm the planned price.
    PriceMismatch,
}

/// Effect estimate for one product in one test week.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EffectRecord {
    pub product_id: String,
    pub product_name: String,
    pub week_start: NaiveDate,
    pub baseline_revenue: f64,
    pub baseline_profit: f64,
    pub control_baseline_revenue: f64,
    pub control_baseline_profit: f64,
    /// Test revenue used in the uplift ratio (week value or running mean).
    pub actual_revenue: f64,
    pub actual_profit: f64,
    pub control_actual_revenue: f64,
    pub control_actual_profit: f64,
    /// Realized revenue/profit of this week alone.
    pub fact_revenue: f64,
    pub fact_profit: f64,
    pub control_fact_revenue: f64,
    pub control_fact_profit: f64,
    pub effect_revenue_pct: f64,
    pub effect_profit_pct: f64,
    pub abs_effect_revenue: f64,
    pub abs_effect_profit: f64,
    pub avg_stock: f64,
    pub baseline_stock: f64,
    pub is_excluded: bool,
    pub exclusion: Option<ExclusionReason>,
    pub activation_status: Option<ActivationStatus>,
}

/// Why a test product produced no effect records at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    NoPreTestWindow,
    NoBaselineSales,
    /// Product or control baseline revenue is zero, negative or NaN.
    ZeroBaseline,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPreTestWindow => write!(f, "no valid pre-test window"),
            SkipReason::NoBaselineSales => write!(f, "no sales in pre-test weeks"),
            SkipReason::ZeroBaseline => write!(f, "non-positive product or control baseline revenue"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedProduct {
    pub product_id: String,
    pub product_name: String,
    pub reason: SkipReason,
}

/// Per-product totals of an effect run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductEffect {
    pub product_id: String,
    pub product_name: String,
    pub test_start_date: NaiveDate,
    pub test_start_week: NaiveDate,
    pub pretest_weeks: Vec<NaiveDate>,
    pub baseline_stock: f64,
    pub baseline_revenue: f64,
    pub baseline_profit: f64,
    pub control_baseline_revenue: f64,
    pub control_baseline_profit: f64,
    pub total_effect_revenue: f64,
    pub total_effect_profit: f64,
    /// Realized revenue/profit over valid (non-excluded) test weeks.
    pub fact_revenue: f64,
    pub fact_profit: f64,
    pub valid_weeks: usize,
    pub excluded_weeks: usize,
}

impl ProductEffect {
    /// True when every test week was excluded.
    pub fn is_fully_excluded(&self) -> bool {
        self.valid_weeks == 0
    }
}
