//! Baseline-normalized effect estimation.
//!
//! For each test product: pick pre-test weeks, average product and control
//! revenue/profit over them, then for every test week compare the product's
//! uplift against its baseline with the control group's uplift against the
//! control baseline over the same weeks. The difference, times the week's
//! realized value, is the absolute effect.

use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;

use crate::activation::classify_activation;
use crate::dataset::Dataset;
use crate::params::{ActualsMode, EffectParams, TotalEffectMode};
use crate::pretest::{base_stock, select_with_params};
use crate::summary::{summarize, PortfolioSummary};
use crate::types::{
    ActivationStatus, EffectRecord, ExclusionReason, ProductEffect, SkipReason, SkippedProduct,
};
use crate::weekly::{weeks_between, WeeklyTables};

/// Relative revenue effect of one week.
///
/// Zero test revenue counts as a full loss (-1). A zero control baseline
/// contributes no control uplift.
pub fn revenue_effect(r_tt: f64, r_tb: f64, r_ct: f64, r_cb: f64) -> f64 {
    let test = if r_tt == 0.0 { -1.0 } else { r_tt / r_tb - 1.0 };
    let control = if r_cb == 0.0 { 0.0 } else { r_ct / r_cb - 1.0 };
    test - control
}

/// Relative profit effect of one week; 0 when the product's profit baseline is 0.
pub fn profit_effect(p_tt: f64, p_tb: f64, p_ct: f64, p_cb: f64) -> f64 {
    if p_tb == 0.0 {
        return 0.0;
    }
    let control = if p_cb == 0.0 { 0.0 } else { p_ct / p_cb - 1.0 };
    (p_tt / p_tb - 1.0) - control
}

/// Product and control means over the pre-test weeks where the product sold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Baseline {
    pub revenue: f64,
    pub profit: f64,
    pub control_revenue: f64,
    pub control_profit: f64,
    /// Pre-test weeks that contributed (the product had sales).
    pub weeks_used: usize,
}

impl Baseline {
    /// `None` when the product sold in none of the weeks.
    pub fn compute(weekly: &WeeklyTables, product_id: &str, weeks: &[NaiveDate]) -> Option<Self> {
        let mut sums = Metrics::default();
        let mut weeks_used = 0usize;
        for &week in weeks {
            if !weekly.has_sales(product_id, week) {
                continue;
            }
            sums.add(&Metrics::of_week(weekly, product_id, week));
            weeks_used += 1;
        }
        if weeks_used == 0 {
            return None;
        }
        let mean = sums.scaled(1.0 / weeks_used as f64);
        Some(Self {
            revenue: mean.revenue,
            profit: mean.profit,
            control_revenue: mean.control_revenue,
            control_profit: mean.control_profit,
            weeks_used,
        })
    }

    /// Product or control baseline revenue is not a positive number.
    fn is_degenerate(&self) -> bool {
        [self.revenue, self.control_revenue]
            .iter()
            .any(|v| v.is_nan() || *v <= 0.0)
    }
}

/// Product and control revenue/profit of one week (or a sum/mean of weeks).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Metrics {
    revenue: f64,
    profit: f64,
    control_revenue: f64,
    control_profit: f64,
}

impl Metrics {
    fn of_week(weekly: &WeeklyTables, product_id: &str, week: NaiveDate) -> Self {
        let (revenue, profit) = weekly
            .product_week(product_id, week)
            .map_or((0.0, 0.0), |agg| (agg.revenue, agg.profit()));
        let (control_revenue, control_profit) = weekly
            .control_week(week)
            .map_or((0.0, 0.0), |agg| (agg.revenue, agg.profit()));
        Self {
            revenue,
            profit,
            control_revenue,
            control_profit,
        }
    }

    fn add(&mut self, other: &Metrics) {
        self.revenue += other.revenue;
        self.profit += other.profit;
        self.control_revenue += other.control_revenue;
        self.control_profit += other.control_profit;
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            revenue: self.revenue * factor,
            profit: self.profit * factor,
            control_revenue: self.control_revenue * factor,
            control_profit: self.control_profit * factor,
        }
    }
}

/// Result of estimating one product.
#[derive(Clone, Debug, PartialEq)]
pub enum ProductOutcome {
    Estimated {
        product: ProductEffect,
        weeks: Vec<EffectRecord>,
    },
    Skipped(SkippedProduct),
}

/// Everything an effect run produces.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EffectReport {
    /// Ordered by product id, then week.
    pub records: Vec<EffectRecord>,
    pub products: Vec<ProductEffect>,
    pub skipped: Vec<SkippedProduct>,
    pub summary: PortfolioSummary,
}

impl EffectReport {
    pub fn product(&self, product_id: &str) -> Option<&ProductEffect> {
        self.products.iter().find(|p| p.product_id == product_id)
    }

    pub fn product_records<'a>(&'a self, product_id: &'a str) -> impl Iterator<Item = &'a EffectRecord> + 'a {
        self.records.iter().filter(move |r| r.product_id == product_id)
    }
}

/// Estimate one test product.
pub fn estimate_product(dataset: &Dataset, product_id: &str, params: &EffectParams) -> ProductOutcome {
    let weekly = dataset.weekly();
    let product_name = weekly.product_name(product_id);
    let skip = |reason: SkipReason| {
        log::warn!("product {} skipped: {}", product_id, reason);
        ProductOutcome::Skipped(SkippedProduct {
            product_id: product_id.to_string(),
            product_name: product_name.clone(),
            reason,
        })
    };

    let Some(calendar) = dataset.calendar(product_id) else {
        return skip(SkipReason::NoPreTestWindow);
    };
    let Some(pretest_weeks) =
        select_with_params(weekly, product_id, calendar.pretest_search_end, &params.pretest)
    else {
        return skip(SkipReason::NoPreTestWindow);
    };
    let baseline_stock = base_stock(weekly, product_id, &pretest_weeks);
    let Some(baseline) = Baseline::compute(weekly, product_id, &pretest_weeks) else {
        return skip(SkipReason::NoBaselineSales);
    };
    if baseline.is_degenerate() {
        return skip(SkipReason::ZeroBaseline);
    }

    let statuses: HashMap<NaiveDate, ActivationStatus> = params
        .activation
        .map(|a| {
            classify_activation(dataset, product_id, &a)
                .into_iter()
                .map(|r| (r.week_start, r.status))
                .collect()
        })
        .unwrap_or_default();

    let test_weeks = weekly
        .last_week()
        .map(|last| weeks_between(calendar.effect_start_week, last))
        .unwrap_or_default();
    let stock_floor = baseline_stock * params.stock_floor_factor();

    let mut records = Vec::with_capacity(test_weeks.len());
    let mut valid_sum = Metrics::default();
    let mut valid_count = 0usize;

    for week in test_weeks {
        let avg_stock = weekly.stock_week(product_id, week).avg_stock;
        let activation_status = statuses.get(&week).copied();
        let exclusion = if params.use_stock_filter && avg_stock < stock_floor {
            Some(ExclusionReason::LowStock)
        } else if activation_status.is_some_and(ActivationStatus::is_mismatched) {
            Some(ExclusionReason::PriceMismatch)
        } else {
            None
        };

        let mut record = EffectRecord {
            product_id: product_id.to_string(),
            product_name: product_name.clone(),
            week_start: week,
            baseline_revenue: baseline.revenue,
            baseline_profit: baseline.profit,
            control_baseline_revenue: baseline.control_revenue,
            control_baseline_profit: baseline.control_profit,
            actual_revenue: 0.0,
            actual_profit: 0.0,
            control_actual_revenue: 0.0,
            control_actual_profit: 0.0,
            fact_revenue: 0.0,
            fact_profit: 0.0,
            control_fact_revenue: 0.0,
            control_fact_profit: 0.0,
            effect_revenue_pct: 0.0,
            effect_profit_pct: 0.0,
            abs_effect_revenue: 0.0,
            abs_effect_profit: 0.0,
            avg_stock,
            baseline_stock,
            is_excluded: exclusion.is_some(),
            exclusion,
            activation_status,
        };
        if exclusion.is_some() {
            records.push(record);
            continue;
        }

        let fact = Metrics::of_week(weekly, product_id, week);
        valid_sum.add(&fact);
        valid_count += 1;
        let actual = match params.actuals {
            ActualsMode::WeekValues => fact,
            ActualsMode::RunningAverage => valid_sum.scaled(1.0 / valid_count as f64),
        };

        let effect_revenue = revenue_effect(
            actual.revenue,
            baseline.revenue,
            actual.control_revenue,
            baseline.control_revenue,
        );
        let effect_profit = profit_effect(
            actual.profit,
            baseline.profit,
            actual.control_profit,
            baseline.control_profit,
        );

        record.actual_revenue = actual.revenue;
        record.actual_profit = actual.profit;
        record.control_actual_revenue = actual.control_revenue;
        record.control_actual_profit = actual.control_profit;
        record.fact_revenue = fact.revenue;
        record.fact_profit = fact.profit;
        record.control_fact_revenue = fact.control_revenue;
        record.control_fact_profit = fact.control_profit;
        record.effect_revenue_pct = effect_revenue;
        record.effect_profit_pct = effect_profit;
        record.abs_effect_revenue = effect_revenue * fact.revenue;
        record.abs_effect_profit = effect_profit * fact.profit;
        records.push(record);
    }

    let product = total_product_effect(
        product_id,
        product_name.clone(),
        calendar.first_change_date,
        calendar.effect_start_week,
        pretest_weeks,
        baseline_stock,
        &baseline,
        &records,
        params.total_mode,
    );
    log::debug!(
        "effect {}: {} valid / {} excluded weeks, revenue effect {:.2}",
        product_id,
        product.valid_weeks,
        product.excluded_weeks,
        product.total_effect_revenue
    );
    ProductOutcome::Estimated {
        product,
        weeks: records,
    }
}

#[allow(clippy::too_many_arguments)]
fn total_product_effect(
    product_id: &str,
    product_name: String,
    test_start_date: NaiveDate,
    test_start_week: NaiveDate,
    pretest_weeks: Vec<NaiveDate>,
    baseline_stock: f64,
    baseline: &Baseline,
    records: &[EffectRecord],
    mode: TotalEffectMode,
) -> ProductEffect {
    let valid: Vec<&EffectRecord> = records.iter().filter(|r| !r.is_excluded).collect();
    let fact_revenue: f64 = valid.iter().map(|r| r.fact_revenue).sum();
    let fact_profit: f64 = valid.iter().map(|r| r.fact_profit).sum();

    let (total_effect_revenue, total_effect_profit) = match mode {
        TotalEffectMode::WeeklySum => (
            valid.iter().map(|r| r.abs_effect_revenue).sum(),
            valid.iter().map(|r| r.abs_effect_profit).sum(),
        ),
        TotalEffectMode::LastWeekTimesTotal => valid.last().map_or((0.0, 0.0), |last| {
            (
                last.effect_revenue_pct * fact_revenue,
                last.effect_profit_pct * fact_profit,
            )
        }),
    };

    ProductEffect {
        product_id: product_id.to_string(),
        product_name,
        test_start_date,
        test_start_week,
        pretest_weeks,
        baseline_stock,
        baseline_revenue: baseline.revenue,
        baseline_profit: baseline.profit,
        control_baseline_revenue: baseline.control_revenue,
        control_baseline_profit: baseline.control_profit,
        total_effect_revenue,
        total_effect_profit,
        fact_revenue,
        fact_profit,
        valid_weeks: valid.len(),
        excluded_weeks: records.len() - valid.len(),
    }
}

/// Estimate every test product in parallel and summarize the portfolio.
pub fn estimate_effect(dataset: &Dataset, params: &EffectParams) -> EffectReport {
    let params = params.normalized();
    let products = dataset.test_products();
    let outcomes: Vec<ProductOutcome> = products
        .par_iter()
        .map(|pid| estimate_product(dataset, pid, &params))
        .collect();

    let mut records = Vec::new();
    let mut estimated = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            ProductOutcome::Estimated { product, weeks } => {
                records.extend(weeks);
                estimated.push(product);
            }
            ProductOutcome::Skipped(s) => skipped.push(s),
        }
    }

    let summary = summarize(dataset, &records, &estimated, &skipped);
    log::info!(
        "effect run: {} products estimated, {} skipped, total revenue effect {:.2}",
        estimated.len(),
        skipped.len(),
        summary.total_abs_effect_revenue
    );

    EffectReport {
        records,
        products: estimated,
        skipped,
        summary,
    }
}
