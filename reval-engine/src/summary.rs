//! Portfolio-level roll-up of an effect run.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::dataset::Dataset;
use crate::types::{EffectRecord, ProductEffect, SkippedProduct};

/// Products whose total revenue effect falls on one side of zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EffectGroup {
    pub count: usize,
    pub revenue_effect: f64,
    pub profit_effect: f64,
}

impl EffectGroup {
    fn add(&mut self, product: &ProductEffect) {
        self.count += 1;
        self.revenue_effect += product.total_effect_revenue;
        self.profit_effect += product.total_effect_profit;
    }
}

/// Number of order rows taking effect on one date.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevaluationDate {
    pub date: NaiveDate,
    pub products: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub total_abs_effect_revenue: f64,
    pub total_abs_effect_profit: f64,
    /// Realized revenue/profit of valid test weeks.
    pub total_fact_revenue: f64,
    pub total_fact_profit: f64,
    /// Counterfactual: realized minus effect.
    pub revenue_without_effect: f64,
    pub profit_without_effect: f64,
    /// Realized relative to the counterfactual, in percent.
    pub effect_revenue_pct: f64,
    pub effect_profit_pct: f64,
    /// Whole store over the tested span.
    pub store_revenue: f64,
    pub store_profit: f64,
    pub test_share_revenue_pct: f64,
    pub test_share_profit_pct: f64,
    pub test_start_week: Option<NaiveDate>,
    pub test_end_week: Option<NaiveDate>,
    pub test_duration_weeks: usize,
    pub tested_count: usize,
    pub estimated_count: usize,
    pub skipped_count: usize,
    pub fully_excluded_count: usize,
    pub excluded_weeks_count: usize,
    pub missing_cost_sales: usize,
    pub negative_quantity_sales: usize,
    pub revaluation_dates: Vec<RevaluationDate>,
    pub growth: EffectGroup,
    pub decline: EffectGroup,
}

/// `(fact / (fact - effect) - 1) * 100`, 0 when the counterfactual is 0.
fn effect_pct(fact: f64, without_effect: f64) -> f64 {
    if without_effect == 0.0 {
        0.0
    } else {
        (fact / without_effect - 1.0) * 100.0
    }
}

fn share_pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

pub fn summarize(
    dataset: &Dataset,
    records: &[EffectRecord],
    products: &[ProductEffect],
    skipped: &[SkippedProduct],
) -> PortfolioSummary {
    let valid: Vec<&EffectRecord> = records.iter().filter(|r| !r.is_excluded).collect();
    let counted: Vec<&ProductEffect> = products.iter().filter(|p| !p.is_fully_excluded()).collect();

    let total_abs_effect_revenue: f64 = counted.iter().map(|p| p.total_effect_revenue).sum();
    let total_abs_effect_profit: f64 = counted.iter().map(|p| p.total_effect_profit).sum();
    let total_fact_revenue: f64 = valid.iter().map(|r| r.fact_revenue).sum();
    let total_fact_profit: f64 = valid.iter().map(|r| r.fact_profit).sum();
    let revenue_without_effect = total_fact_revenue - total_abs_effect_revenue;
    let profit_without_effect = total_fact_profit - total_abs_effect_profit;

    let test_start_week = valid.iter().map(|r| r.week_start).min();
    let test_end_week = valid.iter().map(|r| r.week_start).max();
    let (store_revenue, store_profit, test_duration_weeks) = match (test_start_week, test_end_week) {
        (Some(start), Some(end)) => {
            let (rev, profit) = dataset.weekly().store_totals(start, end);
            (rev, profit, ((end - start).num_days() / 7 + 1) as usize)
        }
        _ => (0.0, 0.0, 0),
    };

    let mut by_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for order in dataset.all_orders() {
        *by_date.entry(order.effective_date).or_default() += 1;
    }

    let mut growth = EffectGroup::default();
    let mut decline = EffectGroup::default();
    for product in &counted {
        if product.total_effect_revenue > 0.0 {
            growth.add(product);
        } else {
            decline.add(product);
        }
    }

    PortfolioSummary {
        total_abs_effect_revenue,
        total_abs_effect_profit,
        total_fact_revenue,
        total_fact_profit,
        revenue_without_effect,
        profit_without_effect,
        effect_revenue_pct: effect_pct(total_fact_revenue, revenue_without_effect),
        effect_profit_pct: effect_pct(total_fact_profit, profit_without_effect),
        store_revenue,
        store_profit,
        test_share_revenue_pct: share_pct(total_fact_revenue, store_revenue),
        test_share_profit_pct: share_pct(total_fact_profit, store_profit),
        test_start_week,
        test_end_week,
        test_duration_weeks,
        tested_count: dataset.test_products().len(),
        estimated_count: products.len(),
        skipped_count: skipped.len(),
        fully_excluded_count: products.len() - counted.len(),
        excluded_weeks_count: records.len() - valid.len(),
        missing_cost_sales: dataset.missing_cost_sales(),
        negative_quantity_sales: dataset.negative_quantity_sales(),
        revaluation_dates: by_date
            .into_iter()
            .map(|(date, products)| RevaluationDate { date, products })
            .collect(),
        growth,
        decline,
    }
}
