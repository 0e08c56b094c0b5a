//! Week-by-week view of one test product around its price change.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::dataset::Dataset;
use crate::effect::EffectReport;
use crate::thresholds::{TIMELINE_FALLBACK_WEEKS, TIMELINE_LEAD_WEEKS};
use crate::types::EffectRecord;
use crate::weekly::weeks_between;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PeriodLabel {
    PreTest,
    Test,
    /// Test week zeroed by the stock or activation filter.
    ExcludedTest,
    /// Between the last pre-test week and the test start.
    Transit,
    /// Before the test and not used as baseline.
    LowStockBefore,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineWeek {
    pub week_start: NaiveDate,
    pub label: PeriodLabel,
    pub product_revenue: f64,
    pub product_profit: f64,
    pub control_revenue: f64,
    pub control_profit: f64,
    pub avg_stock: f64,
    pub abs_effect_revenue: f64,
    pub abs_effect_profit: f64,
    pub has_sales: bool,
}

impl TimelineWeek {
    pub fn is_excluded(&self) -> bool {
        matches!(self.label, PeriodLabel::ExcludedTest | PeriodLabel::LowStockBefore)
    }
}

/// Timeline from a few weeks before the baseline through the last data week.
/// Empty for products that are not under test.
pub fn product_timeline(dataset: &Dataset, report: &EffectReport, product_id: &str) -> Vec<TimelineWeek> {
    let Some(calendar) = dataset.calendar(product_id) else {
        return Vec::new();
    };
    let weekly = dataset.weekly();
    let Some(last_week) = weekly.last_week() else {
        return Vec::new();
    };

    let estimated = report.product(product_id);
    let pretest: &[NaiveDate] = estimated.map_or(&[], |p| p.pretest_weeks.as_slice());
    let effects: HashMap<NaiveDate, &EffectRecord> = report
        .product_records(product_id)
        .map(|r| (r.week_start, r))
        .collect();

    let first = match pretest.first() {
        Some(&w) => w - Duration::weeks(TIMELINE_LEAD_WEEKS),
        None => calendar.pretest_search_end - Duration::weeks(TIMELINE_FALLBACK_WEEKS),
    };
    let last_pretest = pretest.last().copied();

    weeks_between(first, last_week)
        .into_iter()
        .map(|week| {
            let effect = effects.get(&week);
            let label = if estimated.is_none() {
                if week < calendar.effect_start_week {
                    PeriodLabel::LowStockBefore
                } else {
                    PeriodLabel::Test
                }
            } else if pretest.contains(&week) {
                PeriodLabel::PreTest
            } else if week >= calendar.effect_start_week {
                if effect.is_some_and(|e| e.is_excluded) {
                    PeriodLabel::ExcludedTest
                } else {
                    PeriodLabel::Test
                }
            } else if last_pretest.is_some_and(|lp| week > lp) {
                PeriodLabel::Transit
            } else {
                PeriodLabel::LowStockBefore
            };

            let product = weekly.product_week(product_id, week);
            let control = weekly.control_week(week);
            TimelineWeek {
                week_start: week,
                label,
                product_revenue: product.map_or(0.0, |a| a.revenue),
                product_profit: product.map_or(0.0, |a| a.profit()),
                control_revenue: control.map_or(0.0, |a| a.revenue),
                control_profit: control.map_or(0.0, |a| a.profit()),
                avg_stock: weekly.stock_week(product_id, week).avg_stock,
                abs_effect_revenue: effect.map_or(0.0, |e| e.abs_effect_revenue),
                abs_effect_profit: effect.map_or(0.0, |e| e.abs_effect_profit),
                has_sales: product.is_some(),
            }
        })
        .collect()
}
