//! Baseline (pre-test) window selection.
//!
//! A week qualifies when the product was in stock on enough days:
//! `stock_days >= 7 * τ / 100`. Contiguous mode slides an N-week window
//! backwards from the search end; scattered mode collects individual
//! qualifying weeks.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::params::PreTestParams;
use crate::thresholds::{
    DAYS_PER_WEEK, PRETEST_MAX_LOOKBACK_WEEKS, PRETEST_MAX_WINDOW_WEEKS, TIMELINE_FALLBACK_WEEKS,
};
use crate::weekly::{weeks_between, WeeklyTables};

/// Minimum in-stock days a week needs at availability threshold `τ` (percent).
pub fn min_stock_days(threshold_pct: f64) -> f64 {
    DAYS_PER_WEEK * threshold_pct / 100.0
}

/// Find `n` baseline weeks for a product, ending no later than `end_week`.
///
/// Returns the weeks ascending, or `None` when the lookback is exhausted.
/// `n` is clamped to `1..=PRETEST_MAX_WINDOW_WEEKS`.
pub fn select_pretest_window(
    weekly: &WeeklyTables,
    product_id: &str,
    end_week: NaiveDate,
    n: usize,
    threshold_pct: f64,
    contiguous: bool,
) -> Option<Vec<NaiveDate>> {
    let n = n.clamp(1, PRETEST_MAX_WINDOW_WEEKS);
    let min_days = min_stock_days(threshold_pct);
    let qualifies = |week: NaiveDate| weekly.stock_week(product_id, week).stock_days as f64 >= min_days;

    if contiguous {
        let mut window_end = end_week;
        for _ in 0..PRETEST_MAX_LOOKBACK_WEEKS {
            let window_start = window_end - Duration::weeks(n as i64 - 1);
            let window = weeks_between(window_start, window_end);
            if window.iter().all(|&w| qualifies(w)) {
                return Some(window);
            }
            window_end -= Duration::weeks(1);
        }
    } else {
        let mut found = Vec::new();
        let mut week = end_week;
        for _ in 0..PRETEST_MAX_LOOKBACK_WEEKS * 2 {
            if qualifies(week) {
                found.push(week);
                if found.len() == n {
                    found.sort();
                    return Some(found);
                }
            }
            week -= Duration::weeks(1);
        }
    }
    None
}

/// `select_pretest_window` driven by run parameters.
pub fn select_with_params(
    weekly: &WeeklyTables,
    product_id: &str,
    end_week: NaiveDate,
    params: &PreTestParams,
) -> Option<Vec<NaiveDate>> {
    select_pretest_window(
        weekly,
        product_id,
        end_week,
        params.weeks,
        params.stock_threshold_pct,
        params.contiguous,
    )
}

/// Mean average stock over the given weeks; 0 for an empty list.
pub fn base_stock(weekly: &WeeklyTables, product_id: &str, weeks: &[NaiveDate]) -> f64 {
    if weeks.is_empty() {
        return 0.0;
    }
    let total: f64 = weeks
        .iter()
        .map(|&w| weekly.stock_week(product_id, w).avg_stock)
        .sum();
    total / weeks.len() as f64
}

/// How a week looked to the selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PreTestWeekState {
    Selected,
    /// Qualifies on stock but was not needed.
    Available,
    LowStock,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreTestWeekRow {
    pub week_start: NaiveDate,
    pub stock_days: u32,
    pub availability_pct: f64,
    pub avg_stock: f64,
    pub state: PreTestWeekState,
}

/// Week-by-week account of a pre-test search.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreTestSelection {
    pub product_id: String,
    pub search_end: NaiveDate,
    /// Empty when no window was found.
    pub selected_weeks: Vec<NaiveDate>,
    pub base_stock: f64,
    pub rows: Vec<PreTestWeekRow>,
}

/// Run the selector and tabulate every week from the earliest selected week
/// (or eight weeks before the search end when nothing was selected) through
/// the search end.
pub fn selection_report(
    weekly: &WeeklyTables,
    product_id: &str,
    search_end: NaiveDate,
    params: &PreTestParams,
) -> PreTestSelection {
    let selected = select_with_params(weekly, product_id, search_end, params).unwrap_or_default();
    let min_days = min_stock_days(params.stock_threshold_pct);

    let first = selected
        .first()
        .copied()
        .unwrap_or(search_end - Duration::weeks(TIMELINE_FALLBACK_WEEKS));

    let rows = weeks_between(first, search_end)
        .into_iter()
        .map(|week| {
            let stock = weekly.stock_week(product_id, week);
            let state = if selected.contains(&week) {
                PreTestWeekState::Selected
            } else if stock.stock_days as f64 >= min_days {
                PreTestWeekState::Available
            } else {
                PreTestWeekState::LowStock
            };
            PreTestWeekRow {
                week_start: week,
                stock_days: stock.stock_days,
                availability_pct: stock.stock_days as f64 / DAYS_PER_WEEK * 100.0,
                avg_stock: stock.avg_stock,
                state,
            }
        })
        .collect();

    PreTestSelection {
        product_id: product_id.to_string(),
        search_end,
        base_stock: base_stock(weekly, product_id, &selected),
        selected_weeks: selected,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CostRecord, CostSource, SaleTransaction};
    use crate::weekly::aggregate_weekly;
    use std::collections::BTreeSet;

    fn monday(offset_weeks: i64) -> NaiveDate {
        // 2025-03-03 is a Monday.
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap() + Duration::weeks(offset_weeks)
    }

    /// Product "P" with the given number of in-stock days per week, starting at `monday(0)`.
    fn tables(stock_days: &[u32]) -> WeeklyTables {
        let mut costs = Vec::new();
        for (i, &days) in stock_days.iter().enumerate() {
            let week = monday(i as i64);
            for d in 0..7u32 {
                costs.push(CostRecord {
                    product_id: "P".into(),
                    date: week + Duration::days(d as i64),
                    unit_cost: 1.0,
                    stock_level: if d < days { 4.0 } else { 0.0 },
                });
            }
        }
        let last = monday(stock_days.len() as i64 - 1) + Duration::days(6);
        let sales = vec![SaleTransaction {
            product_id: "P".into(),
            date: last,
            unit_price: 1.0,
            quantity: 1.0,
            product_name: "P".into(),
            unit_cost_at_sale: 1.0,
            cost_source: CostSource::Backward,
        }];
        let ids: BTreeSet<String> = ["P".to_string()].into_iter().collect();
        aggregate_weekly(&sales, &costs, &ids)
    }

    #[test]
    fn contiguous_window_skips_past_short_week() {
        // Weeks 0..=5: the 6-day week sits at index 4, search ends at week 5.
        let t = tables(&[7, 7, 7, 7, 6, 7]);
        let got = select_pretest_window(&t, "P", monday(5), 3, 90.0, true).unwrap();
        // Any window touching week 4 fails at 90 % (needs 6.3 days). This is the
        // threshold that rejects a 6-day week; at 80 % it passes (next test).
        assert_eq!(got, vec![monday(1), monday(2), monday(3)]);
    }

    #[test]
    fn six_days_is_enough_at_eighty_percent() {
        let t = tables(&[7, 7, 7, 7, 6, 7]);
        let got = select_pretest_window(&t, "P", monday(5), 3, 80.0, true).unwrap();
        assert_eq!(got, vec![monday(3), monday(4), monday(5)]);
    }

    #[test]
    fn contiguous_fails_without_a_clean_run() {
        let t = tables(&[7, 0, 7, 0, 7]);
        assert_eq!(select_pretest_window(&t, "P", monday(4), 2, 70.0, true), None);
    }

    #[test]
    fn scattered_collects_and_sorts() {
        let t = tables(&[7, 0, 7, 0, 7]);
        let got = select_pretest_window(&t, "P", monday(4), 3, 70.0, false).unwrap();
        assert_eq!(got, vec![monday(0), monday(2), monday(4)]);
    }

    #[test]
    fn oversized_window_is_clamped_instead_of_panicking() {
        let t = tables(&[7, 7, 7]);
        assert_eq!(select_pretest_window(&t, "P", monday(2), usize::MAX / 2, 70.0, true), None);
        assert_eq!(select_pretest_window(&t, "P", monday(2), 1 << 40, 70.0, false), None);
        assert_eq!(
            select_pretest_window(&t, "P", monday(2), 3, 70.0, false),
            Some(vec![monday(0), monday(1), monday(2)])
        );
    }

    #[test]
    fn scattered_gives_up_when_too_few_weeks() {
        let t = tables(&[7, 0, 7]);
        assert_eq!(select_pretest_window(&t, "P", monday(2), 3, 70.0, false), None);
    }

    #[test]
    fn lookback_is_bounded() {
        // One clean week far in the past, then 30 weeks of stockouts.
        let mut days = vec![7, 7];
        days.extend(std::iter::repeat(0).take(30));
        let t = tables(&days);
        assert_eq!(select_pretest_window(&t, "P", monday(31), 2, 50.0, true), None);
    }

    #[test]
    fn report_marks_each_week() {
        let t = tables(&[7, 2, 7, 7]);
        let params = PreTestParams {
            weeks: 2,
            stock_threshold_pct: 70.0,
            contiguous: true,
        };
        let report = selection_report(&t, "P", monday(3), &params);
        assert_eq!(report.selected_weeks, vec![monday(2), monday(3)]);
        assert_eq!(report.rows.len(), 2);
        assert!(report.rows.iter().all(|r| r.state == PreTestWeekState::Selected));
        assert!((report.base_stock - 4.0).abs() < 1e-9);

        let none = selection_report(&t, "P", monday(1), &params);
        assert!(none.selected_weeks.is_empty());
        assert_eq!(none.base_stock, 0.0);
        assert_eq!(none.rows.len(), 9);
        assert_eq!(none.rows[7].state, PreTestWeekState::Available);
        assert_eq!(none.rows[8].state, PreTestWeekState::LowStock);
        assert!((none.rows[8].availability_pct - 200.0 / 7.0).abs() < 1e-9);
    }
}
