//! Price activation classifier.
//!
//! Walks a test product's weeks from the week of its first price change to
//! the last data week and decides whether the realized price (WAP) matches a
//! planned price. The walk carries state from week to week (last applied plan
//! price, coincidence lock, whether the last week with sales was confirmed),
//! so it is a sequential fold within a product. Products are independent and
//! are classified in parallel.
//!
//! Status rules, in order:
//! - no sales: confirmed if the last week with sales was confirmed
//! - WAP within θ % of the current plan price: confirmed (current)
//! - WAP within θ % of an earlier plan price or the last applied one: confirmed (previous)
//! - first test week with a WAP within 1 % of the last pre-test WAP: coincidence,
//!   locked until the WAP moves more than 1 % week over week
//! - anything else: mismatched (off plan)

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::params::ActivationParams;
use crate::rounding::{apply_policy, round_plan_price};
use crate::thresholds::{COINCIDENCE_LOCK_PCT, FACT_CHANGE_EPSILON_PCT, FACT_PRICE_CHANGED_PCT};
use crate::types::{ActivationRecord, ActivationStatus, PriceChangeOrder, SaleTransaction, WapBasis};
use crate::weekly::{week_end, week_start, weeks_between};

/// Absolute deviation of `fact` from `reference`, in percent of `reference`.
pub fn deviation_pct(fact: f64, reference: f64) -> f64 {
    (fact - reference).abs() / reference * 100.0
}

/// True when `fact` lies within `threshold_pct` of a positive `plan`.
fn matches(fact: f64, plan: f64, threshold_pct: f64) -> bool {
    plan > 0.0 && deviation_pct(fact, plan) <= threshold_pct
}

/// State carried across one product's weeks.
#[derive(Clone, Debug)]
struct WalkState {
    /// WAP of the last week with sales (seeded from the pre-test period).
    prev_fact_price: Option<f64>,
    /// Plan price most recently confirmed as the shelf price.
    last_applied_plan_price: Option<f64>,
    /// Whether the last week with sales ended confirmed.
    last_known_confirmed: bool,
    /// True until the first price-change week has been classified.
    is_first_period: bool,
    /// WAP has not moved since before the test; matches do not count.
    same_price_lock: bool,
}

impl WalkState {
    fn new(prev_fact_price: Option<f64>) -> Self {
        Self {
            prev_fact_price,
            last_applied_plan_price: None,
            last_known_confirmed: false,
            is_first_period: true,
            same_price_lock: false,
        }
    }
}

/// Plan prices in force for one week, after the rounding policy.
#[derive(Clone, Debug)]
struct PlanPrices {
    current: f64,
    previous: Option<f64>,
    unused: Option<f64>,
    /// Every earlier plan price in effective-date order, current excluded.
    earlier: Vec<f64>,
}

impl PlanPrices {
    fn for_week(active: &[PriceChangeOrder], params: &ActivationParams) -> Option<Self> {
        let (current_order, earlier_orders) = active.split_last()?;
        let policy = &params.rounding;
        let raw = current_order.planned_price;
        let unused = if policy.enabled {
            Some(raw)
        } else {
            Some(round_plan_price(raw, policy)).filter(|p| *p > 0.0)
        };
        Some(Self {
            current: apply_policy(raw, policy),
            previous: earlier_orders
                .last()
                .map(|o| apply_policy(o.planned_price, policy)),
            unused,
            earlier: earlier_orders
                .iter()
                .map(|o| apply_policy(o.planned_price, policy))
                .collect(),
        })
    }
}

/// Realized price of one week.
#[derive(Clone, Copy, Debug)]
struct FactPrice {
    price: f64,
    has_sales: bool,
    basis: Option<WapBasis>,
}

fn wap_of<'a>(txs: impl Iterator<Item = &'a SaleTransaction>) -> (f64, bool) {
    let (revenue, quantity) = txs.fold((0.0, 0.0), |(r, q), tx| (r + tx.revenue(), q + tx.quantity));
    if quantity > 0.0 {
        (revenue / quantity, true)
    } else {
        (0.0, false)
    }
}

/// One product's activation walk.
struct Walk<'a> {
    dataset: &'a Dataset,
    product_id: &'a str,
    orders: &'a [PriceChangeOrder],
    transactions: &'a [SaleTransaction],
    params: ActivationParams,
}

impl<'a> Walk<'a> {
    fn full_week_wap(&self, week: NaiveDate) -> (f64, bool) {
        match self.dataset.weekly().product_week(self.product_id, week) {
            Some(agg) if agg.quantity > 0.0 => (agg.revenue / agg.quantity, true),
            _ => (0.0, false),
        }
    }

    /// Transactions of the week dated on or after `from`, in date order.
    fn week_sales_from(
        &self,
        week: NaiveDate,
        from: NaiveDate,
    ) -> impl Iterator<Item = &'a SaleTransaction> + 'a {
        let end = week_end(week);
        let from = from.max(week);
        self.transactions
            .iter()
            .filter(move |tx| tx.date >= from && tx.date <= end)
    }

    /// WAP of the week; in a change week with smart WAP on, counted from the
    /// first sale at the new price when enough of the week remains.
    fn fact_price(&self, week: NaiveDate, change_date: Option<NaiveDate>, plan_current: f64) -> FactPrice {
        let change_date = match change_date {
            Some(d) if self.params.smart_wap => d,
            _ => {
                let (price, has_sales) = self.full_week_wap(week);
                return FactPrice {
                    price,
                    has_sales,
                    basis: None,
                };
            }
        };

        let first_match = self
            .week_sales_from(week, change_date)
            .find(|tx| matches(tx.unit_price, plan_current, self.params.threshold_pct))
            .map(|tx| tx.date);

        if let Some(start) = first_match {
            let days_working = (week_end(week) - start).num_days() + 1;
            if days_working >= self.params.min_days_threshold as i64 {
                let (price, has_sales) = wap_of(self.week_sales_from(week, start));
                return FactPrice {
                    price,
                    has_sales,
                    basis: Some(WapBasis::FromFirstMatch),
                };
            }
        }

        let (price, has_sales) = self.full_week_wap(week);
        FactPrice {
            price,
            has_sales,
            basis: Some(WapBasis::FullWeek),
        }
    }

    /// Earliest order taking effect within `week`, if any.
    fn change_date_in(&self, week: NaiveDate) -> Option<NaiveDate> {
        self.orders
            .iter()
            .map(|o| o.effective_date)
            .find(|d| week_start(*d) == week)
    }

    fn pre_test_wap(&self, first_week: NaiveDate) -> Option<f64> {
        self.dataset
            .weekly()
            .product_weeks(self.product_id)
            .filter(|agg| agg.week_start < first_week && agg.quantity > 0.0)
            .last()
            .and_then(|agg| agg.wap())
    }

    fn classify_week(&self, state: &mut WalkState, week: NaiveDate) -> Option<ActivationRecord> {
        let end = week_end(week);
        let active_count = self.orders.partition_point(|o| o.effective_date <= end);
        let plan = PlanPrices::for_week(&self.orders[..active_count], &self.params)?;

        let change_date = self.change_date_in(week);
        let is_price_change_week = change_date.is_some();
        let fact = self.fact_price(week, change_date, plan.current);
        let theta = self.params.threshold_pct;

        let change_from_prev = if fact.has_sales {
            state
                .prev_fact_price
                .filter(|p| *p > 0.0)
                .map(|p| deviation_pct(fact.price, p))
        } else {
            None
        };

        let status = if fact.has_sales {
            let match_current = matches(fact.price, plan.current, theta);
            let match_previous = if state.is_first_period {
                None
            } else {
                plan.earlier
                    .iter()
                    .copied()
                    .find(|&p| matches(fact.price, p, theta))
            };
            let match_last_applied = state
                .last_applied_plan_price
                .is_some_and(|p| matches(fact.price, p, theta));

            let mut confirmed = match_current || match_previous.is_some() || match_last_applied;
            let mut coincidence = false;

            if state.is_first_period && change_from_prev.is_some_and(|c| c <= COINCIDENCE_LOCK_PCT) {
                state.same_price_lock = true;
            }
            if state.same_price_lock {
                match change_from_prev {
                    Some(c) if c > COINCIDENCE_LOCK_PCT => state.same_price_lock = false,
                    Some(_) => {
                        confirmed = false;
                        coincidence = true;
                    }
                    None => {}
                }
            }

            state.last_known_confirmed = confirmed;
            if confirmed && !state.same_price_lock {
                if match_current {
                    state.last_applied_plan_price = Some(plan.current);
                } else if let Some(p) = match_previous {
                    state.last_applied_plan_price = Some(p);
                }
            }

            if confirmed && match_current {
                ActivationStatus::ConfirmedCurrent
            } else if confirmed {
                ActivationStatus::ConfirmedPrevious
            } else if coincidence {
                ActivationStatus::MismatchedCoincidence
            } else {
                ActivationStatus::MismatchedOffPlan
            }
        } else if state.last_known_confirmed {
            ActivationStatus::ConfirmedNoSales
        } else {
            ActivationStatus::MismatchedNoSales
        };

        let with_sales = |reference: Option<f64>| {
            reference
                .filter(|r| fact.has_sales && *r > 0.0)
                .map(|r| deviation_pct(fact.price, r))
        };
        let fact_cost = self
            .dataset
            .weekly()
            .product_week(self.product_id, week)
            .map_or(0.0, |agg| agg.unit_cost());

        let record = ActivationRecord {
            product_id: self.product_id.to_string(),
            product_name: self.dataset.weekly().product_name(self.product_id),
            week_start: week,
            plan_price_current: plan.current,
            plan_price_previous: plan.previous.filter(|_| !state.is_first_period),
            plan_price_unused: plan.unused,
            fact_price: fact.price,
            fact_cost,
            fact_price_prev: state.prev_fact_price,
            fact_price_change_pct: change_from_prev,
            is_fact_change: change_from_prev.is_some_and(|c| c > FACT_CHANGE_EPSILON_PCT),
            fact_price_changed: change_from_prev.is_some_and(|c| c > FACT_PRICE_CHANGED_PCT),
            fact_matches_plan: fact.has_sales && matches(fact.price, plan.current, theta),
            deviation_from_current_pct: with_sales(Some(plan.current)),
            deviation_from_previous_pct: if state.is_first_period {
                None
            } else {
                with_sales(plan.previous)
            },
            deviation_from_unused_pct: with_sales(plan.unused),
            has_sales: fact.has_sales,
            status,
            can_use_in_analysis: status.can_use_in_analysis(),
            is_price_change_week,
            is_first_period: state.is_first_period,
            wap_basis: fact.basis,
        };

        if fact.has_sales {
            state.prev_fact_price = Some(fact.price);
        }
        if is_price_change_week {
            state.is_first_period = false;
        }
        Some(record)
    }

    fn run(&self) -> Vec<ActivationRecord> {
        let Some(first_order) = self.orders.first() else {
            return Vec::new();
        };
        let Some(last_week) = self.dataset.weekly().last_week() else {
            return Vec::new();
        };
        let first_week = week_start(first_order.effective_date);

        let mut state = WalkState::new(self.pre_test_wap(first_week));
        let records: Vec<ActivationRecord> = weeks_between(first_week, last_week)
            .into_iter()
            .filter_map(|week| self.classify_week(&mut state, week))
            .collect();

        log::debug!(
            "activation {}: {} weeks, {} usable",
            self.product_id,
            records.len(),
            records.iter().filter(|r| r.can_use_in_analysis).count()
        );
        records
    }
}

/// Classify every week of one product, from the week of its first price
/// change through the last data week. Empty for products without orders.
pub fn classify_activation(
    dataset: &Dataset,
    product_id: &str,
    params: &ActivationParams,
) -> Vec<ActivationRecord> {
    Walk {
        dataset,
        product_id,
        orders: dataset.orders(product_id),
        transactions: dataset.transactions(product_id),
        params: params.normalized(),
    }
    .run()
}

/// Classify all test products in parallel. Records are ordered by product
/// id, then week.
pub fn classify_all(dataset: &Dataset, params: &ActivationParams) -> Vec<ActivationRecord> {
    let products = dataset.test_products();
    let per_product: Vec<Vec<ActivationRecord>> = products
        .par_iter()
        .map(|pid| classify_activation(dataset, pid, params))
        .collect();
    per_product.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{RoundDirection, RoundingPolicy};
    use crate::types::SaleRecord;
    use chrono::Duration;

    /// Monday of week `n`; week 0 starts 2025-03-03.
    fn monday(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap() + Duration::weeks(n)
    }

    fn on(week: i64, weekday: i64) -> NaiveDate {
        monday(week) + Duration::days(weekday)
    }

    fn sale(pid: &str, date: NaiveDate, price: f64, qty: f64) -> SaleRecord {
        SaleRecord {
            product_id: pid.into(),
            date,
            unit_price: price,
            quantity: qty,
            product_name: format!("Item {pid}"),
        }
    }

    fn order(date: NaiveDate, price: f64) -> PriceChangeOrder {
        PriceChangeOrder {
            product_id: "P".into(),
            effective_date: date,
            planned_price: price,
            price_before_change: 0.0,
        }
    }

    /// Dataset with "P" selling at `weekly_prices[i]` on the Tuesday of week
    /// `i` (`None` = no sales) and a control product selling through the
    /// Sunday of the last week.
    fn store(weekly_prices: &[Option<f64>], orders: Vec<PriceChangeOrder>) -> Dataset {
        let mut sales = Vec::new();
        for (i, price) in weekly_prices.iter().enumerate() {
            if let Some(p) = price {
                sales.push(sale("P", on(i as i64, 1), *p, 2.0));
            }
            sales.push(sale("C", on(i as i64, 6), 10.0, 1.0));
        }
        Dataset::prepare(&sales, &[], &orders)
    }

    fn params(threshold_pct: f64) -> ActivationParams {
        ActivationParams {
            threshold_pct,
            ..ActivationParams::default()
        }
    }

    fn statuses(records: &[ActivationRecord]) -> Vec<ActivationStatus> {
        records.iter().map(|r| r.status).collect()
    }

    #[test]
    fn rounded_plan_confirms_close_fact_price() {
        let ds = store(&[Some(90.0), Some(100.85)], vec![order(monday(1), 100.0)]);
        let p = ActivationParams {
            threshold_pct: 1.0,
            rounding: RoundingPolicy {
                enabled: true,
                round_value: 90,
                direction: RoundDirection::Up,
            },
            ..ActivationParams::default()
        };
        let recs = classify_activation(&ds, "P", &p);
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert!((r.plan_price_current - 100.90).abs() < 1e-9);
        assert_eq!(r.plan_price_unused, Some(100.0));
        assert_eq!(r.status, ActivationStatus::ConfirmedCurrent);
        assert!(r.can_use_in_analysis);
        assert!(r.deviation_from_current_pct.unwrap() < 0.06);
        assert!(r.is_first_period);
        assert!(r.is_price_change_week);
    }

    #[test]
    fn unchanged_price_in_first_week_is_a_coincidence() {
        // Plan price equals the old shelf price: matches the plan, but nothing moved.
        let ds = store(
            &[Some(100.0), Some(100.0), Some(100.5), None, Some(104.0)],
            vec![order(monday(1), 100.0)],
        );
        let recs = classify_activation(&ds, "P", &params(5.0));
        assert_eq!(
            statuses(&recs),
            vec![
                ActivationStatus::MismatchedCoincidence,
                ActivationStatus::MismatchedCoincidence,
                ActivationStatus::MismatchedNoSales,
                ActivationStatus::ConfirmedCurrent,
            ]
        );
        assert!(!recs[0].can_use_in_analysis);
        assert!(recs[0].fact_matches_plan);
        assert_eq!(recs[0].fact_price_change_pct, Some(0.0));
        assert!(!recs[0].is_fact_change);
        assert!(recs[3].fact_price_changed);
    }

    #[test]
    fn previous_plan_and_no_sales_carry_confirmation() {
        let ds = store(
            &[Some(50.0), Some(60.0), Some(60.0), Some(70.0), None, Some(80.0), None],
            vec![order(monday(1), 60.0), order(monday(2), 70.0)],
        );
        let recs = classify_activation(&ds, "P", &params(2.0));
        assert_eq!(
            statuses(&recs),
            vec![
                ActivationStatus::ConfirmedCurrent,
                ActivationStatus::ConfirmedPrevious,
                ActivationStatus::ConfirmedCurrent,
                ActivationStatus::ConfirmedNoSales,
                ActivationStatus::MismatchedOffPlan,
                ActivationStatus::MismatchedNoSales,
            ]
        );
        // First test week reports no previous plan price.
        assert_eq!(recs[0].plan_price_previous, None);
        assert_eq!(recs[1].plan_price_previous, Some(60.0));
        assert_eq!(recs[1].deviation_from_previous_pct, Some(0.0));
        assert_eq!(recs[0].fact_price_prev, Some(50.0));
        // No-sales week keeps the last fact price.
        assert_eq!(recs[4].fact_price_prev, Some(70.0));
        assert_eq!(recs[3].fact_price, 0.0);
        assert!(!recs[3].has_sales);
    }

    #[test]
    fn earlier_plan_prices_are_not_matched_in_the_first_week() {
        // Two orders in the first change week; only the later one is current.
        let ds = store(
            &[Some(40.0), Some(50.0)],
            vec![order(monday(1), 50.0), order(on(1, 3), 65.0)],
        );
        let recs = classify_activation(&ds, "P", &params(1.0));
        assert_eq!(recs[0].status, ActivationStatus::MismatchedOffPlan);
    }

    fn walk(ds: &Dataset, params: ActivationParams) -> Walk<'_> {
        Walk {
            dataset: ds,
            product_id: "P",
            orders: ds.orders("P"),
            transactions: ds.transactions("P"),
            params: params.normalized(),
        }
    }

    #[test]
    fn first_matching_earlier_plan_wins_and_becomes_last_applied() {
        // 60.5 lies within 2 % of both 60 and 61; the older 60 wins.
        let ds = store(
            &[Some(50.0), Some(60.0), Some(61.0), Some(60.5), Some(59.0)],
            vec![order(monday(1), 60.0), order(monday(2), 61.0), order(monday(3), 80.0)],
        );
        let w = walk(&ds, params(2.0));
        let mut state = WalkState::new(w.pre_test_wap(monday(1)));

        let week1 = w.classify_week(&mut state, monday(1)).unwrap();
        assert_eq!(week1.status, ActivationStatus::ConfirmedCurrent);
        let week2 = w.classify_week(&mut state, monday(2)).unwrap();
        assert_eq!(week2.status, ActivationStatus::ConfirmedCurrent);
        assert_eq!(state.last_applied_plan_price, Some(61.0));

        let week3 = w.classify_week(&mut state, monday(3)).unwrap();
        assert_eq!(week3.status, ActivationStatus::ConfirmedPrevious);
        assert_eq!(state.last_applied_plan_price, Some(60.0));

        // 59 matches 60 but not 61.
        let week4 = w.classify_week(&mut state, monday(4)).unwrap();
        assert_eq!(week4.status, ActivationStatus::ConfirmedPrevious);
        assert_eq!(state.last_applied_plan_price, Some(60.0));

        let statuses_from_run = statuses(&classify_activation(&ds, "P", &params(2.0)));
        assert_eq!(
            statuses_from_run,
            vec![week1.status, week2.status, week3.status, week4.status]
        );
    }

    #[test]
    fn last_applied_plan_price_alone_confirms_the_week() {
        // No earlier plan matches 55; only the carried last applied price does.
        let ds = store(&[Some(50.0), Some(55.0)], vec![order(monday(1), 60.0)]);
        let w = walk(&ds, params(2.0));

        let mut carried = WalkState {
            prev_fact_price: Some(55.0),
            last_applied_plan_price: Some(55.0),
            last_known_confirmed: true,
            is_first_period: false,
            same_price_lock: false,
        };
        let rec = w.classify_week(&mut carried, monday(1)).unwrap();
        assert_eq!(rec.status, ActivationStatus::ConfirmedPrevious);
        assert!(rec.can_use_in_analysis);
        assert!(!rec.fact_matches_plan);
        assert_eq!(carried.last_applied_plan_price, Some(55.0));
        assert!(carried.last_known_confirmed);

        let mut fresh = WalkState::new(w.pre_test_wap(monday(1)));
        let rec = w.classify_week(&mut fresh, monday(1)).unwrap();
        assert_eq!(rec.status, ActivationStatus::MismatchedOffPlan);
        assert_eq!(fresh.last_applied_plan_price, None);
    }

    #[test]
    fn smart_wap_counts_from_first_sale_at_new_price() {
        // Change on Thursday; old price Mon-Wed, new price Thu-Sun.
        let mut sales = vec![sale("P", on(0, 2), 50.0, 3.0), sale("C", on(1, 6), 5.0, 1.0)];
        for d in 0..3 {
            sales.push(sale("P", on(1, d), 50.0, 5.0));
        }
        for d in 3..7 {
            sales.push(sale("P", on(1, d), 60.0, 1.0));
        }
        let ds = Dataset::prepare(&sales, &[], &[order(on(1, 3), 60.0)]);

        let recs = classify_activation(&ds, "P", &params(5.0));
        assert_eq!(recs[0].wap_basis, Some(WapBasis::FromFirstMatch));
        assert!((recs[0].fact_price - 60.0).abs() < 1e-9);
        assert_eq!(recs[0].status, ActivationStatus::ConfirmedCurrent);

        let full = classify_activation(&ds, "P", &ActivationParams { smart_wap: false, ..params(5.0) });
        assert_eq!(full[0].wap_basis, None);
        // (15 * 50 + 4 * 60) / 19
        assert!((full[0].fact_price - 990.0 / 19.0).abs() < 1e-9);
        assert_eq!(full[0].status, ActivationStatus::MismatchedOffPlan);
    }

    #[test]
    fn smart_wap_falls_back_when_too_few_days_remain() {
        // New price first seen on Saturday: 2 days left < 3.
        let mut sales = vec![sale("P", on(0, 2), 50.0, 1.0)];
        for d in 0..5 {
            sales.push(sale("P", on(1, d), 50.0, 1.0));
        }
        sales.push(sale("P", on(1, 5), 60.0, 1.0));
        sales.push(sale("P", on(1, 6), 60.0, 1.0));
        let ds = Dataset::prepare(&sales, &[], &[order(on(1, 2), 60.0)]);
        let recs = classify_activation(&ds, "P", &params(5.0));
        assert_eq!(recs[0].wap_basis, Some(WapBasis::FullWeek));
        assert!((recs[0].fact_price - 370.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn one_record_per_week_through_last_data_week() {
        let ds = store(&[Some(10.0), Some(12.0), None, None, Some(12.0)], vec![order(on(1, 4), 12.0)]);
        let recs = classify_activation(&ds, "P", &params(10.0));
        let weeks: Vec<NaiveDate> = recs.iter().map(|r| r.week_start).collect();
        assert_eq!(weeks, vec![monday(1), monday(2), monday(3), monday(4)]);
        assert!(classify_activation(&ds, "C", &params(10.0)).is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let ds = store(
            &[Some(50.0), Some(60.0), Some(59.0), None, Some(70.0), Some(61.0)],
            vec![order(monday(1), 60.0), order(monday(4), 70.0)],
        );
        let p = params(3.0);
        let first = serde_json::to_string(&classify_all(&ds, &p)).unwrap();
        let second = serde_json::to_string(&classify_all(&ds, &p)).unwrap();
        assert_eq!(first, second);
    }
}
