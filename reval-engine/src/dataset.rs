//! Prepared inputs of one engine run.
//!
//! `Dataset::prepare` resolves costs, builds the weekly tables and indexes
//! orders and transactions per product. Everything is read-only afterwards,
//! so per-product walks can run in parallel against it.

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;

use crate::cost_resolver::{count_by_source, resolve_costs};
use crate::types::{CostRecord, CostSource, PriceChangeOrder, SaleRecord, SaleTransaction};
use crate::weekly::{aggregate_weekly, week_start, WeeklyTables};

/// Key weeks of a test product, derived from its first price-change order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TestCalendar {
    pub first_change_date: NaiveDate,
    /// Monday of the week containing the first change; activation starts here.
    pub change_week: NaiveDate,
    /// Last week the pre-test search may use.
    pub pretest_search_end: NaiveDate,
    /// First week counted as test evidence. A change effective mid-week makes
    /// that week transit and the test starts the week after.
    pub effect_start_week: NaiveDate,
}

impl TestCalendar {
    pub fn from_first_change(first_change_date: NaiveDate) -> Self {
        let change_week = week_start(first_change_date);
        let effect_start_week = if first_change_date.weekday() == Weekday::Mon {
            change_week
        } else {
            change_week + Duration::weeks(1)
        };
        Self {
            first_change_date,
            change_week,
            pretest_search_end: change_week - Duration::weeks(1),
            effect_start_week,
        }
    }
}

pub struct Dataset {
    weekly: WeeklyTables,
    orders: HashMap<String, Vec<PriceChangeOrder>>,
    transactions: HashMap<String, Vec<SaleTransaction>>,
    missing_cost_sales: usize,
    negative_quantity_sales: usize,
}

impl Dataset {
    /// Resolve costs and aggregate the three raw datasets.
    pub fn prepare(sales: &[SaleRecord], costs: &[CostRecord], orders: &[PriceChangeOrder]) -> Self {
        let resolved = resolve_costs(sales, costs);
        Self::from_resolved(resolved, costs, orders)
    }

    /// Build from sales that already carry their unit cost.
    ///
    /// Sales with a negative (or NaN) quantity are dropped and counted.
    pub fn from_resolved(
        mut sales: Vec<SaleTransaction>,
        costs: &[CostRecord],
        orders: &[PriceChangeOrder],
    ) -> Self {
        let mut by_product: HashMap<String, Vec<PriceChangeOrder>> = HashMap::new();
        for order in orders {
            by_product
                .entry(order.product_id.clone())
                .or_default()
                .push(order.clone());
        }
        for list in by_product.values_mut() {
            list.sort_by_key(|o| o.effective_date);
        }
        let test_ids: BTreeSet<String> = by_product.keys().cloned().collect();

        let before = sales.len();
        sales.retain(|tx| tx.quantity >= 0.0);
        let negative_quantity_sales = before - sales.len();
        if negative_quantity_sales > 0 {
            log::warn!("dropped {} sales with a negative quantity", negative_quantity_sales);
        }

        let weekly = aggregate_weekly(&sales, costs, &test_ids);
        let missing_cost_sales = count_by_source(&sales, CostSource::Missing);

        let mut transactions: HashMap<String, Vec<SaleTransaction>> = HashMap::new();
        for tx in sales {
            if test_ids.contains(&tx.product_id) {
                transactions.entry(tx.product_id.clone()).or_default().push(tx);
            }
        }
        // Stable: same-day transactions keep file order.
        for list in transactions.values_mut() {
            list.sort_by_key(|tx| tx.date);
        }

        log::info!(
            "dataset prepared: {} test products, {} orders, {} sales without cost",
            test_ids.len(),
            orders.len(),
            missing_cost_sales
        );

        Self {
            weekly,
            orders: by_product,
            transactions,
            missing_cost_sales,
            negative_quantity_sales,
        }
    }

    pub fn weekly(&self) -> &WeeklyTables {
        &self.weekly
    }

    /// Orders of a product, ascending by effective date.
    pub fn orders(&self, product_id: &str) -> &[PriceChangeOrder] {
        self.orders.get(product_id).map_or(&[], |v| v.as_slice())
    }

    /// Resolved sales of a test product, ascending by date.
    pub fn transactions(&self, product_id: &str) -> &[SaleTransaction] {
        self.transactions.get(product_id).map_or(&[], |v| v.as_slice())
    }

    /// Test product ids in ascending order.
    pub fn test_products(&self) -> Vec<&str> {
        self.weekly.test_ids().iter().map(String::as_str).collect()
    }

    pub fn all_orders(&self) -> impl Iterator<Item = &PriceChangeOrder> {
        self.orders.values().flatten()
    }

    pub fn calendar(&self, product_id: &str) -> Option<TestCalendar> {
        self.orders(product_id)
            .first()
            .map(|o| TestCalendar::from_first_change(o.effective_date))
    }

    /// Sales whose cost could not be resolved (data-quality signal).
    pub fn missing_cost_sales(&self) -> usize {
        self.missing_cost_sales
    }

    /// Sales dropped for a negative quantity (data-quality signal).
    pub fn negative_quantity_sales(&self) -> usize {
        self.negative_quantity_sales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn order(pid: &str, date: NaiveDate, price: f64) -> PriceChangeOrder {
        PriceChangeOrder {
            product_id: pid.into(),
            effective_date: date,
            planned_price: price,
            price_before_change: 0.0,
        }
    }

    fn sale(pid: &str, date: NaiveDate) -> SaleRecord {
        SaleRecord {
            product_id: pid.into(),
            date,
            unit_price: 10.0,
            quantity: 1.0,
            product_name: pid.into(),
        }
    }

    #[test]
    fn monday_change_starts_test_in_the_same_week() {
        let cal = TestCalendar::from_first_change(day(1, 13));
        assert_eq!(cal.change_week, day(1, 13));
        assert_eq!(cal.effect_start_week, day(1, 13));
        assert_eq!(cal.pretest_search_end, day(1, 6));
    }

    #[test]
    fn midweek_change_makes_the_week_transit() {
        let cal = TestCalendar::from_first_change(day(1, 16));
        assert_eq!(cal.change_week, day(1, 13));
        assert_eq!(cal.effect_start_week, day(1, 20));
        assert_eq!(cal.pretest_search_end, day(1, 6));
    }

    #[test]
    fn orders_are_sorted_and_define_the_test_set() {
        let orders = vec![order("A", day(2, 3), 12.0), order("A", day(1, 16), 11.0)];
        let sales = vec![sale("A", day(1, 6)), sale("B", day(1, 6))];
        let ds = Dataset::prepare(&sales, &[], &orders);
        assert_eq!(ds.test_products(), vec!["A"]);
        assert_eq!(ds.orders("A")[0].effective_date, day(1, 16));
        assert_eq!(ds.calendar("A").unwrap().first_change_date, day(1, 16));
        assert!(ds.calendar("B").is_none());
        assert_eq!(ds.transactions("A").len(), 1);
        assert!(ds.transactions("B").is_empty());
        assert_eq!(ds.missing_cost_sales(), 2);
    }

    #[test]
    fn negative_quantity_sales_are_dropped_and_counted() {
        let mut refund = sale("A", day(1, 7));
        refund.quantity = -4.0;
        let sales = vec![sale("A", day(1, 6)), refund, sale("B", day(1, 6))];
        let ds = Dataset::prepare(&sales, &[], &[order("A", day(1, 13), 11.0)]);
        assert_eq!(ds.negative_quantity_sales(), 1);
        assert_eq!(ds.transactions("A").len(), 1);
        let week = ds.weekly().product_week("A", day(1, 6)).unwrap();
        assert_eq!(week.quantity, 1.0);
        assert_eq!(week.revenue, 10.0);
    }
}
