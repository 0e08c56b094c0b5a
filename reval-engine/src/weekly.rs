//! Monday-aligned weekly aggregation of sales and stock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::types::{CostRecord, SaleTransaction, Scope, StockWeek, WeeklyAggregate};

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Sunday of the week starting at `week`.
pub fn week_end(week: NaiveDate) -> NaiveDate {
    week + Duration::days(6)
}

/// Every Monday from `start` through `end`, inclusive. Empty when `end < start`.
pub fn weeks_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut weeks = Vec::new();
    let mut w = week_start(start);
    while w <= end {
        weeks.push(w);
        w += Duration::weeks(1);
    }
    weeks
}

/// Display form of a week: `"WW (dd.mm.yyyy-dd.mm.yyyy)"` with the ISO week number.
pub fn format_week(week: NaiveDate) -> String {
    format!(
        "{} ({}-{})",
        week.iso_week().week(),
        week.format("%d.%m.%Y"),
        week_end(week).format("%d.%m.%Y")
    )
}

/// Read-only weekly tables shared by the classifier and the estimator.
#[derive(Clone, Debug, Default)]
pub struct WeeklyTables {
    product: HashMap<String, BTreeMap<NaiveDate, WeeklyAggregate>>,
    control: BTreeMap<NaiveDate, WeeklyAggregate>,
    stock: HashMap<String, BTreeMap<NaiveDate, StockWeek>>,
    test_ids: BTreeSet<String>,
    control_ids: BTreeSet<String>,
    product_names: HashMap<String, String>,
    last_week: Option<NaiveDate>,
    dropped_partial_week: Option<NaiveDate>,
}

impl WeeklyTables {
    pub fn product_week(&self, product_id: &str, week: NaiveDate) -> Option<&WeeklyAggregate> {
        self.product.get(product_id).and_then(|weeks| weeks.get(&week))
    }

    /// All weeks with sales for a product, ascending.
    pub fn product_weeks(&self, product_id: &str) -> impl Iterator<Item = &WeeklyAggregate> {
        self.product
            .get(product_id)
            .into_iter()
            .flat_map(|weeks| weeks.values())
    }

    pub fn control_week(&self, week: NaiveDate) -> Option<&WeeklyAggregate> {
        self.control.get(&week)
    }

    /// Control-group weeks, ascending.
    pub fn control_weeks(&self) -> impl Iterator<Item = &WeeklyAggregate> {
        self.control.values()
    }

    /// Stock observations for a week; zeros when nothing was recorded.
    pub fn stock_week(&self, product_id: &str, week: NaiveDate) -> StockWeek {
        self.stock
            .get(product_id)
            .and_then(|weeks| weeks.get(&week))
            .copied()
            .unwrap_or_default()
    }

    /// True when the product has a sales aggregate for the week.
    pub fn has_sales(&self, product_id: &str, week: NaiveDate) -> bool {
        self.product_week(product_id, week).is_some()
    }

    pub fn test_ids(&self) -> &BTreeSet<String> {
        &self.test_ids
    }

    pub fn control_ids(&self) -> &BTreeSet<String> {
        &self.control_ids
    }

    pub fn product_name(&self, product_id: &str) -> String {
        self.product_names
            .get(product_id)
            .cloned()
            .unwrap_or_else(|| format!("ID {}", product_id))
    }

    /// Last complete week with sales in the dataset.
    pub fn last_week(&self) -> Option<NaiveDate> {
        self.last_week
    }

    /// The partial trailing week that was cut off, if any.
    pub fn dropped_partial_week(&self) -> Option<NaiveDate> {
        self.dropped_partial_week
    }

    /// Store-wide (test + control) revenue and profit over `[from, to]`.
    pub fn store_totals(&self, from: NaiveDate, to: NaiveDate) -> (f64, f64) {
        if from > to {
            return (0.0, 0.0);
        }
        self.product
            .values()
            .flat_map(|weeks| weeks.range(from..=to).map(|(_, agg)| agg))
            .fold((0.0, 0.0), |(rev, profit), agg| {
                (rev + agg.revenue, profit + agg.profit())
            })
    }
}

/// Bucket resolved sales and cost/stock history into weeks.
///
/// Products listed in `test_ids` form the test set; every other product seen
/// in sales is part of the control group. When the last sale day is not a
/// Sunday, the trailing partial week is dropped from every table.
pub fn aggregate_weekly(
    sales: &[SaleTransaction],
    costs: &[CostRecord],
    test_ids: &BTreeSet<String>,
) -> WeeklyTables {
    let mut product_names: HashMap<String, String> = HashMap::new();
    let mut all_products: BTreeSet<String> = BTreeSet::new();
    for tx in sales {
        all_products.insert(tx.product_id.clone());
        product_names
            .entry(tx.product_id.clone())
            .or_insert_with(|| tx.product_name.clone());
    }
    let control_ids: BTreeSet<String> = all_products.difference(test_ids).cloned().collect();

    let cutoff = sales.iter().map(|tx| tx.date).max().and_then(|last_day| {
        if last_day.weekday() == Weekday::Sun {
            None
        } else {
            Some(week_start(last_day))
        }
    });
    let keep = |week: NaiveDate| cutoff.map_or(true, |c| week < c);

    let stock = aggregate_stock(costs, &keep);

    let mut product: HashMap<String, BTreeMap<NaiveDate, WeeklyAggregate>> = HashMap::new();
    let mut control: BTreeMap<NaiveDate, WeeklyAggregate> = BTreeMap::new();
    for tx in sales {
        let week = week_start(tx.date);
        if !keep(week) {
            continue;
        }
        let agg = product
            .entry(tx.product_id.clone())
            .or_default()
            .entry(week)
            .or_insert_with(|| WeeklyAggregate::empty(Scope::Product(tx.product_id.clone()), week));
        add_sale(agg, tx);

        if control_ids.contains(&tx.product_id) {
            let agg = control
                .entry(week)
                .or_insert_with(|| WeeklyAggregate::empty(Scope::Control, week));
            add_sale(agg, tx);
        }
    }

    for (pid, weeks) in product.iter_mut() {
        if let Some(stock_weeks) = stock.get(pid) {
            for (week, agg) in weeks.iter_mut() {
                if let Some(s) = stock_weeks.get(week) {
                    agg.avg_stock = s.avg_stock;
                    agg.stock_days = s.stock_days;
                }
            }
        }
    }

    let last_week = product
        .values()
        .filter_map(|weeks| weeks.keys().next_back().copied())
        .max();

    log::info!(
        "weekly aggregation: {} products ({} test, {} control), last full week {}",
        all_products.len(),
        test_ids.len(),
        control_ids.len(),
        last_week.map_or_else(|| "none".to_string(), format_week)
    );
    if let Some(c) = cutoff {
        log::debug!("dropped partial trailing week {}", format_week(c));
    }

    WeeklyTables {
        product,
        control,
        stock,
        test_ids: test_ids.clone(),
        control_ids,
        product_names,
        last_week,
        dropped_partial_week: cutoff,
    }
}

fn add_sale(agg: &mut WeeklyAggregate, tx: &SaleTransaction) {
    agg.revenue += tx.revenue();
    agg.quantity += tx.quantity;
    agg.cost_volume += tx.cost_volume();
}

/// Average stock and distinct in-stock days per (product, week).
fn aggregate_stock(
    costs: &[CostRecord],
    keep: &dyn Fn(NaiveDate) -> bool,
) -> HashMap<String, BTreeMap<NaiveDate, StockWeek>> {
    struct Acc {
        sum: f64,
        count: usize,
        in_stock_days: BTreeSet<NaiveDate>,
    }

    let mut acc: HashMap<(&str, NaiveDate), Acc> = HashMap::new();
    for record in costs {
        let week = week_start(record.date);
        if !keep(week) {
            continue;
        }
        let entry = acc
            .entry((record.product_id.as_str(), week))
            .or_insert_with(|| Acc {
                sum: 0.0,
                count: 0,
                in_stock_days: BTreeSet::new(),
            });
        entry.sum += record.stock_level;
        entry.count += 1;
        if record.stock_level > 0.0 {
            entry.in_stock_days.insert(record.date);
        }
    }

    let mut out: HashMap<String, BTreeMap<NaiveDate, StockWeek>> = HashMap::new();
    for ((pid, week), a) in acc {
        out.entry(pid.to_string()).or_default().insert(
            week,
            StockWeek {
                avg_stock: a.sum / a.count as f64,
                stock_days: a.in_stock_days.len() as u32,
            },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CostSource;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn tx(pid: &str, date: NaiveDate, price: f64, qty: f64, cost: f64) -> SaleTransaction {
        SaleTransaction {
            product_id: pid.into(),
            date,
            unit_price: price,
            quantity: qty,
            product_name: format!("Item {pid}"),
            unit_cost_at_sale: cost,
            cost_source: CostSource::Backward,
        }
    }

    fn stock(pid: &str, date: NaiveDate, level: f64) -> CostRecord {
        CostRecord {
            product_id: pid.into(),
            date,
            unit_cost: 1.0,
            stock_level: level,
        }
    }

    fn test_set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn week_start_is_monday_aligned() {
        // 2025-01-08 is a Wednesday.
        assert_eq!(week_start(day(1, 8)), day(1, 6));
        assert_eq!(week_start(day(1, 6)), day(1, 6));
        assert_eq!(week_start(day(1, 12)), day(1, 6));
        assert_eq!(week_end(day(1, 6)), day(1, 12));
    }

    #[test]
    fn weeks_between_is_inclusive() {
        let weeks = weeks_between(day(1, 6), day(1, 20));
        assert_eq!(weeks, vec![day(1, 6), day(1, 13), day(1, 20)]);
        assert!(weeks_between(day(1, 20), day(1, 6)).is_empty());
    }

    #[test]
    fn format_week_uses_iso_number() {
        assert_eq!(format_week(day(1, 6)), "2 (06.01.2025-12.01.2025)");
    }

    #[test]
    fn product_and_control_series() {
        let sales = vec![
            tx("T", day(1, 6), 10.0, 2.0, 6.0),
            tx("T", day(1, 8), 12.0, 1.0, 6.0),
            tx("C1", day(1, 7), 5.0, 4.0, 3.0),
            tx("C2", day(1, 12), 20.0, 1.0, 15.0),
        ];
        let tables = aggregate_weekly(&sales, &[], &test_set(&["T"]));

        let t = tables.product_week("T", day(1, 6)).unwrap();
        assert!((t.revenue - 32.0).abs() < 1e-9);
        assert!((t.quantity - 3.0).abs() < 1e-9);
        assert!((t.cost_volume - 18.0).abs() < 1e-9);
        assert_eq!(t.scope, Scope::Product("T".into()));

        let c = tables.control_week(day(1, 6)).unwrap();
        assert!((c.revenue - 40.0).abs() < 1e-9);
        assert!((c.cost_volume - 27.0).abs() < 1e-9);
        assert_eq!(c.scope, Scope::Control);

        assert_eq!(tables.control_ids(), &test_set(&["C1", "C2"]));
        assert_eq!(tables.last_week(), Some(day(1, 6)));
        assert_eq!(tables.dropped_partial_week(), None);
    }

    #[test]
    fn partial_trailing_week_is_dropped() {
        let sales = vec![
            tx("C", day(1, 6), 10.0, 1.0, 0.0),
            tx("C", day(1, 14), 10.0, 1.0, 0.0), // Tuesday of the next week
        ];
        let costs = vec![stock("C", day(1, 14), 3.0)];
        let tables = aggregate_weekly(&sales, &costs, &BTreeSet::new());
        assert_eq!(tables.last_week(), Some(day(1, 6)));
        assert!(tables.control_week(day(1, 13)).is_none());
        assert!(tables.product_week("C", day(1, 13)).is_none());
        assert_eq!(tables.stock_week("C", day(1, 13)), StockWeek::default());
        assert_eq!(tables.dropped_partial_week(), Some(day(1, 13)));
    }

    #[test]
    fn stock_days_count_distinct_in_stock_days() {
        let costs = vec![
            stock("P", day(1, 6), 4.0),
            stock("P", day(1, 6), 4.0), // duplicate day
            stock("P", day(1, 7), 0.0),
            stock("P", day(1, 8), 2.0),
        ];
        let sales = vec![tx("P", day(1, 12), 1.0, 1.0, 0.0)];
        let tables = aggregate_weekly(&sales, &costs, &test_set(&["P"]));
        let s = tables.stock_week("P", day(1, 6));
        assert_eq!(s.stock_days, 2);
        assert!((s.avg_stock - 2.5).abs() < 1e-9);
        let agg = tables.product_week("P", day(1, 6)).unwrap();
        assert_eq!(agg.stock_days, 2);
    }

    #[test]
    fn store_totals_cover_all_products() {
        let sales = vec![
            tx("T", day(1, 6), 10.0, 1.0, 4.0),
            tx("C", day(1, 13), 20.0, 1.0, 5.0),
            tx("C", day(1, 19), 30.0, 1.0, 5.0),
        ];
        let tables = aggregate_weekly(&sales, &[], &test_set(&["T"]));
        let (rev, profit) = tables.store_totals(day(1, 6), day(1, 13));
        assert!((rev - 60.0).abs() < 1e-9);
        assert!((profit - 46.0).abs() < 1e-9);
        assert_eq!(tables.product_name("T"), "Item T");
        assert_eq!(tables.product_name("ZZ"), "ID ZZ");
    }
}
