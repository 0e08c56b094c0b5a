//! Unit cost at the moment of sale.
//!
//! For every sale the latest cost record on or before the sale date wins;
//! when the history starts after the sale, the earliest later record is
//! used instead; with no history at all the cost is zero and the sale is
//! tagged `CostSource::Missing`.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

use crate::types::{CostRecord, CostSource, SaleRecord, SaleTransaction};

/// Per-product cost history sorted by date for binary search.
struct CostIndex<'a> {
    by_product: HashMap<&'a str, Vec<&'a CostRecord>>,
}

impl<'a> CostIndex<'a> {
    fn new(costs: &'a [CostRecord]) -> Self {
        let mut by_product: HashMap<&str, Vec<&CostRecord>> = HashMap::new();
        for record in costs {
            by_product
                .entry(record.product_id.as_str())
                .or_default()
                .push(record);
        }
        // Stable sort keeps file order among same-day records; the last one wins backward.
        for records in by_product.values_mut() {
            records.sort_by_key(|r| r.date);
        }
        Self { by_product }
    }

    fn lookup(&self, product_id: &str, date: NaiveDate) -> (f64, CostSource) {
        let Some(records) = self.by_product.get(product_id) else {
            return (0.0, CostSource::Missing);
        };
        // Number of records dated on or before the sale.
        let upto = records.partition_point(|r| r.date <= date);
        if upto > 0 {
            (records[upto - 1].unit_cost, CostSource::Backward)
        } else if let Some(first_after) = records.first() {
            (first_after.unit_cost, CostSource::Forward)
        } else {
            (0.0, CostSource::Missing)
        }
    }
}

/// Attach `unit_cost_at_sale` to every sale. Never fails.
///
/// Output order follows the input order.
pub fn resolve_costs(sales: &[SaleRecord], costs: &[CostRecord]) -> Vec<SaleTransaction> {
    let index = CostIndex::new(costs);

    let resolved: Vec<SaleTransaction> = sales
        .iter()
        .map(|sale| {
            let (unit_cost_at_sale, cost_source) = index.lookup(&sale.product_id, sale.date);
            SaleTransaction {
                product_id: sale.product_id.clone(),
                date: sale.date,
                unit_price: sale.unit_price,
                quantity: sale.quantity,
                product_name: sale.product_name.clone(),
                unit_cost_at_sale,
                cost_source,
            }
        })
        .collect();

    let missing = count_by_source(&resolved, CostSource::Missing);
    if missing > 0 {
        log::warn!(
            "{} of {} sales have no cost history; unit cost set to 0",
            missing,
            resolved.len()
        );
    }
    let forward = count_by_source(&resolved, CostSource::Forward);
    if forward > 0 {
        log::debug!("{} sales resolved cost from a later record", forward);
    }

    resolved
}

/// Count resolved sales by where their cost came from.
pub fn count_by_source(sales: &[SaleTransaction], source: CostSource) -> usize {
    sales.iter().filter(|s| s.cost_source == source).count()
}

/// Extend cost histories that begin after `start` back to `start`.
///
/// For each product whose earliest record is later than `start`, one record
/// per day from `start` to the day before that earliest record is added,
/// copying its cost and stock. The original records are kept as-is.
pub fn backfill_cost_history(records: &[CostRecord], start: NaiveDate) -> Vec<CostRecord> {
    let mut earliest: HashMap<&str, &CostRecord> = HashMap::new();
    for record in records {
        earliest
            .entry(record.product_id.as_str())
            .and_modify(|current| {
                if record.date < current.date {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut products: Vec<&&CostRecord> = earliest.values().collect();
    products.sort_by(|a, b| a.product_id.cmp(&b.product_id));

    let mut out = records.to_vec();
    let mut added = 0usize;
    for first in products {
        let mut day = start;
        while day < first.date {
            out.push(CostRecord {
                product_id: first.product_id.clone(),
                date: day,
                unit_cost: first.unit_cost,
                stock_level: first.stock_level,
            });
            added += 1;
            day += Duration::days(1);
        }
    }
    if added > 0 {
        log::info!("backfilled {} cost records from {}", added, start);
    }
    out
}
