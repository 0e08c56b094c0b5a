//! Per-revaluation activation report: for each date on which price changes
//! took effect, how many of the proposed prices reached the shelf in the
//! planned week, later, or never.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::dataset::Dataset;
use crate::types::{ActivationRecord, ActivationStatus};
use crate::weekly::week_start;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ActivationOutcome {
    /// Usable in the week the change was planned for.
    ActivatedOnTime,
    /// First usable in a later week.
    ActivatedLater,
    /// Never usable.
    Rejected,
}

impl fmt::Display for ActivationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationOutcome::ActivatedOnTime => write!(f, "on time"),
            ActivationOutcome::ActivatedLater => write!(f, "later"),
            ActivationOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

/// One product within one revaluation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevaluationProduct {
    pub revaluation_date: NaiveDate,
    pub planned_week: NaiveDate,
    pub product_id: String,
    pub product_name: String,
    pub outcome: ActivationOutcome,
    pub activation_week: Option<NaiveDate>,
    /// Figures of the activation week, or for rejections of the planned
    /// (or first available) week. Empty when the product was never classified.
    pub plan_price: Option<f64>,
    pub fact_price: Option<f64>,
    pub fact_cost: Option<f64>,
    pub deviation_pct: Option<f64>,
    pub status: Option<ActivationStatus>,
    /// Status in the planned week, when it differs from the reported week.
    pub planned_week_status: Option<ActivationStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevaluationSummary {
    pub revaluation_date: NaiveDate,
    pub planned_week: NaiveDate,
    pub total_proposed: usize,
    pub activated_on_time: usize,
    pub activated_later: usize,
    pub rejected: usize,
    pub on_time_rate_pct: f64,
    pub total_rate_pct: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RevaluationReport {
    /// Ascending by date.
    pub revaluations: Vec<RevaluationSummary>,
    /// Ascending by date, then product id.
    pub products: Vec<RevaluationProduct>,
}

fn rate(part: usize, total: usize) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

fn judge(
    revaluation_date: NaiveDate,
    planned_week: NaiveDate,
    product_id: &str,
    product_name: String,
    weeks: &[&ActivationRecord],
) -> RevaluationProduct {
    let planned = weeks.iter().find(|r| r.week_start == planned_week).copied();

    let (outcome, shown) = if let Some(row) = planned.filter(|r| r.can_use_in_analysis) {
        (ActivationOutcome::ActivatedOnTime, Some(row))
    } else if let Some(row) = weeks
        .iter()
        .find(|r| r.week_start > planned_week && r.can_use_in_analysis)
    {
        (ActivationOutcome::ActivatedLater, Some(*row))
    } else {
        let fallback = planned
            .or_else(|| weeks.iter().find(|r| r.week_start >= planned_week).copied())
            .or_else(|| weeks.first().copied());
        (ActivationOutcome::Rejected, fallback)
    };

    let activation_week = match outcome {
        ActivationOutcome::Rejected => None,
        _ => shown.map(|r| r.week_start),
    };
    let planned_week_status = planned
        .filter(|p| shown.map_or(true, |s| s.week_start != p.week_start))
        .map(|p| p.status);

    RevaluationProduct {
        revaluation_date,
        planned_week,
        product_id: product_id.to_string(),
        product_name,
        outcome,
        activation_week,
        plan_price: shown.map(|r| r.plan_price_current),
        fact_price: shown.map(|r| r.fact_price),
        fact_cost: shown.map(|r| r.fact_cost),
        deviation_pct: shown.and_then(|r| r.deviation_from_current_pct),
        status: shown.map(|r| r.status),
        planned_week_status,
    }
}

/// Group orders by effective date and judge each product's activation.
///
/// `activations` is the output of `classify_all` for the same dataset.
pub fn analyze_revaluations(dataset: &Dataset, activations: &[ActivationRecord]) -> RevaluationReport {
    let mut by_product: HashMap<&str, Vec<&ActivationRecord>> = HashMap::new();
    for record in activations {
        by_product.entry(record.product_id.as_str()).or_default().push(record);
    }
    for weeks in by_product.values_mut() {
        weeks.sort_by_key(|r| r.week_start);
    }

    let mut by_date: BTreeMap<NaiveDate, BTreeSet<&str>> = BTreeMap::new();
    for order in dataset.all_orders() {
        by_date
            .entry(order.effective_date)
            .or_default()
            .insert(order.product_id.as_str());
    }

    let mut report = RevaluationReport::default();
    for (date, product_ids) in by_date {
        let planned_week = week_start(date);
        let mut counts = [0usize; 3];
        for pid in &product_ids {
            let weeks = by_product.get(pid).map_or(&[][..], |v| v.as_slice());
            let row = judge(date, planned_week, pid, dataset.weekly().product_name(pid), weeks);
            counts[row.outcome as usize] += 1;
            report.products.push(row);
        }
        let [on_time, later, rejected] = counts;
        let total = product_ids.len();
        report.revaluations.push(RevaluationSummary {
            revaluation_date: date,
            planned_week,
            total_proposed: total,
            activated_on_time: on_time,
            activated_later: later,
            rejected,
            on_time_rate_pct: rate(on_time, total),
            total_rate_pct: rate(on_time + later, total),
        });
    }

    log::debug!("revaluation report: {} revaluation dates", report.revaluations.len());
    report
}
