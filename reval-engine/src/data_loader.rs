//! CSV loaders for the three input datasets.
//!
//! Expected CSV columns:
//!   sales:  product_id, date, unit_price, quantity, product_name
//!   costs:  product_id, date, unit_cost, stock_level
//!   orders: product_id, effective_date, planned_price, price_before_change
//!
//! Dates may carry a time component; it is dropped.

use std::io::Read;

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{RevalError, RevalResult};
use crate::types::{CostRecord, PriceChangeOrder, SaleRecord};

#[derive(Debug, Clone, Deserialize)]
struct SalesRow {
    #[serde(deserialize_with = "deserialize_id")]
    product_id: String,
    #[serde(deserialize_with = "deserialize_date")]
    date: NaiveDate,
    unit_price: f64,
    quantity: f64,
    #[serde(default)]
    product_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CostRow {
    #[serde(deserialize_with = "deserialize_id")]
    product_id: String,
    #[serde(deserialize_with = "deserialize_date")]
    date: NaiveDate,
    unit_cost: f64,
    stock_level: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderRow {
    #[serde(deserialize_with = "deserialize_id")]
    product_id: String,
    #[serde(deserialize_with = "deserialize_date")]
    effective_date: NaiveDate,
    planned_price: f64,
    #[serde(default)]
    price_before_change: f64,
}

/// Load sales from a CSV reader.
pub fn load_sales<R: Read>(reader: R) -> RevalResult<Vec<SaleRecord>> {
    let rows: Vec<SalesRow> = read_rows(reader, "sales")?;
    Ok(rows
        .into_iter()
        .map(|r| SaleRecord {
            product_id: r.product_id,
            date: r.date,
            unit_price: r.unit_price,
            quantity: r.quantity,
            product_name: r.product_name,
        })
        .collect())
}

/// Load the cost/stock history from a CSV reader.
pub fn load_costs<R: Read>(reader: R) -> RevalResult<Vec<CostRecord>> {
    let rows: Vec<CostRow> = read_rows(reader, "costs")?;
    Ok(rows
        .into_iter()
        .map(|r| CostRecord {
            product_id: r.product_id,
            date: r.date,
            unit_cost: r.unit_cost,
            stock_level: r.stock_level,
        })
        .collect())
}

/// Load price change orders from a CSV reader.
pub fn load_orders<R: Read>(reader: R) -> RevalResult<Vec<PriceChangeOrder>> {
    let rows: Vec<OrderRow> = read_rows(reader, "orders")?;
    Ok(rows
        .into_iter()
        .map(|r| PriceChangeOrder {
            product_id: r.product_id,
            effective_date: r.effective_date,
            planned_price: r.planned_price,
            price_before_change: r.price_before_change,
        })
        .collect())
}

pub fn load_sales_file(path: &str) -> RevalResult<Vec<SaleRecord>> {
    load_sales(open(path)?)
}

pub fn load_costs_file(path: &str) -> RevalResult<Vec<CostRecord>> {
    load_costs(open(path)?)
}

pub fn load_orders_file(path: &str) -> RevalResult<Vec<PriceChangeOrder>> {
    load_orders(open(path)?)
}

fn open(path: &str) -> RevalResult<std::fs::File> {
    std::fs::File::open(path).map_err(|source| RevalError::Io {
        path: path.to_string(),
        source,
    })
}

fn read_rows<R: Read, T: DeserializeOwned>(reader: R, dataset: &'static str) -> RevalResult<Vec<T>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line_num, result) in csv_reader.deserialize().enumerate() {
        let row: T = result.map_err(|source| RevalError::Csv {
            dataset,
            line: line_num + 2,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Parse the date formats seen in exported sales and cost sheets.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%d.%m.%Y").ok()
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_date(&s).ok_or_else(|| {
        serde::de::Error::custom(format!("expected a date (YYYY-MM-DD or DD.MM.YYYY), got '{}'", s))
    })
}

/// Product ids are often exported as numbers ("4871" vs "4871.0"); keep them textual.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let trimmed = s.trim();
    match trimmed.strip_suffix(".0") {
        Some(stem) if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) => {
            Ok(stem.to_string())
        }
        _ => Ok(trimmed.to_string()),
    }
}
