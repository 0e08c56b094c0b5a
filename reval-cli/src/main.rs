use std::env;
use std::fs;
use std::process;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use reval_engine::activation::classify_all;
use reval_engine::cost_resolver::backfill_cost_history;
use reval_engine::data_loader::{load_costs_file, load_orders_file, load_sales_file};
use reval_engine::effect::{estimate_effect, EffectReport};
use reval_engine::pretest::selection_report;
use reval_engine::revaluation::{analyze_revaluations, RevaluationReport};
use reval_engine::selector::top_movers;
use reval_engine::timeline::product_timeline;
use reval_engine::weekly::format_week;
use reval_engine::{
    ActivationRecord, Dataset, EffectRecord, PortfolioSummary, ProductEffect, RevalError, RevalResult, RunParams,
    SkippedProduct,
};

// ---------------------------------------------------------------------------
// JSON output contract
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct DigestJson<'a> {
    generated_at: String,
    params: RunParams,
    load_ms: u128,
    run_ms: u128,
    summary: &'a PortfolioSummary,
    top_growth: Vec<ProductEffect>,
    top_decline: Vec<ProductEffect>,
    products: &'a [ProductEffect],
    skipped: &'a [SkippedProduct],
    records: &'a [EffectRecord],
    activations: &'a [ActivationRecord],
    revaluations: &'a RevaluationReport,
}

// ---------------------------------------------------------------------------
// Human-readable output
// ---------------------------------------------------------------------------

/// Format a money amount with comma thousands separators and cents.
fn format_money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };

    let s = whole.to_string();
    let mut grouped = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!(
        "{}{}.{:02}",
        sign,
        grouped.chars().rev().collect::<String>(),
        cents % 100
    )
}

fn format_pct(ratio: f64) -> String {
    format!("{:+.1}%", ratio * 100.0)
}

fn print_summary(report: &EffectReport, revaluations: &RevaluationReport) {
    let s = &report.summary;
    println!();
    println!("  PRICE REVALUATION EFFECT DIGEST");
    println!("  {:\u{2500}<64}", "");
    println!(
        "  {} products tested  \u{00b7}  {} estimated  \u{00b7}  {} skipped  \u{00b7}  {} fully excluded",
        s.tested_count, s.estimated_count, s.skipped_count, s.fully_excluded_count
    );
    match (s.test_start_week, s.test_end_week) {
        (Some(start), Some(end)) => println!(
            "  Test period {} .. {}  ({} weeks)",
            format_week(start),
            format_week(end),
            s.test_duration_weeks
        ),
        _ => println!("  No valid test weeks"),
    }
    println!();
    println!(
        "  Revenue effect  {:>14}  ({} of {} without effect)",
        format_money(s.total_abs_effect_revenue),
        format_pct(s.effect_revenue_pct),
        format_money(s.revenue_without_effect)
    );
    println!(
        "  Profit effect   {:>14}  ({} of {} without effect)",
        format_money(s.total_abs_effect_profit),
        format_pct(s.effect_profit_pct),
        format_money(s.profit_without_effect)
    );
    println!(
        "  Test share of store: {:.1}% revenue, {:.1}% profit",
        s.test_share_revenue_pct, s.test_share_profit_pct
    );
    println!(
        "  Growth: {} products ({})  \u{00b7}  Decline: {} products ({})",
        s.growth.count,
        format_money(s.growth.revenue_effect),
        s.decline.count,
        format_money(s.decline.revenue_effect)
    );
    if s.excluded_weeks_count > 0 || s.missing_cost_sales > 0 || s.negative_quantity_sales > 0 {
        println!(
            "  {} product-weeks excluded  \u{00b7}  {} sales without a known cost  \u{00b7}  {} negative-quantity sales dropped",
            s.excluded_weeks_count, s.missing_cost_sales, s.negative_quantity_sales
        );
    }

    if !revaluations.revaluations.is_empty() {
        println!();
        println!("  {:12} {:>8} {:>8} {:>8} {:>8} {:>9}", "Revaluation", "Proposed", "On time", "Later", "Rejected", "Active %");
        for r in &revaluations.revaluations {
            println!(
                "  {:12} {:>8} {:>8} {:>8} {:>8} {:>8.1}%",
                r.revaluation_date.to_string(),
                r.total_proposed,
                r.activated_on_time,
                r.activated_later,
                r.rejected,
                r.total_rate_pct
            );
        }
    }

    if !report.skipped.is_empty() {
        println!();
        println!("  Skipped:");
        for p in &report.skipped {
            println!("    {:10} {:30} {}", p.product_id, p.product_name, p.reason);
        }
    }
}

fn print_movers(title: &str, products: &[ProductEffect]) {
    if products.is_empty() {
        return;
    }
    println!();
    println!("  {}", title);
    for (i, p) in products.iter().enumerate() {
        println!(
            "  {:>2}. {:10} {:30} revenue {:>12}  profit {:>12}  ({} weeks)",
            i + 1,
            p.product_id,
            p.product_name,
            format_money(p.total_effect_revenue),
            format_money(p.total_effect_profit),
            p.valid_weeks
        );
    }
}

fn print_product(dataset: &Dataset, report: &EffectReport, activations: &[ActivationRecord], params: &RunParams, pid: &str) {
    let Some(calendar) = dataset.calendar(pid) else {
        eprintln!("Product {} has no price change order", pid);
        return;
    };

    println!();
    println!("  PRODUCT {}  {}", pid, dataset.weekly().product_name(pid));
    println!("  {:\u{2500}<64}", "");
    println!(
        "  First change {}  \u{00b7}  effect from {}",
        calendar.first_change_date,
        format_week(calendar.effect_start_week)
    );

    let selection = selection_report(dataset.weekly(), pid, calendar.pretest_search_end, &params.effect.pretest);
    println!();
    println!("  Pre-test weeks (base stock {:.1}):", selection.base_stock);
    for row in &selection.rows {
        println!(
            "    {}  {:>3} days  {:>5.1}%  stock {:>8.1}  {:?}",
            format_week(row.week_start),
            row.stock_days,
            row.availability_pct,
            row.avg_stock,
            row.state
        );
    }

    println!();
    println!("  Activation:");
    for r in activations.iter().filter(|r| r.product_id == pid) {
        println!(
            "    {}  plan {:>9.2}  fact {:>9.2}  {}",
            format_week(r.week_start),
            r.plan_price_current,
            r.fact_price,
            r.status
        );
    }

    println!();
    println!("  Timeline:");
    for w in product_timeline(dataset, report, pid) {
        println!(
            "    {}  {:14} revenue {:>12}  control {:>12}  effect {:>12}",
            format_week(w.week_start),
            format!("{:?}", w.label),
            format_money(w.product_revenue),
            format_money(w.control_revenue),
            format_money(w.abs_effect_revenue)
        );
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn load_params(path: Option<&str>) -> RevalResult<RunParams> {
    let Some(path) = path else {
        return Ok(RunParams::default());
    };
    let raw = fs::read_to_string(path).map_err(|source| RevalError::Io {
        path: path.to_string(),
        source,
    })?;
    RunParams::from_json(&raw)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        eprintln!("Usage: reval-cli <sales.csv> <costs.csv> <orders.csv> [--params FILE] [--top N] [--product ID] [--backfill] [--json]");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --params   JSON run parameters (defaults apply to missing fields)");
        eprintln!("  --top      Number of top growth and decline products (default: 10)");
        eprintln!("  --product  Print pre-test, activation and timeline detail for one product");
        eprintln!("  --backfill Extend each product's cost history back to the first sale date");
        eprintln!("  --json     Output as JSON instead of formatted text");
        eprintln!();
        eprintln!("Example:");
        eprintln!("  reval-cli sales.csv costs.csv orders.csv");
        eprintln!("  reval-cli sales.csv costs.csv orders.csv --params run.json --json");
        process::exit(1);
    }

    let (sales_path, costs_path, orders_path) = (&args[1], &args[2], &args[3]);

    let mut params_path: Option<String> = None;
    let mut top_k: usize = 10;
    let mut product: Option<String> = None;
    let mut backfill = false;
    let mut json_output = false;
    let mut i = 4;
    while i < args.len() {
        match args[i].as_str() {
            "--params" | "--product" | "--top" if i + 1 >= args.len() => {
                eprintln!("Error: {} requires a value", args[i]);
                process::exit(1);
            }
            "--params" => {
                params_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--product" => {
                product = Some(args[i + 1].clone());
                i += 2;
            }
            "--top" => {
                top_k = args[i + 1].parse().unwrap_or_else(|_| {
                    eprintln!("Error: --top requires a positive integer");
                    process::exit(1);
                });
                i += 2;
            }
            "--backfill" => {
                backfill = true;
                i += 1;
            }
            "--json" => {
                json_output = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(1);
            }
        }
    }

    let params = match load_params(params_path.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let load_start = Instant::now();
    let loaded = load_sales_file(sales_path).and_then(|sales| {
        let costs = load_costs_file(costs_path)?;
        let orders = load_orders_file(orders_path)?;
        Ok((sales, costs, orders))
    });
    let (sales, mut costs, orders) = match loaded {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error loading CSV: {}", e);
            process::exit(1);
        }
    };
    if backfill {
        if let Some(first_sale) = sales.iter().map(|s| s.date).min() {
            costs = backfill_cost_history(&costs, first_sale);
        }
    }
    let dataset = Dataset::prepare(&sales, &costs, &orders);
    let load_ms = load_start.elapsed().as_millis();

    if dataset.test_products().is_empty() {
        eprintln!("Error: no price change orders match products in the sales data");
        process::exit(1);
    }

    let run_start = Instant::now();
    let activations = classify_all(&dataset, &params.activation());
    let report = estimate_effect(&dataset, &params.effect);
    let revaluations = analyze_revaluations(&dataset, &activations);
    let (top_growth, top_decline) = top_movers(&report.products, top_k);
    let run_ms = run_start.elapsed().as_millis();
    log::info!("analysis finished in {}ms", run_ms);

    if json_output {
        let digest = DigestJson {
            generated_at: Utc::now().to_rfc3339(),
            params,
            load_ms,
            run_ms,
            summary: &report.summary,
            top_growth,
            top_decline,
            products: &report.products,
            skipped: &report.skipped,
            records: &report.records,
            activations: &activations,
            revaluations: &revaluations,
        };
        match serde_json::to_string_pretty(&digest) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing digest: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    print_summary(&report, &revaluations);
    print_movers("Top growth", &top_growth);
    print_movers("Top decline", &top_decline);
    if let Some(pid) = product.as_deref() {
        print_product(&dataset, &report, &activations, &params, pid);
    }
    println!();
    println!(
        "  \u{23f1}  CSV loaded in {}ms \u{00b7} Analysis ran in {}ms \u{00b7} Total {}ms",
        load_ms,
        run_ms,
        load_ms + run_ms
    );
    println!();
}
