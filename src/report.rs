//! The reporting façade: dashboard assembly, top categories, explicit
//! generation.
//!
//! Reads come from the analytics cache. The current bucket is generated
//! lazily when it has no cached tuple yet; the historical series only ever
//! returns tuples that already exist. Growth compares the current bucket
//! against the immediately preceding one.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use itertools::Itertools;
use log::info;
use serde::Serialize;

use crate::{
    aggregate::{self, Period},
    cli::{CategoriesArgs, DashboardArgs, GenerateArgs},
    data,
    error::{MetricsError, Result},
    growth::{self, GrowthRates},
    store::{Metrics, Store},
    table,
};

pub const TOP_CATEGORY_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub date: NaiveDateTime,
    pub revenue: f64,
    pub orders: u64,
    pub customers: u64,
    pub avg_order_value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySlice {
    pub category: String,
    pub revenue: f64,
    pub orders: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub current_metrics: Metrics,
    pub historical_data: Vec<HistoryPoint>,
    pub growth_rates: GrowthRates,
    pub top_categories: Vec<CategorySlice>,
}

/// Assembles the full dashboard read model for one user and period.
pub fn dashboard(
    store: &mut Store,
    user: &str,
    period: Period,
    timeframe: usize,
    reference: NaiveDateTime,
) -> Result<Dashboard> {
    let start = aggregate::bucket_start(period, reference)?;
    let current_metrics = match store.metrics_at(user, period, start) {
        Some(tuple) => tuple.metrics,
        None => aggregate::generate(store, user, period, reference)?.metrics,
    };

    let historical_data = aggregate::historical(store, user, period, timeframe, reference)?
        .into_iter()
        .map(|tuple| HistoryPoint {
            date: tuple.bucket_start,
            revenue: tuple.metrics.total_revenue,
            orders: tuple.metrics.total_orders,
            customers: tuple.metrics.unique_customers,
            avg_order_value: tuple.metrics.avg_order_value,
        })
        .collect();

    let previous_start = aggregate::previous_bucket_start(period, start)?;
    let previous = store
        .metrics_at(user, period, previous_start)
        .map(|tuple| tuple.metrics);
    let growth_rates = growth::growth_between(&current_metrics, previous.as_ref());

    Ok(Dashboard {
        current_metrics,
        historical_data,
        growth_rates,
        top_categories: top_categories(store, user)?,
    })
}

/// Groups every normalized record by category, sums revenue and counts
/// orders, and keeps the top [`TOP_CATEGORY_LIMIT`] by revenue. Records with
/// an empty category fall under "Uncategorized".
pub fn top_categories(store: &Store, user: &str) -> Result<Vec<CategorySlice>> {
    let mut totals: HashMap<String, (f64, u64)> = HashMap::new();
    for record in store.records_for_user(user)? {
        let label = if record.fields.category.is_empty() {
            "Uncategorized".to_string()
        } else {
            record.fields.category.clone()
        };
        let entry = totals.entry(label).or_insert((0.0, 0));
        entry.0 += record.fields.revenue;
        entry.1 += 1;
    }
    Ok(totals
        .into_iter()
        .map(|(category, (revenue, orders))| CategorySlice {
            category,
            revenue,
            orders,
        })
        .sorted_by(|a, b| {
            b.revenue
                .total_cmp(&a.revenue)
                .then_with(|| a.category.cmp(&b.category))
        })
        .take(TOP_CATEGORY_LIMIT)
        .collect())
}

pub fn execute_dashboard(args: &DashboardArgs) -> anyhow::Result<()> {
    let mut store = Store::open(&args.store)?;
    let reference = resolve_reference(args.date.as_deref())?;
    let dashboard = dashboard(&mut store, &args.user, args.period, args.timeframe, reference)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&dashboard)?);
        return Ok(());
    }

    let metrics = &dashboard.current_metrics;
    table::print_table(
        &["metric".to_string(), "value".to_string()],
        &[
            vec!["total_revenue".to_string(), fmt_amount(metrics.total_revenue)],
            vec!["total_orders".to_string(), metrics.total_orders.to_string()],
            vec![
                "unique_customers".to_string(),
                metrics.unique_customers.to_string(),
            ],
            vec![
                "avg_order_value".to_string(),
                fmt_amount(metrics.avg_order_value),
            ],
            vec!["new_customers".to_string(), metrics.new_customers.to_string()],
            vec![
                "returning_customers".to_string(),
                metrics.returning_customers.to_string(),
            ],
        ],
    );

    println!();
    table::print_table(
        &["growth".to_string(), "percent".to_string()],
        &[
            vec![
                "revenue".to_string(),
                fmt_amount(dashboard.growth_rates.revenue_growth),
            ],
            vec![
                "customers".to_string(),
                fmt_amount(dashboard.growth_rates.customer_growth),
            ],
            vec![
                "orders".to_string(),
                fmt_amount(dashboard.growth_rates.order_growth),
            ],
        ],
    );

    if !dashboard.historical_data.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = dashboard
            .historical_data
            .iter()
            .map(|point| {
                vec![
                    point.date.format("%Y-%m-%d").to_string(),
                    fmt_amount(point.revenue),
                    point.orders.to_string(),
                    point.customers.to_string(),
                    fmt_amount(point.avg_order_value),
                ]
            })
            .collect();
        table::print_table(
            &[
                "bucket".to_string(),
                "revenue".to_string(),
                "orders".to_string(),
                "customers".to_string(),
                "avg_order_value".to_string(),
            ],
            &rows,
        );
    }

    if !dashboard.top_categories.is_empty() {
        println!();
        print_categories(&dashboard.top_categories);
    }
    Ok(())
}

pub fn execute_categories(args: &CategoriesArgs) -> anyhow::Result<()> {
    let store = Store::open(&args.store)?;
    let categories = top_categories(&store, &args.user)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
    } else {
        print_categories(&categories);
    }
    Ok(())
}

pub fn execute_generate(args: &GenerateArgs) -> anyhow::Result<()> {
    let mut store = Store::open(&args.store)?;
    let reference = resolve_reference(args.date.as_deref())?;
    let tuple = aggregate::generate(&mut store, &args.user, args.period, reference)?;
    info!(
        "{} analytics generated for bucket starting {}",
        args.period,
        tuple.bucket_start.format("%Y-%m-%d")
    );
    println!(
        "{} metrics for bucket {}: revenue {} across {} order(s)",
        args.period,
        tuple.bucket_start.format("%Y-%m-%d"),
        fmt_amount(tuple.metrics.total_revenue),
        tuple.metrics.total_orders
    );
    Ok(())
}

fn print_categories(categories: &[CategorySlice]) {
    let rows: Vec<Vec<String>> = categories
        .iter()
        .map(|slice| {
            vec![
                slice.category.clone(),
                fmt_amount(slice.revenue),
                slice.orders.to_string(),
            ]
        })
        .collect();
    table::print_table(
        &[
            "category".to_string(),
            "revenue".to_string(),
            "orders".to_string(),
        ],
        &rows,
    );
}

/// `--date` override for backfill and reproducible reads; defaults to now.
fn resolve_reference(date: Option<&str>) -> Result<NaiveDateTime> {
    match date {
        Some(value) => data::parse_datestamp(value).ok_or_else(|| {
            MetricsError::validation(format!("Invalid reference date '{value}'"))
        }),
        None => Ok(Utc::now().naive_utc()),
    }
}

fn fmt_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}
