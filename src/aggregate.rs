//! Period bucketing and metric reduction.
//!
//! Buckets are half-open intervals `[start, end)` of one day, one week, or
//! one calendar month. Weeks start on Monday (ISO 8601); this convention is
//! pinned here rather than inherited from a library default. Aggregation is a
//! full-replace upsert per (user, period, bucket start), so re-running a
//! generation is always safe.

use std::collections::HashMap;
use std::fmt;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    error::{MetricsError, Result},
    store::{DataRecord, Metrics, MetricsTuple, Store},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Result<Period> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(MetricsError::validation(format!(
                "Invalid period '{other}'; expected daily, weekly, or monthly"
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Start of the bucket containing `reference`: start of day, start of the
/// ISO week (Monday), or first of the month, always at midnight.
pub fn bucket_start(period: Period, reference: NaiveDateTime) -> Result<NaiveDateTime> {
    let day = reference.date();
    let date = match period {
        Period::Daily => day,
        Period::Weekly => day
            .checked_sub_signed(Duration::days(
                i64::from(day.weekday().num_days_from_monday()),
            ))
            .ok_or_else(|| MetricsError::aggregation("week start underflows the calendar"))?,
        Period::Monthly => NaiveDate::from_ymd_opt(day.year(), day.month(), 1)
            .ok_or_else(|| MetricsError::aggregation("month start out of range"))?,
    };
    Ok(date.and_time(NaiveTime::MIN))
}

/// Bucket start advanced by exactly one unit of the granularity. Calendar
/// month arithmetic is delegated to chrono so variable month lengths are
/// handled correctly.
pub fn bucket_end(period: Period, start: NaiveDateTime) -> Result<NaiveDateTime> {
    match period {
        Period::Daily => start.checked_add_signed(Duration::days(1)),
        Period::Weekly => start.checked_add_signed(Duration::days(7)),
        Period::Monthly => start.checked_add_months(Months::new(1)),
    }
    .ok_or_else(|| MetricsError::aggregation("bucket end overflows the calendar"))
}

/// Start of the bucket immediately preceding the one starting at `start`.
pub fn previous_bucket_start(period: Period, start: NaiveDateTime) -> Result<NaiveDateTime> {
    match period {
        Period::Daily => start.checked_sub_signed(Duration::days(1)),
        Period::Weekly => start.checked_sub_signed(Duration::days(7)),
        Period::Monthly => start.checked_sub_months(Months::new(1)),
    }
    .ok_or_else(|| MetricsError::aggregation("previous bucket underflows the calendar"))
}

/// Reduces one bucket's records into a metrics payload.
///
/// Customer counts consider non-empty customer ids only: unique is the
/// distinct count, new is ids seen exactly once in this bucket, returning is
/// the remainder, so new + returning always equals unique.
pub fn compute_metrics(records: &[DataRecord]) -> Metrics {
    let total_orders = records.len() as u64;
    let total_revenue: f64 = records.iter().map(|r| r.fields.revenue).sum();
    let avg_order_value = if total_orders > 0 {
        total_revenue / total_orders as f64
    } else {
        0.0
    };

    let mut appearances: HashMap<&str, u64> = HashMap::new();
    for record in records {
        let customer = record.fields.customer_id.as_str();
        if !customer.is_empty() {
            *appearances.entry(customer).or_insert(0) += 1;
        }
    }
    let unique_customers = appearances.len() as u64;
    let new_customers = appearances.values().filter(|count| **count == 1).count() as u64;

    Metrics {
        total_revenue,
        total_orders,
        unique_customers,
        avg_order_value,
        new_customers,
        returning_customers: unique_customers - new_customers,
        conversion_rate: 0.0,
        churn_rate: 0.0,
    }
}

/// Runs one aggregation pass for the bucket containing `reference` and
/// upserts the result. Idempotent: unchanged records yield an identical
/// tuple.
pub fn generate(
    store: &mut Store,
    user: &str,
    period: Period,
    reference: NaiveDateTime,
) -> Result<MetricsTuple> {
    let start = bucket_start(period, reference)?;
    let end = bucket_end(period, start)?;
    let records = store.records_in_range(user, start, end)?;
    let metrics = compute_metrics(&records);
    let tuple = MetricsTuple {
        user: user.to_string(),
        period,
        bucket_start: start,
        metrics,
    };
    store.upsert_metrics(tuple.clone())?;
    info!(
        "Aggregated {} record(s) into {} bucket starting {}",
        records.len(),
        period,
        start.format("%Y-%m-%d")
    );
    Ok(tuple)
}

/// The up-to-`timeframe` consecutive buckets ending at `reference`, returning
/// only the tuples that already exist. This path never generates missing
/// buckets; only the current-period read does that lazily.
pub fn historical(
    store: &Store,
    user: &str,
    period: Period,
    timeframe: usize,
    reference: NaiveDateTime,
) -> Result<Vec<MetricsTuple>> {
    let current = bucket_start(period, reference)?;
    let mut earliest = current;
    for _ in 0..timeframe {
        earliest = previous_bucket_start(period, earliest)?;
    }
    Ok(store.metrics_between(user, period, earliest, current))
}
