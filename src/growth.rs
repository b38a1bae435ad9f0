//! Percentage growth between adjacent buckets.

use serde::Serialize;

use crate::store::Metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthRates {
    pub revenue_growth: f64,
    pub customer_growth: f64,
    pub order_growth: f64,
}

/// `previous == 0` maps to 100% when anything grew from nothing, else 0%.
/// Never divides by zero.
pub fn pct_growth(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current > 0.0 { 100.0 } else { 0.0 }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Growth of the current bucket over the immediately preceding one. A missing
/// previous bucket reports zero growth across the board; it is not an error.
pub fn growth_between(current: &Metrics, previous: Option<&Metrics>) -> GrowthRates {
    let Some(previous) = previous else {
        return GrowthRates::default();
    };
    GrowthRates {
        revenue_growth: pct_growth(current.total_revenue, previous.total_revenue),
        customer_growth: pct_growth(
            current.unique_customers as f64,
            previous.unique_customers as f64,
        ),
        order_growth: pct_growth(current.total_orders as f64, previous.total_orders as f64),
    }
}
