//! Scalar value parsing shared by the classifier and the normalizer.
//!
//! All parsers here are total over their inputs: they either produce a value
//! or report failure through `Option`, never panic. Date parsing accepts the
//! same multi-format chain in both places, so classification and
//! normalization always agree on what counts as a date.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Parses a date-bearing value into a timestamp. Date-only inputs resolve to
/// midnight so they sort and bucket consistently with full timestamps.
pub fn parse_datestamp(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(datetime) = parse_naive_datetime(trimmed) {
        return Some(datetime);
    }
    parse_naive_date(trimmed).map(|date| date.and_time(NaiveTime::MIN))
}

/// Parses a finite floating-point number. Infinities and NaN are rejected so
/// downstream sums stay well-defined.
pub fn parse_number(value: &str) -> Option<f64> {
    let parsed: f64 = value.trim().parse().ok()?;
    parsed.is_finite().then_some(parsed)
}

/// `true`/`false`, case-insensitive. Deliberately narrower than generic
/// truthiness: `yes` and `1` stay classified as strings or numbers.
pub fn is_boolean_literal(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "false")
}
