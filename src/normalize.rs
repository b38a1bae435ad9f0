//! Row normalization: raw key-value rows into typed business fields.
//!
//! Normalization is total: every row produces a [`RecordFields`], possibly
//! with zero/empty fields. Numeric fields default to 0 on parse failure, the
//! date stays `None` when unparsable (such records are excluded from every
//! bucketed aggregation), and identifier fields coerce to possibly-empty
//! strings. Columns mapped to `other` contribute nothing to the normalized
//! payload but survive in the raw row for audit and re-processing.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    classify::{ColumnSpec, Field},
    data,
};

/// One uploaded row, exactly as parsed. Column sets vary per upload, so the
/// shape is an open string-keyed map rather than a fixed struct.
pub type RawRow = BTreeMap<String, String>;

/// Normalized payload of one row after column mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    pub revenue: f64,
    /// `None` when the mapped date column was absent or unparsable; such a
    /// record never lands in a bucket.
    pub date: Option<NaiveDateTime>,
    pub customer_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub price: f64,
    pub category: String,
}

/// Applies the confirmed column mappings to one raw row. Never fails.
pub fn normalize_row(raw: &RawRow, columns: &[ColumnSpec]) -> RecordFields {
    let mut fields = RecordFields::default();
    for column in columns {
        let value = raw.get(&column.name).map(String::as_str).unwrap_or("");
        match column.field {
            Field::Revenue => fields.revenue = data::parse_number(value).unwrap_or(0.0),
            Field::Price => fields.price = data::parse_number(value).unwrap_or(0.0),
            Field::Quantity => fields.quantity = data::parse_number(value).unwrap_or(0.0),
            Field::Date => fields.date = data::parse_datestamp(value),
            Field::CustomerId => fields.customer_id = value.trim().to_string(),
            Field::ProductId => fields.product_id = value.trim().to_string(),
            Field::Category => fields.category = value.trim().to_string(),
            Field::Other => {}
        }
    }
    fields
}
