//! Column classification: type detection and semantic field suggestion.
//!
//! Classification runs once per upload over a bounded sample (up to
//! [`SAMPLE_VALUES`] non-empty values drawn from the first [`SAMPLE_ROWS`]
//! rows per column). Type detection is an ordered chain returning the first
//! type every sampled value satisfies. Field suggestion is a case-insensitive
//! substring match of the header against an injected [`MappingRules`] table;
//! the suggestion is a heuristic default the user can override per column.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    data,
    error::{MetricsError, Result},
    normalize::RawRow,
};

/// Rows inspected when collecting type-detection samples.
pub const SAMPLE_ROWS: usize = 100;
/// Non-empty values sampled per column.
pub const SAMPLE_VALUES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Date,
    Boolean,
    String,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic business field a column can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Revenue,
    Date,
    CustomerId,
    ProductId,
    Quantity,
    Price,
    Category,
    Other,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Revenue => "revenue",
            Field::Date => "date",
            Field::CustomerId => "customer_id",
            Field::ProductId => "product_id",
            Field::Quantity => "quantity",
            Field::Price => "price",
            Field::Category => "category",
            Field::Other => "other",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Field {
    type Err = MetricsError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "revenue" => Ok(Field::Revenue),
            "date" => Ok(Field::Date),
            "customer_id" => Ok(Field::CustomerId),
            "product_id" => Ok(Field::ProductId),
            "quantity" => Ok(Field::Quantity),
            "price" => Ok(Field::Price),
            "category" => Ok(Field::Category),
            "other" => Ok(Field::Other),
            other => Err(MetricsError::validation(format!(
                "Unknown field '{other}'; expected one of revenue, date, customer_id, \
                 product_id, quantity, price, category, other"
            ))),
        }
    }
}

/// One classified column: header name, detected type, mapped field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub field: Field,
}

/// Ordered keyword groups driving field suggestion. Injected rather than
/// baked in so alternate keyword sets can be substituted.
#[derive(Debug, Clone)]
pub struct MappingRules {
    groups: Vec<(Vec<&'static str>, Field)>,
}

impl Default for MappingRules {
    fn default() -> Self {
        MappingRules {
            groups: vec![
                (vec!["revenue", "sales", "amount", "total"], Field::Revenue),
                (vec!["date", "time", "created"], Field::Date),
                (vec!["customer", "user", "client"], Field::CustomerId),
                (vec!["product", "item"], Field::ProductId),
                (vec!["quantity", "qty", "count"], Field::Quantity),
                (vec!["price", "cost"], Field::Price),
                (vec!["category", "type", "segment"], Field::Category),
            ],
        }
    }
}

impl MappingRules {
    pub fn new(groups: Vec<(Vec<&'static str>, Field)>) -> Self {
        MappingRules { groups }
    }

    /// First keyword group whose keyword occurs in the lowercased header wins.
    pub fn suggest(&self, column_name: &str) -> Field {
        let lowered = column_name.to_ascii_lowercase();
        self.groups
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|kw| lowered.contains(kw)))
            .map(|(_, field)| *field)
            .unwrap_or(Field::Other)
    }
}

/// Collects up to [`SAMPLE_VALUES`] non-empty values for `column` from the
/// first [`SAMPLE_ROWS`] rows.
pub fn sample_column<'a>(rows: &'a [RawRow], column: &str) -> Vec<&'a str> {
    rows.iter()
        .take(SAMPLE_ROWS)
        .filter_map(|row| row.get(column).map(String::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .take(SAMPLE_VALUES)
        .collect()
}

/// Ordered detection chain: all numbers, else all dates, else all boolean
/// literals, else string. An empty sample defaults to string.
pub fn detect_column_type(sample: &[&str]) -> ColumnType {
    if sample.is_empty() {
        return ColumnType::String;
    }
    if sample.iter().all(|value| data::parse_number(value).is_some()) {
        return ColumnType::Number;
    }
    if sample.iter().all(|value| data::parse_datestamp(value).is_some()) {
        return ColumnType::Date;
    }
    if sample.iter().all(|value| data::is_boolean_literal(value)) {
        return ColumnType::Boolean;
    }
    ColumnType::String
}

/// Classifies every header against the sampled rows, producing the dataset's
/// initial column descriptors.
pub fn classify_columns(headers: &[String], rows: &[RawRow], rules: &MappingRules) -> Vec<ColumnSpec> {
    headers
        .iter()
        .map(|name| {
            let sample = sample_column(rows, name);
            ColumnSpec {
                name: name.clone(),
                column_type: detect_column_type(&sample),
                field: rules.suggest(name),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn detection_chain_prefers_numbers() {
        assert_eq!(detect_column_type(&["100.50", "99.99"]), ColumnType::Number);
        assert_eq!(detect_column_type(&["2024-01-02", "03/04/2024"]), ColumnType::Date);
        assert_eq!(detect_column_type(&["true", "FALSE"]), ColumnType::Boolean);
        assert_eq!(detect_column_type(&["true", "maybe"]), ColumnType::String);
        assert_eq!(detect_column_type(&[]), ColumnType::String);
    }

    #[test]
    fn mixed_samples_fall_back_to_string() {
        assert_eq!(detect_column_type(&["12", "abc"]), ColumnType::String);
        assert_eq!(detect_column_type(&["2024-01-02", "soon"]), ColumnType::String);
    }

    #[test]
    fn default_rules_match_common_business_headers() {
        let rules = MappingRules::default();
        assert_eq!(rules.suggest("Total Sales ($)"), Field::Revenue);
        assert_eq!(rules.suggest("OrderDate"), Field::Date);
        assert_eq!(rules.suggest("CustomerID"), Field::CustomerId);
        assert_eq!(rules.suggest("item_sku"), Field::ProductId);
        assert_eq!(rules.suggest("Qty"), Field::Quantity);
        assert_eq!(rules.suggest("Unit Cost"), Field::Price);
        assert_eq!(rules.suggest("Segment"), Field::Category);
        assert_eq!(rules.suggest("notes"), Field::Other);
    }

    #[test]
    fn first_matching_group_wins() {
        // "amount" sits in an earlier group than "user", so revenue wins.
        let rules = MappingRules::default();
        assert_eq!(rules.suggest("amount_per_user"), Field::Revenue);
    }

    #[test]
    fn injected_rules_replace_the_defaults() {
        let rules = MappingRules::new(vec![(vec!["umsatz"], Field::Revenue)]);
        assert_eq!(rules.suggest("Umsatz 2024"), Field::Revenue);
        assert_eq!(rules.suggest("Total Sales"), Field::Other);
    }

    #[test]
    fn sampling_skips_empty_values_and_caps_the_sample() {
        let mut rows = vec![row(&[("amount", "")]), row(&[("amount", "  ")])];
        for idx in 0..50 {
            rows.push(row(&[("amount", &format!("{idx}"))]));
        }
        let sample = sample_column(&rows, "amount");
        assert_eq!(sample.len(), SAMPLE_VALUES);
        assert_eq!(sample[0], "0");
    }

    #[test]
    fn classify_columns_combines_type_and_mapping() {
        let headers = vec!["CustomerID".to_string(), "Amount".to_string()];
        let rows = vec![
            row(&[("CustomerID", "C1"), ("Amount", "10.5")]),
            row(&[("CustomerID", "C2"), ("Amount", "3")]),
        ];
        let specs = classify_columns(&headers, &rows, &MappingRules::default());
        assert_eq!(specs[0].field, Field::CustomerId);
        assert_eq!(specs[0].column_type, ColumnType::String);
        assert_eq!(specs[1].field, Field::Revenue);
        assert_eq!(specs[1].column_type, ColumnType::Number);
    }
}
