//! The upload pipeline: parse, classify, normalize, persist.
//!
//! One invocation runs the whole chain for a single file: validate the
//! extension and size, parse CSV or Excel rows, classify columns (with
//! user-supplied overrides applied on top of the suggestions), normalize
//! every row, create the dataset, insert records in sequential chunks of
//! [`BATCH_SIZE`], then mark the dataset processed.
//!
//! A failed chunk triggers compensating cleanup: the dataset's record file is
//! discarded and the error is attached to the dataset, which stays
//! unprocessed. See the store module for the insertion contract.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use encoding_rs::Encoding;
use log::info;

use crate::{
    classify::{self, Field, MappingRules},
    cli::IngestArgs,
    error::{MetricsError, Result},
    io_utils,
    normalize::{self, RawRow, RecordFields},
    store::{DataRecord, Dataset, DatasetSummary, FileKind, Store},
    table, xlsx,
};

/// Upload size cap, matching the 10 MB interface limit.
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
/// Records persisted per chunk; bounds memory per write for large files.
pub const BATCH_SIZE: usize = 1000;
/// Raw rows echoed back after a successful ingest.
pub const PREVIEW_ROWS: usize = 10;

/// A fully parsed tabular file, format-independent.
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

pub struct IngestOutcome {
    pub dataset: Dataset,
    pub headers: Vec<String>,
    pub preview: Vec<RawRow>,
}

pub fn execute(args: &IngestArgs) -> anyhow::Result<()> {
    let mut store = Store::open(&args.store)?;
    let overrides = parse_mapping_overrides(&args.map)?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;

    let outcome = ingest_file(
        &mut store,
        &args.user,
        &args.input,
        delimiter,
        encoding,
        &MappingRules::default(),
        &overrides,
    )
    .with_context(|| format!("Ingesting {:?}", args.input))?;

    let dataset = &outcome.dataset;
    info!(
        "Ingested {} row(s) from {:?} into dataset {}",
        dataset.total_rows, args.input, dataset.id
    );

    let column_rows: Vec<Vec<String>> = dataset
        .columns
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.column_type.to_string(),
                c.field.to_string(),
            ]
        })
        .collect();
    table::print_table(
        &[
            "column".to_string(),
            "type".to_string(),
            "mapped_to".to_string(),
        ],
        &column_rows,
    );

    if !outcome.preview.is_empty() {
        println!();
        let preview_rows: Vec<Vec<String>> = outcome
            .preview
            .iter()
            .map(|row| {
                outcome
                    .headers
                    .iter()
                    .map(|h| row.get(h).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        table::print_table(&outcome.headers, &preview_rows);
    }
    Ok(())
}

/// Parses repeatable `column=field` override specifications.
pub fn parse_mapping_overrides(specs: &[String]) -> Result<BTreeMap<String, Field>> {
    let mut overrides = BTreeMap::new();
    for spec in specs {
        let (column, field) = spec.split_once('=').ok_or_else(|| {
            MetricsError::validation(format!(
                "Invalid mapping '{spec}'; expected the form column=field"
            ))
        })?;
        let column = column.trim();
        if column.is_empty() {
            return Err(MetricsError::validation(format!(
                "Invalid mapping '{spec}'; the column name is empty"
            )));
        }
        overrides.insert(column.to_string(), field.parse()?);
    }
    Ok(overrides)
}

/// Runs the full upload pipeline for one file.
#[allow(clippy::too_many_arguments)]
pub fn ingest_file(
    store: &mut Store,
    user: &str,
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
    rules: &MappingRules,
    overrides: &BTreeMap<String, Field>,
) -> Result<IngestOutcome> {
    let kind = FileKind::from_path(path)?;
    let size = fs::metadata(path)
        .map_err(|err| MetricsError::parse(path.display().to_string(), err.to_string()))?
        .len();
    if size > MAX_FILE_BYTES {
        return Err(MetricsError::validation(format!(
            "File {path:?} is {size} bytes; the limit is {MAX_FILE_BYTES}"
        )));
    }

    let parsed = match kind {
        FileKind::Csv => read_csv(path, delimiter, encoding)?,
        FileKind::Xlsx => xlsx::read_workbook(path)?,
    };

    for name in overrides.keys() {
        if !parsed.headers.iter().any(|h| h == name) {
            return Err(MetricsError::validation(format!(
                "Mapping override names unknown column '{name}'"
            )));
        }
    }

    let mut columns = classify::classify_columns(&parsed.headers, &parsed.rows, rules);
    for column in &mut columns {
        if let Some(field) = overrides.get(&column.name) {
            column.field = *field;
        }
    }

    let fields: Vec<RecordFields> = parsed
        .rows
        .iter()
        .map(|row| normalize::normalize_row(row, &columns))
        .collect();
    let summary = summarize(&fields);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let mut dataset = store.create_dataset(
        user,
        &file_name,
        kind,
        columns,
        parsed.rows.len() as u64,
        summary,
    )?;

    let records: Vec<DataRecord> = parsed
        .rows
        .iter()
        .cloned()
        .zip(fields)
        .map(|(raw, fields)| DataRecord {
            user: user.to_string(),
            dataset: dataset.id,
            raw,
            fields,
        })
        .collect();

    for chunk in records.chunks(BATCH_SIZE) {
        if let Err(err) = store.append_records(dataset.id, chunk) {
            // The chunk failure is the error the caller sees; cleanup
            // failures must not mask it.
            let _ = store.discard_records(dataset.id);
            let _ = store.mark_failed(dataset.id, &err.to_string());
            return Err(err);
        }
    }
    store.mark_processed(dataset.id)?;
    dataset.processed = true;

    Ok(IngestOutcome {
        dataset,
        preview: parsed.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
        headers: parsed.headers,
    })
}

fn summarize(fields: &[RecordFields]) -> DatasetSummary {
    let total_revenue: f64 = fields.iter().map(|f| f.revenue).sum();
    let avg_order_value = if fields.is_empty() {
        0.0
    } else {
        total_revenue / fields.len() as f64
    };
    let customers: std::collections::BTreeSet<&str> = fields
        .iter()
        .map(|f| f.customer_id.as_str())
        .filter(|id| !id.is_empty())
        .collect();
    DatasetSummary {
        date_start: fields.iter().filter_map(|f| f.date).min(),
        date_end: fields.iter().filter_map(|f| f.date).max(),
        total_revenue,
        avg_order_value,
        unique_customers: customers.len() as u64,
    }
}

fn read_csv(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<ParsedFile> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)?;
    let mut rows = Vec::new();
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.map_err(|err| {
            MetricsError::parse(
                path.display().to_string(),
                format!("row {}: {err}", idx + 2),
            )
        })?;
        let decoded = io_utils::decode_record(&record, encoding)?;
        let row: RawRow = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), decoded.get(i).cloned().unwrap_or_default()))
            .collect();
        rows.push(row);
    }
    Ok(ParsedFile { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_fixture(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).expect("create fixture");
        file.write_all(contents.as_bytes()).expect("write fixture");
        path
    }

    #[test]
    fn overrides_parse_and_reject_malformed_specs() {
        let parsed =
            parse_mapping_overrides(&["Amount=revenue".to_string(), "Qty=quantity".to_string()])
                .unwrap();
        assert_eq!(parsed["Amount"], Field::Revenue);
        assert_eq!(parsed["Qty"], Field::Quantity);

        assert!(parse_mapping_overrides(&["Amount".to_string()]).is_err());
        assert!(parse_mapping_overrides(&["Amount=profit".to_string()]).is_err());
        assert!(parse_mapping_overrides(&["=revenue".to_string()]).is_err());
    }

    #[test]
    fn unsupported_extension_is_a_validation_error() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("store")).unwrap();
        let path = write_fixture(dir.path(), "data.txt", "a,b\n1,2\n");
        let result = ingest_file(
            &mut store,
            "alice",
            &path,
            b',',
            UTF_8,
            &MappingRules::default(),
            &BTreeMap::new(),
        );
        assert!(matches!(result, Err(MetricsError::Validation(_))));
    }

    #[test]
    fn override_naming_an_unknown_column_is_rejected() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("store")).unwrap();
        let path = write_fixture(dir.path(), "data.csv", "Amount\n10\n");
        let overrides: BTreeMap<String, Field> =
            [("Missing".to_string(), Field::Revenue)].into_iter().collect();
        let result = ingest_file(
            &mut store,
            "alice",
            &path,
            b',',
            UTF_8,
            &MappingRules::default(),
            &overrides,
        );
        assert!(matches!(result, Err(MetricsError::Validation(_))));
        assert!(store.list_datasets("alice").is_empty());
    }

    #[test]
    fn ingest_persists_dataset_records_and_summary() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("store")).unwrap();
        let path = write_fixture(
            dir.path(),
            "sales.csv",
            "CustomerID,OrderDate,Amount\n\
             C1,2024-03-01,100.50\n\
             C1,2024-03-10,49.50\n\
             C2,2024-03-20,50.00\n",
        );
        let outcome = ingest_file(
            &mut store,
            "alice",
            &path,
            b',',
            UTF_8,
            &MappingRules::default(),
            &BTreeMap::new(),
        )
        .unwrap();

        let dataset = &outcome.dataset;
        assert!(dataset.processed);
        assert_eq!(dataset.total_rows, 3);
        assert_eq!(dataset.file_kind, FileKind::Csv);
        assert_eq!(dataset.summary.total_revenue, 200.0);
        assert_eq!(dataset.summary.unique_customers, 2);
        assert_eq!(outcome.preview.len(), 3);

        let records = store.records(dataset.id).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].fields.revenue, 100.50);
        assert_eq!(records[0].fields.customer_id, "C1");
        assert!(records.iter().all(|r| r.fields.date.is_some()));
        // Raw rows survive verbatim for later re-processing.
        assert_eq!(records[2].raw["Amount"], "50.00");
    }

    #[test]
    fn ragged_csv_rows_pad_with_empty_fields() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("store")).unwrap();
        let path = write_fixture(dir.path(), "ragged.csv", "a,b\n1\n2,3\n");
        let outcome = ingest_file(
            &mut store,
            "alice",
            &path,
            b',',
            UTF_8,
            &MappingRules::default(),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(outcome.preview[0]["b"], "");
    }
}
