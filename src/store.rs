//! File-backed dataset store and analytics cache.
//!
//! A store is a directory of versioned bincode files:
//!
//! - `datasets.bin` — every dataset descriptor.
//! - `records-<uuid>.bin` — the normalized records of one dataset. Cascade
//!   regeneration (on remap) and cascade delete are file replaces.
//! - `analytics.bin` — cached metrics tuples, at most one per
//!   (user, period, bucket start).
//!
//! ## Insertion contract
//!
//! Record insertion is chunked and sequential; it is NOT atomic across
//! chunks. On a failed chunk the caller must discard the dataset's record
//! file and attach the error to the dataset ([`Store::discard_records`] +
//! [`Store::mark_failed`]), which is what the ingest pipeline does. A dataset
//! with `processed == false` therefore never contributes partial records.
//!
//! Metrics upserts are full replaces keyed by (user, period, bucket start);
//! concurrent writers race last-write-wins, which is accepted because
//! aggregation is idempotent and re-runnable.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    aggregate::Period,
    classify::{ColumnSpec, Field},
    error::{MetricsError, Result},
    normalize::{self, RawRow, RecordFields},
};

const STORE_VERSION: u32 = 1;
const DATASETS_FILE: &str = "datasets.bin";
const ANALYTICS_FILE: &str = "analytics.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
}

impl FileKind {
    /// Resolves the kind from the file extension. `.xls` is treated as Excel;
    /// anything outside `.csv`/`.xlsx`/`.xls` is a validation failure.
    pub fn from_path(path: &Path) -> Result<FileKind> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv") => Ok(FileKind::Csv),
            Some("xlsx") | Some("xls") => Ok(FileKind::Xlsx),
            _ => Err(MetricsError::validation(format!(
                "Unsupported file type for {path:?}; expected .csv, .xlsx, or .xls"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Xlsx => "xlsx",
        }
    }
}

/// Summary statistics computed once at upload time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub date_start: Option<NaiveDateTime>,
    pub date_end: Option<NaiveDateTime>,
    pub total_revenue: f64,
    pub avg_order_value: f64,
    pub unique_customers: u64,
}

/// One uploaded file and its classification state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub user: String,
    pub file_name: String,
    pub file_kind: FileKind,
    pub columns: Vec<ColumnSpec>,
    pub total_rows: u64,
    pub summary: DatasetSummary,
    pub processed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One normalized row. The raw row is retained verbatim so mappings can be
/// edited and records regenerated without the source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    pub user: String,
    pub dataset: Uuid,
    pub raw: RawRow,
    pub fields: RecordFields,
}

/// Metrics payload of one aggregation bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_revenue: f64,
    pub total_orders: u64,
    pub unique_customers: u64,
    pub avg_order_value: f64,
    pub new_customers: u64,
    pub returning_customers: u64,
    /// Always 0: nothing ingested carries the visit/session data a real
    /// conversion rate would need.
    pub conversion_rate: f64,
    /// Always 0: nothing ingested carries cancellation data.
    pub churn_rate: f64,
}

/// One cached aggregation result, identified by (user, period, bucket start).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsTuple {
    pub user: String,
    pub period: Period,
    pub bucket_start: NaiveDateTime,
    pub metrics: Metrics,
}

#[derive(Serialize, Deserialize)]
struct VersionedFile<T> {
    version: u32,
    payload: T,
}

pub struct Store {
    root: PathBuf,
    datasets: Vec<Dataset>,
    tuples: Vec<MetricsTuple>,
}

impl Store {
    /// Opens (or initializes) a store directory.
    pub fn open(root: &Path) -> Result<Store> {
        fs::create_dir_all(root)
            .map_err(|err| MetricsError::store(root.display().to_string(), err.to_string()))?;
        let datasets = read_file_or_default(&root.join(DATASETS_FILE))?;
        let tuples = read_file_or_default(&root.join(ANALYTICS_FILE))?;
        Ok(Store {
            root: root.to_path_buf(),
            datasets,
            tuples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn records_path(&self, dataset: Uuid) -> PathBuf {
        self.root.join(format!("records-{dataset}.bin"))
    }

    fn save_datasets(&self) -> Result<()> {
        write_file(&self.root.join(DATASETS_FILE), &self.datasets)
    }

    fn save_analytics(&self) -> Result<()> {
        write_file(&self.root.join(ANALYTICS_FILE), &self.tuples)
    }

    // ---- datasets ---------------------------------------------------------

    /// Persists a new dataset in the unprocessed state.
    pub fn create_dataset(
        &mut self,
        user: &str,
        file_name: &str,
        file_kind: FileKind,
        columns: Vec<ColumnSpec>,
        total_rows: u64,
        summary: DatasetSummary,
    ) -> Result<Dataset> {
        let dataset = Dataset {
            id: Uuid::new_v4(),
            user: user.to_string(),
            file_name: file_name.to_string(),
            file_kind,
            columns,
            total_rows,
            summary,
            processed: false,
            error: None,
            created_at: Utc::now(),
        };
        self.datasets.push(dataset.clone());
        self.save_datasets()?;
        debug!("Created dataset {} for user '{}'", dataset.id, user);
        Ok(dataset)
    }

    fn dataset_index(&self, id: Uuid) -> Result<usize> {
        self.datasets
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| MetricsError::not_found(format!("Dataset {id} not found")))
    }

    pub fn dataset(&self, id: Uuid, user: &str) -> Result<&Dataset> {
        self.datasets
            .iter()
            .find(|d| d.id == id && d.user == user)
            .ok_or_else(|| MetricsError::not_found(format!("Dataset {id} not found")))
    }

    /// All datasets owned by `user`, newest first.
    pub fn list_datasets(&self, user: &str) -> Vec<&Dataset> {
        let mut owned: Vec<&Dataset> = self
            .datasets
            .iter()
            .rev()
            .filter(|d| d.user == user)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned
    }

    /// Flips the processed flag; called only once every record chunk has
    /// been persisted.
    pub fn mark_processed(&mut self, id: Uuid) -> Result<()> {
        let idx = self.dataset_index(id)?;
        self.datasets[idx].processed = true;
        self.datasets[idx].error = None;
        self.save_datasets()
    }

    /// Records a processing error on the dataset and leaves it unprocessed.
    pub fn mark_failed(&mut self, id: Uuid, message: &str) -> Result<()> {
        let idx = self.dataset_index(id)?;
        self.datasets[idx].processed = false;
        self.datasets[idx].error = Some(message.to_string());
        self.save_datasets()
    }

    /// Merges the supplied mappings into the dataset's column descriptors and
    /// regenerates every record's normalized payload from its retained raw
    /// row. O(rows), synchronous. Cached metrics tuples are NOT touched;
    /// re-aggregation stays an explicit, separate step.
    pub fn update_column_mappings(
        &mut self,
        id: Uuid,
        user: &str,
        mappings: &BTreeMap<String, Field>,
    ) -> Result<(Dataset, usize)> {
        let idx = self
            .datasets
            .iter()
            .position(|d| d.id == id && d.user == user)
            .ok_or_else(|| MetricsError::not_found(format!("Dataset {id} not found")))?;
        for column in &mut self.datasets[idx].columns {
            if let Some(field) = mappings.get(&column.name) {
                column.field = *field;
            }
        }
        let columns = self.datasets[idx].columns.clone();
        self.save_datasets()?;

        let mut records = self.records(id)?;
        for record in &mut records {
            record.fields = normalize::normalize_row(&record.raw, &columns);
        }
        let count = records.len();
        write_file(&self.records_path(id), &records)?;
        debug!("Re-normalized {count} record(s) for dataset {id}");
        Ok((self.datasets[idx].clone(), count))
    }

    // ---- records ----------------------------------------------------------

    /// Appends one chunk of records to the dataset's record file.
    pub fn append_records(&mut self, dataset: Uuid, batch: &[DataRecord]) -> Result<()> {
        let path = self.records_path(dataset);
        let mut records: Vec<DataRecord> = read_file_or_default(&path)?;
        records.extend_from_slice(batch);
        write_file(&path, &records)
    }

    /// Compensating cleanup for a failed chunked insertion: removes whatever
    /// record chunks reached disk.
    pub fn discard_records(&mut self, dataset: Uuid) -> Result<()> {
        let path = self.records_path(dataset);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|err| MetricsError::store(path.display().to_string(), err.to_string()))?;
        }
        Ok(())
    }

    pub fn records(&self, dataset: Uuid) -> Result<Vec<DataRecord>> {
        read_file_or_default(&self.records_path(dataset))
    }

    /// Every normalized record across all of the user's datasets.
    pub fn records_for_user(&self, user: &str) -> Result<Vec<DataRecord>> {
        let mut all = Vec::new();
        for dataset in self.datasets.iter().filter(|d| d.user == user) {
            all.extend(self.records(dataset.id)?);
        }
        Ok(all)
    }

    /// Records whose date falls in the half-open interval `[start, end)`.
    /// Records without a resolvable date never match.
    pub fn records_in_range(
        &self,
        user: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DataRecord>> {
        Ok(self
            .records_for_user(user)?
            .into_iter()
            .filter(|record| {
                record
                    .fields
                    .date
                    .is_some_and(|date| date >= start && date < end)
            })
            .collect())
    }

    // ---- analytics cache --------------------------------------------------

    /// Insert-or-replace keyed by (user, period, bucket start). Always a full
    /// replace of the metrics payload, never a merge.
    pub fn upsert_metrics(&mut self, tuple: MetricsTuple) -> Result<()> {
        self.tuples.retain(|t| {
            !(t.user == tuple.user && t.period == tuple.period && t.bucket_start == tuple.bucket_start)
        });
        self.tuples.push(tuple);
        self.save_analytics()
    }

    pub fn metrics_at(
        &self,
        user: &str,
        period: Period,
        bucket_start: NaiveDateTime,
    ) -> Option<&MetricsTuple> {
        self.tuples
            .iter()
            .find(|t| t.user == user && t.period == period && t.bucket_start == bucket_start)
    }

    /// Existing tuples with bucket start in `[from, to]`, ascending. Missing
    /// buckets are simply absent; nothing is synthesized or lazily generated
    /// on this path.
    pub fn metrics_between(
        &self,
        user: &str,
        period: Period,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Vec<MetricsTuple> {
        let mut matches: Vec<MetricsTuple> = self
            .tuples
            .iter()
            .filter(|t| {
                t.user == user && t.period == period && t.bucket_start >= from && t.bucket_start <= to
            })
            .cloned()
            .collect();
        matches.sort_by_key(|t| t.bucket_start);
        matches
    }
}

fn write_file<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    let versioned = VersionedFile {
        version: STORE_VERSION,
        payload,
    };
    let bytes = bincode::serde::encode_to_vec(&versioned, bincode::config::standard())
        .map_err(|err| MetricsError::store(path.display().to_string(), err.to_string()))?;
    fs::write(path, bytes)
        .map_err(|err| MetricsError::store(path.display().to_string(), err.to_string()))
}

fn read_file_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs::read(path)
        .map_err(|err| MetricsError::store(path.display().to_string(), err.to_string()))?;
    let (versioned, _): (VersionedFile<T>, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|err| MetricsError::store(path.display().to_string(), err.to_string()))?;
    if versioned.version != STORE_VERSION {
        return Err(MetricsError::store(
            path.display().to_string(),
            format!(
                "unsupported store version {} (expected {STORE_VERSION})",
                versioned.version
            ),
        ));
    }
    Ok(versioned.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ColumnType;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn spec(name: &str, field: Field) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            column_type: ColumnType::String,
            field,
        }
    }

    fn record(user: &str, dataset: Uuid, customer: &str, revenue: f64, date: &str) -> DataRecord {
        let raw: RawRow = [
            ("Customer".to_string(), customer.to_string()),
            ("Amount".to_string(), revenue.to_string()),
            ("OrderDate".to_string(), date.to_string()),
        ]
        .into_iter()
        .collect();
        let columns = vec![
            spec("Customer", Field::CustomerId),
            spec("Amount", Field::Revenue),
            spec("OrderDate", Field::Date),
        ];
        let fields = normalize::normalize_row(&raw, &columns);
        DataRecord {
            user: user.to_string(),
            dataset,
            raw,
            fields,
        }
    }

    fn midnight(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn datasets_round_trip_across_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let mut store = Store::open(dir.path()).unwrap();
            let dataset = store
                .create_dataset(
                    "alice",
                    "sales.csv",
                    FileKind::Csv,
                    vec![spec("Amount", Field::Revenue)],
                    3,
                    DatasetSummary::default(),
                )
                .unwrap();
            store.mark_processed(dataset.id).unwrap();
            dataset.id
        };

        let store = Store::open(dir.path()).unwrap();
        let listed = store.list_datasets("alice");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert!(listed[0].processed);
        assert!(store.list_datasets("bob").is_empty());
    }

    #[test]
    fn listing_is_newest_first() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let first = store
            .create_dataset("alice", "a.csv", FileKind::Csv, vec![], 0, DatasetSummary::default())
            .unwrap();
        let second = store
            .create_dataset("alice", "b.csv", FileKind::Csv, vec![], 0, DatasetSummary::default())
            .unwrap();
        let listed = store.list_datasets("alice");
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn mark_failed_records_the_error_and_stays_unprocessed() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let dataset = store
            .create_dataset("alice", "a.csv", FileKind::Csv, vec![], 0, DatasetSummary::default())
            .unwrap();
        store.mark_failed(dataset.id, "boom").unwrap();
        let listed = store.list_datasets("alice");
        assert!(!listed[0].processed);
        assert_eq!(listed[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn update_mappings_rejects_wrong_owner() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let dataset = store
            .create_dataset("alice", "a.csv", FileKind::Csv, vec![], 0, DatasetSummary::default())
            .unwrap();
        let result = store.update_column_mappings(dataset.id, "mallory", &BTreeMap::new());
        assert!(matches!(result, Err(MetricsError::NotFound(_))));
    }

    #[test]
    fn update_mappings_regenerates_records_from_raw_rows() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        // Amount starts out unmapped, so revenue normalizes to 0.
        let dataset = store
            .create_dataset(
                "alice",
                "a.csv",
                FileKind::Csv,
                vec![spec("Amount", Field::Other), spec("OrderDate", Field::Date)],
                1,
                DatasetSummary::default(),
            )
            .unwrap();
        let raw: RawRow = [
            ("Amount".to_string(), "25.5".to_string()),
            ("OrderDate".to_string(), "2024-03-05".to_string()),
        ]
        .into_iter()
        .collect();
        let fields = normalize::normalize_row(&raw, &dataset.columns);
        assert_eq!(fields.revenue, 0.0);
        store
            .append_records(
                dataset.id,
                &[DataRecord {
                    user: "alice".to_string(),
                    dataset: dataset.id,
                    raw,
                    fields,
                }],
            )
            .unwrap();

        let mappings: BTreeMap<String, Field> =
            [("Amount".to_string(), Field::Revenue)].into_iter().collect();
        let (updated, count) = store
            .update_column_mappings(dataset.id, "alice", &mappings)
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(updated.columns[0].field, Field::Revenue);
        let records = store.records(dataset.id).unwrap();
        assert_eq!(records[0].fields.revenue, 25.5);
    }

    #[test]
    fn records_in_range_is_half_open_and_skips_dateless_records() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let dataset = store
            .create_dataset("alice", "a.csv", FileKind::Csv, vec![], 4, DatasetSummary::default())
            .unwrap();
        store
            .append_records(
                dataset.id,
                &[
                    record("alice", dataset.id, "C1", 10.0, "2024-03-01"),
                    record("alice", dataset.id, "C2", 20.0, "2024-03-31"),
                    record("alice", dataset.id, "C3", 30.0, "2024-04-01"),
                    record("alice", dataset.id, "C4", 40.0, "N/A"),
                ],
            )
            .unwrap();
        let selected = store
            .records_in_range("alice", midnight(2024, 3, 1), midnight(2024, 4, 1))
            .unwrap();
        let customers: Vec<&str> = selected
            .iter()
            .map(|r| r.fields.customer_id.as_str())
            .collect();
        assert_eq!(customers, vec!["C1", "C2"]);
    }

    #[test]
    fn upsert_is_a_full_replace_per_bucket() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let bucket = midnight(2024, 3, 1);
        let first = MetricsTuple {
            user: "alice".to_string(),
            period: Period::Monthly,
            bucket_start: bucket,
            metrics: Metrics {
                total_revenue: 100.0,
                total_orders: 2,
                ..Metrics::default()
            },
        };
        let second = MetricsTuple {
            metrics: Metrics {
                total_revenue: 50.0,
                total_orders: 1,
                ..Metrics::default()
            },
            ..first.clone()
        };
        store.upsert_metrics(first).unwrap();
        store.upsert_metrics(second).unwrap();

        let reopened = Store::open(dir.path()).unwrap();
        let all = reopened.metrics_between("alice", Period::Monthly, bucket, bucket);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metrics.total_revenue, 50.0);
        assert_eq!(all[0].metrics.total_orders, 1);
    }
}
