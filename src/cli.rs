use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::aggregate::Period;

pub const DEFAULT_STORE_DIR: &str = ".csv-metrics";

#[derive(Debug, Parser)]
#[command(author, version, about = "Ingest tabular business data and serve period analytics", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest a CSV or Excel file: classify columns, normalize rows, persist
    Ingest(IngestArgs),
    /// List a user's datasets, newest first
    Datasets(DatasetsArgs),
    /// Update a dataset's column mappings and re-normalize its records
    Remap(RemapArgs),
    /// Force an aggregation run for the current period bucket
    Generate(GenerateArgs),
    /// Show current metrics, history, growth rates, and top categories
    Dashboard(DashboardArgs),
    /// Show the top categories by revenue
    Categories(CategoriesArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Input file (.csv, .xlsx, or .xls, at most 10 MB)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Store directory
    #[arg(short = 's', long = "store", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,
    /// Owning user id; every store access is scoped by it
    #[arg(short = 'u', long = "user")]
    pub user: String,
    /// Column mapping overrides of the form `column=field`
    #[arg(long = "map", action = clap::ArgAction::Append)]
    pub map: Vec<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct DatasetsArgs {
    /// Store directory
    #[arg(short = 's', long = "store", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,
    /// Owning user id
    #[arg(short = 'u', long = "user")]
    pub user: String,
}

#[derive(Debug, Args)]
pub struct RemapArgs {
    /// Store directory
    #[arg(short = 's', long = "store", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,
    /// Owning user id
    #[arg(short = 'u', long = "user")]
    pub user: String,
    /// Dataset id to update
    #[arg(short = 'd', long = "dataset")]
    pub dataset: String,
    /// Column mapping updates of the form `column=field`
    #[arg(long = "map", required = true, action = clap::ArgAction::Append)]
    pub map: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Store directory
    #[arg(short = 's', long = "store", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,
    /// Owning user id
    #[arg(short = 'u', long = "user")]
    pub user: String,
    /// Bucket granularity
    #[arg(short = 'p', long = "period", value_enum)]
    pub period: Period,
    /// Reference date for the bucket (defaults to now; useful for backfill)
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    /// Store directory
    #[arg(short = 's', long = "store", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,
    /// Owning user id
    #[arg(short = 'u', long = "user")]
    pub user: String,
    /// Bucket granularity
    #[arg(short = 'p', long = "period", value_enum, default_value = "monthly")]
    pub period: Period,
    /// Number of historical buckets to include
    #[arg(long, default_value_t = 6)]
    pub timeframe: usize,
    /// Reference date for the current bucket (defaults to now)
    #[arg(long)]
    pub date: Option<String>,
    /// Emit the dashboard as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CategoriesArgs {
    /// Store directory
    #[arg(short = 's', long = "store", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,
    /// Owning user id
    #[arg(short = 'u', long = "user")]
    pub user: String,
    /// Emit the categories as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
