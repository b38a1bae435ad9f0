pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod data;
pub mod error;
pub mod growth;
pub mod ingest;
pub mod io_utils;
pub mod normalize;
pub mod report;
pub mod store;
pub mod table;
pub mod xlsx;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info};
use uuid::Uuid;

use crate::{
    cli::{Cli, Commands, DatasetsArgs, RemapArgs},
    error::MetricsError,
    store::Store,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_metrics", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => ingest::execute(&args),
        Commands::Datasets(args) => handle_datasets(&args),
        Commands::Remap(args) => handle_remap(&args),
        Commands::Generate(args) => report::execute_generate(&args),
        Commands::Dashboard(args) => report::execute_dashboard(&args),
        Commands::Categories(args) => report::execute_categories(&args),
    }
}

fn handle_datasets(args: &DatasetsArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let datasets = store.list_datasets(&args.user);
    let rows: Vec<Vec<String>> = datasets
        .iter()
        .map(|d| {
            vec![
                d.id.to_string(),
                d.file_name.clone(),
                d.file_kind.as_str().to_string(),
                d.total_rows.to_string(),
                if d.processed { "yes" } else { "no" }.to_string(),
                d.error.clone().unwrap_or_default(),
                d.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    table::print_table(
        &[
            "id".to_string(),
            "file".to_string(),
            "kind".to_string(),
            "rows".to_string(),
            "processed".to_string(),
            "error".to_string(),
            "created".to_string(),
        ],
        &rows,
    );
    info!("Listed {} dataset(s) for user '{}'", rows.len(), args.user);
    Ok(())
}

fn handle_remap(args: &RemapArgs) -> Result<()> {
    let mut store = Store::open(&args.store)?;
    let id = Uuid::parse_str(args.dataset.trim())
        .map_err(|_| MetricsError::validation(format!("Invalid dataset id '{}'", args.dataset)))?;
    let mappings = ingest::parse_mapping_overrides(&args.map)?;
    let (dataset, count) = store.update_column_mappings(id, &args.user, &mappings)?;
    info!(
        "Updated mappings on dataset {} and re-normalized {count} record(s)",
        dataset.id
    );
    let rows: Vec<Vec<String>> = dataset
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
        &rows,
    );
    println!("Re-normalized {count} record(s); run `generate` to refresh cached metrics");
    Ok(())
}
