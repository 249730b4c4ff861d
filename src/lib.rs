//! assessment-import: loads Oracle database assessment results into BigQuery.
//!
//! The collection scripts leave CSV-like `.log` files, one per table and
//! collection. This library optionally consolidates several collections into
//! one file per table, then creates the target dataset, loads every file as a
//! table, loads the static configuration CSVs and creates the report views.
//!
//! # Example
//!
//! ```ignore
//! use assessment_import::{BigQueryClient, BigQueryConfig, DatasetRef, RunOptions, Settings};
//! use assessment_import::{TableCatalog, error::ImportError, run_import};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ImportError> {
//!     let settings = Settings::default();
//!     let catalog = TableCatalog::embedded()?;
//!     let client = BigQueryClient::connect(BigQueryConfig::from_settings(&settings.warehouse)).await?;
//!     let target = DatasetRef::new("my-project", "assessment");
//!     let options = RunOptions::new("dbResults".into(), "180603".into(), &settings);
//!     let stats = run_import(&client, &catalog, &target, &options).await?;
//!     println!("Loaded {} files", stats.assessment.files_loaded);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod warehouse;

// Re-export main types
pub use catalog::{TableCatalog, TableSchema};
pub use config::{CliArgs, Settings};
pub use consolidate::{ConsolidationStats, consolidate_logs};
pub use pipeline::{ImportStats, RunOptions, ensure_dataset, resolve_project, run_import};
pub use warehouse::{BigQueryClient, BigQueryConfig, CreateOutcome, DatasetRef, TableRef, Warehouse};
