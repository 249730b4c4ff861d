//! Warehouse abstraction.
//!
//! The pipeline talks to the warehouse only through the [`Warehouse`] trait so
//! the client can be constructed once in `main` and replaced by a double in
//! tests. [`bigquery::BigQueryClient`] is the production implementation.

pub mod auth;
pub mod bigquery;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::catalog::TableSchema;
use crate::error::WarehouseError;

pub use auth::Credentials;
pub use bigquery::{BigQueryClient, BigQueryConfig};

/// Fully qualified dataset identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    /// Reference to a table (or view) inside this dataset.
    pub fn table(&self, name: impl Into<String>) -> TableRef {
        TableRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: name.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

/// Fully qualified table or view identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Result of an idempotent create. Failures are the `Err` side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Behaviour when a load targets a table that already has rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    #[default]
    Append,
    Truncate,
    Empty,
}

impl WriteDisposition {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            WriteDisposition::Append => "WRITE_APPEND",
            WriteDisposition::Truncate => "WRITE_TRUNCATE",
            WriteDisposition::Empty => "WRITE_EMPTY",
        }
    }
}

/// Options of a single CSV load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Header rows to skip at the top of the file.
    pub skip_leading_rows: u32,
    /// Let the warehouse infer column types.
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
}

impl LoadOptions {
    pub fn new(skip_leading_rows: u32) -> Self {
        Self {
            skip_leading_rows,
            autodetect: false,
            write_disposition: WriteDisposition::default(),
        }
    }
}

/// A finished load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub job_id: String,
    /// Rows written by this job, when the warehouse reports it.
    pub output_rows: Option<u64>,
}

/// Operations the import pipeline needs from a warehouse.
///
/// Every call completes before returning; load jobs are awaited.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Project implied by the warehouse credentials, if any.
    async fn default_project(&self) -> Option<String> {
        None
    }

    /// Create a dataset, reporting an existing one as `AlreadyExists`.
    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: Option<&str>,
    ) -> Result<CreateOutcome, WarehouseError>;

    /// Load a CSV file into `table` and wait for the job to finish.
    async fn load_csv(
        &self,
        table: &TableRef,
        path: &Path,
        schema: &TableSchema,
        options: &LoadOptions,
    ) -> Result<LoadJob, WarehouseError>;

    /// Current row count of `table`.
    async fn table_row_count(&self, table: &TableRef) -> Result<u64, WarehouseError>;

    /// Create a standard-SQL view, reporting an existing one as `AlreadyExists`.
    async fn create_view(
        &self,
        view: &TableRef,
        query: &str,
    ) -> Result<CreateOutcome, WarehouseError>;
}
