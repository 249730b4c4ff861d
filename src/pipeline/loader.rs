//! CSV loading.

use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::catalog::TableCatalog;
use crate::error::{ImportError, InvalidFileNameSnafu};
use crate::source;
use crate::warehouse::{DatasetRef, LoadOptions, Warehouse};

/// Statistics about a batch of loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub files_loaded: usize,
    /// Files whose table has no schema in the catalog.
    pub files_skipped: usize,
    /// Rows written by the load jobs, as reported by the warehouse.
    pub rows_loaded: u64,
}

/// Load each file into the table named by its file name.
///
/// Files for tables missing from the catalog are skipped with a warning.
/// Any warehouse failure stops the batch.
pub async fn load_files(
    warehouse: &dyn Warehouse,
    catalog: &TableCatalog,
    target: &DatasetRef,
    files: &[PathBuf],
    options: &LoadOptions,
) -> Result<LoadStats, ImportError> {
    let mut stats = LoadStats::default();

    for path in files {
        let table = source::table_name(path).context(InvalidFileNameSnafu { path })?;

        let Some(schema) = catalog.get(table) else {
            warn!(
                file = %path.display(),
                table,
                "Table has no schema in the catalog, skipping file"
            );
            stats.files_skipped += 1;
            continue;
        };

        let table = target.table(table);
        info!(file = %path.display(), table = %table, "Importing file");

        let job = warehouse.load_csv(&table, path, schema, options).await?;
        let total_rows = warehouse.table_row_count(&table).await?;

        info!(
            table = %table,
            job_id = %job.job_id,
            total_rows,
            "Loaded {} rows into {}",
            total_rows,
            table
        );

        stats.files_loaded += 1;
        stats.rows_loaded += job.output_rows.unwrap_or(0);
    }

    Ok(stats)
}
