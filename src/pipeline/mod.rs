//! Import pipeline.
//!
//! One run is strictly sequential: find the collection files, ensure the
//! dataset, load the assessment files, load the configuration files, then
//! create the views. Every warehouse call is awaited before the next one
//! starts and the first failure ends the run.

mod loader;
mod views;

pub use loader::{LoadStats, load_files};
pub use views::{DATASET_PLACEHOLDER, VIEW_TEMPLATE_PATTERN, ViewStats, create_views, render_view};

use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::catalog::TableCatalog;
use crate::config::Settings;
use crate::error::{
    ConfigError, ImportError, MissingProjectSnafu, NoMatchingFilesSnafu, WarehouseError,
};
use crate::source;
use crate::warehouse::{CreateOutcome, DatasetRef, LoadOptions, Warehouse, WriteDisposition};

/// Header rows of assessment collection files.
pub const ASSESSMENT_HEADER_ROWS: u32 = 2;

/// Header rows of configuration CSV files.
pub const CONFIG_HEADER_ROWS: u32 = 1;

/// Everything a run needs besides the warehouse and the catalog.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub files_location: PathBuf,
    pub collection_id: String,
    pub config_dir: PathBuf,
    pub views_dir: PathBuf,
    /// Location for a newly created dataset.
    pub location: Option<String>,
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
}

impl RunOptions {
    pub fn new(files_location: PathBuf, collection_id: String, settings: &Settings) -> Self {
        Self {
            files_location,
            collection_id,
            config_dir: settings.paths.config_dir.clone(),
            views_dir: settings.paths.views_dir.clone(),
            location: settings.warehouse.location.clone(),
            autodetect: settings.load.autodetect,
            write_disposition: settings.load.write_disposition,
        }
    }

    fn load_options(&self, skip_leading_rows: u32) -> LoadOptions {
        LoadOptions {
            skip_leading_rows,
            autodetect: self.autodetect,
            write_disposition: self.write_disposition,
        }
    }
}

/// Statistics about one import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub dataset: CreateOutcome,
    pub assessment: LoadStats,
    pub configuration: LoadStats,
    pub views: ViewStats,
}

/// Settle the project: the configured one, else the one the warehouse
/// credentials belong to.
pub async fn resolve_project(
    configured: Option<String>,
    warehouse: &dyn Warehouse,
) -> Result<String, ConfigError> {
    if let Some(project) = configured.filter(|project| !project.is_empty()) {
        return Ok(project);
    }

    let project = warehouse
        .default_project()
        .await
        .filter(|project| !project.is_empty())
        .context(MissingProjectSnafu)?;
    info!(project = %project, "Using project from default credentials");
    Ok(project)
}

/// Create the target dataset, treating an existing one as success.
pub async fn ensure_dataset(
    warehouse: &dyn Warehouse,
    target: &DatasetRef,
    location: Option<&str>,
) -> Result<CreateOutcome, WarehouseError> {
    let outcome = warehouse.create_dataset(target, location).await?;
    match outcome {
        CreateOutcome::Created => info!(dataset = %target, location = ?location, "Created dataset"),
        CreateOutcome::AlreadyExists => info!(dataset = %target, "Dataset already exists"),
    }
    Ok(outcome)
}

/// Run a full import into `target`.
pub async fn run_import(
    warehouse: &dyn Warehouse,
    catalog: &TableCatalog,
    target: &DatasetRef,
    options: &RunOptions,
) -> Result<ImportStats, ImportError> {
    let pattern = source::import_pattern(&options.files_location, &options.collection_id);
    let files = source::find_files(&pattern)?;
    ensure!(!files.is_empty(), NoMatchingFilesSnafu { pattern: &pattern });
    info!(files = files.len(), pattern = %pattern, "Found collection files");

    let dataset = ensure_dataset(warehouse, target, options.location.as_deref()).await?;

    let assessment = load_files(
        warehouse,
        catalog,
        target,
        &files,
        &options.load_options(ASSESSMENT_HEADER_ROWS),
    )
    .await?;

    let config_pattern = source::pattern_in(&options.config_dir, "*.csv");
    let config_files = source::find_files(&config_pattern)?;
    if config_files.is_empty() {
        warn!(pattern = %config_pattern, "No configuration files found");
    } else {
        info!(files = config_files.len(), pattern = %config_pattern, "Found configuration files");
    }
    let configuration = load_files(
        warehouse,
        catalog,
        target,
        &config_files,
        &options.load_options(CONFIG_HEADER_ROWS),
    )
    .await?;

    let views = create_views(warehouse, target, &options.views_dir).await?;

    Ok(ImportStats {
        dataset,
        assessment,
        configuration,
        views,
    })
}
