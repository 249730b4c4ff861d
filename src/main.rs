//! assessment-import: consolidate assessment logs and import them into BigQuery.

use clap::Parser;
use snafu::prelude::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use assessment_import::config::{self, CliArgs, Settings};
use assessment_import::error::{CatalogSnafu, ConfigSnafu, ConsolidateSnafu, ImportError};
use assessment_import::{
    BigQueryClient, BigQueryConfig, DatasetRef, RunOptions, TableCatalog, consolidate_logs,
    resolve_project, run_import,
};

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), ImportError> {
    let args = CliArgs::parse();

    // RUST_LOG wins over --verbose
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "assessment-import starting");

    let request = args.import_request().context(ConfigSnafu)?;
    let settings = Settings::load(args.config.as_deref()).context(ConfigSnafu)?;
    let catalog = match &args.catalog {
        Some(path) => TableCatalog::from_file(path),
        None => TableCatalog::embedded(),
    }
    .context(CatalogSnafu)?;
    debug!(tables = catalog.len(), "Table catalog loaded");

    if args.consolidate_logs {
        let stats = consolidate_logs(&args.files_location, &catalog).context(ConsolidateSnafu)?;
        info!("Consolidation completed");
        info!("  Tables consolidated: {}", stats.tables_consolidated);
        info!("  Files merged: {}", stats.files_merged);
        info!("  Location: {}", args.files_location.display());
    }

    let Some(request) = request else {
        return Ok(());
    };

    let client = BigQueryClient::connect(BigQueryConfig::from_settings(&settings.warehouse)).await?;
    let configured = config::configured_project(
        request.project.as_deref(),
        settings.warehouse.project.as_deref(),
        |name| std::env::var(name).ok(),
    );
    let project = resolve_project(configured, &client).await.context(ConfigSnafu)?;
    let target = DatasetRef::new(project, request.dataset);
    let options = RunOptions::new(args.files_location.clone(), request.collection_id, &settings);

    let stats = run_import(&client, &catalog, &target, &options).await?;

    info!("Import completed successfully");
    info!("  Dataset: {} ({:?})", target, stats.dataset);
    info!(
        "  Assessment files loaded: {} (skipped: {})",
        stats.assessment.files_loaded, stats.assessment.files_skipped
    );
    info!(
        "  Configuration files loaded: {} (skipped: {})",
        stats.configuration.files_loaded, stats.configuration.files_skipped
    );
    info!("  Rows loaded: {}", stats.assessment.rows_loaded + stats.configuration.rows_loaded);
    if stats.views.skipped {
        info!("  Views: skipped");
    } else {
        info!(
            "  Views created: {} (already present: {})",
            stats.views.created, stats.views.existing
        );
    }

    Ok(())
}
