//! View creation from SQL templates.
//!
//! Templates are created in lexicographic file-name order since later views
//! select from earlier ones.

use snafu::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ImportError, InvalidFileNameSnafu, ReadTemplateSnafu};
use crate::source;
use crate::warehouse::{CreateOutcome, DatasetRef, Warehouse};

/// File pattern of view templates inside the views directory.
pub const VIEW_TEMPLATE_PATTERN: &str = "optimus_createView*.sql";

/// Placeholder replaced by the dataset id in every template.
pub const DATASET_PLACEHOLDER: &str = "${dataset}";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewStats {
    pub created: usize,
    pub existing: usize,
    /// No template was found, so the step did nothing.
    pub skipped: bool,
}

/// Create every view template found in `views_dir` inside `target`.
pub async fn create_views(
    warehouse: &dyn Warehouse,
    target: &DatasetRef,
    views_dir: &Path,
) -> Result<ViewStats, ImportError> {
    let pattern = source::pattern_in(views_dir, VIEW_TEMPLATE_PATTERN);
    let mut templates = source::find_files(&pattern)?;

    if templates.is_empty() {
        warn!(pattern = %pattern, "No view templates found, skipping view creation");
        return Ok(ViewStats {
            skipped: true,
            ..Default::default()
        });
    }

    templates.sort();
    info!(templates = templates.len(), "Creating views");

    let mut stats = ViewStats::default();
    for path in &templates {
        let name = source::view_name(path).context(InvalidFileNameSnafu { path })?;
        let view = target.table(name);

        let template = tokio::fs::read_to_string(path)
            .await
            .context(ReadTemplateSnafu { path })?;
        let query = render_view(&template, &target.dataset);
        debug!(template = %path.display(), view = %view, "Rendered view query");

        match warehouse.create_view(&view, &query).await? {
            CreateOutcome::Created => {
                info!(view = %view, "Created view");
                stats.created += 1;
            }
            CreateOutcome::AlreadyExists => {
                info!(view = %view, "View already exists");
                stats.existing += 1;
            }
        }
    }

    Ok(stats)
}

/// Substitute every dataset placeholder in a template.
pub fn render_view(template: &str, dataset: &str) -> String {
    template.replace(DATASET_PLACEHOLDER, dataset)
}
