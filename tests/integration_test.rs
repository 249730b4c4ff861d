//! Integration tests for assessment-import

use assessment_import::error::{ConfigError, ImportError, WarehouseError};
use assessment_import::pipeline::{create_views, load_files};
use assessment_import::warehouse::{LoadJob, LoadOptions, WriteDisposition};
use assessment_import::{
    CreateOutcome, DatasetRef, RunOptions, TableCatalog, TableRef, TableSchema, Warehouse,
    consolidate_logs, ensure_dataset, resolve_project, run_import,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// A warehouse call as seen by the double.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    CreateDataset {
        dataset: String,
        location: Option<String>,
    },
    Load {
        table: String,
        file: String,
        skip_leading_rows: u32,
        columns: usize,
    },
    RowCount {
        table: String,
    },
    CreateView {
        view: String,
        query: String,
    },
}

/// In-memory warehouse recording every call.
#[derive(Default)]
struct RecordingWarehouse {
    calls: Mutex<Vec<Call>>,
    /// Datasets and views that already exist, by qualified name.
    existing: Mutex<HashSet<String>>,
    rows: Mutex<HashMap<String, u64>>,
    /// Table whose load job fails.
    failing_table: Option<String>,
    /// Project implied by the credentials.
    ambient_project: Option<String>,
}

impl RecordingWarehouse {
    fn with_existing(names: &[&str]) -> Self {
        let warehouse = Self::default();
        warehouse
            .existing
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        warehouse
    }

    fn with_ambient_project(project: &str) -> Self {
        Self {
            ambient_project: Some(project.to_string()),
            ..Default::default()
        }
    }

    fn failing_on(table: &str) -> Self {
        Self {
            failing_table: Some(table.to_string()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn created_views(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CreateView { view, .. } => Some(view),
                _ => None,
            })
            .collect()
    }

    fn loaded_tables(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Load { table, .. } => Some(table),
                _ => None,
            })
            .collect()
    }

    fn create(&self, name: String) -> CreateOutcome {
        if self.existing.lock().unwrap().insert(name) {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExists
        }
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn default_project(&self) -> Option<String> {
        self.ambient_project.clone()
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: Option<&str>,
    ) -> Result<CreateOutcome, WarehouseError> {
        self.calls.lock().unwrap().push(Call::CreateDataset {
            dataset: dataset.to_string(),
            location: location.map(str::to_string),
        });
        Ok(self.create(dataset.to_string()))
    }

    async fn load_csv(
        &self,
        table: &TableRef,
        path: &Path,
        schema: &TableSchema,
        options: &LoadOptions,
    ) -> Result<LoadJob, WarehouseError> {
        self.calls.lock().unwrap().push(Call::Load {
            table: table.table.clone(),
            file: path.file_name().unwrap().to_string_lossy().into_owned(),
            skip_leading_rows: options.skip_leading_rows,
            columns: schema.len(),
        });

        if self.failing_table.as_deref() == Some(table.table.as_str()) {
            return Err(WarehouseError::LoadJobFailed {
                job_id: "job_failed".to_string(),
                reason: "invalid".to_string(),
                message: "Too many values in row".to_string(),
                details: String::new(),
            });
        }

        let lines = std::fs::read_to_string(path).unwrap().lines().count() as u64;
        let rows = lines.saturating_sub(u64::from(options.skip_leading_rows));
        *self.rows.lock().unwrap().entry(table.to_string()).or_default() += rows;

        Ok(LoadJob {
            job_id: format!("job_{}", table.table),
            output_rows: Some(rows),
        })
    }

    async fn table_row_count(&self, table: &TableRef) -> Result<u64, WarehouseError> {
        self.calls.lock().unwrap().push(Call::RowCount {
            table: table.table.clone(),
        });
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&table.to_string())
            .copied()
            .unwrap_or(0))
    }

    async fn create_view(
        &self,
        view: &TableRef,
        query: &str,
    ) -> Result<CreateOutcome, WarehouseError> {
        self.calls.lock().unwrap().push(Call::CreateView {
            view: view.table.clone(),
            query: query.to_string(),
        });
        Ok(self.create(view.to_string()))
    }
}

/// Workspace with the three input directories.
struct Workspace {
    _dir: TempDir,
    results: PathBuf,
    config: PathBuf,
    views: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let results = dir.path().join("dbResults");
        let config = dir.path().join("opConfig");
        let views = dir.path().join("opViews");
        for path in [&results, &config, &views] {
            std::fs::create_dir(path).unwrap();
        }
        Self {
            _dir: dir,
            results,
            config,
            views,
        }
    }

    fn write(dir: &Path, name: &str, lines: usize) {
        let content: String = (1..=lines).map(|i| format!("line{i}\n")).collect();
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn options(&self, collection_id: &str) -> RunOptions {
        RunOptions {
            files_location: self.results.clone(),
            collection_id: collection_id.to_string(),
            config_dir: self.config.clone(),
            views_dir: self.views.clone(),
            location: None,
            autodetect: false,
            write_disposition: WriteDisposition::Append,
        }
    }
}

fn target() -> DatasetRef {
    DatasetRef::new("acme", "assessment")
}

fn catalog() -> TableCatalog {
    TableCatalog::embedded().unwrap()
}

mod run_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_run() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__dbsummary__host.ORCL.ORCL.180603.log", 5);
        Workspace::write(&ws.results, "opdb__dbfeatures__host.ORCL.ORCL.180603.log", 4);
        Workspace::write(&ws.results, "opdb__dbsummary__host.ORCL.ORCL.190101.log", 9);
        Workspace::write(
            &ws.config,
            "opconfig__optimusconfig_bms_machinesizes__v1.csv",
            3,
        );
        std::fs::write(
            ws.views.join("optimus_createView__vReport.sql"),
            "SELECT * FROM ${dataset}.dbsummary",
        )
        .unwrap();

        let warehouse = RecordingWarehouse::default();
        let stats = run_import(&warehouse, &catalog(), &target(), &ws.options("180603"))
            .await
            .unwrap();

        assert_eq!(stats.dataset, CreateOutcome::Created);
        assert_eq!(stats.assessment.files_loaded, 2);
        assert_eq!(stats.assessment.files_skipped, 0);
        assert_eq!(stats.assessment.rows_loaded, 3 + 2);
        assert_eq!(stats.configuration.files_loaded, 1);
        assert_eq!(stats.configuration.rows_loaded, 2);
        assert_eq!(stats.views.created, 1);

        let calls = warehouse.calls();
        assert_eq!(
            calls[0],
            Call::CreateDataset {
                dataset: "acme.assessment".to_string(),
                location: None,
            }
        );
        assert_eq!(
            calls[1],
            Call::Load {
                table: "dbfeatures".to_string(),
                file: "opdb__dbfeatures__host.ORCL.ORCL.180603.log".to_string(),
                skip_leading_rows: 2,
                columns: catalog().get("dbfeatures").unwrap().len(),
            }
        );
        assert_eq!(
            calls[2],
            Call::RowCount {
                table: "dbfeatures".to_string()
            }
        );
        assert_eq!(
            warehouse.loaded_tables(),
            ["dbfeatures", "dbsummary", "optimusconfig_bms_machinesizes"]
        );
        assert!(calls.contains(&Call::Load {
            table: "optimusconfig_bms_machinesizes".to_string(),
            file: "opconfig__optimusconfig_bms_machinesizes__v1.csv".to_string(),
            skip_leading_rows: 1,
            columns: catalog().get("optimusconfig_bms_machinesizes").unwrap().len(),
        }));
        assert_eq!(
            calls.last(),
            Some(&Call::CreateView {
                view: "vReport".to_string(),
                query: "SELECT * FROM assessment.dbsummary".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_no_matching_files_is_fatal() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__dbsummary__host.ORCL.ORCL.180603.log", 5);

        let warehouse = RecordingWarehouse::default();
        let err = run_import(&warehouse, &catalog(), &target(), &ws.options("999999"))
            .await
            .unwrap_err();

        match &err {
            ImportError::NoMatchingFiles { pattern } => {
                assert!(pattern.ends_with("dbResults/*999999.log"));
                assert!(err.to_string().contains(pattern.as_str()));
            }
            other => panic!("Expected NoMatchingFiles, got {other:?}"),
        }
        assert!(warehouse.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_dataset_is_reused() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__dbsummary__host.180603.log", 3);

        let warehouse = RecordingWarehouse::with_existing(&["acme.assessment"]);
        let stats = run_import(&warehouse, &catalog(), &target(), &ws.options("180603"))
            .await
            .unwrap();

        assert_eq!(stats.dataset, CreateOutcome::AlreadyExists);
        assert_eq!(stats.assessment.files_loaded, 1);
    }

    #[tokio::test]
    async fn test_warehouse_failure_stops_run() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__dbfeatures__host.180603.log", 3);
        Workspace::write(&ws.results, "opdb__dbsummary__host.180603.log", 3);
        std::fs::write(ws.views.join("optimus_createView__v1.sql"), "SELECT 1").unwrap();

        let warehouse = RecordingWarehouse::failing_on("dbfeatures");
        let err = run_import(&warehouse, &catalog(), &target(), &ws.options("180603"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ImportError::Warehouse {
                source: WarehouseError::LoadJobFailed { .. }
            }
        ));
        assert_eq!(warehouse.loaded_tables(), ["dbfeatures"]);
        assert!(warehouse.created_views().is_empty());
    }

    #[tokio::test]
    async fn test_consolidated_files_import() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__dbsummary__host.ORCL.ORCL.180603.log", 10);
        Workspace::write(&ws.results, "opdb__dbsummary__host.ORCL.ORCL.190101.log", 12);

        let consolidation = consolidate_logs(&ws.results, &catalog()).unwrap();
        assert_eq!(consolidation.tables_consolidated, 1);

        let warehouse = RecordingWarehouse::default();
        let stats = run_import(&warehouse, &catalog(), &target(), &ws.options("consolidate"))
            .await
            .unwrap();

        assert_eq!(stats.assessment.files_loaded, 1);
        assert_eq!(stats.assessment.rows_loaded, 20 - 2);
        assert!(warehouse.calls().contains(&Call::Load {
            table: "dbsummary".to_string(),
            file: "opalldb__dbsummary__consolidate.log".to_string(),
            skip_leading_rows: 2,
            columns: catalog().get("dbsummary").unwrap().len(),
        }));
    }

    #[tokio::test]
    async fn test_ensure_dataset_passes_location() {
        let warehouse = RecordingWarehouse::default();
        let outcome = ensure_dataset(&warehouse, &target(), Some("EU")).await.unwrap();

        assert_eq!(outcome, CreateOutcome::Created);
        assert_eq!(
            warehouse.calls(),
            [Call::CreateDataset {
                dataset: "acme.assessment".to_string(),
                location: Some("EU".to_string()),
            }]
        );
    }
}

mod project_tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_project_wins() {
        let warehouse = RecordingWarehouse::with_ambient_project("from-credentials");
        let project = resolve_project(Some("acme".to_string()), &warehouse)
            .await
            .unwrap();

        assert_eq!(project, "acme");
    }

    #[tokio::test]
    async fn test_credentials_project_used_when_unconfigured() {
        let warehouse = RecordingWarehouse::with_ambient_project("from-credentials");

        assert_eq!(
            resolve_project(None, &warehouse).await.unwrap(),
            "from-credentials"
        );
        assert_eq!(
            resolve_project(Some(String::new()), &warehouse).await.unwrap(),
            "from-credentials"
        );
    }

    #[tokio::test]
    async fn test_missing_project() {
        let warehouse = RecordingWarehouse::default();
        let err = resolve_project(None, &warehouse).await.unwrap_err();

        assert!(matches!(err, ConfigError::MissingProject));

        let warehouse = RecordingWarehouse::with_ambient_project("");
        let err = resolve_project(None, &warehouse).await.unwrap_err();

        assert!(matches!(err, ConfigError::MissingProject));
    }
}

mod loader_tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_miss_is_skipped() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__notatable__host.180603.log", 3);
        Workspace::write(&ws.results, "opdb__dbsummary__host.180603.log", 3);
        let files = vec![
            ws.results.join("opdb__notatable__host.180603.log"),
            ws.results.join("opdb__dbsummary__host.180603.log"),
        ];

        let warehouse = RecordingWarehouse::default();
        let stats = load_files(&warehouse, &catalog(), &target(), &files, &LoadOptions::new(2))
            .await
            .unwrap();

        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_loaded, 1);
        assert_eq!(warehouse.loaded_tables(), ["dbsummary"]);
    }

    #[tokio::test]
    async fn test_file_without_table_name_is_fatal() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "dbsummary.180603.log", 3);
        let files = vec![ws.results.join("dbsummary.180603.log")];

        let warehouse = RecordingWarehouse::default();
        let err = load_files(&warehouse, &catalog(), &target(), &files, &LoadOptions::new(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::InvalidFileName { .. }));
        assert!(warehouse.calls().is_empty());
    }

    #[tokio::test]
    async fn test_row_count_read_after_each_load() {
        let ws = Workspace::new();
        Workspace::write(&ws.results, "opdb__dbsummary__a.1.log", 4);
        Workspace::write(&ws.results, "opdb__dbsummary__b.1.log", 6);
        let files = vec![
            ws.results.join("opdb__dbsummary__a.1.log"),
            ws.results.join("opdb__dbsummary__b.1.log"),
        ];

        let warehouse = RecordingWarehouse::default();
        load_files(&warehouse, &catalog(), &target(), &files, &LoadOptions::new(2))
            .await
            .unwrap();

        let kinds: Vec<&str> = warehouse
            .calls()
            .iter()
            .map(|call| match call {
                Call::Load { .. } => "load",
                Call::RowCount { .. } => "count",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["load", "count", "load", "count"]);

        let total = warehouse
            .table_row_count(&target().table("dbsummary"))
            .await
            .unwrap();
        assert_eq!(total, 2 + 4);
    }
}

mod view_tests {
    use super::*;

    #[tokio::test]
    async fn test_views_created_in_sorted_order() {
        let ws = Workspace::new();
        for name in [
            "optimus_createView__v3Summary.sql",
            "optimus_createView__v1Base.sql",
            "optimus_createView__v2Join.sql",
        ] {
            std::fs::write(ws.views.join(name), "SELECT * FROM ${dataset}.dbsummary").unwrap();
        }
        std::fs::write(ws.views.join("README.sql"), "-- not a view").unwrap();

        let warehouse = RecordingWarehouse::default();
        let stats = create_views(&warehouse, &target(), &ws.views).await.unwrap();

        assert_eq!(stats.created, 3);
        assert!(!stats.skipped);
        assert_eq!(warehouse.created_views(), ["v1Base", "v2Join", "v3Summary"]);
    }

    #[tokio::test]
    async fn test_existing_view_left_untouched() {
        let ws = Workspace::new();
        std::fs::write(
            ws.views.join("optimus_createView__vReport.sql"),
            "SELECT 2 FROM ${dataset}.t",
        )
        .unwrap();

        let warehouse = RecordingWarehouse::with_existing(&["acme.assessment.vReport"]);
        let stats = create_views(&warehouse, &target(), &ws.views).await.unwrap();

        assert_eq!(stats.created, 0);
        assert_eq!(stats.existing, 1);
    }

    #[tokio::test]
    async fn test_missing_templates_skip_step() {
        let ws = Workspace::new();

        let warehouse = RecordingWarehouse::default();
        let stats = create_views(&warehouse, &target(), &ws.views).await.unwrap();

        assert!(stats.skipped);
        assert!(warehouse.calls().is_empty());
    }
}

mod config_tests {
    use assessment_import::config::Settings;
    use assessment_import::error::ConfigError;
    use assessment_import::warehouse::WriteDisposition;
    use tempfile::TempDir;

    #[test]
    fn test_settings_file_with_interpolation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            r#"
warehouse:
  project: acme
  location: ${ASSESSMENT_IMPORT_TEST_UNSET_LOCATION:-EU}
load:
  write_disposition: empty
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.warehouse.project.as_deref(), Some("acme"));
        assert_eq!(settings.warehouse.location.as_deref(), Some("EU"));
        assert_eq!(settings.load.write_disposition, WriteDisposition::Empty);
    }

    #[test]
    fn test_settings_file_missing_variable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "warehouse:\n  access_token: ${ASSESSMENT_IMPORT_TEST_UNSET_TOKEN}\n",
        )
        .unwrap();

        let err = Settings::load(Some(&path)).unwrap_err();
        match err {
            ConfigError::EnvInterpolation { message } => {
                assert!(message.contains("ASSESSMENT_IMPORT_TEST_UNSET_TOKEN"));
            }
            other => panic!("Expected EnvInterpolation, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_settings_file() {
        let err = Settings::load(Some(std::path::Path::new("/nonexistent/settings.yaml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
