//! Command-line arguments and the optional YAML settings file.
//!
//! The CLI carries the per-run parameters (dataset, collection id, paths).
//! The settings file carries the rarely changed warehouse and load knobs and
//! supports `${VAR}` environment interpolation.

mod vars;

pub use vars::{interpolate, interpolate_with};

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{
    ConfigError, EnvInterpolationSnafu, InvalidEndpointSnafu, InvalidPollIntervalSnafu,
    MissingCollectionIdSnafu, MissingDatasetSnafu, ReadFileSnafu,
    YamlParseSnafu,
};
use crate::warehouse::WriteDisposition;

pub const DEFAULT_FILES_LOCATION: &str = "dbResults";
pub const DEFAULT_CONFIG_DIR: &str = "opConfig";
pub const DEFAULT_VIEWS_DIR: &str = "opViews";
pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// Environment variables consulted, in order, when no project is configured.
pub const PROJECT_ENV_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

/// Consolidate Oracle assessment logs and import them into BigQuery.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "assessment-import")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// BigQuery dataset to import into. Created when missing, appended to otherwise.
    #[arg(short = 'd', long)]
    pub dataset: Option<String>,

    /// Google Cloud project holding the dataset.
    #[arg(short = 'p', long = "project-name")]
    pub project_name: Option<String>,

    /// Directory holding the collected log files.
    #[arg(short = 'l', long = "files-location", default_value = DEFAULT_FILES_LOCATION)]
    pub files_location: PathBuf,

    /// Collection id suffix of the files to import, or `consolidate` for consolidated logs.
    #[arg(short = 'c', long = "collection-id")]
    pub collection_id: Option<String>,

    /// Merge every opdb*.log found in the files location into one file per table.
    #[arg(long = "consolidate-logs")]
    pub consolidate_logs: bool,

    /// Increase output verbosity.
    #[arg(short, long)]
    pub verbose: bool,

    /// Optional YAML settings file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Optional YAML table catalog replacing the built-in one.
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

/// Parameters of the import half of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub dataset: String,
    pub collection_id: String,
    pub project: Option<String>,
}

impl CliArgs {
    /// Validate argument combinations and extract the import parameters.
    ///
    /// Returns `None` when only consolidation was requested.
    pub fn import_request(&self) -> Result<Option<ImportRequest>, ConfigError> {
        let dataset = self
            .dataset
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        let collection_id = self
            .collection_id
            .as_deref()
            .map(|id| id.replace(' ', ""))
            .filter(|id| !id.is_empty());

        if self.consolidate_logs {
            return Ok(match (dataset, collection_id) {
                (Some(dataset), Some(collection_id)) => Some(ImportRequest {
                    dataset: dataset.to_string(),
                    collection_id,
                    project: self.project_name.clone(),
                }),
                _ => None,
            });
        }

        let dataset = dataset.context(MissingDatasetSnafu)?;
        let collection_id = collection_id.context(MissingCollectionIdSnafu)?;

        if self.project_name.is_none() {
            warn!(
                "Google Cloud project name not provided. It will be resolved from the settings file or the environment"
            );
        }

        Ok(Some(ImportRequest {
            dataset: dataset.to_string(),
            collection_id,
            project: self.project_name.clone(),
        }))
    }

    /// Log filter directive derived from `--verbose`.
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

/// Contents of the optional settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub warehouse: WarehouseSettings,
    #[serde(default)]
    pub load: LoadSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

/// Warehouse connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseSettings {
    /// Project used when `--project-name` is not given.
    #[serde(default)]
    pub project: Option<String>,
    /// Location for the dataset and load jobs (e.g. "EU", "us-central1").
    #[serde(default)]
    pub location: Option<String>,
    /// API root, overridable for emulators.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// OAuth bearer token. Usually `${SOME_ENV_VAR}`.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Delay between load job status polls (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            project: None,
            location: None,
            endpoint: default_endpoint(),
            access_token: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Load job knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadSettings {
    /// Ask the warehouse to infer column types instead of the catalog's text columns.
    #[serde(default)]
    pub autodetect: bool,
    /// What happens when the destination table already holds rows.
    #[serde(default)]
    pub write_disposition: WriteDisposition,
}

/// Fixed input directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_views_dir")]
    pub views_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            views_dir: default_views_dir(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_DIR)
}

fn default_views_dir() -> PathBuf {
    PathBuf::from(DEFAULT_VIEWS_DIR)
}

impl Settings {
    /// Load settings from a YAML file, interpolating environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let content = interpolate(&content).map_err(|errors| {
            EnvInterpolationSnafu {
                message: errors.join("\n"),
            }
            .build()
        })?;
        Self::from_yaml(&content)
    }

    /// Parse already-interpolated YAML.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings file when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = &self.warehouse.endpoint;
        ensure!(
            endpoint.starts_with("https://") || endpoint.starts_with("http://"),
            InvalidEndpointSnafu { endpoint }
        );
        ensure!(self.warehouse.poll_interval_ms > 0, InvalidPollIntervalSnafu);
        Ok(())
    }
}

/// Project named by the argument, the settings file, or the environment, in that order.
///
/// `None` leaves the choice to the warehouse credentials.
pub fn configured_project<F>(cli: Option<&str>, settings: Option<&str>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    cli.or(settings)
        .map(str::to_string)
        .or_else(|| PROJECT_ENV_VARS.iter().find_map(|&name| lookup(name)))
        .filter(|project| !project.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            files_location: PathBuf::from(DEFAULT_FILES_LOCATION),
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::parse_from([
            "assessment-import",
            "--dataset",
            "assessment",
            "-c",
            "180603",
            "--project-name",
            "acme",
        ]);
        assert_eq!(args.dataset.as_deref(), Some("assessment"));
        assert_eq!(args.collection_id.as_deref(), Some("180603"));
        assert_eq!(args.project_name.as_deref(), Some("acme"));
        assert_eq!(args.files_location, PathBuf::from("dbResults"));
        assert!(!args.consolidate_logs);
        assert_eq!(args.log_level(), "info");
    }

    #[test]
    fn test_abbreviated_flags_rejected() {
        for flag in ["--ds", "--pn", "--ocid", "--cl", "-ds"] {
            assert!(
                CliArgs::try_parse_from(["assessment-import", flag, "x"]).is_err(),
                "{flag} accepted"
            );
        }
    }

    #[test]
    fn test_dataset_required_without_consolidation() {
        let mut args = args();
        args.collection_id = Some("180603".into());
        assert!(matches!(
            args.import_request(),
            Err(ConfigError::MissingDataset)
        ));

        args.dataset = Some("   ".into());
        assert!(matches!(
            args.import_request(),
            Err(ConfigError::MissingDataset)
        ));
    }

    #[test]
    fn test_collection_id_required_even_without_project() {
        let mut args = args();
        args.dataset = Some("assessment".into());
        assert!(matches!(
            args.import_request(),
            Err(ConfigError::MissingCollectionId)
        ));
    }

    #[test]
    fn test_collection_id_spaces_removed() {
        let mut args = args();
        args.dataset = Some("assessment".into());
        args.collection_id = Some(" 180 603 ".into());

        let request = args.import_request().unwrap().unwrap();
        assert_eq!(request.collection_id, "180603");
        assert_eq!(request.project, None);
    }

    #[test]
    fn test_consolidation_only() {
        let mut args = args();
        args.consolidate_logs = true;
        assert_eq!(args.import_request().unwrap(), None);

        args.dataset = Some("assessment".into());
        args.collection_id = Some("consolidate".into());
        let request = args.import_request().unwrap().unwrap();
        assert_eq!(request.collection_id, "consolidate");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert_eq!(settings.warehouse.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.warehouse.poll_interval_ms, 1000);
        assert!(!settings.load.autodetect);
        assert_eq!(settings.load.write_disposition, WriteDisposition::Append);
        assert_eq!(settings.paths.config_dir, PathBuf::from("opConfig"));
        assert_eq!(settings.paths.views_dir, PathBuf::from("opViews"));
    }

    #[test]
    fn test_settings_yaml_parsing() {
        let yaml = r#"
warehouse:
  project: acme
  location: EU
  poll_interval_ms: 250
load:
  autodetect: true
  write_disposition: truncate
paths:
  views_dir: /srv/views
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.warehouse.project.as_deref(), Some("acme"));
        assert_eq!(settings.warehouse.location.as_deref(), Some("EU"));
        assert_eq!(settings.warehouse.poll_interval_ms, 250);
        assert!(settings.load.autodetect);
        assert_eq!(settings.load.write_disposition, WriteDisposition::Truncate);
        assert_eq!(settings.paths.views_dir, PathBuf::from("/srv/views"));
        assert_eq!(settings.paths.config_dir, PathBuf::from("opConfig"));
    }

    #[test]
    fn test_settings_validation() {
        let err = Settings::from_yaml("warehouse:\n  endpoint: bigquery.local\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));

        let err = Settings::from_yaml("warehouse:\n  poll_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPollInterval));

        let err = Settings::from_yaml("warehouse:\n  region: EU\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_configured_project_precedence() {
        let env = |name: &str| (name == "GCLOUD_PROJECT").then(|| "from-env".to_string());

        assert_eq!(
            configured_project(Some("cli"), Some("settings"), env).as_deref(),
            Some("cli")
        );
        assert_eq!(
            configured_project(None, Some("settings"), env).as_deref(),
            Some("settings")
        );
        assert_eq!(configured_project(None, None, env).as_deref(), Some("from-env"));
        assert_eq!(configured_project(None, None, |_| None), None);
        assert_eq!(configured_project(Some(""), None, |_| None), None);
    }
}
