//! Error types for assessment-import using snafu.
//!
//! Each concern gets its own enum with context selectors; `ImportError`
//! aggregates them for the top-level run.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors raised while resolving CLI arguments and the settings file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Dataset is required for an import run.
    #[snafu(display("The parameter --dataset cannot be omitted and it must have a valid name"))]
    MissingDataset,

    /// Collection id is required for an import run.
    #[snafu(display(
        "The parameter --collection-id cannot be omitted. Please provide the collection id from the CSV files"
    ))]
    MissingCollectionId,

    /// No project from arguments, settings, environment, or credentials.
    #[snafu(display(
        "Google Cloud project could not be determined: pass --project-name, set warehouse.project, export GOOGLE_CLOUD_PROJECT, or use credentials that carry a project"
    ))]
    MissingProject,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML settings.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read the settings file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Warehouse endpoint is not an absolute http(s) URL.
    #[snafu(display("Invalid warehouse endpoint: {endpoint}"))]
    InvalidEndpoint { endpoint: String },

    /// Poll interval must be positive.
    #[snafu(display("warehouse.poll_interval_ms must be greater than zero"))]
    InvalidPollInterval,
}

// ============ Catalog Errors ============

/// Errors raised while loading the table schema catalog.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CatalogError {
    /// Failed to read the catalog file.
    #[snafu(display("Failed to read catalog {}: {source}", path.display()))]
    CatalogRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Catalog document is not valid YAML for the expected shape.
    #[snafu(display("Failed to parse catalog: {source}"))]
    CatalogParse { source: serde_yaml::Error },

    /// Catalog declares no tables.
    #[snafu(display("Catalog does not declare any table"))]
    EmptyCatalog,

    /// A table declares no columns.
    #[snafu(display("Table '{table}' declares no columns"))]
    EmptyTable { table: String },

    /// A table declares the same column twice.
    #[snafu(display("Table '{table}' declares column '{column}' more than once"))]
    DuplicateColumn { table: String, column: String },
}

// ============ Source Errors ============

/// Errors raised while discovering files on disk.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The glob pattern itself is malformed.
    #[snafu(display("Invalid file pattern '{pattern}': {source}"))]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// A matched path could not be inspected.
    #[snafu(display("Failed to read matching path: {source}"))]
    Unreadable { source: glob::GlobError },
}

// ============ Consolidation Errors ============

/// Errors raised while consolidating collection logs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConsolidateError {
    /// File discovery failed.
    #[snafu(display("File discovery failed: {source}"))]
    Discovery { source: SourceError },

    /// A matched file does not carry a table name in its file name.
    #[snafu(display(
        "Unexpected file name {}: expected <prefix>__<table>__<collection>.log",
        path.display()
    ))]
    UnexpectedFileName { path: PathBuf },

    /// Failed to remove a previous consolidated file.
    #[snafu(display("Failed to remove {}: {source}", path.display()))]
    RemoveExisting {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create the consolidated file.
    #[snafu(display("Failed to create {}: {source}", path.display()))]
    CreateOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read a collection file.
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    ReadSource {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the consolidated file.
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    WriteOutput {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Warehouse Errors ============

/// Errors raised by warehouse operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WarehouseError {
    /// Transport-level HTTP failure.
    #[snafu(display("HTTP request failed: {source}"))]
    Http { source: reqwest::Error },

    /// The endpoint cannot be turned into request URLs.
    #[snafu(display("Invalid warehouse endpoint {endpoint}: {source}"))]
    EndpointUrl {
        endpoint: String,
        source: url::ParseError,
    },

    /// The endpoint URL cannot carry path segments (e.g. `data:` URLs).
    #[snafu(display("Warehouse endpoint {endpoint} cannot be used as a base URL"))]
    EndpointBase { endpoint: String },

    /// The API answered with a non-success status.
    #[snafu(display("BigQuery API returned {status}: {message}"))]
    Api { status: u16, message: String },

    /// A response body could not be decoded.
    #[snafu(display("Failed to decode {what} response: {source}"))]
    Decode {
        what: &'static str,
        source: serde_json::Error,
    },

    /// A request body could not be encoded.
    #[snafu(display("Failed to encode {what} request: {source}"))]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },

    /// The load job finished with an error result.
    #[snafu(display("Load job {job_id} failed ({reason}): {message}{details}"))]
    LoadJobFailed {
        job_id: String,
        reason: String,
        message: String,
        details: String,
    },

    /// The table metadata carried a row count that is not a number.
    #[snafu(display("Table {table} reported an invalid row count '{value}'"))]
    InvalidRowCount { table: String, value: String },

    /// No explicit token and no Application Default Credentials.
    #[snafu(display(
        "No Google Cloud credentials found: set warehouse.access_token, export GOOGLE_OAUTH_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS, or run gcloud auth application-default login: {source}"
    ))]
    CredentialDiscovery { source: gcp_auth::Error },

    /// The credential provider could not mint a token.
    #[snafu(display("Failed to obtain an access token: {source}"))]
    AccessToken { source: gcp_auth::Error },

    /// The file to upload could not be read.
    #[snafu(display("Failed to read {} for upload: {source}", path.display()))]
    ReadUpload {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Import Error (top-level) ============

/// Top-level errors that terminate a run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ImportError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Catalog error.
    #[snafu(display("Catalog error: {source}"))]
    Catalog { source: CatalogError },

    /// Consolidation error.
    #[snafu(display("Consolidation error: {source}"))]
    Consolidate { source: ConsolidateError },

    /// File discovery error.
    #[snafu(display("File discovery error: {source}"))]
    Source { source: SourceError },

    /// Warehouse error.
    #[snafu(display("Warehouse error: {source}"))]
    Warehouse { source: WarehouseError },

    /// The import pattern matched nothing.
    #[snafu(display("There is no matching CSV file to be processed using: {pattern}"))]
    NoMatchingFiles { pattern: String },

    /// A file selected for loading does not carry a table name.
    #[snafu(display(
        "Cannot derive a table name from {}: expected <prefix>__<table>__<suffix>",
        path.display()
    ))]
    InvalidFileName { path: PathBuf },

    /// A view template could not be read.
    #[snafu(display("Failed to read view template {}: {source}", path.display()))]
    ReadTemplate {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<ConfigError> for ImportError {
    fn from(source: ConfigError) -> Self {
        ImportError::Config { source }
    }
}

impl From<CatalogError> for ImportError {
    fn from(source: CatalogError) -> Self {
        ImportError::Catalog { source }
    }
}

impl From<ConsolidateError> for ImportError {
    fn from(source: ConsolidateError) -> Self {
        ImportError::Consolidate { source }
    }
}

impl From<SourceError> for ImportError {
    fn from(source: SourceError) -> Self {
        ImportError::Source { source }
    }
}

impl From<WarehouseError> for ImportError {
    fn from(source: WarehouseError) -> Self {
        ImportError::Warehouse { source }
    }
}
