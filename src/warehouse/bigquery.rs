//! BigQuery REST client.
//!
//! Speaks the v2 JSON API directly: datasets.insert, tables.insert (views),
//! tables.get, multipart jobs.insert for CSV loads, and jobs.get polling
//! until a load job reaches `DONE`.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::auth::Credentials;
use super::{CreateOutcome, DatasetRef, LoadJob, LoadOptions, TableRef, Warehouse};
use crate::catalog::TableSchema;
use crate::config::WarehouseSettings;
use crate::error::{
    ApiSnafu, DecodeSnafu, EncodeSnafu, EndpointBaseSnafu, EndpointUrlSnafu, HttpSnafu,
    InvalidRowCountSnafu, LoadJobFailedSnafu, ReadUploadSnafu, WarehouseError,
};

const USER_AGENT: &str = concat!("assessment-import/", env!("CARGO_PKG_VERSION"));

/// Per-row load errors echoed in a failure message.
const MAX_REPORTED_ERRORS: usize = 10;

/// Connection parameters for [`BigQueryClient`].
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    pub endpoint: String,
    pub location: Option<String>,
    pub access_token: Option<String>,
    pub poll_interval: Duration,
}

impl BigQueryConfig {
    pub fn from_settings(settings: &WarehouseSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            location: settings.location.clone(),
            access_token: settings.access_token.clone(),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

/// Warehouse implementation backed by the BigQuery REST API.
pub struct BigQueryClient {
    http: Client,
    base: Url,
    credentials: Credentials,
    location: Option<String>,
    poll_interval: Duration,
}

impl BigQueryClient {
    /// Resolve credentials and build the HTTP client.
    pub async fn connect(config: BigQueryConfig) -> Result<Self, WarehouseError> {
        let base = parse_endpoint(&config.endpoint)?;
        let credentials =
            Credentials::discover(config.access_token.as_deref(), |name| std::env::var(name).ok())
                .await?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context(HttpSnafu)?;

        debug!(endpoint = %base, location = ?config.location, "BigQuery client ready");

        Ok(Self {
            http,
            base,
            credentials,
            location: config.location,
            poll_interval: config.poll_interval,
        })
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        what: &'static str,
    ) -> Result<(StatusCode, String), WarehouseError> {
        let token = self.credentials.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .context(HttpSnafu)?;
        let status = response.status();
        let body = response.text().await.context(HttpSnafu)?;
        debug!(call = what, status = status.as_u16(), "BigQuery response");
        Ok((status, body))
    }

    async fn get_job(&self, project: &str, job: &JobReference) -> Result<JobResource, WarehouseError> {
        let mut url = api_url(
            &self.base,
            &["bigquery", "v2", "projects", project, "jobs", &job.job_id],
        )?;
        if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
            url.query_pairs_mut().append_pair("location", location);
        }

        let (status, body) = self.execute(self.http.get(url), "jobs.get").await?;
        decode(&expect_success(status, body)?, "job")
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn default_project(&self) -> Option<String> {
        self.credentials.project_id().await
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: Option<&str>,
    ) -> Result<CreateOutcome, WarehouseError> {
        let url = api_url(
            &self.base,
            &["bigquery", "v2", "projects", &dataset.project, "datasets"],
        )?;
        let body = DatasetInsert {
            dataset_reference: DatasetReference {
                project_id: &dataset.project,
                dataset_id: &dataset.dataset,
            },
            location: location.or(self.location.as_deref()),
        };

        let (status, body) = self
            .execute(self.http.post(url).json(&body), "datasets.insert")
            .await?;
        create_outcome(status, body)
    }

    async fn load_csv(
        &self,
        table: &TableRef,
        path: &Path,
        schema: &TableSchema,
        options: &LoadOptions,
    ) -> Result<LoadJob, WarehouseError> {
        let data = tokio::fs::read(path)
            .await
            .context(ReadUploadSnafu { path })?;
        let job = load_job_request(table, schema, options, self.location.as_deref());
        let metadata = serde_json::to_vec(&job).context(EncodeSnafu { what: "load job" })?;

        let boundary = format!("assessment_import_{}", Uuid::new_v4().simple());
        let payload = multipart_related(&boundary, &metadata, &data);

        let mut url = api_url(
            &self.base,
            &["upload", "bigquery", "v2", "projects", &table.project, "jobs"],
        )?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let request = self
            .http
            .post(url)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(payload);
        let (status, body) = self.execute(request, "jobs.insert").await?;
        let mut resource: JobResource = decode(&expect_success(status, body)?, "job")?;

        info!(
            job_id = %resource.job_reference.job_id,
            table = %table,
            bytes = data.len(),
            "Load job submitted"
        );

        loop {
            if let Some(job) = finished_load_job(&resource)? {
                return Ok(job);
            }
            debug!(
                job_id = %resource.job_reference.job_id,
                state = %resource.status.state,
                "Waiting for load job"
            );
            tokio::time::sleep(self.poll_interval).await;
            resource = self
                .get_job(&table.project, &resource.job_reference)
                .await?;
        }
    }

    async fn table_row_count(&self, table: &TableRef) -> Result<u64, WarehouseError> {
        let url = api_url(
            &self.base,
            &[
                "bigquery",
                "v2",
                "projects",
                &table.project,
                "datasets",
                &table.dataset,
                "tables",
                &table.table,
            ],
        )?;

        let (status, body) = self.execute(self.http.get(url), "tables.get").await?;
        let resource: TableResource = decode(&expect_success(status, body)?, "table")?;
        parse_row_count(table, resource.num_rows.as_deref())
    }

    async fn create_view(
        &self,
        view: &TableRef,
        query: &str,
    ) -> Result<CreateOutcome, WarehouseError> {
        let url = api_url(
            &self.base,
            &[
                "bigquery",
                "v2",
                "projects",
                &view.project,
                "datasets",
                &view.dataset,
                "tables",
            ],
        )?;
        let body = ViewInsert {
            table_reference: TableReference::from(view),
            view: ViewDefinition {
                query,
                use_legacy_sql: false,
            },
        };

        let (status, body) = self
            .execute(self.http.post(url).json(&body), "tables.insert")
            .await?;
        create_outcome(status, body)
    }
}

// ============ URLs and payloads ============

fn parse_endpoint(endpoint: &str) -> Result<Url, WarehouseError> {
    let url = Url::parse(endpoint).context(EndpointUrlSnafu { endpoint })?;
    ensure!(!url.cannot_be_a_base(), EndpointBaseSnafu { endpoint });
    Ok(url)
}

/// Append percent-encoded path segments to the endpoint.
fn api_url(base: &Url, segments: &[&str]) -> Result<Url, WarehouseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| {
            EndpointBaseSnafu {
                endpoint: base.as_str(),
            }
            .build()
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn load_job_request<'a>(
    table: &'a TableRef,
    schema: &'a TableSchema,
    options: &LoadOptions,
    location: Option<&'a str>,
) -> JobInsert<'a> {
    // An explicit schema would override detection, so it is only sent without it.
    let schema = (!options.autodetect).then(|| SchemaDefinition {
        fields: schema
            .columns()
            .iter()
            .map(|name| FieldDefinition {
                name,
                field_type: "STRING",
                mode: "NULLABLE",
            })
            .collect(),
    });

    JobInsert {
        job_reference: JobReferenceInsert {
            project_id: &table.project,
            location,
        },
        configuration: JobConfiguration {
            load: LoadConfiguration {
                destination_table: TableReference::from(table),
                source_format: "CSV",
                skip_leading_rows: options.skip_leading_rows,
                autodetect: options.autodetect,
                write_disposition: options.write_disposition.as_api_str(),
                create_disposition: "CREATE_IF_NEEDED",
                schema,
            },
        },
    }
}

/// `multipart/related` body: JSON job metadata followed by the file bytes.
fn multipart_related(boundary: &str, metadata: &[u8], data: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(metadata.len() + data.len() + 4 * boundary.len() + 128);
    body.put_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.put_slice(metadata);
    body.put_slice(
        format!("\r\n--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.put_slice(data);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body.freeze()
}

// ============ Responses ============

fn decode<T: DeserializeOwned>(body: &str, what: &'static str) -> Result<T, WarehouseError> {
    serde_json::from_str(body).context(DecodeSnafu { what })
}

fn expect_success(status: StatusCode, body: String) -> Result<String, WarehouseError> {
    ensure!(
        status.is_success(),
        ApiSnafu {
            status: status.as_u16(),
            message: api_error_message(&body),
        }
    );
    Ok(body)
}

/// Map a create call's response onto the tri-state outcome.
fn create_outcome(status: StatusCode, body: String) -> Result<CreateOutcome, WarehouseError> {
    if status == StatusCode::CONFLICT {
        return Ok(CreateOutcome::AlreadyExists);
    }
    expect_success(status, body).map(|_| CreateOutcome::Created)
}

/// Message from the API error envelope, or the raw body.
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// `Some` once the job is `DONE` and succeeded; an error if it failed.
fn finished_load_job(resource: &JobResource) -> Result<Option<LoadJob>, WarehouseError> {
    if resource.status.state != "DONE" {
        return Ok(None);
    }

    let job_id = &resource.job_reference.job_id;
    if let Some(error) = &resource.status.error_result {
        let details: String = resource
            .status
            .errors
            .iter()
            .take(MAX_REPORTED_ERRORS)
            .map(|e| match &e.location {
                Some(location) => format!("\n  - {location}: {}", e.message),
                None => format!("\n  - {}", e.message),
            })
            .collect();
        return LoadJobFailedSnafu {
            job_id,
            reason: &error.reason,
            message: &error.message,
            details,
        }
        .fail();
    }

    let output_rows = resource
        .statistics
        .as_ref()
        .and_then(|s| s.load.as_ref())
        .and_then(|l| l.output_rows.as_deref())
        .and_then(|rows| rows.parse().ok());

    Ok(Some(LoadJob {
        job_id: job_id.clone(),
        output_rows,
    }))
}

fn parse_row_count(table: &TableRef, num_rows: Option<&str>) -> Result<u64, WarehouseError> {
    match num_rows {
        None => Ok(0),
        Some(value) => value.parse().ok().context(InvalidRowCountSnafu {
            table: table.to_string(),
            value,
        }),
    }
}

// ============ Wire types ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

impl<'a> From<&'a TableRef> for TableReference<'a> {
    fn from(table: &'a TableRef) -> Self {
        Self {
            project_id: &table.project,
            dataset_id: &table.dataset,
            table_id: &table.table,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetInsert<'a> {
    dataset_reference: DatasetReference<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewInsert<'a> {
    table_reference: TableReference<'a>,
    view: ViewDefinition<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewDefinition<'a> {
    query: &'a str,
    use_legacy_sql: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobInsert<'a> {
    job_reference: JobReferenceInsert<'a>,
    configuration: JobConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobReferenceInsert<'a> {
    project_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Serialize)]
struct JobConfiguration<'a> {
    load: LoadConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
    destination_table: TableReference<'a>,
    source_format: &'static str,
    skip_leading_rows: u32,
    autodetect: bool,
    write_disposition: &'static str,
    create_disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<SchemaDefinition<'a>>,
}

#[derive(Serialize)]
struct SchemaDefinition<'a> {
    fields: Vec<FieldDefinition<'a>>,
}

#[derive(Serialize)]
struct FieldDefinition<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: &'static str,
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    #[serde(default)]
    num_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
