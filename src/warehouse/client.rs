//! BigQuery client over the v2 REST API.
//!
//! - `jobs.query` submits the SQL: `POST /projects/{billing}/queries`
//! - `jobs.getQueryResults` polls and pages: `GET /projects/{billing}/queries/{jobId}`
//!
//! The async HTTP and OAuth calls run on a runtime owned by the client, so
//! callers see a plain blocking API.

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Runtime;
use yup_oauth2::{AccessToken, ServiceAccountAuthenticator, ServiceAccountKey};

use super::models::{CellValue, Column, ColumnType, QueryResult};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const PAGE_SIZE: u32 = 10_000;
const WAIT_TIMEOUT_MS: u64 = 10_000;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Service account credentials unavailable: {0}")]
    Credentials(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Warehouse returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Anything that can execute SQL text and return a table
pub trait Warehouse {
    /// Identity the queries are billed to; part of cache keys
    fn identity(&self) -> &str;

    fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError>;
}

/// Where the service-account key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Key JSON held directly (e.g. from the `GCP_SERVICE_ACCOUNT_JSON` secret)
    Inline(String),
    /// Path to a key file
    File(PathBuf),
}

impl Credentials {
    fn load_key(&self) -> Result<ServiceAccountKey, WarehouseError> {
        let json = match self {
            Credentials::Inline(json) => json.clone(),
            Credentials::File(path) => std::fs::read_to_string(path).map_err(|e| {
                WarehouseError::Credentials(format!("cannot read {}: {e}", path.display()))
            })?,
        };
        serde_json::from_str(&json)
            .map_err(|e| WarehouseError::Credentials(format!("invalid key JSON: {e}")))
    }
}

// Wire types. Only the fields this client reads are declared.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub job_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    pub job_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TableCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Convert the schema and raw rows of a response into a typed table
pub(crate) fn decode_rows(
    schema: &TableSchema,
    rows: &[TableRow],
) -> Result<(Vec<Column>, Vec<Vec<CellValue>>), WarehouseError> {
    let columns: Vec<Column> = schema
        .fields
        .iter()
        .map(|f| Column {
            name: f.name.clone(),
            column_type: ColumnType::from_bigquery(&f.field_type),
        })
        .collect();

    let mut decoded = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.f.len() != columns.len() {
            return Err(WarehouseError::Decode(format!(
                "row {i} has {} cells, schema has {} columns",
                row.f.len(),
                columns.len()
            )));
        }
        let cells = row
            .f
            .iter()
            .zip(&columns)
            .map(|(cell, column)| match &cell.v {
                serde_json::Value::Null => CellValue::Null,
                serde_json::Value::String(s) => CellValue::from_raw(Some(s.as_str()), &column.column_type),
                // Repeated and record fields arrive as nested JSON
                other => CellValue::Text(other.to_string()),
            })
            .collect();
        decoded.push(cells);
    }

    Ok((columns, decoded))
}

/// Where bearer tokens come from
enum Auth {
    ServiceAccount {
        credentials: Credentials,
        token: RefCell<Option<AccessToken>>,
    },
    /// A pre-issued token, for talking to local test servers
    #[cfg(test)]
    Fixed(String),
}

/// Blocking BigQuery client authenticated with a service account
pub struct BigQueryClient {
    billing_project: String,
    api_base: String,
    auth: Auth,
    http: reqwest::Client,
    runtime: Runtime,
}

impl BigQueryClient {
    pub fn new(billing_project: String, credentials: Credentials) -> Result<Self, WarehouseError> {
        Self::build(
            billing_project,
            API_BASE.to_string(),
            Auth::ServiceAccount {
                credentials,
                token: RefCell::new(None),
            },
            reqwest::Client::builder(),
        )
    }

    /// Client against another API root with a fixed bearer token
    #[cfg(test)]
    fn with_base_url(
        billing_project: &str,
        api_base: &str,
        token: &str,
    ) -> Result<Self, WarehouseError> {
        Self::build(
            billing_project.to_string(),
            api_base.trim_end_matches('/').to_string(),
            Auth::Fixed(token.to_string()),
            reqwest::Client::builder().no_proxy(),
        )
    }

    fn build(
        billing_project: String,
        api_base: String,
        auth: Auth,
        http: reqwest::ClientBuilder,
    ) -> Result<Self, WarehouseError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let http = http.timeout(HTTP_TIMEOUT).build()?;

        Ok(BigQueryClient {
            billing_project,
            api_base,
            auth,
            http,
            runtime,
        })
    }

    /// Get a bearer token, reusing the previous one until it expires
    async fn bearer(&self) -> Result<String, WarehouseError> {
        let (credentials, cached) = match &self.auth {
            Auth::ServiceAccount { credentials, token } => (credentials, token),
            #[cfg(test)]
            Auth::Fixed(token) => return Ok(token.clone()),
        };

        if let Some(token) = cached.borrow().as_ref() {
            if !token.is_expired() {
                if let Some(t) = token.token() {
                    return Ok(t.to_string());
                }
            }
        }

        let key = credentials.load_key()?;
        let auth = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| WarehouseError::Auth(e.to_string()))?;
        let token = auth
            .token(&[BIGQUERY_SCOPE])
            .await
            .map_err(|e| WarehouseError::Auth(e.to_string()))?;
        let bearer = token
            .token()
            .ok_or_else(|| WarehouseError::Auth("empty access token".to_string()))?
            .to_string();

        tracing::debug!(expires = ?token.expiration_time(), "Obtained access token");
        *cached.borrow_mut() = Some(token);
        Ok(bearer)
    }

    async fn parse<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, WarehouseError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(WarehouseError::Api {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&body).map_err(|e| WarehouseError::Decode(e.to_string()))
    }

    async fn submit(&self, sql: &str) -> Result<QueryResponse, WarehouseError> {
        let bearer = self.bearer().await?;
        let url = format!("{}/projects/{}/queries", self.api_base, self.billing_project);
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: WAIT_TIMEOUT_MS,
            max_results: PAGE_SIZE,
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn fetch_page(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, WarehouseError> {
        let bearer = self.bearer().await?;
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_base, self.billing_project, job.job_id
        );

        let mut query: Vec<(&str, String)> = vec![
            ("timeoutMs", WAIT_TIMEOUT_MS.to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(location) = &job.location {
            query.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(bearer)
            .query(&query)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn run(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let mut response = self.submit(sql).await?;
        let job = response
            .job_reference
            .take()
            .ok_or_else(|| WarehouseError::Decode("response without jobReference".into()))?;

        while !response.job_complete {
            tokio::time::sleep(POLL_INTERVAL).await;
            tracing::debug!(job_id = %job.job_id, "Waiting for query job");
            response = self.fetch_page(&job, None).await?;
        }

        let schema = response.schema.take().unwrap_or_default();
        let (columns, mut rows) = decode_rows(&schema, &response.rows)?;

        let mut page_token = response.page_token.take();
        while let Some(token) = page_token {
            let mut page = self.fetch_page(&job, Some(&token)).await?;
            let (_, more) = decode_rows(&schema, &page.rows)?;
            tracing::debug!(job_id = %job.job_id, rows = more.len(), "Fetched result page");
            rows.extend(more);
            page_token = page.page_token.take();
        }

        Ok(QueryResult::new(columns, rows))
    }
}

impl Warehouse for BigQueryClient {
    fn identity(&self) -> &str {
        &self.billing_project
    }

    fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        tracing::info!(billing_project = %self.billing_project, bytes = sql.len(), "Submitting query");
        let result = self.runtime.block_on(self.run(sql));
        match &result {
            Ok(r) => tracing::info!(rows = r.len(), columns = r.columns.len(), "Query finished"),
            Err(e) => tracing::warn!(error = %e, "Query failed"),
        }
        result
    }
}
