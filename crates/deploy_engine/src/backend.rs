use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use deploy_logging::{deploy_debug, deploy_warn};
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderValue, ACCEPT, COOKIE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::types::{SubmitReply, TaskExistsReply};
use crate::{
    BackendError, ConnectionInfoRecord, ConnectionTestReply, DbConfig, JobStatus,
    MetadataExportRequest, MigrationRequest, ProjectRecord, WorkbookRecord,
};

/// Raw body chunks of a server-push response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    /// Sent verbatim as the `Cookie` header on every call.
    pub session_cookie: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/bi/".to_string(),
            session_cookie: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Listing and lookup calls behind the selection and configuration steps.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    async fn projects(&self) -> Result<Vec<ProjectRecord>, BackendError>;

    async fn workbooks(&self, project_luid: &str) -> Result<Vec<WorkbookRecord>, BackendError>;

    async fn connection_info(
        &self,
        datasource_luid: &str,
    ) -> Result<ConnectionInfoRecord, BackendError>;

    async fn test_connection(&self, config: &DbConfig)
        -> Result<ConnectionTestReply, BackendError>;
}

#[async_trait::async_trait]
pub trait JobBackend: Send + Sync {
    /// Starts a migration and returns the backend task id.
    async fn submit_migration(&self, request: &MigrationRequest) -> Result<String, BackendError>;

    async fn task_exists(&self, task_id: &str) -> Result<bool, BackendError>;

    /// Kicks off metadata generation; progress is tracked under `session_key`.
    async fn submit_metadata_export(
        &self,
        request: &MetadataExportRequest,
        session_key: &str,
    ) -> Result<(), BackendError>;
}

#[async_trait::async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BackendError>;
}

#[async_trait::async_trait]
pub trait ProgressSource: Send + Sync {
    async fn open_progress(&self, job_id: &str) -> Result<ByteStream, BackendError>;
}

/// Every capability the engine needs from the backend.
pub trait Backend: CatalogSource + JobBackend + JobStatusSource + ProgressSource {}

impl<T> Backend for T where T: CatalogSource + JobBackend + JobStatusSource + ProgressSource {}

#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    base: Url,
    cookie: Option<HeaderValue>,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| BackendError::Config(format!("base url {}: {err}", settings.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Config(format!(
                "base url {} cannot carry paths",
                settings.base_url
            )));
        }
        let cookie = settings
            .session_cookie
            .as_deref()
            .filter(|cookie| !cookie.trim().is_empty())
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|err| BackendError::Config(format!("session cookie: {err}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(map_reqwest_error)?;
        // Progress streams stay open for the whole run; the consumer's watchdogs bound them.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            base,
            cookie,
            client,
            stream_client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Config(format!("base url {} cannot carry paths", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn endpoint_with_query(
        &self,
        segments: &[&str],
        key: &str,
        value: &str,
    ) -> Result<Url, BackendError> {
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut().append_pair(key, value);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cookie {
            Some(cookie) => request.header(COOKIE, cookie.clone()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, BackendError> {
        deploy_debug!("GET {}", url);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode_json(response).await
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        deploy_debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode_json(response).await
    }
}

#[async_trait::async_trait]
impl CatalogSource for ReqwestBackend {
    async fn projects(&self) -> Result<Vec<ProjectRecord>, BackendError> {
        self.get_json(self.endpoint(&["tableau", "projects_list"])?)
            .await
    }

    async fn workbooks(&self, project_luid: &str) -> Result<Vec<WorkbookRecord>, BackendError> {
        let url =
            self.endpoint_with_query(&["tableau", "sqlproxy-workbooks"], "project_luid", project_luid)?;
        // A project without workbooks is answered with `null` by some backends.
        let workbooks: Option<Vec<WorkbookRecord>> = self.get_json(url).await?;
        Ok(workbooks.unwrap_or_default())
    }

    async fn connection_info(
        &self,
        datasource_luid: &str,
    ) -> Result<ConnectionInfoRecord, BackendError> {
        let url = self.endpoint_with_query(
            &["tableau", "datasource_connection"],
            "datasource_luid",
            datasource_luid,
        )?;
        self.get_json(url).await
    }

    async fn test_connection(
        &self,
        config: &DbConfig,
    ) -> Result<ConnectionTestReply, BackendError> {
        self.post_json(self.endpoint(&["db", "test-connection"])?, config)
            .await
    }
}

#[async_trait::async_trait]
impl JobBackend for ReqwestBackend {
    async fn submit_migration(&self, request: &MigrationRequest) -> Result<String, BackendError> {
        let reply: SubmitReply = self
            .post_json(self.endpoint(&["deploy", "full-migration"])?, request)
            .await?;
        reply
            .task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(BackendError::Missing("task_id"))
    }

    async fn task_exists(&self, task_id: &str) -> Result<bool, BackendError> {
        let reply: TaskExistsReply = self
            .get_json(self.endpoint(&["deploy", "status", task_id])?)
            .await?;
        Ok(reply.exists)
    }

    async fn submit_metadata_export(
        &self,
        request: &MetadataExportRequest,
        session_key: &str,
    ) -> Result<(), BackendError> {
        if request.datasource_ids.len() < request.datasource_luids.len() {
            deploy_warn!(
                "Only {} of {} datasources have metadata ids; the rest are left out of the export",
                request.datasource_ids.len(),
                request.datasource_luids.len()
            );
        }
        let _: serde_json::Value = self
            .post_json(
                self.endpoint(&["tableau", "workbook_metadata"])?,
                &serde_json::json!({
                    "workbook_ids": [request.workbook_id],
                    "workbook_luids": [request.workbook_luid],
                    "session_key": session_key,
                }),
            )
            .await?;
        let _: serde_json::Value = self
            .post_json(
                self.endpoint(&["tableau", "datasource_metadata"])?,
                &serde_json::json!({
                    "datasource_ids": request.datasource_ids,
                    "datasource_luids": request.datasource_luids,
                    "session_key": session_key,
                }),
            )
            .await?;
        let _: serde_json::Value = self
            .post_json(
                self.endpoint(&["tableau", "generate_combined_excel"])?,
                &serde_json::json!({ "session_key": session_key }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStatusSource for ReqwestBackend {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BackendError> {
        let url = self.endpoint_with_query(&["tableau", "excel", "status"], "session_key", job_id)?;
        self.get_json(url).await
    }
}

#[async_trait::async_trait]
impl ProgressSource for ReqwestBackend {
    async fn open_progress(&self, job_id: &str) -> Result<ByteStream, BackendError> {
        let url = self.endpoint(&["deploy", "progress", job_id])?;
        deploy_debug!("Opening progress stream {}", url);
        let response = self
            .authorize(self.stream_client.get(url))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(map_reqwest_error)),
        ))
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status(status.as_u16()));
    }
    response.json::<T>().await.map_err(|err| {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            map_reqwest_error(err)
        }
    })
}

fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        return BackendError::Timeout(err.to_string());
    }
    if let Some(status) = err.status() {
        return BackendError::Status(status.as_u16());
    }
    BackendError::Network(err.to_string())
}
