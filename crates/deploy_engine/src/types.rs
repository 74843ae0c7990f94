use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Identifies one job run requested by the app; echoed on every job event.
pub type RunId = u64;

/// Logical request slots; each holds at most one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Projects,
    Workbooks,
    ConnectionInfo,
    ConnectionTest,
    Job,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectRecord {
    pub project_luid: String,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasourceRecord {
    pub luid: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkbookRecord {
    #[serde(default)]
    pub id: String,
    pub luid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub datasources: Vec<DatasourceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConnectionRecord {
    #[serde(rename = "type", default)]
    pub connection_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub host: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub port: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionInfoRecord {
    #[serde(default)]
    pub datasource_name: String,
    #[serde(default)]
    pub connections: Vec<SourceConnectionRecord>,
}

/// Database parameters in the shape the backend expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbConfig {
    pub db_type: String,
    pub host: String,
    pub port: String,
    pub dbname: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionTestReply {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl ConnectionTestReply {
    pub fn succeeded(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationDatasource {
    pub datasource_luid: String,
    pub db_config: DbConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRequest {
    pub source_workbook_luid: String,
    pub datasource_luids: Vec<String>,
    pub target_project_luid: String,
    pub datasources: Vec<MigrationDatasource>,
}

impl MigrationRequest {
    pub fn new(
        source_workbook_luid: impl Into<String>,
        target_project_luid: impl Into<String>,
        datasources: Vec<MigrationDatasource>,
    ) -> Self {
        Self {
            source_workbook_luid: source_workbook_luid.into(),
            datasource_luids: datasources
                .iter()
                .map(|ds| ds.datasource_luid.clone())
                .collect(),
            target_project_luid: target_project_luid.into(),
            datasources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataExportRequest {
    pub workbook_id: String,
    pub workbook_luid: String,
    pub datasource_luids: Vec<String>,
    /// Metadata API ids; the datasource metadata query filters on these.
    pub datasource_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct SubmitReply {
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct TaskExistsReply {
    #[serde(default)]
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Completed,
    Failed,
    #[serde(other)]
    Pending,
}

/// One answer from the export status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Payload of a `progress` stream event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub stage: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub step: Option<String>,
}

/// Payload of a `complete` or `error` stream event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct TerminalFrame {
    #[serde(default)]
    pub stage: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub workbook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSuccess {
    pub message: String,
    pub result_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Stopped on request; never shown to the user.
    Cancelled,
    /// The backend reported the job as failed.
    Terminal,
    Timeout,
    /// The progress stream delivered nothing before failing.
    ConnectionLost,
    Network,
    Validation,
}

impl FailureKind {
    pub fn is_silent(&self) -> bool {
        matches!(self, FailureKind::Cancelled)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Terminal => write!(f, "job failed"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::ConnectionLost => write!(f, "connection lost"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Validation => write!(f, "invalid request"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled")
    }
}

impl From<BackendError> for JobFailure {
    fn from(err: BackendError) -> Self {
        let kind = match err {
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::Missing(_) | BackendError::Config(_) => FailureKind::Validation,
            BackendError::Network(_) | BackendError::Status(_) | BackendError::Decode(_) => {
                FailureKind::Network
            }
        };
        JobFailure::new(kind, err.to_string())
    }
}

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("response is missing {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Projects,
    Workbooks { project_luid: String },
    ConnectionInfo { datasource_luid: String },
}

impl FetchRequest {
    pub fn slot(&self) -> Slot {
        match self {
            FetchRequest::Projects => Slot::Projects,
            FetchRequest::Workbooks { .. } => Slot::Workbooks,
            FetchRequest::ConnectionInfo { .. } => Slot::ConnectionInfo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutput {
    Projects(Vec<ProjectRecord>),
    Workbooks(Vec<WorkbookRecord>),
    ConnectionInfo(ConnectionInfoRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    Migration(MigrationRequest),
    MetadataExport(MetadataExportRequest),
}

/// Everything the engine reports back to the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    FetchCompleted {
        slot: Slot,
        epoch: u64,
        result: Result<FetchOutput, BackendError>,
    },
    ConnectionTested {
        key: String,
        epoch: u64,
        result: Result<ConnectionTestReply, BackendError>,
    },
    JobSubmitted {
        run: RunId,
        job_id: String,
    },
    JobProgress {
        run: RunId,
        update: ProgressUpdate,
    },
    JobCompleted {
        run: RunId,
        result: Result<JobSuccess, JobFailure>,
    },
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(text)) => text,
        Some(other) => other.to_string(),
    })
}
