use crate::{ConnectionParams, DbType, EntityId, Epoch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Workbook and datasource deployment, observed over the progress stream.
    Migration,
    /// Metadata workbook generation, observed by polling.
    MetadataExport,
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Migration => "Migration",
            JobKind::MetadataExport => "Metadata export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasourceDeployment {
    pub datasource: EntityId,
    pub db_type: DbType,
    pub connection: ConnectionParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Migration {
        source_workbook: String,
        target_project: String,
        datasources: Vec<DatasourceDeployment>,
    },
    MetadataExport {
        workbook_id: String,
        workbook_luid: String,
        datasources: Vec<EntityId>,
        /// Metadata API ids of the datasources that have one.
        datasource_ids: Vec<String>,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Migration { .. } => JobKind::Migration,
            JobRequest::MetadataExport { .. } => JobKind::MetadataExport,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTestRequest {
    pub db_type: DbType,
    pub connection: ConnectionParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTestReport {
    pub success: bool,
    pub message: String,
}

/// Discrete deployment steps reported by the backend by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeployStep {
    DownloadDatasource,
    PublishDatasource,
    UpdateConnections,
    DownloadWorkbook,
    UpdateReferences,
    PublishWorkbook,
}

impl DeployStep {
    pub const ALL: [DeployStep; 6] = [
        DeployStep::DownloadDatasource,
        DeployStep::PublishDatasource,
        DeployStep::UpdateConnections,
        DeployStep::DownloadWorkbook,
        DeployStep::UpdateReferences,
        DeployStep::PublishWorkbook,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            DeployStep::DownloadDatasource => "DOWNLOAD_DATASOURCE",
            DeployStep::PublishDatasource => "PUBLISH_DATASOURCE",
            DeployStep::UpdateConnections => "UPDATE_CONNECTIONS",
            DeployStep::DownloadWorkbook => "DOWNLOAD_WORKBOOK",
            DeployStep::UpdateReferences => "UPDATE_REFERENCES",
            DeployStep::PublishWorkbook => "PUBLISH_WORKBOOK",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|step| step.key().eq_ignore_ascii_case(key))
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeployStep::DownloadDatasource => "Downloading Datasource",
            DeployStep::PublishDatasource => "Publishing Datasource",
            DeployStep::UpdateConnections => "Updating Connections",
            DeployStep::DownloadWorkbook => "Downloading Workbook",
            DeployStep::UpdateReferences => "Updating References",
            DeployStep::PublishWorkbook => "Publishing Workbook",
        }
    }

    /// Position in the stepper, starting at 1.
    pub fn ordinal(&self) -> usize {
        Self::ALL
            .iter()
            .position(|step| step == self)
            .map_or(0, |index| index + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Active,
    Pending,
}

/// Classification of a failed job run, as surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Superseded by the user; never surfaced.
    Cancelled,
    /// The backend reported the job as failed.
    Terminal,
    /// No terminal state within the polling bound or the stream went quiet.
    Timeout,
    /// The progress stream never delivered data.
    ConnectionLost,
    /// Submission or a non-retried request failed in transport.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailed {
    pub class: FailureClass,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSucceeded {
    pub message: String,
    pub result_url: Option<String>,
}

pub type JobResult = Result<JobSucceeded, JobFailed>;

/// Live progress of the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub run: Epoch,
    pub kind: JobKind,
    pub job_id: Option<String>,
    pub stage: i64,
    pub message: String,
    pub step: Option<DeployStep>,
}

impl ActiveJob {
    pub(crate) fn new(run: Epoch, kind: JobKind) -> Self {
        let message = match kind {
            JobKind::Migration => "Initializing deployment...",
            JobKind::MetadataExport => "Generating metadata...",
        };
        Self {
            run,
            kind,
            job_id: None,
            stage: 0,
            message: message.to_string(),
            step: None,
        }
    }

    pub fn step_status(&self, step: DeployStep) -> StepStatus {
        match self.step {
            Some(active) if step < active => StepStatus::Completed,
            Some(active) if step == active => StepStatus::Active,
            _ => StepStatus::Pending,
        }
    }
}

/// Result of the last finished run, kept for display until the next run or reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub kind: JobKind,
    pub result: JobResult,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result
            .as_ref()
            .ok()
            .and_then(|success| success.result_url.as_deref())
    }
}
