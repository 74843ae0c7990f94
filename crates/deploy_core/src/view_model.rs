use crate::{
    ActiveJob, ConnectionInfo, DatasourceConfig, DeployStep, EntityId, JobKind, JobOutcome,
    Project, StepStatus, WorkflowStep, Workbook,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppViewModel {
    pub step: WorkflowStep,
    pub projects: Vec<Project>,
    pub projects_loading: bool,
    pub source_project: Option<String>,
    pub workbooks: Vec<Workbook>,
    pub workbooks_loading: bool,
    pub workbook: Option<String>,
    pub target_project: Option<String>,
    pub entity: Option<EntityView>,
    pub source_info_visible: bool,
    pub source_info_loading: bool,
    pub source_info: Option<ConnectionInfo>,
    pub all_ready: bool,
    pub progress: Option<ProgressView>,
    pub outcome: Option<JobOutcome>,
    pub dirty: bool,
}

/// The datasource currently displayed for editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityView {
    pub index: usize,
    pub total: usize,
    pub id: EntityId,
    pub name: String,
    pub config: DatasourceConfig,
    pub testing: bool,
    pub chosen_connection: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    pub kind: JobKind,
    pub job_id: Option<String>,
    pub stage: i64,
    pub message: String,
    pub steps: Vec<(DeployStep, StepStatus)>,
}

impl ProgressView {
    pub(crate) fn from_job(job: &ActiveJob) -> Self {
        let steps = match job.kind {
            JobKind::Migration => DeployStep::ALL
                .into_iter()
                .map(|step| (step, job.step_status(step)))
                .collect(),
            JobKind::MetadataExport => Vec::new(),
        };
        Self {
            kind: job.kind,
            job_id: job.job_id.clone(),
            stage: job.stage,
            message: job.message.clone(),
            steps,
        }
    }
}
