use crate::{
    ConfigPatch, ConnectionInfo, ConnectionTestReport, EntityId, Epoch, FetchSlot, JobKind,
    JobResult, Project, Workbook,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Owning context is up; load the project list.
    Mounted,
    /// User picked (or cleared) the source project.
    SourceProjectSelected(Option<String>),
    /// User picked (or cleared) the workbook to deploy, by LUID.
    WorkbookSelected(Option<String>),
    TargetProjectSelected(Option<String>),
    /// Selection step confirmed.
    NextClicked,
    EntityNext,
    EntityPrev,
    /// Show or hide the source connection details of the displayed datasource.
    SourceInfoToggled,
    /// Edit of the displayed datasource's record.
    ConfigEdited(ConfigPatch),
    /// A source connection was checked or unchecked for auto-fill.
    SourceConnectionToggled { index: usize, checked: bool },
    TestConnectionClicked,
    ExecuteClicked(JobKind),
    /// Reset all datasource records and the target project.
    TargetCleared,
    /// Reset the whole workflow back to an empty selection.
    ClearClicked,
    FetchCompleted {
        slot: FetchSlot,
        epoch: Epoch,
        result: Result<FetchPayload, String>,
    },
    ConnectionTested {
        entity: EntityId,
        epoch: Epoch,
        result: Result<ConnectionTestReport, String>,
    },
    JobSubmitted { run: Epoch, job_id: String },
    JobProgress {
        run: Epoch,
        stage: i64,
        message: String,
        step: Option<String>,
    },
    JobFinished { run: Epoch, result: JobResult },
    /// Render tick.
    Tick,
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPayload {
    Projects(Vec<Project>),
    Workbooks(Vec<Workbook>),
    ConnectionInfo(ConnectionInfo),
}
