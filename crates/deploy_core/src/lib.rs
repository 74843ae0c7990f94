//! Deploy core: pure workflow state machine, per-datasource configuration
//! store and view-model helpers.
mod catalog;
mod effect;
mod entity;
mod epoch;
mod job;
mod msg;
mod state;
mod store;
mod update;
mod view_model;

pub use catalog::{ConnectionInfo, DatasourceRef, Project, SourceConnection, Workbook};
pub use effect::{Effect, FetchRequest};
pub use entity::{
    ConfigPatch, ConnectionParams, DatasourceConfig, DbType, EntityId, Verification,
};
pub use epoch::{Epoch, Epochs, FetchSlot};
pub use job::{
    ActiveJob, ConnectionTestReport, ConnectionTestRequest, DatasourceDeployment, DeployStep,
    FailureClass, JobFailed, JobKind, JobOutcome, JobRequest, JobResult, JobSucceeded,
    StepStatus,
};
pub use msg::{FetchPayload, Msg};
pub use state::{AppState, Notice, NoticeLevel, WorkflowStep};
pub use store::ConfigStore;
pub use update::update;
pub use view_model::{AppViewModel, EntityView, ProgressView};
