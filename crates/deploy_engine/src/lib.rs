//! Deploy engine: backend IO, request lifecycles, job polling and progress streams.
mod backend;
mod engine;
mod guard;
mod poller;
mod sse;
mod stream;
mod types;

pub use backend::{
    Backend, BackendSettings, ByteStream, CatalogSource, JobBackend, JobStatusSource,
    ProgressSource, ReqwestBackend,
};
pub use engine::{EngineError, EngineHandle, EngineSettings};
pub use guard::{Guarded, RequestGuard, SelectionFetch, SlotTicket};
pub use poller::JobPoller;
pub use sse::{SseDecoder, SseEvent};
pub use stream::{
    ProgressConsumer, ProgressSink, ProgressSubscription, StreamResult, StreamSettings,
};
pub use types::{
    BackendError, ConnectionInfoRecord, ConnectionTestReply, DatasourceRecord, DbConfig,
    EngineEvent, FailureKind, FetchOutput, FetchRequest, JobFailure, JobSpec, JobState, JobStatus,
    JobSuccess, MetadataExportRequest, MigrationDatasource, MigrationRequest, ProgressUpdate,
    ProjectRecord, RunId, Slot, SourceConnectionRecord, WorkbookRecord,
};
