use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use bytes::Bytes;
use deploy_engine::{
    Backend, BackendError, ByteStream, CatalogSource, ConnectionInfoRecord, ConnectionTestReply,
    DbConfig, EngineEvent, EngineHandle, EngineSettings, FailureKind, FetchOutput, FetchRequest,
    JobBackend, JobPoller, JobSpec, JobState, JobStatus, JobStatusSource, MetadataExportRequest,
    MigrationDatasource, MigrationRequest, ProgressSource, ProjectRecord, Slot, WorkbookRecord,
};
use futures_util::{stream, StreamExt};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(deploy_logging::initialize_for_tests);
}

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(400);

#[derive(Default)]
struct FakeBackend {
    task_unknown: bool,
    progress_hangs: bool,
    export_sessions: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl CatalogSource for FakeBackend {
    async fn projects(&self) -> Result<Vec<ProjectRecord>, BackendError> {
        Ok(vec![ProjectRecord {
            project_luid: "p1".into(),
            project_name: "Finance".into(),
        }])
    }

    async fn workbooks(&self, project_luid: &str) -> Result<Vec<WorkbookRecord>, BackendError> {
        if project_luid == "slow" {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(vec![WorkbookRecord {
            id: format!("{project_luid}-id"),
            luid: format!("{project_luid}-wb"),
            name: "Revenue".into(),
            datasources: Vec::new(),
        }])
    }

    async fn connection_info(
        &self,
        datasource_luid: &str,
    ) -> Result<ConnectionInfoRecord, BackendError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(ConnectionInfoRecord {
            datasource_name: datasource_luid.to_string(),
            connections: Vec::new(),
        })
    }

    async fn test_connection(
        &self,
        config: &DbConfig,
    ) -> Result<ConnectionTestReply, BackendError> {
        if config.host == "unreachable" {
            return Err(BackendError::Network("connection refused".into()));
        }
        Ok(ConnectionTestReply {
            status: "success".into(),
            message: "Connected".into(),
        })
    }
}

#[async_trait::async_trait]
impl JobBackend for FakeBackend {
    async fn submit_migration(&self, request: &MigrationRequest) -> Result<String, BackendError> {
        assert_eq!(request.datasource_luids, vec!["d1".to_string()]);
        Ok("task-1".into())
    }

    async fn task_exists(&self, _task_id: &str) -> Result<bool, BackendError> {
        Ok(!self.task_unknown)
    }

    async fn submit_metadata_export(
        &self,
        _request: &MetadataExportRequest,
        session_key: &str,
    ) -> Result<(), BackendError> {
        self.export_sessions
            .lock()
            .unwrap()
            .push(session_key.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStatusSource for FakeBackend {
    async fn job_status(&self, _job_id: &str) -> Result<JobStatus, BackendError> {
        Ok(JobStatus {
            status: JobState::Completed,
            message: Some("Metadata ready".into()),
            download_url: Some("https://files/metadata.xlsx".into()),
        })
    }
}

#[async_trait::async_trait]
impl ProgressSource for FakeBackend {
    async fn open_progress(&self, job_id: &str) -> Result<ByteStream, BackendError> {
        assert_eq!(job_id, "task-1");
        let progress: Result<Bytes, BackendError> = Ok(Bytes::from_static(
            b"event: progress\ndata: {\"stage\":1,\"message\":\"Downloading workbook\"}\n\n",
        ));
        if self.progress_hangs {
            return Ok(Box::pin(stream::iter(vec![progress]).chain(stream::pending())));
        }
        let complete: Result<Bytes, BackendError> = Ok(Bytes::from_static(
            b"event: complete\ndata: {\"stage\":6,\"status\":\"completed\",\"message\":\"Migration completed\"}\n\n",
        ));
        Ok(Box::pin(
            stream::iter(vec![progress, complete]).chain(stream::pending()),
        ))
    }
}

fn engine(backend: Arc<FakeBackend>) -> EngineHandle {
    init_logging();
    let backend: Arc<dyn Backend> = backend;
    EngineHandle::with_backend(
        backend,
        EngineSettings {
            poller: JobPoller::new(Duration::from_millis(10), 5),
            startup_delay: Duration::from_millis(10),
            ..EngineSettings::default()
        },
    )
    .expect("engine")
}

fn next(engine: &EngineHandle) -> EngineEvent {
    engine
        .recv_timeout(WAIT)
        .expect("engine running")
        .expect("engine event")
}

fn migration() -> JobSpec {
    JobSpec::Migration(MigrationRequest::new(
        "w1",
        "target",
        vec![MigrationDatasource {
            datasource_luid: "d1".into(),
            db_config: DbConfig {
                db_type: "PostgreSQL".into(),
                host: "db.internal".into(),
                port: "5432".into(),
                dbname: "sales".into(),
                username: "etl".into(),
                password: "secret".into(),
            },
        }],
    ))
}

#[test]
fn fetch_results_echo_slot_and_epoch() {
    let engine = engine(Arc::default());

    engine.fetch(3, FetchRequest::Projects);

    assert_eq!(
        next(&engine),
        EngineEvent::FetchCompleted {
            slot: Slot::Projects,
            epoch: 3,
            result: Ok(FetchOutput::Projects(vec![ProjectRecord {
                project_luid: "p1".into(),
                project_name: "Finance".into(),
            }])),
        }
    );
}

#[test]
fn superseded_selection_fetches_are_not_reported() {
    let engine = engine(Arc::default());

    engine.fetch(
        1,
        FetchRequest::Workbooks {
            project_luid: "slow".into(),
        },
    );
    engine.fetch(
        2,
        FetchRequest::Workbooks {
            project_luid: "fast".into(),
        },
    );

    match next(&engine) {
        EngineEvent::FetchCompleted {
            slot: Slot::Workbooks,
            epoch: 2,
            result: Ok(FetchOutput::Workbooks(workbooks)),
        } => assert_eq!(workbooks[0].luid, "fast-wb"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(engine.recv_timeout(QUIET).unwrap(), None);
}

#[test]
fn cancelled_slots_stay_silent() {
    let engine = engine(Arc::default());

    engine.fetch(
        1,
        FetchRequest::ConnectionInfo {
            datasource_luid: "d1".into(),
        },
    );
    engine.cancel_slot(Slot::ConnectionInfo);

    assert_eq!(engine.recv_timeout(QUIET).unwrap(), None);
}

#[test]
fn connection_tests_echo_their_key() {
    let engine = engine(Arc::default());
    let config = DbConfig {
        db_type: "PostgreSQL".into(),
        host: "unreachable".into(),
        port: "5432".into(),
        dbname: "sales".into(),
        username: "etl".into(),
        password: "secret".into(),
    };

    engine.test_connection("d1", 4, config);

    assert_eq!(
        next(&engine),
        EngineEvent::ConnectionTested {
            key: "d1".into(),
            epoch: 4,
            result: Err(BackendError::Network("connection refused".into())),
        }
    );
}

#[test]
fn migration_reports_submission_progress_and_completion() {
    let engine = engine(Arc::default());

    engine.run_job(7, migration());

    assert_eq!(
        next(&engine),
        EngineEvent::JobSubmitted {
            run: 7,
            job_id: "task-1".into(),
        }
    );
    let mut stages = Vec::new();
    let result = loop {
        match next(&engine) {
            EngineEvent::JobProgress { run: 7, update } => stages.push(update.stage),
            EngineEvent::JobCompleted { run: 7, result } => break result,
            other => panic!("unexpected event {other:?}"),
        }
    };

    assert_eq!(stages, vec![1, 6]);
    assert_eq!(result.unwrap().message, "Migration completed");
}

#[test]
fn unknown_backend_task_fails_the_migration() {
    let engine = engine(Arc::new(FakeBackend {
        task_unknown: true,
        ..FakeBackend::default()
    }));

    engine.run_job(1, migration());

    assert!(matches!(next(&engine), EngineEvent::JobSubmitted { run: 1, .. }));
    match next(&engine) {
        EngineEvent::JobCompleted {
            run: 1,
            result: Err(failure),
        } => {
            assert_eq!(failure.kind, FailureKind::Network);
            assert_eq!(failure.message, "Backend task initialization failed");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn cancelling_the_active_run_ends_it_silently() {
    let engine = engine(Arc::new(FakeBackend {
        progress_hangs: true,
        ..FakeBackend::default()
    }));

    engine.run_job(2, migration());
    assert!(matches!(next(&engine), EngineEvent::JobSubmitted { run: 2, .. }));
    assert!(matches!(next(&engine), EngineEvent::JobProgress { run: 2, .. }));

    engine.cancel_job(99);
    assert_eq!(engine.recv_timeout(QUIET).unwrap(), None);

    engine.cancel_job(2);
    match next(&engine) {
        EngineEvent::JobCompleted {
            run: 2,
            result: Err(failure),
        } => assert_eq!(failure.kind, FailureKind::Cancelled),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn metadata_export_polls_under_a_fresh_session_key() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine(Arc::clone(&backend));

    engine.run_job(
        5,
        JobSpec::MetadataExport(MetadataExportRequest {
            workbook_id: "w-id".into(),
            workbook_luid: "w1".into(),
            datasource_luids: vec!["d1".into()],
            datasource_ids: vec!["meta-d1".into()],
        }),
    );

    let session_key = match next(&engine) {
        EngineEvent::JobSubmitted { run: 5, job_id } => job_id,
        other => panic!("unexpected event {other:?}"),
    };
    assert!(session_key.starts_with("session_"));
    assert_eq!(*backend.export_sessions.lock().unwrap(), vec![session_key]);

    match next(&engine) {
        EngineEvent::JobCompleted {
            run: 5,
            result: Ok(success),
        } => {
            assert_eq!(success.message, "Metadata ready");
            assert_eq!(
                success.result_url.as_deref(),
                Some("https://files/metadata.xlsx")
            );
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn shutdown_joins_the_worker() {
    let engine = engine(Arc::new(FakeBackend {
        progress_hangs: true,
        ..FakeBackend::default()
    }));
    engine.run_job(1, migration());
    assert!(matches!(next(&engine), EngineEvent::JobSubmitted { run: 1, .. }));

    engine.shutdown();
}
