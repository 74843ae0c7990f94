use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use deploy_logging::{deploy_debug, deploy_info, deploy_warn};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc as tokio_mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::guard::{Guarded, RequestGuard, SelectionFetch, SlotTicket};
use crate::stream::{ProgressConsumer, ProgressSink, StreamSettings};
use crate::{
    Backend, BackendError, BackendSettings, DbConfig, EngineEvent, FailureKind, FetchOutput,
    FetchRequest, JobFailure, JobPoller, JobSpec, JobSuccess, MetadataExportRequest,
    MigrationRequest, ProgressUpdate, ReqwestBackend, RunId, Slot,
};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub backend: BackendSettings,
    pub poller: JobPoller,
    pub stream: StreamSettings,
    /// Pause between a migration being accepted and its progress stream opening.
    pub startup_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            poller: JobPoller::default(),
            stream: StreamSettings::default(),
            startup_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to start the engine runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("engine worker stopped")]
    Stopped,
}

enum EngineCommand {
    Fetch { epoch: u64, request: FetchRequest },
    CancelSlot(Slot),
    TestConnection {
        key: String,
        epoch: u64,
        config: DbConfig,
    },
    RunJob { run: RunId, spec: JobSpec },
    CancelJob { run: RunId },
    Shutdown,
}

/// Bridge between the synchronous app loop and the async IO worker thread.
pub struct EngineHandle {
    cmd_tx: tokio_mpsc::UnboundedSender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let backend = Arc::new(ReqwestBackend::new(settings.backend.clone())?);
        Self::with_backend(backend, settings)
    }

    /// Runs the engine against any backend implementation.
    pub fn with_backend(
        backend: Arc<dyn Backend>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let (cmd_tx, cmd_rx) = tokio_mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let shared = Arc::new(Shared {
            backend,
            guard: Arc::new(RequestGuard::new()),
            events: event_tx,
            consumer: ProgressConsumer::new(settings.stream),
            poller: settings.poller,
            startup_delay: settings.startup_delay,
        });

        let worker = thread::Builder::new()
            .name("deploy-engine".to_string())
            .spawn(move || runtime.block_on(command_loop(shared, cmd_rx)))?;

        Ok(Self {
            cmd_tx,
            event_rx,
            worker: Some(worker),
        })
    }

    pub fn fetch(&self, epoch: u64, request: FetchRequest) {
        self.send(EngineCommand::Fetch { epoch, request });
    }

    pub fn cancel_slot(&self, slot: Slot) {
        self.send(EngineCommand::CancelSlot(slot));
    }

    /// Tests database credentials; the result echoes `key` and `epoch`.
    pub fn test_connection(&self, key: impl Into<String>, epoch: u64, config: DbConfig) {
        self.send(EngineCommand::TestConnection {
            key: key.into(),
            epoch,
            config,
        });
    }

    /// Starts a job, superseding any job still running.
    pub fn run_job(&self, run: RunId, spec: JobSpec) {
        self.send(EngineCommand::RunJob { run, spec });
    }

    pub fn cancel_job(&self, run: RunId) {
        self.send(EngineCommand::CancelJob { run });
    }

    /// Waits up to `timeout` for an event. `Ok(None)` means nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<EngineEvent>, EngineError> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Stopped),
        }
    }

    /// Cancels all in-flight work and waits for the worker thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            deploy_warn!("Engine worker is gone; command dropped");
        }
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                deploy_warn!("Engine worker panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Shared {
    backend: Arc<dyn Backend>,
    guard: Arc<RequestGuard<Slot>>,
    events: mpsc::Sender<EngineEvent>,
    consumer: ProgressConsumer,
    poller: JobPoller,
    startup_delay: Duration,
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            deploy_debug!("Engine event dropped; receiver closed");
        }
    }
}

struct ChannelSink {
    run: RunId,
    events: mpsc::Sender<EngineEvent>,
}

impl ProgressSink for ChannelSink {
    fn progress(&self, update: ProgressUpdate) {
        let _ = self.events.send(EngineEvent::JobProgress {
            run: self.run,
            update,
        });
    }
}

async fn command_loop(
    shared: Arc<Shared>,
    mut commands: tokio_mpsc::UnboundedReceiver<EngineCommand>,
) {
    let mut active_run: Option<RunId> = None;

    while let Some(command) = commands.recv().await {
        match command {
            EngineCommand::Fetch { epoch, request } => spawn_fetch(&shared, epoch, request),
            EngineCommand::CancelSlot(slot) => {
                deploy_debug!("Cancelling slot {:?}", slot);
                shared.guard.cancel(&slot);
            }
            EngineCommand::TestConnection { key, epoch, config } => {
                let ticket = shared.guard.begin(Slot::ConnectionTest);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let result = shared
                        .guard
                        .run(&ticket, shared.backend.test_connection(&config))
                        .await;
                    match result {
                        Ok(reply) => shared.emit(EngineEvent::ConnectionTested {
                            key,
                            epoch,
                            result: Ok(reply),
                        }),
                        Err(Guarded::Failed(err)) => shared.emit(EngineEvent::ConnectionTested {
                            key,
                            epoch,
                            result: Err(err),
                        }),
                        Err(Guarded::Cancelled) => {
                            deploy_debug!("Connection test for {} superseded", key)
                        }
                    }
                });
            }
            EngineCommand::RunJob { run, spec } => {
                let ticket = shared.guard.begin(Slot::Job);
                active_run = Some(run);
                tokio::spawn(run_job(Arc::clone(&shared), run, ticket, spec));
            }
            EngineCommand::CancelJob { run } => {
                if active_run == Some(run) {
                    deploy_info!("Cancelling run {}", run);
                    shared.guard.cancel(&Slot::Job);
                    active_run = None;
                } else {
                    deploy_debug!("Run {} is not active; nothing to cancel", run);
                }
            }
            EngineCommand::Shutdown => break,
        }
    }

    shared.guard.cancel_all();
    deploy_debug!("Engine command loop stopped");
}

type PendingFetch = BoxFuture<'static, Result<SelectionFetch<FetchOutput>, BackendError>>;

fn spawn_fetch(shared: &Arc<Shared>, epoch: u64, request: FetchRequest) {
    let slot = request.slot();
    let backend = Arc::clone(&shared.backend);
    let pending: PendingFetch = match request {
        FetchRequest::Projects => {
            let ticket = shared.guard.begin(slot);
            let guard = Arc::clone(&shared.guard);
            Box::pin(async move {
                match guard.run(&ticket, backend.projects()).await {
                    Ok(projects) => Ok(SelectionFetch::Applied(FetchOutput::Projects(projects))),
                    Err(Guarded::Cancelled) => Ok(SelectionFetch::Superseded),
                    Err(Guarded::Failed(err)) => Err(err),
                }
            })
        }
        FetchRequest::Workbooks { project_luid } => Box::pin(shared.guard.fetch_for_selection(
            slot,
            Some(project_luid.as_str()),
            move |key| async move { backend.workbooks(&key).await.map(FetchOutput::Workbooks) },
        )),
        FetchRequest::ConnectionInfo { datasource_luid } => {
            Box::pin(shared.guard.fetch_for_selection(
                slot,
                Some(datasource_luid.as_str()),
                move |key| async move {
                    backend
                        .connection_info(&key)
                        .await
                        .map(FetchOutput::ConnectionInfo)
                },
            ))
        }
    };

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        match pending.await {
            Ok(SelectionFetch::Applied(output)) => shared.emit(EngineEvent::FetchCompleted {
                slot,
                epoch,
                result: Ok(output),
            }),
            Ok(SelectionFetch::Cleared) | Ok(SelectionFetch::Superseded) => {
                deploy_debug!("{:?} fetch at epoch {} superseded", slot, epoch)
            }
            Err(err) => {
                deploy_warn!("{:?} fetch failed: {}", slot, err);
                shared.emit(EngineEvent::FetchCompleted {
                    slot,
                    epoch,
                    result: Err(err),
                });
            }
        }
    });
}

async fn run_job(shared: Arc<Shared>, run: RunId, ticket: SlotTicket<Slot>, spec: JobSpec) {
    let cancel = ticket.token().clone();
    let result = match spec {
        JobSpec::Migration(request) => run_migration(&shared, run, &request, &cancel).await,
        JobSpec::MetadataExport(request) => run_export(&shared, run, &request, &cancel).await,
    };
    match &result {
        Ok(success) => deploy_info!("Run {} finished: {}", run, success.message),
        Err(failure) if failure.kind.is_silent() => deploy_debug!("Run {} cancelled", run),
        Err(failure) => deploy_warn!("Run {} failed: {}", run, failure),
    }
    shared.emit(EngineEvent::JobCompleted { run, result });
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, JobFailure>>,
) -> Result<T, JobFailure> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobFailure::cancelled()),
        result = fut => result,
    }
}

async fn run_migration(
    shared: &Shared,
    run: RunId,
    request: &MigrationRequest,
    cancel: &CancellationToken,
) -> Result<JobSuccess, JobFailure> {
    let task_id = cancellable(cancel, async {
        shared
            .backend
            .submit_migration(request)
            .await
            .map_err(JobFailure::from)
    })
    .await?;
    deploy_info!("Run {} started backend task {}", run, task_id);
    shared.emit(EngineEvent::JobSubmitted {
        run,
        job_id: task_id.clone(),
    });

    // The backend registers the task asynchronously; give it a moment before asking.
    cancellable(cancel, async {
        tokio::time::sleep(shared.startup_delay).await;
        Ok(())
    })
    .await?;
    let exists = cancellable(cancel, async {
        Ok(shared.backend.task_exists(&task_id).await)
    })
    .await?;
    match exists {
        Ok(true) => {}
        Ok(false) => {
            deploy_warn!("Task {} is unknown to the backend", task_id);
            return Err(JobFailure::new(
                FailureKind::Network,
                "Backend task initialization failed",
            ));
        }
        Err(err) => {
            deploy_warn!("Verifying task {} failed: {}", task_id, err);
            return Err(JobFailure::new(
                FailureKind::Network,
                "Backend task initialization failed",
            ));
        }
    }

    let sink = Arc::new(ChannelSink {
        run,
        events: shared.events.clone(),
    });
    let mut subscription = shared
        .consumer
        .subscribe(Arc::clone(&shared.backend), task_id, sink);
    cancellable(cancel, subscription.finished()).await
}

async fn run_export(
    shared: &Shared,
    run: RunId,
    request: &MetadataExportRequest,
    cancel: &CancellationToken,
) -> Result<JobSuccess, JobFailure> {
    let session_key = format!("session_{}", Uuid::new_v4().simple());
    cancellable(cancel, async {
        shared
            .backend
            .submit_metadata_export(request, &session_key)
            .await
            .map_err(JobFailure::from)
    })
    .await?;
    shared.emit(EngineEvent::JobSubmitted {
        run,
        job_id: session_key.clone(),
    });
    shared
        .poller
        .wait_for_job(shared.backend.as_ref(), &session_key, "Excel generation", cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_vanished_worker_is_reported_instead_of_waiting() {
        let (cmd_tx, _) = tokio_mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>();
        let handle = EngineHandle {
            cmd_tx,
            event_rx,
            worker: None,
        };
        assert!(matches!(
            handle.recv_timeout(Duration::from_millis(10)),
            Ok(None)
        ));

        drop(event_tx);
        assert!(matches!(
            handle.recv_timeout(Duration::from_secs(5)),
            Err(EngineError::Stopped)
        ));
    }
}
