//! Consumer for the server-push progress stream of a migration job.
//!
//! A subscription resolves exactly once. Progress frames are forwarded to a
//! [`ProgressSink`] as they arrive; the terminal result is delivered through
//! [`ProgressSubscription::finished`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use deploy_logging::{deploy_debug, deploy_info, deploy_warn};
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::sse::{SseDecoder, SseEvent};
use crate::types::TerminalFrame;
use crate::{
    BackendError, ByteStream, FailureKind, JobFailure, JobSuccess, ProgressSource, ProgressUpdate,
};

pub type StreamResult = Result<JobSuccess, JobFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// How long the stream may stay without any progress frame after opening.
    pub initial_timeout: Duration,
    /// How long the stream may stay completely silent.
    pub idle_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn progress(&self, update: ProgressUpdate);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressConsumer {
    settings: StreamSettings,
}

impl ProgressConsumer {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }

    /// Opens the progress stream of `job_id` on the current tokio runtime.
    pub fn subscribe<S>(
        &self,
        source: Arc<S>,
        job_id: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
    ) -> ProgressSubscription
    where
        S: ProgressSource + ?Sized + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let job_id = job_id.into();
        let consumer = StreamTask {
            source,
            finalizer: Finalizer {
                tx: Some(tx),
                job_id: job_id.clone(),
            },
            job_id,
            sink,
            settings: self.settings,
            cancel: cancel.clone(),
            received_progress: false,
            last_stage: None,
        };
        tokio::spawn(consumer.run());
        ProgressSubscription {
            cancel,
            result: Some(rx),
        }
    }
}

/// Owned handle to a running stream consumer. Dropping it closes the stream.
#[derive(Debug)]
pub struct ProgressSubscription {
    cancel: CancellationToken,
    result: Option<oneshot::Receiver<StreamResult>>,
}

impl ProgressSubscription {
    /// Closes the stream. Safe to call any number of times, also after completion.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the terminal result.
    pub async fn finished(&mut self) -> StreamResult {
        let Some(rx) = self.result.take() else {
            return Err(JobFailure::cancelled());
        };
        rx.await.unwrap_or_else(|_| Err(JobFailure::cancelled()))
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Delivers the terminal result at most once.
struct Finalizer {
    tx: Option<oneshot::Sender<StreamResult>>,
    job_id: String,
}

impl Finalizer {
    fn resolve(&mut self, result: StreamResult) {
        match self.tx.take() {
            Some(tx) => {
                if tx.send(result).is_err() {
                    deploy_debug!("Subscriber for job {} is gone", self.job_id);
                }
            }
            None => deploy_debug!("Job {} already resolved; dropping {:?}", self.job_id, result),
        }
    }
}

/// An open stream; closing is idempotent.
struct Connection {
    body: Option<ByteStream>,
    job_id: String,
}

impl Connection {
    fn new(body: ByteStream, job_id: &str) -> Self {
        Self {
            body: Some(body),
            job_id: job_id.to_string(),
        }
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, BackendError>> {
        match &mut self.body {
            Some(body) => body.next().await,
            None => None,
        }
    }

    fn close(&mut self) {
        if self.body.take().is_some() {
            deploy_debug!("Closed progress stream for job {}", self.job_id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

enum Flow {
    Continue,
    Finish(StreamResult),
}

enum Wake<T> {
    Cancelled,
    Deadline,
    Ready(T),
}

struct Watchdogs {
    initial: Option<Instant>,
    idle: Instant,
    idle_timeout: Duration,
}

impl Watchdogs {
    fn new(settings: &StreamSettings) -> Self {
        let now = Instant::now();
        Self {
            initial: Some(now + settings.initial_timeout),
            idle: now + settings.idle_timeout,
            idle_timeout: settings.idle_timeout,
        }
    }

    fn next(&self) -> Instant {
        self.initial.map_or(self.idle, |initial| initial.min(self.idle))
    }

    fn touch(&mut self) {
        self.idle = Instant::now() + self.idle_timeout;
    }

    fn data_received(&mut self) {
        self.initial = None;
        self.touch();
    }

    fn expired(&self) -> JobFailure {
        let now = Instant::now();
        if self.initial.is_some_and(|initial| now >= initial) {
            JobFailure::new(FailureKind::ConnectionLost, "Connection timeout")
        } else {
            JobFailure::new(FailureKind::Timeout, "Deployment progress went silent")
        }
    }
}

struct StreamTask<S: ?Sized> {
    source: Arc<S>,
    job_id: String,
    sink: Arc<dyn ProgressSink>,
    settings: StreamSettings,
    cancel: CancellationToken,
    finalizer: Finalizer,
    received_progress: bool,
    last_stage: Option<i64>,
}

impl<S> StreamTask<S>
where
    S: ProgressSource + ?Sized,
{
    async fn run(mut self) {
        let result = self.consume().await;
        match &result {
            Ok(_) => deploy_info!("Job {} completed", self.job_id),
            Err(failure) if failure.kind.is_silent() => {
                deploy_debug!("Stream for job {} closed by subscriber", self.job_id)
            }
            Err(failure) => deploy_warn!("Job {} failed: {}", self.job_id, failure),
        }
        self.finalizer.resolve(result);
    }

    async fn wait<T>(
        &self,
        watchdogs: &Watchdogs,
        fut: impl std::future::Future<Output = T>,
    ) -> Wake<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wake::Cancelled,
            _ = sleep_until(watchdogs.next()) => Wake::Deadline,
            value = fut => Wake::Ready(value),
        }
    }

    async fn consume(&mut self) -> StreamResult {
        let mut watchdogs = Watchdogs::new(&self.settings);
        let mut decoder = SseDecoder::new();

        loop {
            let opened = match self
                .wait(&watchdogs, self.source.open_progress(&self.job_id))
                .await
            {
                Wake::Cancelled => return Err(JobFailure::cancelled()),
                Wake::Deadline => return Err(watchdogs.expired()),
                Wake::Ready(opened) => opened,
            };

            let lost = match opened {
                Ok(body) => {
                    deploy_debug!("Progress stream for job {} open", self.job_id);
                    let mut connection = Connection::new(body, &self.job_id);
                    let lost = loop {
                        let chunk = match self.wait(&watchdogs, connection.next_chunk()).await {
                            Wake::Cancelled => return Err(JobFailure::cancelled()),
                            Wake::Deadline => return Err(watchdogs.expired()),
                            Wake::Ready(chunk) => chunk,
                        };
                        match chunk {
                            Some(Ok(bytes)) => {
                                for event in decoder.push(&bytes) {
                                    if let Flow::Finish(result) =
                                        self.handle(event, &mut watchdogs)
                                    {
                                        return result;
                                    }
                                }
                            }
                            Some(Err(err)) => break err.to_string(),
                            None => break "stream ended unexpectedly".to_string(),
                        }
                    };
                    connection.close();
                    lost
                }
                Err(err) => err.to_string(),
            };

            if !self.received_progress {
                deploy_warn!("Progress stream for job {} lost: {}", self.job_id, lost);
                return Err(JobFailure::new(
                    FailureKind::ConnectionLost,
                    "Lost connection to deployment progress",
                ));
            }

            let delay = decoder.retry().unwrap_or(self.settings.reconnect_delay);
            deploy_warn!(
                "Progress stream for job {} dropped ({}); reconnecting in {:?}",
                self.job_id,
                lost,
                delay
            );
            decoder.reset();
            match self.wait(&watchdogs, tokio::time::sleep(delay)).await {
                Wake::Cancelled => return Err(JobFailure::cancelled()),
                Wake::Deadline => return Err(watchdogs.expired()),
                Wake::Ready(()) => {}
            }
        }
    }

    fn handle(&mut self, event: SseEvent, watchdogs: &mut Watchdogs) -> Flow {
        match event.event.as_str() {
            "ping" | "keepalive" => {
                watchdogs.touch();
                Flow::Continue
            }
            "progress" => {
                watchdogs.data_received();
                self.received_progress = true;
                match serde_json::from_str::<ProgressUpdate>(&event.data) {
                    Ok(update) => self.forward(update),
                    Err(err) => deploy_warn!("Unreadable progress frame for {}: {}", self.job_id, err),
                }
                Flow::Continue
            }
            "complete" => Flow::Finish(self.completion(&event.data)),
            "error" => {
                let message = serde_json::from_str::<TerminalFrame>(&event.data)
                    .ok()
                    .map(|frame| frame.message)
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| "Deployment failed on the server".to_string());
                Flow::Finish(Err(JobFailure::new(FailureKind::Terminal, message)))
            }
            other => {
                deploy_debug!("Ignoring stream event {:?} for job {}", other, self.job_id);
                Flow::Continue
            }
        }
    }

    fn forward(&mut self, update: ProgressUpdate) {
        if let Some(last) = self.last_stage {
            if update.stage < last {
                deploy_warn!(
                    "Job {} reported stage {} after {}; ignored",
                    self.job_id,
                    update.stage,
                    last
                );
                return;
            }
        }
        self.last_stage = Some(update.stage);
        self.sink.progress(update);
    }

    fn completion(&mut self, data: &str) -> StreamResult {
        let frame = serde_json::from_str::<TerminalFrame>(data).map_err(|err| {
            JobFailure::new(
                FailureKind::Terminal,
                format!("Unreadable completion event: {err}"),
            )
        })?;
        match frame.status.as_str() {
            "completed" => {
                self.forward(ProgressUpdate {
                    stage: frame.stage,
                    message: frame.message.clone(),
                    step: None,
                });
                Ok(JobSuccess {
                    message: frame.message,
                    result_url: frame.workbook_url.filter(|url| !url.trim().is_empty()),
                })
            }
            "failed" => Err(JobFailure::new(
                FailureKind::Terminal,
                if frame.message.trim().is_empty() {
                    "Migration failed".to_string()
                } else {
                    frame.message
                },
            )),
            other => Err(JobFailure::new(
                FailureKind::Terminal,
                format!("Unexpected completion status {other:?}"),
            )),
        }
    }
}
