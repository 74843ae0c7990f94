use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deploy_engine::{
    BackendError, FailureKind, JobPoller, JobState, JobStatus, JobStatusSource, JobSuccess,
};
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Answers status checks from a script and records when each check happened.
struct ScriptedStatus {
    started: Instant,
    script: Mutex<VecDeque<Result<JobStatus, BackendError>>>,
    checks: Mutex<Vec<Duration>>,
}

impl ScriptedStatus {
    fn new(script: Vec<Result<JobStatus, BackendError>>) -> Self {
        Self {
            started: Instant::now(),
            script: Mutex::new(script.into()),
            checks: Mutex::new(Vec::new()),
        }
    }

    /// Check times in whole seconds since the source was created.
    fn checks(&self) -> Vec<u64> {
        self.checks
            .lock()
            .unwrap()
            .iter()
            .map(|elapsed| (elapsed.as_millis() as u64 + 500) / 1000)
            .collect()
    }
}

#[async_trait::async_trait]
impl JobStatusSource for ScriptedStatus {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BackendError> {
        assert_eq!(job_id, "session_1");
        self.checks.lock().unwrap().push(self.started.elapsed());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(status(JobState::Pending)))
    }
}

fn status(state: JobState) -> JobStatus {
    JobStatus {
        status: state,
        message: None,
        download_url: None,
    }
}

#[tokio::test(start_paused = true)]
async fn completes_after_pending_checks_spaced_by_the_interval() {
    let source = ScriptedStatus::new(vec![
        Ok(status(JobState::Pending)),
        Ok(status(JobState::Pending)),
        Ok(JobStatus {
            status: JobState::Completed,
            message: None,
            download_url: Some("https://files/metadata.xlsx".into()),
        }),
    ]);

    let outcome = JobPoller::new(Duration::from_secs(10), 90)
        .wait_for_job(&source, "session_1", "Report", &CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        Ok(JobSuccess {
            message: "Report completed".into(),
            result_url: Some("https://files/metadata.xlsx".into()),
        })
    );
    assert_eq!(source.checks(), vec![10, 20, 30]);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_the_attempt_budget() {
    let source = ScriptedStatus::new(Vec::new());

    let failure = JobPoller::new(Duration::from_secs(10), 3)
        .wait_for_job(&source, "session_1", "Report", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.message, "Report timed out");
    assert_eq!(source.checks(), vec![10, 20, 30]);
}

#[tokio::test(start_paused = true)]
async fn failed_jobs_stop_polling() {
    let source = ScriptedStatus::new(vec![
        Ok(status(JobState::Pending)),
        Ok(JobStatus {
            status: JobState::Failed,
            message: Some("Datasource not found".into()),
            download_url: None,
        }),
        Ok(status(JobState::Completed)),
    ]);

    let failure = JobPoller::new(Duration::from_secs(10), 90)
        .wait_for_job(&source, "session_1", "Report", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Terminal);
    assert_eq!(failure.message, "Datasource not found");
    assert_eq!(source.checks().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_jobs_without_a_message_get_a_default() {
    let source = ScriptedStatus::new(vec![Ok(status(JobState::Failed))]);

    let failure = JobPoller::default()
        .wait_for_job(&source, "session_1", "Report", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.message, "Report failed");
}

#[tokio::test(start_paused = true)]
async fn transient_check_errors_are_retried() {
    let source = ScriptedStatus::new(vec![
        Err(BackendError::Status(502)),
        Err(BackendError::Network("connection reset".into())),
        Ok(JobStatus {
            status: JobState::Completed,
            message: Some("Ready".into()),
            download_url: None,
        }),
    ]);

    let outcome = JobPoller::new(Duration::from_secs(5), 90)
        .wait_for_job(&source, "session_1", "Report", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.message, "Ready");
    assert_eq!(source.checks(), vec![5, 10, 15]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_wait_promptly() {
    let source = Arc::new(ScriptedStatus::new(Vec::new()));
    let cancel = CancellationToken::new();

    let waiting = {
        let source = Arc::clone(&source);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            JobPoller::new(Duration::from_secs(10), 90)
                .wait_for_job(source.as_ref(), "session_1", "Report", &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();
    let failure = waiting.await.unwrap().unwrap_err();

    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(source.checks(), vec![10, 20]);
}
