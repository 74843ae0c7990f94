use std::time::Duration;

use deploy_logging::{deploy_debug, deploy_info, deploy_warn};
use tokio_util::sync::CancellationToken;

use crate::{FailureKind, JobFailure, JobState, JobStatusSource, JobSuccess};

/// Fixed-interval status polling for jobs without a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPoller {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 90,
        }
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Waits for `job_id` to reach a terminal state.
    ///
    /// Every attempt sleeps one interval before checking. Failed checks are
    /// retried on the next attempt; running out of attempts is a timeout.
    /// `label` names the job in messages the server did not supply.
    pub async fn wait_for_job<S>(
        &self,
        source: &S,
        job_id: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSuccess, JobFailure>
    where
        S: JobStatusSource + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobFailure::cancelled()),
                _ = tokio::time::sleep(self.interval) => {}
            }

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobFailure::cancelled()),
                status = source.job_status(job_id) => status,
            };

            match status {
                Ok(status) => match status.status {
                    JobState::Completed => {
                        deploy_info!("Job {} completed after {} checks", job_id, attempt);
                        return Ok(JobSuccess {
                            message: status
                                .message
                                .unwrap_or_else(|| format!("{label} completed")),
                            result_url: status.download_url,
                        });
                    }
                    JobState::Failed => {
                        let message = status
                            .message
                            .filter(|message| !message.trim().is_empty())
                            .unwrap_or_else(|| format!("{label} failed"));
                        return Err(JobFailure::new(FailureKind::Terminal, message));
                    }
                    JobState::Pending => {
                        deploy_debug!(
                            "Job {} still processing ({}/{})",
                            job_id,
                            attempt,
                            self.max_attempts
                        );
                    }
                },
                Err(err) => {
                    deploy_warn!("Status check for job {} failed, retrying: {}", job_id, err);
                }
            }
        }

        Err(JobFailure::new(
            FailureKind::Timeout,
            format!("{label} timed out"),
        ))
    }
}
