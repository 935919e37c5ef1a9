//! Runs the six relay steps in order and waits for the remote job.

use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::models::{JobHandle, JobStatus};
use super::{ImageEditingApi, RelayError, RelayOutcome, RelayRequest, SourceFetcher};
use crate::config::PollingConfig;

/// How long and how often to poll a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub default_max_polls: u32,
    pub max_polls_cap: u32,
    pub max_interval: Duration,
}

impl PollPolicy {
    /// Poll budget for a job: the remote's choice if it made one, clamped to `[1, max_polls_cap]`.
    pub fn budget(&self, remote: Option<u32>) -> u32 {
        remote
            .unwrap_or(self.default_max_polls)
            .clamp(1, self.max_polls_cap.max(1))
    }

    /// Delay before each poll: the remote's choice if it made a non-zero one, never more than
    /// `max_interval`.
    pub fn interval(&self, remote_ms: Option<u64>) -> Duration {
        remote_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.interval)
            .min(self.max_interval)
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval,
            default_max_polls: config.default_max_polls,
            max_polls_cap: config.max_polls_cap,
            max_interval: config.max_interval,
        }
    }
}

/// Drives a relay from source probe to terminal job status.
#[derive(Clone)]
pub struct RelayOrchestrator {
    source: SourceFetcher,
    api: Arc<dyn ImageEditingApi>,
    policy: PollPolicy,
}

impl RelayOrchestrator {
    pub fn new(source: SourceFetcher, api: Arc<dyn ImageEditingApi>, policy: PollPolicy) -> Self {
        Self { source, api, policy }
    }

    /// Run the full pipeline.
    ///
    /// Transport and protocol failures in any step are errors. A remote job that ends badly is
    /// not: it comes back as [`RelayOutcome::Failed`] carrying the remote's own document.
    pub async fn run(&self, request: RelayRequest) -> Result<RelayOutcome, RelayError> {
        let span = info_span!(
            "relay",
            relay_id = %Uuid::new_v4(),
            tool = %request.tool,
            source_host = request.image_url.host_str().unwrap_or_default(),
        );
        self.run_steps(request).instrument(span).await
    }

    async fn run_steps(&self, request: RelayRequest) -> Result<RelayOutcome, RelayError> {
        let source = self.source.probe(&request.image_url).await?;

        let slot = self
            .api
            .request_upload_slot(&source)
            .await
            .map_err(RelayError::UploadSlot)?;
        debug!(file_url = %slot.file_url, "Got upload slot");

        let bytes = self.source.fetch(&request.image_url).await?;

        self.api
            .transfer(&slot, &source.content_type, bytes)
            .await
            .map_err(RelayError::Transfer)?;
        debug!("Transferred source image");

        let job = self
            .api
            .invoke_tool(&request.tool, &slot.file_url, &request.params)
            .await
            .map_err(|source| RelayError::Invoke {
                tool: request.tool.clone(),
                source,
            })?;
        debug!(job_id = %job.job_id, "Tool invoked");

        let outcome = match finished_on_invoke(&job) {
            Some(outcome) => outcome,
            None => self.poll(job).await,
        };

        match &outcome {
            RelayOutcome::Succeeded { job_id, polls, .. } => info!(job_id = %job_id, polls, "Relay succeeded"),
            RelayOutcome::Failed { message, .. } => warn!("Relay job failed: {}", message),
        }
        Ok(outcome)
    }

    /// Poll a job until it reaches a terminal status or the budget runs out.
    ///
    /// Each attempt sleeps first, then checks. A failed status check counts against the budget
    /// but does not end the loop.
    pub async fn poll(&self, job: JobHandle) -> RelayOutcome {
        let budget = self.policy.budget(job.max_polls);
        let interval = self.policy.interval(job.poll_interval_ms);
        debug!(job_id = %job.job_id, budget, ?interval, "Polling job");

        let mut last = Value::Null;
        for attempt in 1..=budget {
            tokio::time::sleep(interval).await;

            let state = match self.api.job_status(&job.job_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(attempt, budget, "Job status check failed: {}", e);
                    if let Some(body) = e.diagnostics() {
                        last = body.clone();
                    }
                    continue;
                }
            };

            debug!(attempt, status = %state.status, "Polled job");
            match state.status {
                JobStatus::Succeeded => {
                    metrics::histogram!("imgrelay_job_polls").record(attempt as f64);
                    return RelayOutcome::Succeeded {
                        output: state.output.unwrap_or(state.raw),
                        job_id: job.job_id,
                        polls: attempt,
                    };
                }
                JobStatus::Failed | JobStatus::Cancelled => {
                    metrics::histogram!("imgrelay_job_polls").record(attempt as f64);
                    return RelayOutcome::Failed {
                        message: failure_message(&job.job_id, state.status, state.error_message()),
                        data: state.raw,
                    };
                }
                JobStatus::Pending | JobStatus::Running | JobStatus::Unknown => last = state.raw,
            }
        }

        metrics::histogram!("imgrelay_job_polls").record(budget as f64);
        RelayOutcome::Failed {
            message: format!("job {} did not finish after {} polls", job.job_id, budget),
            data: last,
        }
    }
}

/// Some tools answer synchronously with a terminal status; no polling needed then.
fn finished_on_invoke(job: &JobHandle) -> Option<RelayOutcome> {
    match job.status? {
        JobStatus::Succeeded => Some(RelayOutcome::Succeeded {
            output: job.output.clone().unwrap_or_else(|| job.raw.clone()),
            job_id: job.job_id.clone(),
            polls: 0,
        }),
        status @ (JobStatus::Failed | JobStatus::Cancelled) => Some(RelayOutcome::Failed {
            message: failure_message(&job.job_id, status, job.error_message()),
            data: job.raw.clone(),
        }),
        JobStatus::Pending | JobStatus::Running | JobStatus::Unknown => None,
    }
}

fn failure_message(job_id: &str, status: JobStatus, reason: Option<String>) -> String {
    match reason {
        Some(reason) => format!("job {job_id} {status}: {reason}"),
        None => format!("job {job_id} {status}"),
    }
}
