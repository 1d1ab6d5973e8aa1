//! Job records, lifecycle status and the single-assignment outcome future

use crate::{CaptureFormat, CaptureOptions, ScreenshotError};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed moves: pending -> queued | processing, queued -> processing,
    /// processing -> completed | failed. A queued job may also fail when the
    /// service shuts down before it runs.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Processing)
                | (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// History entry for one admitted job, as kept by the registry
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub url: String,
    pub options: CaptureOptions,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present iff the job completed
    pub result: Option<Arc<Vec<u8>>>,
    /// Present iff the job failed
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId, url: String, options: CaptureOptions) -> Self {
        Self {
            id,
            url,
            options,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "Ignoring invalid transition {} -> {} for job {}",
                self.status,
                next,
                self.id
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn mark_queued(&mut self) {
        self.advance(JobStatus::Queued);
    }

    pub fn mark_processing(&mut self, at: DateTime<Utc>) {
        if self.advance(JobStatus::Processing) {
            self.started_at = Some(at);
        }
    }

    pub fn mark_completed(&mut self, artifact: Arc<Vec<u8>>, at: DateTime<Utc>) {
        if self.advance(JobStatus::Completed) {
            self.result = Some(artifact);
            self.completed_at = Some(at);
        }
    }

    pub fn mark_failed(&mut self, error: String, at: DateTime<Utc>) {
        if self.advance(JobStatus::Failed) {
            self.error = Some(error);
            self.completed_at = Some(at);
        }
    }

    /// `completed_at - created_at`, once terminal
    pub fn duration(&self) -> Option<Duration> {
        self.completed_at
            .and_then(|done| (done - self.created_at).to_std().ok())
    }

    pub fn snapshot(&self, queue_position: Option<usize>) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            url: self.url.clone(),
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            duration: self.duration(),
            error: self.error.clone(),
            queue_position: if self.status == JobStatus::Queued {
                queue_position
            } else {
                None
            },
        }
    }
}

/// Point-in-time view of a job returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    /// 1-based position in the wait queue, only while queued
    pub queue_position: Option<usize>,
}

/// Scheduler load as reported to the boundary layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSnapshot {
    pub active_jobs: usize,
    pub queue_length: usize,
    pub max_concurrency: usize,
    /// Jobs admitted since the service started
    pub total_processed: u64,
    pub history_size: usize,
    pub browser_active: bool,
}

/// What a successful job delivers to its caller
#[derive(Debug, Clone)]
pub struct ScreenshotOutput {
    pub job_id: JobId,
    pub url: String,
    pub format: CaptureFormat,
    pub artifact: Arc<Vec<u8>>,
    /// Time spent executing, from dispatch to capture
    pub duration: Duration,
}

pub type OutcomeResult = Result<ScreenshotOutput, ScreenshotError>;

/// Write side of a job's outcome; consumed by the single `settle` call.
#[derive(Debug)]
pub(crate) struct OutcomeSender(oneshot::Sender<OutcomeResult>);

impl OutcomeSender {
    pub(crate) fn settle(self, outcome: OutcomeResult) {
        // The caller may have dropped every handle to the outcome; that is not
        // the scheduler's concern.
        let _ = self.0.send(outcome);
    }
}

/// Future resolving to a job's single outcome
///
/// Clones share the same result, so the caller can await it from several
/// places or [`peek`](JobOutcome::peek) at it without consuming it.
#[derive(Clone)]
pub struct JobOutcome {
    inner: Shared<BoxFuture<'static, OutcomeResult>>,
}

impl JobOutcome {
    pub(crate) fn channel() -> (OutcomeSender, JobOutcome) {
        let (tx, rx) = oneshot::channel();
        let inner = async move {
            // A dropped sender means the runtime tore the worker down.
            rx.await.unwrap_or(Err(ScreenshotError::ShuttingDown))
        }
        .boxed()
        .shared();
        (OutcomeSender(tx), JobOutcome { inner })
    }

    /// The outcome if it has already been delivered and polled through.
    pub fn peek(&self) -> Option<&OutcomeResult> {
        self.inner.peek()
    }
}

impl Future for JobOutcome {
    type Output = OutcomeResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOutcome")
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// Returned by `submit`: the job's identity, admission status and outcome.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub job_id: JobId,
    pub status: JobStatus,
    pub outcome: JobOutcome,
}

/// Immutable input of an admitted job
#[derive(Debug, Clone)]
pub(crate) struct JobSpec {
    pub id: JobId,
    pub url: String,
    pub options: CaptureOptions,
}

/// A job waiting in the queue or running on a worker
#[derive(Debug)]
pub(crate) struct PendingJob {
    pub spec: JobSpec,
    pub responder: OutcomeSender,
}
