//! Job scheduler orchestrating admission, queueing and shutdown
//!
//! This module provides the `ScreenshotService` that admits capture jobs,
//! runs at most `max_concurrency` of them at once on the shared browser,
//! queues the rest in arrival order, and answers status and load queries.

use crate::chrome::ChromeEngine;
use crate::engine::BrowserEngine;
use crate::events::{EventBus, JobEvent};
use crate::job::{
    JobId, JobOutcome, JobRecord, JobSnapshot, JobSpec, JobStatus, JobTicket, LoadSnapshot,
    OutcomeSender, PendingJob, ScreenshotOutput,
};
use crate::metrics::Metrics;
use crate::queue::WaitQueue;
use crate::registry::JobRegistry;
use crate::resource::ResourceManager;
use crate::utils::validate_url;
use crate::{worker, Config, JobOptions, ScreenshotError};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Mutable scheduler state. Every admission and dispatch decision happens
/// under one lock so `active` never exceeds the concurrency limit.
#[derive(Debug)]
pub(crate) struct SchedulerState {
    pub(crate) active: usize,
    pub(crate) queue: WaitQueue,
    pub(crate) registry: JobRegistry,
    pub(crate) next_id: JobId,
    pub(crate) shutting_down: bool,
}

/// Bounded-concurrency screenshot job scheduler
///
/// Cloning is cheap; every clone drives the same scheduler.
///
/// # Examples
///
/// ```rust,no_run
/// use screenshot_queue::{Config, JobOptions, ScreenshotService};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = ScreenshotService::with_chrome(Config::default())?;
///
///     let ticket = service.submit("https://example.com", JobOptions::default())?;
///     let output = ticket.outcome.await?;
///     println!("Captured {} bytes", output.artifact.len());
///
///     service.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ScreenshotService {
    config: Arc<Config>,
    state: Arc<Mutex<SchedulerState>>,
    resources: Arc<ResourceManager>,
    events: EventBus,
    metrics: Arc<Metrics>,
    active_jobs: Arc<watch::Sender<usize>>,
}

impl ScreenshotService {
    pub fn new(config: Config, engine: Arc<dyn BrowserEngine>) -> Result<Self, ScreenshotError> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let (active_jobs, _) = watch::channel(0);
        let state = SchedulerState {
            active: 0,
            queue: WaitQueue::new(),
            registry: JobRegistry::new(config.max_history_size),
            next_id: 0,
            shutting_down: false,
        };

        info!(
            "Screenshot service ready (max_concurrency={}, history={})",
            config.max_concurrency, config.max_history_size
        );

        Ok(Self {
            events: EventBus::new(config.event_capacity),
            resources: Arc::new(ResourceManager::new(engine, metrics.clone())),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            metrics,
            active_jobs: Arc::new(active_jobs),
        })
    }

    /// Build a service that captures with a local headless Chrome.
    ///
    /// The browser is not started until the first job needs it.
    pub fn with_chrome(config: Config) -> Result<Self, ScreenshotError> {
        let engine = Arc::new(ChromeEngine::new(config.clone()));
        Self::new(config, engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a capture job.
    ///
    /// The job starts right away when a slot is free and is queued otherwise;
    /// either way it is recorded before this returns. The ticket's `outcome`
    /// resolves exactly once with the artifact or the failure.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, url: &str, options: JobOptions) -> Result<JobTicket, ScreenshotError> {
        let (ticket, runnable) = self.admit(url, options)?;
        if let Some(job) = runnable {
            self.spawn_worker(job);
        }
        Ok(ticket)
    }

    /// Submit and wait for the outcome.
    pub async fn screenshot(
        &self,
        url: &str,
        options: JobOptions,
    ) -> Result<ScreenshotOutput, ScreenshotError> {
        self.submit(url, options)?.outcome.await
    }

    /// Record a new job and decide whether it runs now. The returned job, if
    /// any, already holds an execution slot and must be handed to a worker.
    pub(crate) fn admit(
        &self,
        url: &str,
        options: JobOptions,
    ) -> Result<(JobTicket, Option<PendingJob>), ScreenshotError> {
        validate_url(url)?;
        let options = options.resolve(&self.config);
        let (responder, outcome) = JobOutcome::channel();

        let mut state = self.state();
        if state.shutting_down {
            return Err(ScreenshotError::ShuttingDown);
        }

        state.next_id += 1;
        let id = state.next_id;
        let mut record = JobRecord::new(id, url.to_string(), options);
        let job = PendingJob {
            spec: JobSpec {
                id,
                url: url.to_string(),
                options,
            },
            responder,
        };

        let runnable = if state.active < self.config.max_concurrency {
            state.active += 1;
            record.mark_processing(Utc::now());
            self.active_jobs.send_replace(state.active);
            Some(job)
        } else {
            record.mark_queued();
            state.queue.push_back(job);
            None
        };

        let status = record.status;
        state.registry.record(record);
        let (active, queue_length) = (state.active, state.queue.len());

        // Published under the lock so it always precedes the job's Started.
        if status == JobStatus::Queued {
            self.events.publish(JobEvent::Queued {
                job_id: id,
                queue_length,
                active_jobs: active,
            });
        }
        drop(state);

        self.metrics.record_submitted();
        self.metrics.set_load(active, queue_length);
        if status == JobStatus::Queued {
            info!(
                "Job {} queued (position {}, {} active)",
                id, queue_length, active
            );
        } else {
            debug!("Job {} admitted for immediate execution", id);
        }

        Ok((
            JobTicket {
                job_id: id,
                status,
                outcome,
            },
            runnable,
        ))
    }

    fn spawn_worker(&self, job: PendingJob) {
        tokio::spawn(worker::execute(self.clone(), job));
    }

    /// Record a finished job and deliver its outcome. Called once per job.
    pub(crate) fn settle(
        &self,
        spec: &JobSpec,
        responder: OutcomeSender,
        result: Result<Vec<u8>, ScreenshotError>,
        elapsed: Duration,
    ) {
        let finished_at = Utc::now();
        self.metrics.record_job(elapsed, result.as_ref().err());

        match result {
            Ok(bytes) => {
                let artifact = Arc::new(bytes);
                {
                    let stored = artifact.clone();
                    let mut state = self.state();
                    state
                        .registry
                        .update(spec.id, |record| record.mark_completed(stored, finished_at));
                }
                responder.settle(Ok(ScreenshotOutput {
                    job_id: spec.id,
                    url: spec.url.clone(),
                    format: spec.options.format,
                    artifact,
                    duration: elapsed,
                }));
                self.events.publish(JobEvent::Completed {
                    job_id: spec.id,
                    duration: elapsed,
                });
            }
            Err(error) => {
                let message = error.to_string();
                {
                    let reason = message.clone();
                    let mut state = self.state();
                    state
                        .registry
                        .update(spec.id, |record| record.mark_failed(reason, finished_at));
                }
                responder.settle(Err(error));
                self.events.publish(JobEvent::Failed {
                    job_id: spec.id,
                    error: message,
                });
            }
        }
    }

    /// Give back a slot and start as many queued jobs as now fit.
    pub(crate) fn release_slot(&self) {
        let mut dispatched = Vec::new();
        let (active, queue_length) = {
            let mut state = self.state();
            state.active = state.active.saturating_sub(1);

            if !state.shutting_down {
                while state.active < self.config.max_concurrency {
                    let Some(job) = state.queue.pop_front() else {
                        break;
                    };
                    state.active += 1;
                    let now = Utc::now();
                    state
                        .registry
                        .update(job.spec.id, |record| record.mark_processing(now));
                    dispatched.push(job);
                }
            }

            self.active_jobs.send_replace(state.active);
            (state.active, state.queue.len())
        };

        self.metrics.set_load(active, queue_length);
        for job in dispatched {
            debug!(
                "Dequeued job {} ({} still waiting)",
                job.spec.id, queue_length
            );
            self.spawn_worker(job);
        }
    }

    pub fn get_status(&self, id: JobId) -> Option<JobSnapshot> {
        let state = self.state();
        state.registry.snapshot(id, &state.queue)
    }

    /// Every retained job, newest first.
    pub fn list_all(&self) -> Vec<JobSnapshot> {
        let state = self.state();
        state.registry.list(&state.queue)
    }

    pub fn current_load(&self) -> LoadSnapshot {
        let browser_active = self.resources.is_active();
        let state = self.state();
        LoadSnapshot {
            active_jobs: state.active,
            queue_length: state.queue.len(),
            max_concurrency: self.config.max_concurrency,
            total_processed: state.next_id,
            history_size: state.registry.len(),
            browser_active,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Stop accepting work and release the browser.
    ///
    /// Queued jobs fail immediately with `ShuttingDown`. Jobs already running
    /// finish normally, and the browser is closed only after the last one
    /// returns its slot. Calling this again is harmless.
    pub async fn shutdown(&self) {
        info!("Shutting down screenshot service...");

        let rejected = {
            let mut state = self.state();
            state.shutting_down = true;
            let rejected = state.queue.drain();
            let now = Utc::now();
            let reason = ScreenshotError::ShuttingDown.to_string();
            for job in &rejected {
                state
                    .registry
                    .update(job.spec.id, |record| record.mark_failed(reason.clone(), now));
            }
            rejected
        };

        if !rejected.is_empty() {
            info!("Rejecting {} queued jobs", rejected.len());
            self.metrics.record_rejected(rejected.len());
        }
        for job in rejected {
            job.responder.settle(Err(ScreenshotError::ShuttingDown));
            self.events.publish(JobEvent::Failed {
                job_id: job.spec.id,
                error: ScreenshotError::ShuttingDown.to_string(),
            });
        }

        let mut active = self.active_jobs.subscribe();
        let in_flight = *active.borrow();
        if in_flight > 0 {
            info!("Waiting for {} running jobs to finish...", in_flight);
        }
        // The sender lives in `self`, so this only returns once the count is 0.
        let _ = active.wait_for(|count| *count == 0).await;

        self.resources.release().await;
        self.metrics.set_load(0, 0);
        info!("Screenshot service shutdown complete");
    }
}

impl Clone for ScreenshotService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: self.state.clone(),
            resources: self.resources.clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            active_jobs: self.active_jobs.clone(),
        }
    }
}

impl std::fmt::Debug for ScreenshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenshotService")
            .field("load", &self.current_load())
            .finish()
    }
}
