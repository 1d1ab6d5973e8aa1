//! Execution path of one admitted job
//!
//! A worker owns its job from dispatch to slot release: it runs the capture
//! pipeline in a private page, settles the outcome, closes the page whatever
//! happened, and only then gives the slot back to the scheduler.

use crate::engine::{CaptureParams, PageContext, WaitUntil};
use crate::error::ErrorSeverity;
use crate::events::JobEvent;
use crate::job::{JobSpec, PendingJob};
use crate::utils::{format_bytes, format_duration};
use crate::{ScreenshotError, ScreenshotService};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub(crate) async fn execute(service: ScreenshotService, job: PendingJob) {
    let PendingJob { spec, responder } = job;
    info!("Starting job {} for URL: {}", spec.id, spec.url);
    service.events().publish(JobEvent::Started {
        job_id: spec.id,
        url: spec.url.clone(),
    });

    let started = Instant::now();
    let mut page: Option<Box<dyn PageContext>> = None;
    let result = AssertUnwindSafe(capture(&service, &spec, &mut page))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(ScreenshotError::CaptureFailed(
                "worker panicked during capture".to_string(),
            ))
        });
    let elapsed = started.elapsed();

    match &result {
        Ok(bytes) => info!(
            "Job {} completed in {} ({})",
            spec.id,
            format_duration(elapsed),
            format_bytes(bytes.len())
        ),
        Err(e) => match e.severity() {
            ErrorSeverity::High => error!("Job {} failed [{}]: {}", spec.id, spec.url, e),
            _ => warn!("Job {} failed [{}]: {}", spec.id, spec.url, e),
        },
    }

    service.settle(&spec, responder, result, elapsed);

    if let Some(page) = page {
        close_page(page, &spec).await;
    }

    service.release_slot();
}

/// Load the page twice: once to learn the content size, then again at that
/// size so lazy content and layout settle before capturing.
async fn capture(
    service: &ScreenshotService,
    job: &JobSpec,
    slot: &mut Option<Box<dyn PageContext>>,
) -> Result<Vec<u8>, ScreenshotError> {
    let config = service.config();
    let browser = service.resources().acquire().await?;
    let page = slot.insert(browser.new_context().await?);

    page.set_user_agent(&config.user_agent).await?;

    let initial_timeout = config.initial_load_timeout.min(job.options.timeout);
    page.navigate(&job.url, WaitUntil::DomContentLoaded, initial_timeout)
        .await?;

    let size = page.measure_content_size().await?;
    debug!("Job {}: content size {}x{}", job.id, size.width, size.height);
    page.set_viewport(size).await?;

    page.navigate(&job.url, WaitUntil::NetworkIdle, job.options.timeout)
        .await?;
    tokio::time::sleep(config.settle_delay).await;

    page.capture(CaptureParams::from(&job.options)).await
}

async fn close_page(mut page: Box<dyn PageContext>, job: &JobSpec) {
    if page.is_closed() {
        return;
    }
    if let Err(e) = page.close().await {
        warn!("Failed to close page for job {} [{}]: {}", job.id, job.url, e);
    }
}
