use crate::ScreenshotError;
use metrics::{
    describe_counter, describe_gauge, describe_histogram, register_counter, register_gauge,
    register_histogram, Counter, Gauge, Histogram,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Scheduler instrumentation
///
/// Handles are registered against whatever recorder is installed when the
/// service is built. Without one they are no-ops, which is what the library
/// and test builds get.
pub struct Metrics {
    pub jobs_submitted: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_rejected: Counter,
    pub job_duration: Histogram,
    pub queue_length: Gauge,
    pub active_jobs: Gauge,
    pub browser_launches: Counter,
    pub browser_launch_failures: Counter,
    pub timeout_errors: Counter,
}

const JOBS_SUBMITTED: &str = "screenshot_queue_jobs_submitted_total";
const JOBS_COMPLETED: &str = "screenshot_queue_jobs_completed_total";
const JOBS_FAILED: &str = "screenshot_queue_jobs_failed_total";
const JOBS_REJECTED: &str = "screenshot_queue_jobs_rejected_total";
const JOB_DURATION: &str = "screenshot_queue_job_duration_seconds";
const QUEUE_LENGTH: &str = "screenshot_queue_queue_length";
const ACTIVE_JOBS: &str = "screenshot_queue_active_jobs";
const BROWSER_LAUNCHES: &str = "screenshot_queue_browser_launches_total";
const BROWSER_LAUNCH_FAILURES: &str = "screenshot_queue_browser_launch_failures_total";
const TIMEOUT_ERRORS: &str = "screenshot_queue_timeout_errors_total";

impl Metrics {
    pub fn new() -> Self {
        describe_counter!(JOBS_SUBMITTED, "Jobs admitted by submit");
        describe_counter!(JOBS_REJECTED, "Queued jobs rejected by shutdown");
        describe_histogram!(JOB_DURATION, "Execution time of finished jobs");
        describe_gauge!(QUEUE_LENGTH, "Jobs waiting for a slot");
        describe_gauge!(ACTIVE_JOBS, "Jobs currently executing");
        describe_counter!(BROWSER_LAUNCH_FAILURES, "Shared browser launches that failed");

        Self {
            jobs_submitted: register_counter!(JOBS_SUBMITTED),
            jobs_completed: register_counter!(JOBS_COMPLETED),
            jobs_failed: register_counter!(JOBS_FAILED),
            jobs_rejected: register_counter!(JOBS_REJECTED),
            job_duration: register_histogram!(JOB_DURATION),
            queue_length: register_gauge!(QUEUE_LENGTH),
            active_jobs: register_gauge!(ACTIVE_JOBS),
            browser_launches: register_counter!(BROWSER_LAUNCHES),
            browser_launch_failures: register_counter!(BROWSER_LAUNCH_FAILURES),
            timeout_errors: register_counter!(TIMEOUT_ERRORS),
        }
    }

    pub fn record_submitted(&self) {
        self.jobs_submitted.increment(1);
    }

    pub fn record_job(&self, duration: Duration, error: Option<&ScreenshotError>) {
        match error {
            None => self.jobs_completed.increment(1),
            Some(err) => {
                self.jobs_failed.increment(1);
                if matches!(err, ScreenshotError::Timeout(_)) {
                    self.timeout_errors.increment(1);
                }
            }
        }

        self.job_duration.record(duration.as_secs_f64());
    }

    pub fn record_rejected(&self, count: usize) {
        self.jobs_rejected.increment(count as u64);
    }

    pub fn record_launch(&self, success: bool) {
        if success {
            self.browser_launches.increment(1);
        } else {
            self.browser_launch_failures.increment(1);
        }
    }

    pub fn set_load(&self, active: usize, queued: usize) {
        self.active_jobs.set(active as f64);
        self.queue_length.set(queued as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves the Prometheus text format on `/metrics`
pub struct PrometheusExporter {
    addr: SocketAddr,
}

impl PrometheusExporter {
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }

    /// Install the global recorder and spawn its HTTP listener.
    ///
    /// Must run inside a tokio runtime and before the service is built, so
    /// the service's handles bind to this recorder.
    pub fn start(&self) -> Result<(), ScreenshotError> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| ScreenshotError::ConfigurationError(format!("metrics exporter: {e}")))?;

        info!("Serving Prometheus metrics on {}", self.addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        let metrics = Metrics::new();
        metrics.record_submitted();
        metrics.record_job(Duration::from_millis(20), None);
        metrics.record_job(
            Duration::from_secs(1),
            Some(&ScreenshotError::Timeout(Duration::from_secs(1))),
        );
        metrics.record_rejected(3);
        metrics.record_launch(false);
        metrics.set_load(2, 5);
    }

    #[test]
    fn test_metric_names_share_crate_prefix() {
        let names = [
            JOBS_SUBMITTED,
            JOBS_COMPLETED,
            JOBS_FAILED,
            JOBS_REJECTED,
            JOB_DURATION,
            QUEUE_LENGTH,
            ACTIVE_JOBS,
            BROWSER_LAUNCHES,
            BROWSER_LAUNCH_FAILURES,
            TIMEOUT_ERRORS,
        ];
        for name in names {
            assert!(name.starts_with("screenshot_queue_"), "{name}");
        }
    }

    #[test]
    fn test_exporter_binds_all_interfaces() {
        let exporter = PrometheusExporter::new(9000);
        assert_eq!(exporter.addr.port(), 9000);
        assert!(exporter.addr.ip().is_unspecified());
    }
}
