//! # Screenshot Queue
//!
//! A bounded-concurrency job scheduler for web page screenshots. Jobs are
//! admitted immediately when an execution slot is free and wait in a FIFO
//! queue otherwise. Every running job shares one lazily launched headless
//! Chrome but captures inside its own page.
//!
//! ## How a job runs
//!
//! 1. `submit` validates the URL, assigns an id and records the job.
//! 2. With a free slot the job is `processing` at once; otherwise it is
//!    `queued` and a `Queued` event reports the queue length.
//! 3. The worker opens a private page and loads the URL until the DOM is
//!    ready, measures the document, resizes the viewport to it and loads the
//!    URL again until the network is almost idle.
//! 4. After a short settle delay the page is captured as JPEG, PNG or WebP.
//! 5. The outcome is delivered once, the page is closed and the slot goes to
//!    the next queued job.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshot_queue::{Config, JobOptions, ScreenshotService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ScreenshotService::with_chrome(Config::default())?;
//!     let mut events = service.subscribe();
//!
//!     let ticket = service.submit("https://example.com", JobOptions::default())?;
//!     println!("job {} is {}", ticket.job_id, ticket.status);
//!
//!     let screenshot = ticket.outcome.await?;
//!     println!("captured {} bytes", screenshot.artifact.len());
//!     println!("first event: {:?}", events.recv().await?);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! screenshot-queue single --url https://example.com --output shot.jpg
//! screenshot-queue --max-concurrency 4 batch --input urls.txt --output shots/ --format png
//! screenshot-queue validate --config config.json
//! ```

/// Configuration and per-job options
pub mod config;

/// Error types and severity classification
pub mod error;

/// Browser automation traits the scheduler drives
pub mod engine;

/// chromiumoxide-backed engine
pub mod chrome;

/// Job records, status and outcome types
pub mod job;

mod queue;

/// Bounded job history
pub mod registry;

/// Lifecycle event broadcasting
pub mod events;

/// Shared browser lifecycle with launch de-duplication
pub mod resource;

/// Admission, dispatch, status queries and shutdown
pub mod screenshot_service;

mod worker;

/// Command-line interface implementation
pub mod cli;

/// Prometheus-compatible instrumentation
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use chrome::ChromeEngine;
pub use cli::*;
pub use config::*;
pub use engine::{BrowserEngine, BrowserHandle, CaptureParams, ContentSize, PageContext, WaitUntil};
pub use error::*;
pub use events::{EventBus, JobEvent};
pub use job::{
    JobId, JobOutcome, JobRecord, JobSnapshot, JobStatus, JobTicket, LoadSnapshot, OutcomeResult,
    ScreenshotOutput,
};
pub use crate::metrics::{Metrics, PrometheusExporter};
pub use registry::JobRegistry;
pub use resource::ResourceManager;
pub use screenshot_service::*;
pub use utils::*;
