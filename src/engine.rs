//! Browser automation boundary
//!
//! The scheduler never talks to Chrome directly. It drives these traits, which
//! [`crate::chrome`] implements over chromiumoxide and the test suites implement
//! with scripted fakes and mocks.

use crate::{CaptureFormat, CaptureOptions, ScreenshotError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Load milestone a navigation waits for before it counts as done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// The initial document has been parsed
    DomContentLoaded,
    /// Network activity has settled to at most a couple of open connections
    NetworkIdle,
}

/// Natural pixel size of the rendered document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ContentSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub format: CaptureFormat,
    pub quality: Option<u8>,
    pub full_page: bool,
}

impl From<&CaptureOptions> for CaptureParams {
    fn from(options: &CaptureOptions) -> Self {
        Self {
            format: options.format,
            quality: options.quality,
            full_page: options.full_page,
        }
    }
}

/// Starts the shared browser process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScreenshotError>;
}

/// A running browser shared by every executing job
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a fresh, isolated page owned by exactly one job.
    async fn new_context(&self) -> Result<Box<dyn PageContext>, ScreenshotError>;

    async fn close(&self) -> Result<(), ScreenshotError>;

    /// False once the browser process or its connection has gone away.
    fn is_alive(&self) -> bool {
        true
    }
}

/// One job's private browsing context
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageContext: Send {
    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), ScreenshotError>;

    /// Fails with `NavigationFailed` or `Timeout` when `wait_until` is not
    /// reached within `timeout`.
    async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<(), ScreenshotError>;

    async fn measure_content_size(&mut self) -> Result<ContentSize, ScreenshotError>;

    async fn set_viewport(&mut self, size: ContentSize) -> Result<(), ScreenshotError>;

    async fn capture(&mut self, params: CaptureParams) -> Result<Vec<u8>, ScreenshotError>;

    fn is_closed(&self) -> bool;

    /// Must succeed without side effects on an already closed context.
    async fn close(&mut self) -> Result<(), ScreenshotError>;
}
