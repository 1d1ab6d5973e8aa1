use std::time::Duration;
use thiserror::Error;

/// Every failure a job, the shared browser, or the service itself can report.
///
/// The type is `Clone` so that one failed browser launch can be handed to
/// every job that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScreenshotError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("service shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ScreenshotError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ScreenshotError::InvalidUrl(_) => ErrorSeverity::Low,
            ScreenshotError::ShuttingDown => ErrorSeverity::Low,
            ScreenshotError::ConfigurationError(_) => ErrorSeverity::High,
            ScreenshotError::BrowserLaunchFailed(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl From<std::io::Error> for ScreenshotError {
    fn from(err: std::io::Error) -> Self {
        ScreenshotError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ScreenshotError {
    fn from(err: serde_json::Error) -> Self {
        ScreenshotError::SerializationError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ScreenshotError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScreenshotError::PageError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_message() {
        assert_eq!(ScreenshotError::ShuttingDown.to_string(), "service shutting down");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ScreenshotError::InvalidUrl("".into()).severity(), ErrorSeverity::Low);
        assert_eq!(
            ScreenshotError::NavigationFailed("net::ERR".into()).severity(),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ScreenshotError::BrowserLaunchFailed("no chrome".into()).severity(),
            ErrorSeverity::High
        );
    }
}
