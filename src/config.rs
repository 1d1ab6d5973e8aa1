//! Configuration management with serde serialization/deserialization
//!
//! Service-wide settings for the screenshot scheduler, the per-job option bag
//! that overrides them, and the Chrome launch configuration derived from both.

use crate::ScreenshotError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Identity string every isolated page presents to the sites it loads.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

/// Main configuration structure for the screenshot service
///
/// # Examples
///
/// ```rust
/// use screenshot_queue::Config;
///
/// let config = Config {
///     max_concurrency: 4,
///     max_history_size: 500,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of jobs executing at once (default: 2)
    ///
    /// Further submissions wait in a FIFO queue until a slot frees up.
    pub max_concurrency: usize,

    /// Navigation timeout used when a job does not set its own (default: 60 seconds)
    ///
    /// Bounds the network-idle navigation phase of every job.
    pub timeout: Duration,

    /// Number of job records kept for status queries (default: 100)
    ///
    /// The oldest records are evicted first once the bound is exceeded.
    pub max_history_size: usize,

    /// Timeout for the first, content-loaded navigation phase (default: 30 seconds)
    pub initial_load_timeout: Duration,

    /// Pause between the final navigation and the capture (default: 500ms)
    ///
    /// Gives deferred paints a chance to land before pixels are read.
    pub settle_delay: Duration,

    /// User-Agent presented by every page (default: desktop Chrome)
    pub user_agent: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Buffer size of the lifecycle notification channel (default: 256)
    ///
    /// Slow subscribers that fall further behind than this miss events; the
    /// scheduler itself never waits on them.
    pub event_capacity: usize,

    /// Artifact format used when a job does not choose one (default: JPEG)
    pub default_format: CaptureFormat,

    /// Quality used for lossy formats when a job does not choose one (default: 80)
    pub default_quality: u8,

    /// Whether to capture the whole scrollable page by default (default: true)
    pub default_full_page: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            timeout: Duration::from_secs(60),
            max_history_size: 100,
            initial_load_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_path: None,
            event_capacity: 256,
            default_format: CaptureFormat::Jpeg,
            default_quality: 80,
            default_full_page: true,
        }
    }
}

impl Config {
    /// Load a JSON configuration file; absent keys keep their defaults.
    pub async fn from_file(path: &Path) -> Result<Self, ScreenshotError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScreenshotError> {
        if self.max_concurrency == 0 {
            return Err(ScreenshotError::ConfigurationError(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_history_size == 0 {
            return Err(ScreenshotError::ConfigurationError(
                "max_history_size must be greater than 0".to_string(),
            ));
        }

        if self.timeout.is_zero() || self.initial_load_timeout.is_zero() {
            return Err(ScreenshotError::ConfigurationError(
                "navigation timeouts must be greater than 0".to_string(),
            ));
        }

        if self.default_quality > 100 {
            return Err(ScreenshotError::ConfigurationError(format!(
                "default_quality must be within 0-100, got {}",
                self.default_quality
            )));
        }

        if self.event_capacity == 0 {
            return Err(ScreenshotError::ConfigurationError(
                "event_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Image formats the browser can encode a capture into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Jpeg,
    Png,
    Webp,
}

impl CaptureFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "jpg",
            CaptureFormat::Png => "png",
            CaptureFormat::Webp => "webp",
        }
    }

    /// PNG is lossless and takes no quality setting.
    pub fn is_lossy(&self) -> bool {
        !matches!(self, CaptureFormat::Png)
    }
}

impl std::str::FromStr for CaptureFormat {
    type Err = ScreenshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(CaptureFormat::Jpeg),
            "png" => Ok(CaptureFormat::Png),
            "webp" => Ok(CaptureFormat::Webp),
            other => Err(ScreenshotError::ConfigurationError(format!(
                "unknown format '{other}' (expected jpeg, png or webp)"
            ))),
        }
    }
}

/// Per-job overrides; every absent field falls back to the service default
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct JobOptions {
    #[serde(rename = "type")]
    pub format: Option<CaptureFormat>,
    pub quality: Option<u8>,
    pub full_page: Option<bool>,
    pub timeout: Option<Duration>,
}

impl JobOptions {
    /// Fill every unset option from `config`.
    pub fn resolve(&self, config: &Config) -> CaptureOptions {
        let format = self.format.unwrap_or(config.default_format);
        let quality = if format.is_lossy() {
            Some(self.quality.unwrap_or(config.default_quality).min(100))
        } else {
            None
        };

        CaptureOptions {
            format,
            quality,
            full_page: self.full_page.unwrap_or(config.default_full_page),
            timeout: self.timeout.unwrap_or(config.timeout),
        }
    }
}

/// Fully resolved capture settings for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub format: CaptureFormat,
    pub quality: Option<u8>,
    pub full_page: bool,
    pub timeout: Duration,
}

/// Generate Chrome command-line arguments for the shared browser
///
/// ```rust
/// use screenshot_queue::get_chrome_args;
///
/// let args = get_chrome_args();
/// assert!(args.contains(&"--no-sandbox".to_string()));
/// ```
pub fn get_chrome_args() -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--disable-audio-output".to_string(),
        "--no-first-run".to_string(),
        "--disable-features=ProcessSingleton".to_string(),
    ]
}

pub fn create_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, ScreenshotError> {
    use chromiumoxide::browser::BrowserConfig;

    // A fresh profile per launch keeps a relaunch after release from tripping
    // over the previous process's singleton lock.
    let user_data_dir = std::env::temp_dir().join(format!(
        "screenshot-queue-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4()
    ));

    let mut builder = BrowserConfig::builder()
        .user_data_dir(user_data_dir)
        .args(get_chrome_args());

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ScreenshotError::ConfigurationError)
}
