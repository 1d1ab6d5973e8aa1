//! Headless Chrome implementation of the engine traits, over chromiumoxide

use crate::engine::{BrowserEngine, BrowserHandle, CaptureParams, ContentSize, PageContext, WaitUntil};
use crate::{create_browser_config, CaptureFormat, Config, ScreenshotError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const CONTENT_SIZE_SCRIPT: &str = r#"({
    width: document.documentElement.scrollWidth || document.body.scrollWidth,
    height: document.documentElement.scrollHeight || document.body.scrollHeight
})"#;

pub struct ChromeEngine {
    config: Config,
}

impl ChromeEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScreenshotError> {
        let browser_config = create_browser_config(&self.config)
            .map_err(|e| ScreenshotError::BrowserLaunchFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScreenshotError::BrowserLaunchFailed(e.to_string()))?;

        // The handler drives all CDP traffic and must be polled for as long as
        // the browser lives.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser handler error: {}", e);
                }
            }
            debug!("Browser handler stream ended");
        });

        Ok(Arc::new(ChromeBrowser {
            browser: Mutex::new(browser),
            handler_task,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct ChromeBrowser {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn new_context(&self) -> Result<Box<dyn PageContext>, ScreenshotError> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScreenshotError::PageError(e.to_string()))?;

        page.execute(SetLifecycleEventsEnabledParams::new(true)).await?;

        Ok(Box::new(ChromePage { page: Some(page) }))
    }

    async fn close(&self) -> Result<(), ScreenshotError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut browser = self.browser.lock().await;
        let result = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!("Failed to reap browser process: {}", e);
        }
        self.handler_task.abort();
        info!("Browser closed");

        result.map(|_| ()).map_err(|e| ScreenshotError::PageError(e.to_string()))
    }

    /// The handler loop ends when the CDP connection drops, which happens
    /// when Chrome exits or crashes.
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.handler_task.is_finished()
    }
}

pub struct ChromePage {
    page: Option<Page>,
}

impl ChromePage {
    fn page(&self) -> Result<&Page, ScreenshotError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScreenshotError::PageError("page already closed".to_string()))
    }
}

fn lifecycle_event_name(wait_until: WaitUntil) -> &'static str {
    match wait_until {
        WaitUntil::DomContentLoaded => "DOMContentLoaded",
        WaitUntil::NetworkIdle => "networkAlmostIdle",
    }
}

fn screenshot_format(format: CaptureFormat) -> CaptureScreenshotFormat {
    match format {
        CaptureFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        CaptureFormat::Png => CaptureScreenshotFormat::Png,
        CaptureFormat::Webp => CaptureScreenshotFormat::Webp,
    }
}

#[async_trait]
impl PageContext for ChromePage {
    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), ScreenshotError> {
        self.page()?
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await?;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitUntil,
        limit: Duration,
    ) -> Result<(), ScreenshotError> {
        let page = self.page()?;
        let event_name = lifecycle_event_name(wait_until);
        let mut events = page.event_listener::<EventLifecycleEvent>().await?;

        let navigation = async {
            let response = page
                .execute(NavigateParams::new(url))
                .await
                .map_err(|e| ScreenshotError::NavigationFailed(e.to_string()))?;

            if let Some(error_text) = &response.result.error_text {
                return Err(ScreenshotError::NavigationFailed(format!("{url}: {error_text}")));
            }

            let frame_id = response.result.frame_id.clone();
            let loader_id = response.result.loader_id.clone();
            while let Some(event) = events.next().await {
                let same_load = event.frame_id == frame_id
                    && loader_id.as_ref().map_or(true, |id| *id == event.loader_id);
                if same_load && event.name == event_name {
                    return Ok(());
                }
            }

            Err(ScreenshotError::NavigationFailed(format!(
                "{url}: page went away before {event_name}"
            )))
        };

        timeout(limit, navigation)
            .await
            .map_err(|_| ScreenshotError::Timeout(limit))?
    }

    async fn measure_content_size(&mut self) -> Result<ContentSize, ScreenshotError> {
        let params = EvaluateParams::builder()
            .expression(CONTENT_SIZE_SCRIPT)
            .return_by_value(true)
            .build()
            .map_err(ScreenshotError::PageError)?;

        self.page()?
            .evaluate_expression(params)
            .await
            .map_err(|e| ScreenshotError::PageError(e.to_string()))?
            .into_value::<ContentSize>()
            .map_err(|e| ScreenshotError::PageError(format!("unreadable content size: {e}")))
    }

    async fn set_viewport(&mut self, size: ContentSize) -> Result<(), ScreenshotError> {
        let emulation_params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(size.width))
            .height(i64::from(size.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ScreenshotError::PageError)?;

        self.page()?.execute(emulation_params).await?;
        Ok(())
    }

    async fn capture(&mut self, params: CaptureParams) -> Result<Vec<u8>, ScreenshotError> {
        let mut builder = ScreenshotParams::builder()
            .format(screenshot_format(params.format))
            .full_page(params.full_page);
        if let Some(quality) = params.quality {
            builder = builder.quality(i64::from(quality));
        }

        self.page()?
            .screenshot(builder.build())
            .await
            .map_err(|e| ScreenshotError::CaptureFailed(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.page.is_none()
    }

    async fn close(&mut self) -> Result<(), ScreenshotError> {
        match self.page.take() {
            Some(page) => page
                .close()
                .await
                .map_err(|e| ScreenshotError::PageError(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_event_names() {
        assert_eq!(lifecycle_event_name(WaitUntil::DomContentLoaded), "DOMContentLoaded");
        assert_eq!(lifecycle_event_name(WaitUntil::NetworkIdle), "networkAlmostIdle");
    }

    #[test]
    fn test_screenshot_format_mapping() {
        assert!(matches!(screenshot_format(CaptureFormat::Png), CaptureScreenshotFormat::Png));
        assert!(matches!(screenshot_format(CaptureFormat::Webp), CaptureScreenshotFormat::Webp));
    }

    // Needs a local Chrome and network access:
    // cargo test --features chrome_integration
    #[cfg(feature = "chrome_integration")]
    #[tokio::test]
    async fn test_capture_example_dot_com() {
        let engine = ChromeEngine::new(Config::default());
        let browser = engine.launch().await.expect("launch chrome");
        let mut page = browser.new_context().await.expect("open page");

        page.navigate("https://example.com", WaitUntil::DomContentLoaded, Duration::from_secs(30))
            .await
            .expect("load");
        let size = page.measure_content_size().await.expect("measure");
        assert!(size.width > 0 && size.height > 0);

        let bytes = page
            .capture(CaptureParams {
                format: CaptureFormat::Png,
                quality: None,
                full_page: true,
            })
            .await
            .expect("capture");
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);

        page.close().await.expect("close");
        page.close().await.expect("second close is a no-op");
        assert!(browser.is_alive());
        browser.close().await.expect("close browser");
        assert!(!browser.is_alive());
    }
}
