//! Lazily launched, shared browser with launch de-duplication
//!
//! At most one launch is in flight at a time. Every job that asks for the
//! browser while it is starting awaits the same launch and receives the same
//! handle or the same error. A failed or panicked launch leaves the slot
//! empty so the next request starts over, and so does a browser that has
//! died since it was launched.

use crate::engine::{BrowserEngine, BrowserHandle};
use crate::metrics::Metrics;
use crate::ScreenshotError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

type LaunchResult = Result<Arc<dyn BrowserHandle>, ScreenshotError>;
type LaunchFuture = Shared<BoxFuture<'static, LaunchResult>>;

enum Slot {
    Empty,
    Launching { generation: u64, launch: LaunchFuture },
    Ready { browser: Arc<dyn BrowserHandle> },
}

struct ResourceState {
    slot: Slot,
    /// Bumped on every launch and release, so a launch that finishes after a
    /// release cannot reinstall its browser.
    generation: u64,
}

pub struct ResourceManager {
    engine: Arc<dyn BrowserEngine>,
    metrics: Arc<Metrics>,
    state: Mutex<ResourceState>,
}

impl ResourceManager {
    pub fn new(engine: Arc<dyn BrowserEngine>, metrics: Arc<Metrics>) -> Self {
        Self {
            engine,
            metrics,
            state: Mutex::new(ResourceState {
                slot: Slot::Empty,
                generation: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the shared browser, launching it if nothing is running yet.
    pub async fn acquire(&self) -> LaunchResult {
        let (generation, launch) = {
            let mut state = self.state();
            match &state.slot {
                Slot::Ready { browser } if browser.is_alive() => return Ok(browser.clone()),
                Slot::Launching { generation, launch } => (*generation, launch.clone()),
                Slot::Ready { .. } | Slot::Empty => {
                    if matches!(state.slot, Slot::Ready { .. }) {
                        warn!("Shared browser is no longer running, relaunching");
                    }
                    state.generation += 1;
                    let generation = state.generation;
                    let launch = self.start_launch();
                    state.slot = Slot::Launching {
                        generation,
                        launch: launch.clone(),
                    };
                    (generation, launch)
                }
            }
        };

        let result = launch.await;

        let mut state = self.state();
        let current = matches!(
            &state.slot,
            Slot::Launching { generation: g, .. } if *g == generation
        );
        if current {
            state.slot = match &result {
                Ok(browser) => Slot::Ready {
                    browser: browser.clone(),
                },
                Err(_) => Slot::Empty,
            };
        }

        result
    }

    fn start_launch(&self) -> LaunchFuture {
        let engine = self.engine.clone();
        let metrics = self.metrics.clone();

        async move {
            info!("Launching shared browser...");
            let result = AssertUnwindSafe(engine.launch())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ScreenshotError::BrowserLaunchFailed(
                        "browser launch panicked".to_string(),
                    ))
                });
            match &result {
                Ok(_) => info!("Shared browser ready"),
                Err(e) => error!("Failed to launch browser: {}", e),
            }
            metrics.record_launch(result.is_ok());
            result
        }
        .boxed()
        .shared()
    }

    /// Close the shared browser if one is running or starting. Idempotent.
    pub async fn release(&self) {
        let previous = {
            let mut state = self.state();
            state.generation += 1;
            std::mem::replace(&mut state.slot, Slot::Empty)
        };

        let browser = match previous {
            Slot::Empty => return,
            Slot::Ready { browser } => browser,
            Slot::Launching { launch, .. } => match launch.await {
                Ok(browser) => browser,
                Err(_) => return,
            },
        };

        info!("Closing shared browser...");
        if let Err(e) = browser.close().await {
            warn!("Error while closing browser: {}", e);
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(&self.state().slot, Slot::Ready { browser } if browser.is_alive())
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state().slot {
            Slot::Empty => "empty",
            Slot::Launching { .. } => "launching",
            Slot::Ready { .. } => "ready",
        };
        f.debug_struct("ResourceManager").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockBrowserHandle, PageContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    struct CountingBrowser {
        closes: Arc<AtomicUsize>,
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserHandle for CountingBrowser {
        async fn new_context(&self) -> Result<Box<dyn PageContext>, ScreenshotError> {
            Err(ScreenshotError::PageError("not used".to_string()))
        }

        async fn close(&self) -> Result<(), ScreenshotError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    /// Launches block on `gate` until the test hands out permits.
    struct GatedEngine {
        launches: AtomicUsize,
        closes: Arc<AtomicUsize>,
        gate: Semaphore,
        fail_next: AtomicBool,
        panic_next: AtomicBool,
        /// Liveness flag of the most recently launched browser
        last_alive: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl GatedEngine {
        fn new(permits: usize) -> Arc<Self> {
            Arc::new(Self {
                launches: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
                gate: Semaphore::new(permits),
                fail_next: AtomicBool::new(false),
                panic_next: AtomicBool::new(false),
                last_alive: Mutex::new(None),
            })
        }

        fn kill_last_browser(&self) {
            if let Some(alive) = self.last_alive.lock().unwrap().as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl BrowserEngine for GatedEngine {
        async fn launch(&self) -> LaunchResult {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ScreenshotError::BrowserLaunchFailed(e.to_string()))?;

            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("chrome crashed during startup");
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ScreenshotError::BrowserLaunchFailed("no chrome".to_string()));
            }
            let alive = Arc::new(AtomicBool::new(true));
            *self.last_alive.lock().unwrap() = Some(alive.clone());
            Ok(Arc::new(CountingBrowser {
                closes: self.closes.clone(),
                alive,
            }))
        }
    }

    fn manager(engine: Arc<GatedEngine>) -> ResourceManager {
        ResourceManager::new(engine, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_concurrent_acquire_launches_once() {
        let engine = GatedEngine::new(0);
        let resources = manager(engine.clone());

        let (a, b, c) = tokio::join!(resources.acquire(), resources.acquire(), async {
            tokio::task::yield_now().await;
            engine.gate.add_permits(1);
            resources.acquire().await
        });

        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(engine.launches.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert!(resources.is_active());
    }

    #[tokio::test]
    async fn test_launch_failure_shared_then_retried() {
        let engine = GatedEngine::new(0);
        engine.fail_next.store(true, Ordering::SeqCst);
        let resources = manager(engine.clone());

        let (a, b) = tokio::join!(resources.acquire(), async {
            tokio::task::yield_now().await;
            engine.gate.add_permits(1);
            resources.acquire().await
        });

        let expected = ScreenshotError::BrowserLaunchFailed("no chrome".to_string());
        assert_eq!(a.err(), Some(expected.clone()));
        assert_eq!(b.err(), Some(expected));
        assert_eq!(engine.launches.load(Ordering::SeqCst), 1);
        assert!(!resources.is_active());

        assert!(resources.acquire().await.is_ok());
        assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_launch_is_retried() {
        let engine = GatedEngine::new(2);
        engine.panic_next.store(true, Ordering::SeqCst);
        let resources = manager(engine.clone());

        let first = resources.acquire().await;
        assert!(matches!(first, Err(ScreenshotError::BrowserLaunchFailed(_))));
        assert!(!resources.is_active());

        assert!(resources.acquire().await.is_ok());
        assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
        assert!(resources.is_active());
    }

    #[tokio::test]
    async fn test_dead_browser_is_relaunched() {
        let engine = GatedEngine::new(2);
        let resources = manager(engine.clone());

        let first = resources.acquire().await.unwrap();
        engine.kill_last_browser();
        assert!(!resources.is_active());

        let second = resources.acquire().await.unwrap();
        assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(resources.is_active());

        // A live browser is reused as before.
        let third = resources.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_allows_relaunch() {
        let engine = GatedEngine::new(1);
        let resources = manager(engine.clone());

        resources.acquire().await.unwrap();
        resources.release().await;
        resources.release().await;
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
        assert!(!resources.is_active());

        resources.acquire().await.unwrap();
        assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_waits_for_inflight_launch() {
        let engine = GatedEngine::new(0);
        let resources = manager(engine.clone());

        let (acquired, ()) = tokio::join!(resources.acquire(), async {
            tokio::task::yield_now().await;
            engine.gate.add_permits(1);
            resources.release().await;
        });

        // The waiting job still gets its handle, but the slot is not refilled.
        assert!(acquired.is_ok());
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
        assert!(!resources.is_active());
    }

    #[tokio::test]
    async fn test_close_error_is_swallowed() {
        let mut browser = MockBrowserHandle::new();
        browser
            .expect_close()
            .times(1)
            .returning(|| Err(ScreenshotError::PageError("already gone".to_string())));
        let browser: Arc<dyn BrowserHandle> = Arc::new(browser);

        let mut engine = crate::engine::MockBrowserEngine::new();
        engine.expect_launch().times(1).returning(move || Ok(browser.clone()));

        let resources = ResourceManager::new(Arc::new(engine), Arc::new(Metrics::new()));
        resources.acquire().await.unwrap();
        resources.release().await;
        assert!(!resources.is_active());
    }
}
