//! Headless Chromium session for sites behind an interactive challenge page.
//!
//! The session owns a private current-thread tokio runtime so the rest of the
//! crate stays blocking. One session serves a whole run; it is closed
//! explicitly by the caller and again on drop if that was skipped.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::error::FetchError;
use crate::engine::profile::{ChallengeSpec, SiteProfile};
use crate::engine::render::Renderer;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// Launch settings.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub user_agent: String,
    /// Directory for failure screenshots.
    pub snapshot_dir: PathBuf,
}

pub struct BrowserSession {
    runtime: Runtime,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Page,
    snapshot_dir: PathBuf,
    snapshots: Cell<u32>,
}

impl BrowserSession {
    pub fn launch(options: &BrowserOptions) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| launch_error(e.to_string()))?;

        let mut config = BrowserConfig::builder().arg("--disable-blink-features=AutomationControlled");
        if !options.headless {
            config = config.with_head();
        }
        let config = config.build().map_err(launch_error)?;

        let (browser, handler, page) = runtime.block_on(async {
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| launch_error(e.to_string()))?;
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| launch_error(e.to_string()))?;
            page.set_user_agent(SetUserAgentOverrideParams::new(options.user_agent.clone()))
                .await
                .map_err(|e| launch_error(e.to_string()))?;
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER))
                .await
                .map_err(|e| launch_error(e.to_string()))?;
            Ok::<_, FetchError>((browser, handler, page))
        })?;
        info!(headless = options.headless, "browser session started");

        Ok(Self {
            runtime,
            browser: Some(browser),
            handler: Some(handler),
            page,
            snapshot_dir: options.snapshot_dir.clone(),
            snapshots: Cell::new(0),
        })
    }

    /// Close the browser and wait for its event loop to finish.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        let handler = self.handler.take();
        self.runtime.block_on(async {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser did not close cleanly");
            }
            let _ = browser.wait().await;
            if let Some(handler) = handler {
                let _ = handler.await;
            }
        });
        debug!("browser session closed");
    }

    async fn load(&self, url: &str, challenge: Option<&ChallengeSpec>) -> Result<String, FetchError> {
        self.page.goto(url).await.map_err(|e| FetchError::Browser {
            url: url.to_string(),
            reason: e.to_string(),
            snapshot: None,
        })?;

        if let Some(challenge) = challenge {
            let short = Duration::from_secs(challenge.short_wait_secs);
            if !wait_for(&self.page, challenge.ready_selector, short).await {
                info!(url, "challenge page detected; clicking");
                let (x, y) = challenge.click_at;
                self.page.click(Point::new(x, y)).await.map_err(|e| FetchError::Browser {
                    url: url.to_string(),
                    reason: format!("challenge click failed: {}", e),
                    snapshot: None,
                })?;
                let long = Duration::from_secs(challenge.long_wait_secs);
                if !wait_for(&self.page, challenge.ready_selector, long).await {
                    return Err(FetchError::BrowserTimeout {
                        url: url.to_string(),
                        waited_secs: challenge.short_wait_secs + challenge.long_wait_secs,
                        snapshot: None,
                    });
                }
            }
        }

        self.page.content().await.map_err(|e| FetchError::Browser {
            url: url.to_string(),
            reason: e.to_string(),
            snapshot: None,
        })
    }

    async fn snapshot(&self, host: &str) -> Option<PathBuf> {
        let n = self.snapshots.get() + 1;
        self.snapshots.set(n);
        if let Err(e) = std::fs::create_dir_all(&self.snapshot_dir) {
            warn!(error = %e, dir = %self.snapshot_dir.display(), "snapshot directory unavailable");
            return None;
        }
        let path = snapshot_path(&self.snapshot_dir, host, n);
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        match self.page.save_screenshot(params, &path).await {
            Ok(_) => Some(path),
            Err(e) => {
                warn!(error = %e, "could not save failure snapshot");
                None
            }
        }
    }
}

impl Renderer for BrowserSession {
    fn render(&self, url: &str, profile: &SiteProfile) -> Result<String, FetchError> {
        self.runtime.block_on(async {
            let result = self.load(url, profile.challenge.as_ref()).await;
            match result {
                Ok(html) => {
                    debug!(url, bytes = html.len(), "rendered page");
                    Ok(html)
                }
                Err(e) => Err(with_snapshot(e, self.snapshot(profile.host).await)),
            }
        })
    }

    fn aborts_on_failure(&self) -> bool {
        true
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll for `selector` until it appears or `timeout` passes.
async fn wait_for(page: &Page, selector: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn snapshot_path(dir: &Path, host: &str, n: u32) -> PathBuf {
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    dir.join(format!("snapshot-{}-{}.png", host, n))
}

fn with_snapshot(err: FetchError, path: Option<PathBuf>) -> FetchError {
    match err {
        FetchError::BrowserTimeout {
            url, waited_secs, ..
        } => FetchError::BrowserTimeout {
            url,
            waited_secs,
            snapshot: path,
        },
        FetchError::Browser { url, reason, .. } => FetchError::Browser {
            url,
            reason,
            snapshot: path,
        },
        other => other,
    }
}

fn launch_error(reason: String) -> FetchError {
    FetchError::Browser {
        url: "about:blank".to_string(),
        reason: format!("could not start browser: {}", reason),
        snapshot: None,
    }
}
