//! Headless Chromium renderer built on chromiumoxide.
//!
//! Each context is a separate browser process with a throwaway profile
//! directory, so no cookies or storage leak between unrelated sites.

use super::{NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a closed browser gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Launch options shared by every context.
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Explicit browser binary. Discovered when `None`.
    pub executable: Option<PathBuf>,
    /// Pass `--no-sandbox` (required in most containers).
    pub no_sandbox: bool,
    /// How long to wait for the browser process to come up.
    pub launch_timeout: Duration,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: is_docker(),
            launch_timeout: Duration::from_secs(20),
        }
    }
}

/// Renderer that launches one headless Chromium per context.
pub struct ChromiumRenderer {
    executable: PathBuf,
    options: ChromiumOptions,
}

impl ChromiumRenderer {
    /// Resolve the browser binary and build the renderer.
    pub fn new(options: ChromiumOptions) -> Result<Self> {
        let executable = find_chromium(options.executable.as_deref()).ok_or_else(|| {
            anyhow!("no Chromium binary found; set PRICEFETCH_CHROMIUM_PATH or install chromium")
        })?;
        Ok(Self {
            executable,
            options,
        })
    }

    /// Path of the browser binary in use.
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let profile_dir =
            std::env::temp_dir().join(format!("pricefetch-profile-{}", uuid::Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .user_data_dir(&profile_dir)
            .launch_timeout(self.options.launch_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--mute-audio");
        if self.options.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(|e| anyhow!("browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launching headless browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                // The browser is up; tear it down before reporting.
                let ctx = ChromiumContext {
                    browser,
                    page: None,
                    handler,
                    profile_dir,
                };
                Box::new(ctx).close().await.ok();
                return Err(anyhow!("opening page: {e}"));
            }
        };

        debug!(profile = %profile_dir.display(), "chromium context started");

        Ok(Box::new(ChromiumContext {
            browser,
            page: Some(page),
            handler,
            profile_dir,
        }))
    }

    fn name(&self) -> &str {
        "chromium"
    }
}

struct ChromiumContext {
    browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl ChromiumContext {
    fn page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or_else(|| anyhow!("page not open"))
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let page = self.page()?;
        let start = Instant::now();

        tokio::time::timeout(Duration::from_millis(timeout_ms), page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation timed out after {timeout_ms}ms"))?
            .with_context(|| format!("navigating to {url}"))?;

        let final_url = page.url().await?.unwrap_or_else(|| url.to_string());

        Ok(NavigationResult {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self.page()?.evaluate(script).await.context("evaluating script")?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext {
            mut browser,
            page,
            handler,
            profile_dir,
        } = *self;
        drop(page);

        if let Err(e) = browser.close().await {
            warn!("graceful browser close failed, killing: {e}");
            if let Some(Err(e)) = browser.kill().await {
                warn!("browser kill failed: {e}");
            }
        }
        if !finishes_within(browser.wait(), EXIT_GRACE).await {
            warn!("browser did not exit within {}s, killing", EXIT_GRACE.as_secs());
            if let Some(Err(e)) = browser.kill().await {
                warn!("browser kill failed: {e}");
            }
        }
        handler.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&profile_dir).await {
            debug!(profile = %profile_dir.display(), "profile cleanup skipped: {e}");
        }
        Ok(())
    }
}

/// Drive `fut` for at most `limit`. False when it was still pending.
async fn finishes_within<F: std::future::Future>(fut: F, limit: Duration) -> bool {
    tokio::time::timeout(limit, fut).await.is_ok()
}

/// Find a Chromium binary: explicit path, `PRICEFETCH_CHROMIUM_PATH`, then PATH.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    if let Ok(p) = std::env::var("PRICEFETCH_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in &["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = Command::new("which").arg(name).output() {
            if output.status.success() {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    return Some(PathBuf::from(path_str));
                }
            }
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Whether we are running inside a Docker container.
pub fn is_docker() -> bool {
    Path::new("/.dockerenv").exists()
}
