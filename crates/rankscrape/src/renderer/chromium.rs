//! Chromium-based renderer using chromiumoxide.

use super::{
    BrowserCookie, BrowserLauncher, LaunchOptions, NavigationResult, RenderContext, RenderError,
    RenderResult, Renderer,
};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, SetUserAgentOverrideParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::StopLoadingParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. RANKSCRAPE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("RANKSCRAPE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Ask a remote-debugging endpoint for its browser WebSocket URL.
pub async fn resolve_ws_url(debugger_address: &str) -> RenderResult<String> {
    let base = if debugger_address.starts_with("http://") || debugger_address.starts_with("https://")
    {
        debugger_address.to_string()
    } else {
        format!("http://{debugger_address}")
    };
    let version_url = format!("{}/json/version", base.trim_end_matches('/'));

    let resp: serde_json::Value = reqwest::Client::new()
        .get(&version_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| RenderError::Launch(format!("debug endpoint {version_url}: {e}")))?
        .json()
        .await
        .map_err(|e| RenderError::Launch(format!("invalid /json/version response: {e}")))?;

    resp.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| RenderError::Launch("no webSocketDebuggerUrl in response".to_string()))
}

/// Map a CDP error onto the renderer taxonomy.
fn map_cdp_error(err: CdpError) -> RenderError {
    match err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse | CdpError::Io(_) => {
            RenderError::Disconnected(err.to_string())
        }
        CdpError::Timeout => RenderError::Page(format!("CDP request: {err}")),
        CdpError::JavascriptException(_) => RenderError::Script(err.to_string()),
        other => RenderError::Page(other.to_string()),
    }
}

fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("CDP handler stopped: {e}");
                break;
            }
        }
    })
}

/// Launches or attaches to Chromium.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    async fn start(options: &LaunchOptions) -> RenderResult<ChromiumRenderer> {
        if options.attach_existing {
            let ws_url = resolve_ws_url(&options.debugger_address).await?;
            info!("Attaching to browser at {ws_url}");
            let (browser, handler) = Browser::connect(ws_url)
                .await
                .map_err(|e| RenderError::Launch(format!("attach failed: {e}")))?;
            return Ok(ChromiumRenderer::new(browser, handler, true, &options.user_agent));
        }

        let chrome_path = find_chromium().ok_or_else(|| {
            RenderError::Launch(
                "Chromium not found. Install Chrome or set RANKSCRAPE_CHROMIUM_PATH.".to_string(),
            )
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1920, 1080)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if !options.user_agent.is_empty() {
            builder = builder.arg(format!("--user-agent={}", options.user_agent));
        }
        builder = if options.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| RenderError::Launch(format!("failed to build browser config: {e}")))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(format!("failed to launch Chromium: {e}")))?;
        info!(headless = options.headless, "Launched Chromium");

        Ok(ChromiumRenderer::new(browser, handler, false, &options.user_agent))
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> RenderResult<Box<dyn Renderer>> {
        let renderer = tokio::time::timeout(
            Duration::from_millis(options.timeout_ms),
            Self::start(options),
        )
        .await
        .map_err(|_| RenderError::Launch(format!("launch timed out after {}ms", options.timeout_ms)))??;
        Ok(Box::new(renderer))
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    handler_task: JoinHandle<()>,
    /// Attached browsers belong to the user and are never closed.
    attached: bool,
    user_agent: String,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    fn new(
        browser: Browser,
        handler: Handler,
        attached: bool,
        user_agent: &str,
    ) -> Self {
        Self {
            browser,
            handler_task: spawn_handler(handler),
            attached,
            user_agent: user_agent.to_string(),
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> RenderResult<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_cdp_error)?;

        if !self.user_agent.is_empty() {
            if let Err(e) = page
                .execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
                .await
            {
                warn!("Failed to override user agent: {e}");
            }
        }

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&mut self) -> RenderResult<()> {
        if !self.attached {
            if let Err(e) = self.browser.close().await {
                debug!("Browser close returned: {e}");
            }
            let _ = self.browser.wait().await;
        }
        self.handler_task.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> RenderResult<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        let timed_out = match result {
            Ok(Ok(_)) => false,
            Ok(Err(e)) => return Err(map_cdp_error(e)),
            Err(_) => true,
        };

        let final_url = self.get_url().await.unwrap_or_else(|_| url.to_string());

        Ok(NavigationResult {
            final_url,
            load_time_ms,
            timed_out,
        })
    }

    async fn execute_js(&self, script: &str) -> RenderResult<serde_json::Value> {
        let result = self.page.evaluate(script).await.map_err(map_cdp_error)?;

        match result.value() {
            Some(value) => Ok(value.clone()),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn get_html(&self) -> RenderResult<String> {
        self.page.content().await.map_err(map_cdp_error)
    }

    async fn get_url(&self) -> RenderResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(map_cdp_error)?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn stop_loading(&self) -> RenderResult<()> {
        self.page
            .execute(StopLoadingParams::default())
            .await
            .map_err(map_cdp_error)?;
        Ok(())
    }

    async fn get_cookies(&self) -> RenderResult<Vec<BrowserCookie>> {
        let cookies = self.page.get_cookies().await.map_err(map_cdp_error)?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: if c.session { None } else { Some(c.expires) },
                secure: c.secure,
                http_only: c.http_only,
                session: c.session,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: Vec<BrowserCookie>) -> RenderResult<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value)
                .domain(cookie.domain)
                .path(cookie.path)
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let (false, Some(expires)) = (cookie.session, cookie.expires) {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            match builder.build() {
                Ok(param) => params.push(param),
                Err(e) => warn!("Skipping cookie {}: {e}", cookie.name),
            }
        }
        if params.is_empty() {
            return Ok(());
        }
        self.page.set_cookies(params).await.map_err(map_cdp_error)?;
        Ok(())
    }

    async fn clear_cookies(&self) -> RenderResult<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(map_cdp_error)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}
