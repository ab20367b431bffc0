//! Browser Controller: owns the single browser connection of a run.
//!
//! Every navigation, script evaluation and cookie operation goes through one
//! `BrowserController`, sequentially. The controller applies the
//! load-completion heuristic (content marker, settle delay, widget stop) and
//! classifies the loaded page before handing it back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BrowserSettings;
use crate::renderer::{
    BrowserCookie, BrowserLauncher, LaunchOptions, RenderContext, RenderError, RenderResult,
    Renderer,
};
use crate::types::{NavigationFailure, ScrapeError, ScrapeResult};
use crate::wait::{pause, wait_until};

/// Trivial expression used to probe a live connection.
pub const HEALTH_PROBE: &str = "1 + 1";

/// Reads the HTTP status of the current document from the Navigation Timing
/// API. Yields `null` when the browser does not expose it.
pub const STATUS_PROBE: &str = "(() => { \
    const entries = performance.getEntriesByType('navigation'); \
    if (entries.length > 0 && typeof entries[0].responseStatus === 'number') { \
        return entries[0].responseStatus; \
    } \
    return null; \
})()";

const NETWORK_ERROR_URLS: [&str; 2] = ["chrome-error://", "chrome://network-error/"];
const CDN_ERROR_HOST: &str = "errors.edgesuite.net";

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Launching,
    Ready,
    Navigating,
    Closed,
}

/// Serialized document returned by a successful navigation.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub final_url: String,
    pub html: String,
    pub status: Option<u16>,
    /// The navigation hit its ceiling and loading was stopped.
    pub timed_out: bool,
    /// A recommendation widget was in the DOM and loading was stopped.
    pub widget_detected: bool,
}

/// Verdict on a loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageHealth {
    Ok,
    /// Retrying will not help (CDN block page, 404, most 4xx).
    Permanent(String),
    /// Worth another attempt after a backoff (network error, 408, 429, 5xx).
    Transient(String),
}

/// Classify a loaded page from its final URL, markup and HTTP status.
pub fn classify_page(final_url: &str, html: &str, status: Option<u16>) -> PageHealth {
    if final_url.contains(CDN_ERROR_HOST)
        || html.contains(CDN_ERROR_HOST)
        || html.contains("Reference #")
    {
        return PageHealth::Permanent("blocked by CDN".to_string());
    }

    if NETWORK_ERROR_URLS.iter().any(|p| final_url.starts_with(p)) {
        return PageHealth::Transient(format!("network error page {final_url}"));
    }

    match status {
        None => PageHealth::Ok,
        Some(0) => PageHealth::Transient("network error (status 0)".to_string()),
        Some(code @ (404 | 410)) => PageHealth::Permanent(format!("HTTP {code}")),
        Some(code @ (408 | 429)) => PageHealth::Transient(format!("HTTP {code}")),
        Some(code) if (400..500).contains(&code) => PageHealth::Permanent(format!("HTTP {code}")),
        Some(code) if code >= 500 => PageHealth::Transient(format!("HTTP {code}")),
        Some(_) => PageHealth::Ok,
    }
}

/// Navigation ceiling and retry budget for one call.
#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    pub timeout: Duration,
    pub retries: u32,
}

/// Quote `s` as a JavaScript string literal.
pub(crate) fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Owns one browser and its automation tab.
pub struct BrowserController {
    launcher: Arc<dyn BrowserLauncher>,
    settings: BrowserSettings,
    state: ControllerState,
    renderer: Option<Box<dyn Renderer>>,
    context: Option<Box<dyn RenderContext>>,
    session_applied: bool,
}

impl BrowserController {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: BrowserSettings) -> Self {
        Self {
            launcher,
            settings,
            state: ControllerState::Uninitialized,
            renderer: None,
            context: None,
            session_applied: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    /// Whether a session was applied since the last (re)launch.
    pub fn session_applied(&self) -> bool {
        self.session_applied
    }

    pub fn mark_session_applied(&mut self, applied: bool) {
        self.session_applied = applied;
    }

    pub fn default_navigate_options(&self) -> NavigateOptions {
        NavigateOptions {
            timeout: self.settings.page_load_timeout(),
            retries: self.settings.navigate_retry_count,
        }
    }

    fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.settings.headless,
            attach_existing: self.settings.attach_existing,
            debugger_address: self.settings.debugger_address.clone(),
            user_agent: self.settings.user_agent.clone(),
            timeout_ms: self.settings.launch_timeout_ms,
        }
    }

    /// Start a browser or attach to the configured debug endpoint.
    pub async fn launch(&mut self) -> ScrapeResult<()> {
        if self.state == ControllerState::Ready {
            return Ok(());
        }
        self.state = ControllerState::Launching;

        let options = self.launch_options();
        let mut renderer = match self.launcher.launch(&options).await {
            Ok(r) => r,
            Err(e) => {
                self.state = ControllerState::Closed;
                return Err(ScrapeError::Launch(e.to_string()));
            }
        };

        let context = match renderer.new_context().await {
            Ok(c) => c,
            Err(e) => {
                let _ = renderer.shutdown().await;
                self.state = ControllerState::Closed;
                return Err(ScrapeError::Launch(format!("cannot open a tab: {e}")));
            }
        };

        self.renderer = Some(renderer);
        self.context = Some(context);
        self.state = ControllerState::Ready;
        info!(
            attach = options.attach_existing,
            headless = options.headless,
            "Browser ready"
        );
        Ok(())
    }

    /// Tear down the current browser and launch a fresh one.
    ///
    /// Any applied session is gone afterwards.
    pub async fn reconnect(&mut self) -> ScrapeResult<()> {
        info!("Restarting browser");
        self.teardown().await;
        self.session_applied = false;
        self.state = ControllerState::Closed;
        pause(self.settings.restart_pause()).await;
        self.launch().await
    }

    /// Release the tab and the browser. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.state == ControllerState::Closed && self.renderer.is_none() {
            return;
        }
        self.teardown().await;
        self.session_applied = false;
        self.state = ControllerState::Closed;
        debug!("Browser closed");
    }

    async fn teardown(&mut self) {
        if let Some(ctx) = self.context.take() {
            if let Err(e) = ctx.close().await {
                debug!("Closing tab failed: {e}");
            }
        }
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = renderer.shutdown().await {
                debug!("Browser shutdown failed: {e}");
            }
        }
    }

    fn active_context(&self) -> ScrapeResult<&dyn RenderContext> {
        match (&self.state, &self.context) {
            (ControllerState::Ready | ControllerState::Navigating, Some(ctx)) => Ok(ctx.as_ref()),
            _ => Err(ScrapeError::Closed),
        }
    }

    fn lost_connection(&mut self, detail: &str) -> ScrapeError {
        warn!("Browser connection lost: {detail}");
        self.state = ControllerState::Closed;
        ScrapeError::Closed
    }

    /// Evaluate a script in the page, bounded by the script timeout.
    pub async fn execute(&mut self, script: &str) -> ScrapeResult<Value> {
        let ceiling = self.settings.script_timeout();
        let result = {
            let ctx = self.active_context()?;
            tokio::time::timeout(ceiling, ctx.execute_js(script)).await
        };
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(RenderError::Disconnected(detail))) => Err(self.lost_connection(&detail)),
            Ok(Err(e)) => Err(ScrapeError::Script(e.to_string())),
            Err(_) => Err(ScrapeError::Script(format!(
                "script timed out after {}ms",
                ceiling.as_millis()
            ))),
        }
    }

    /// Probe the connection with a trivial expression.
    ///
    /// A probe slower than the configured threshold counts as unhealthy.
    pub async fn health_check(&self) -> bool {
        let Ok(ctx) = self.active_context() else {
            return false;
        };

        let start = Instant::now();
        let result =
            tokio::time::timeout(self.settings.health_check_timeout(), ctx.execute_js(HEALTH_PROBE))
                .await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(v)) if v.as_i64() == Some(2) => {
                if elapsed > self.settings.response_slow_threshold() {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "Health probe too slow");
                    false
                } else {
                    true
                }
            }
            Ok(Ok(v)) => {
                warn!("Health probe returned unexpected value: {v}");
                false
            }
            Ok(Err(e)) => {
                warn!("Health probe failed: {e}");
                false
            }
            Err(_) => {
                warn!("Health probe timed out");
                false
            }
        }
    }

    /// Plain navigation without the load heuristic. Used to land on an
    /// origin before touching its storage. Returns the final URL.
    pub async fn visit(&mut self, url: &str, timeout: Duration) -> ScrapeResult<String> {
        let result = match self.context.as_mut() {
            Some(ctx) if self.state == ControllerState::Ready => {
                ctx.navigate(url, timeout.as_millis() as u64).await
            }
            _ => return Err(ScrapeError::Closed),
        };
        match result {
            Ok(nav) => {
                if nav.timed_out {
                    debug!(url, "Visit hit its ceiling; continuing with partial load");
                }
                Ok(nav.final_url)
            }
            Err(RenderError::Disconnected(detail)) => Err(self.lost_connection(&detail)),
            Err(e) => Err(ScrapeError::Navigation {
                kind: NavigationFailure::Page,
                url: url.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    pub async fn get_cookies(&mut self) -> ScrapeResult<Vec<BrowserCookie>> {
        let result = self.active_context()?.get_cookies().await;
        self.map_render(result)
    }

    pub async fn set_cookies(&mut self, cookies: Vec<BrowserCookie>) -> ScrapeResult<()> {
        let result = self.active_context()?.set_cookies(cookies).await;
        self.map_render(result)
    }

    pub async fn clear_cookies(&mut self) -> ScrapeResult<()> {
        let result = self.active_context()?.clear_cookies().await;
        self.map_render(result)
    }

    fn map_render<T>(&mut self, result: RenderResult<T>) -> ScrapeResult<T> {
        match result {
            Ok(v) => Ok(v),
            Err(RenderError::Disconnected(detail)) => Err(self.lost_connection(&detail)),
            Err(e) => Err(ScrapeError::Script(e.to_string())),
        }
    }

    /// Navigate with the configured ceiling and retry budget.
    pub async fn navigate(&mut self, url: &str) -> ScrapeResult<PageSnapshot> {
        let options = self.default_navigate_options();
        self.navigate_with(url, options).await
    }

    /// Navigate and capture the document.
    ///
    /// Transient page errors are retried up to `options.retries` times with
    /// the configured backoff. Permanent page errors fail immediately with
    /// [`NavigationFailure::Page`]. A lost connection fails immediately with
    /// [`NavigationFailure::Unreachable`] and leaves the controller closed.
    pub async fn navigate_with(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> ScrapeResult<PageSnapshot> {
        let attempts = options.retries + 1;
        let mut last_detail = String::new();

        for attempt in 1..=attempts {
            if self.active_context().is_err() {
                return Err(ScrapeError::Navigation {
                    kind: NavigationFailure::Unreachable,
                    url: url.to_string(),
                    detail: "browser is not running".to_string(),
                });
            }

            self.state = ControllerState::Navigating;
            let result = self.load_page(url, options.timeout).await;
            self.state = ControllerState::Ready;

            match result {
                Ok(snapshot) => {
                    match classify_page(&snapshot.final_url, &snapshot.html, snapshot.status) {
                        PageHealth::Ok => return Ok(snapshot),
                        PageHealth::Permanent(detail) => {
                            warn!(url, "Permanent page error: {detail}");
                            return Err(ScrapeError::Navigation {
                                kind: NavigationFailure::Page,
                                url: url.to_string(),
                                detail,
                            });
                        }
                        PageHealth::Transient(detail) => last_detail = detail,
                    }
                }
                Err(RenderError::Disconnected(detail)) => {
                    self.lost_connection(&detail);
                    return Err(ScrapeError::Navigation {
                        kind: NavigationFailure::Unreachable,
                        url: url.to_string(),
                        detail,
                    });
                }
                Err(e) => last_detail = e.to_string(),
            }

            if attempt < attempts {
                warn!(
                    url,
                    attempt,
                    backoff_ms = self.settings.retry_backoff_ms,
                    "Transient navigation failure: {last_detail}; retrying"
                );
                pause(self.settings.retry_backoff()).await;
            }
        }

        Err(ScrapeError::Navigation {
            kind: NavigationFailure::Exhausted,
            url: url.to_string(),
            detail: last_detail,
        })
    }

    /// One navigation plus the load-completion heuristic.
    async fn load_page(&mut self, url: &str, timeout: Duration) -> RenderResult<PageSnapshot> {
        let settings = &self.settings;
        let ctx = self
            .context
            .as_mut()
            .ok_or_else(|| RenderError::Disconnected("no active tab".to_string()))?;

        debug!(url, "Navigating");
        let nav = ctx.navigate(url, timeout.as_millis() as u64).await?;
        let ctx: &dyn RenderContext = ctx.as_ref();

        if nav.timed_out {
            warn!(url, "Page load hit {}ms; stopping and keeping what rendered", timeout.as_millis());
            ctx.stop_loading().await?;
        }

        let marker_script = format!(
            "!!document.querySelector({})",
            js_string(&settings.content_marker)
        );
        let marker_script = marker_script.as_str();
        let marker = wait_until(
            settings.content_marker_wait(),
            settings.poll_interval(),
            move || async move {
                matches!(ctx.execute_js(marker_script).await, Ok(Value::Bool(true)))
            },
        )
        .await;
        if !marker.is_satisfied() {
            debug!(url, "Content marker not seen before ceiling");
        }

        pause(settings.settle_delay()).await;

        let widget_detected = if settings.widget_selectors.is_empty() {
            false
        } else {
            let list = Value::from(settings.widget_selectors.clone()).to_string();
            let script = format!("{list}.some(s => document.querySelector(s) !== null)");
            matches!(ctx.execute_js(&script).await?, Value::Bool(true))
        };
        if widget_detected {
            debug!(url, "Recommendation widget present; stopping further loading");
            ctx.stop_loading().await?;
        }

        let status = ctx
            .execute_js(STATUS_PROBE)
            .await?
            .as_u64()
            .and_then(|s| u16::try_from(s).ok());

        let html = tokio::time::timeout(settings.script_timeout(), ctx.get_html())
            .await
            .map_err(|_| RenderError::Timeout(settings.script_timeout_ms))??;
        let final_url = ctx.get_url().await.unwrap_or_else(|_| nav.final_url.clone());

        debug!(url, bytes = html.len(), ?status, load_ms = nav.load_time_ms, "Captured page");

        Ok(PageSnapshot {
            final_url,
            html,
            status,
            timed_out: nav.timed_out,
            widget_detected,
        })
    }
}
