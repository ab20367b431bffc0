//! Renderer abstraction for the controlled browser.
//!
//! Defines the `BrowserLauncher`, `Renderer` and `RenderContext` traits that
//! abstract over the browser engine (currently Chromium via chromiumoxide).
//! The controller only ever talks to these traits, which keeps it testable
//! without a real browser.

pub mod chromium;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by a renderer implementation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RenderError {
    /// The connection to the browser is gone.
    #[error("browser disconnected: {0}")]
    Disconnected(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The page failed to load.
    #[error("page error: {0}")]
    Page(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("launch failed: {0}")]
    Launch(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The URL the tab ended on.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
    /// The load did not finish before the ceiling. The tab keeps whatever
    /// rendered so far.
    pub timed_out: bool,
}

/// A cookie as read from or written to a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the epoch. Ignored for session cookies.
    pub expires: Option<f64>,
    pub secure: bool,
    pub http_only: bool,
    pub session: bool,
}

/// How to obtain a browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Attach to `debugger_address` instead of starting a process.
    pub attach_existing: bool,
    pub debugger_address: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

/// Something that can produce a running browser.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> RenderResult<Box<dyn Renderer>>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> RenderResult<Box<dyn RenderContext>>;
    /// Shut down the browser engine. Attached browsers stay alive.
    async fn shutdown(&mut self) -> RenderResult<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL. Reaching `timeout_ms` is reported through
    /// [`NavigationResult::timed_out`], not as an error.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> RenderResult<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> RenderResult<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> RenderResult<String>;
    /// Get the current URL.
    async fn get_url(&self) -> RenderResult<String>;
    /// Stop any further loading of the current document.
    async fn stop_loading(&self) -> RenderResult<()>;
    /// Cookies visible to the current page.
    async fn get_cookies(&self) -> RenderResult<Vec<BrowserCookie>>;
    async fn set_cookies(&self, cookies: Vec<BrowserCookie>) -> RenderResult<()>;
    /// Delete every cookie in the browser.
    async fn clear_cookies(&self) -> RenderResult<()>;
    /// Close this context.
    async fn close(self: Box<Self>) -> RenderResult<()>;
}

/// A launcher used when no browser is available.
///
/// Every launch fails, so a run degrades into all pages `failed` instead of
/// aborting.
pub struct NoopLauncher;

#[async_trait]
impl BrowserLauncher for NoopLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> RenderResult<Box<dyn Renderer>> {
        Err(RenderError::Launch("browser not available".to_string()))
    }
}
