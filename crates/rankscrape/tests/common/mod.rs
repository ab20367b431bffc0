//! Scripted in-memory browser for driving the controller without Chromium.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use rankscrape::browser::{BrowserController, HEALTH_PROBE, STATUS_PROBE};
use rankscrape::config::ScraperConfig;
use rankscrape::renderer::{
    BrowserCookie, BrowserLauncher, LaunchOptions, NavigationResult, RenderContext, RenderError,
    RenderResult, Renderer,
};
use rankscrape::session::{STORAGE_CLEAR_SCRIPT, STORAGE_DUMP_SCRIPT};

// ─────────────────────── fake pages ───────────────────────

#[derive(Debug, Clone)]
pub struct FakePage {
    pub html: String,
    /// Where the browser ends up; `None` means the requested URL.
    pub final_url: Option<String>,
    pub status: Option<u16>,
}

impl FakePage {
    pub fn ok(html: String) -> Self {
        Self {
            html,
            final_url: None,
            status: Some(200),
        }
    }

    pub fn redirect(html: String, to: &str) -> Self {
        Self {
            html,
            final_url: Some(to.to_string()),
            status: Some(200),
        }
    }

    pub fn status(html: String, status: u16) -> Self {
        Self {
            html,
            final_url: None,
            status: Some(status),
        }
    }
}

/// Rendered markup comfortably above the minimum document length.
pub fn profile_html(title: &str) -> String {
    let filler = "<p>Lorem ipsum dolor sit amet, consectetur adipiscing elit.</p>\n".repeat(30);
    format!("<html><head><title>{title}</title></head><body><main>{filler}</main></body></html>")
}

// ─────────────────────── shared state ───────────────────────

#[derive(Debug, Default)]
pub struct FakeState {
    pub pages: HashMap<String, FakePage>,
    /// Every URL passed to `navigate`, in order.
    pub navigations: Vec<String>,
    pub launches: usize,
    /// Remaining launches that fail.
    pub failing_launches: usize,
    /// Navigating here drops the connection once.
    pub disconnect_on: Option<String>,
    /// Launch failures armed when the disconnect fires.
    pub failures_after_disconnect: usize,
    pub dead: bool,
    pub current_url: String,
    pub current: Option<FakePage>,
    /// Every navigation reports that it hit its ceiling.
    pub nav_timeout: bool,
    /// The content marker never appears.
    pub marker_missing: bool,
    /// A recommendation widget is in the DOM.
    pub widget_present: bool,
    /// How long the health probe takes to answer.
    pub probe_delay: Option<Duration>,
    pub stop_loading_calls: usize,
    /// Cookies the browser holds, unique by (domain, path, name).
    pub cookies: Vec<BrowserCookie>,
    pub local_storage: HashMap<String, String>,
    pub session_storage: HashMap<String, String>,
    pub storage_writes: usize,
    pub storage_clears: usize,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, page: FakePage) -> Self {
        self.state.lock().unwrap().pages.insert(url.to_string(), page);
        self
    }

    pub fn set_page(&self, url: &str, page: FakePage) {
        self.state.lock().unwrap().pages.insert(url.to_string(), page);
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn navigation_count(&self, url: &str) -> usize {
        self.navigations().iter().filter(|u| *u == url).count()
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches
    }

    pub fn stop_loading_calls(&self) -> usize {
        self.state.lock().unwrap().stop_loading_calls
    }

    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::new(FakeLauncher {
            state: self.state.clone(),
        })
    }

    pub fn controller(&self, config: &ScraperConfig) -> BrowserController {
        BrowserController::new(self.launcher(), config.browser.clone())
    }
}

// ─────────────────────── trait impls ───────────────────────

struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> RenderResult<Box<dyn Renderer>> {
        let mut state = self.state.lock().unwrap();
        if state.failing_launches > 0 {
            state.failing_launches -= 1;
            return Err(RenderError::Launch("scripted launch failure".to_string()));
        }
        state.launches += 1;
        state.dead = false;
        Ok(Box::new(FakeRenderer {
            state: self.state.clone(),
        }))
    }
}

struct FakeRenderer {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> RenderResult<Box<dyn RenderContext>> {
        Ok(Box::new(FakeContext {
            state: self.state.clone(),
        }))
    }

    async fn shutdown(&mut self) -> RenderResult<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        1
    }
}

struct FakeContext {
    state: Arc<Mutex<FakeState>>,
}

impl FakeContext {
    fn alive(&self) -> RenderResult<std::sync::MutexGuard<'_, FakeState>> {
        let state = self.state.lock().unwrap();
        if state.dead {
            return Err(RenderError::Disconnected("connection reset".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> RenderResult<NavigationResult> {
        let mut state = self.alive()?;
        state.navigations.push(url.to_string());

        if state.disconnect_on.as_deref() == Some(url) {
            state.disconnect_on = None;
            state.dead = true;
            state.failing_launches = state.failures_after_disconnect;
            return Err(RenderError::Disconnected("target crashed".to_string()));
        }

        let page = state.pages.get(url).cloned().unwrap_or(FakePage {
            html: "<html><body></body></html>".to_string(),
            final_url: None,
            status: None,
        });
        let final_url = page.final_url.clone().unwrap_or_else(|| url.to_string());
        state.current_url = final_url.clone();
        state.current = Some(page);

        Ok(NavigationResult {
            final_url,
            load_time_ms: 5,
            timed_out: state.nav_timeout,
        })
    }

    async fn execute_js(&self, script: &str) -> RenderResult<Value> {
        if script == HEALTH_PROBE {
            let delay = self.alive()?.probe_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            return Ok(json!(2));
        }

        let mut state = self.alive()?;
        let value = if script == STATUS_PROBE {
            state
                .current
                .as_ref()
                .and_then(|p| p.status)
                .map(Value::from)
                .unwrap_or(Value::Null)
        } else if script == STORAGE_DUMP_SCRIPT {
            json!({
                "local": state.local_storage.clone(),
                "session": state.session_storage.clone(),
            })
        } else if script == STORAGE_CLEAR_SCRIPT {
            state.storage_clears += 1;
            state.local_storage.clear();
            state.session_storage.clear();
            json!(true)
        } else if script.starts_with("!!document.querySelector") {
            json!(!state.marker_missing)
        } else if script.contains("document.querySelector(s)") {
            json!(state.widget_present)
        } else if script.contains("setItem") {
            state.storage_writes += 1;
            let entries = storage_entries(script);
            let count = entries.len();
            if script.contains("window.sessionStorage") {
                state.session_storage.extend(entries);
            } else {
                state.local_storage.extend(entries);
            }
            json!(count)
        } else {
            Value::Null
        };
        Ok(value)
    }

    async fn get_html(&self) -> RenderResult<String> {
        let state = self.alive()?;
        Ok(state
            .current
            .as_ref()
            .map(|p| p.html.clone())
            .unwrap_or_default())
    }

    async fn get_url(&self) -> RenderResult<String> {
        Ok(self.alive()?.current_url.clone())
    }

    async fn stop_loading(&self) -> RenderResult<()> {
        self.alive()?.stop_loading_calls += 1;
        Ok(())
    }

    async fn get_cookies(&self) -> RenderResult<Vec<BrowserCookie>> {
        Ok(self.alive()?.cookies.clone())
    }

    async fn set_cookies(&self, cookies: Vec<BrowserCookie>) -> RenderResult<()> {
        let mut state = self.alive()?;
        for cookie in cookies {
            state.cookies.retain(|c| {
                (&c.domain, &c.path, &c.name) != (&cookie.domain, &cookie.path, &cookie.name)
            });
            state.cookies.push(cookie);
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> RenderResult<()> {
        self.alive()?.cookies.clear();
        Ok(())
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        Ok(())
    }
}

/// The JSON object a storage write script carries.
fn storage_entries(script: &str) -> HashMap<String, String> {
    let Some(start) = script.find("const entries = ") else {
        return HashMap::new();
    };
    let rest = &script[start + "const entries = ".len()..];
    let end = rest.find("; for (").unwrap_or(rest.len());
    serde_json::from_str(&rest[..end]).unwrap_or_default()
}

// ─────────────────────── fixtures ───────────────────────

pub const DATASET: &str = r#"[
    {"name": "Princeton University", "link": "/best-colleges/princeton-university-2627"},
    {"name": "Harvard University", "link": "https://www.usnews.com/best-colleges/harvard-university-2155"},
    {"name": "Yale University", "slug": "yale-university", "numeric_id": 1426}
]"#;

pub const BASE: &str = "https://premium.usnews.com/best-colleges";

pub fn test_config() -> ScraperConfig {
    ScraperConfig::without_delays()
}

pub fn cookie(name: &str, domain: &str) -> BrowserCookie {
    BrowserCookie {
        name: name.to_string(),
        value: format!("{name}-value"),
        domain: domain.to_string(),
        path: "/".to_string(),
        expires: None,
        secure: true,
        http_only: true,
        session: true,
    }
}
