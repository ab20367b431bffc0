//! Configuration loading and resolution.
//!
//! All timings of the load-completion heuristic live here. They are tuned
//! against the live site and are expected to change without code changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{PageType, ScrapeError, ScrapeResult};

/// Default remote-debugging endpoint of a user-launched Chrome.
pub const DEFAULT_DEBUGGER_ADDRESS: &str = "127.0.0.1:9222";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub browser: BrowserSettings,
    pub session: SessionSettings,
    pub retriever: RetrieverSettings,
    pub orchestrator: OrchestratorSettings,
}

/// Browser Controller timings and launch options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Attach to a browser already listening on `debugger_address`.
    pub attach_existing: bool,
    pub debugger_address: String,
    pub launch_timeout_ms: u64,
    /// Ceiling for the navigation request itself. Hitting it is not fatal:
    /// loading is stopped and whatever rendered so far is captured.
    pub page_load_timeout_ms: u64,
    /// CSS selector whose presence means the primary content rendered.
    pub content_marker: String,
    pub content_marker_wait_ms: u64,
    pub poll_interval_ms: u64,
    /// Fixed delay after the content marker appears.
    pub settle_delay_ms: u64,
    pub script_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
    /// A health probe slower than this is treated as a dead browser.
    pub response_slow_threshold_ms: u64,
    pub navigate_retry_count: u32,
    pub retry_backoff_ms: u64,
    pub restart_pause_ms: u64,
    pub user_agent: String,
    /// Selectors of recommendation widgets; once one is in the DOM further
    /// passive loading is stopped.
    pub widget_selectors: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            attach_existing: false,
            debugger_address: DEFAULT_DEBUGGER_ADDRESS.to_string(),
            launch_timeout_ms: 30_000,
            page_load_timeout_ms: 20_000,
            content_marker: "main, #app, body".to_string(),
            content_marker_wait_ms: 10_000,
            poll_interval_ms: 250,
            settle_delay_ms: 4_000,
            script_timeout_ms: 20_000,
            health_check_timeout_ms: 10_000,
            response_slow_threshold_ms: 10_000,
            navigate_retry_count: 1,
            retry_backoff_ms: 60_000,
            restart_pause_ms: 2_000,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/121.0.0.0 Safari/537.36"
                .to_string(),
            widget_selectors: vec![
                "#blueshift-recommendations-widget".to_string(),
                "#null-recommendations-widget".to_string(),
                "[class*='SailthruRecommend__Container']".to_string(),
            ],
        }
    }
}

impl BrowserSettings {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }
    pub fn content_marker_wait(&self) -> Duration {
        Duration::from_millis(self.content_marker_wait_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
    pub fn response_slow_threshold(&self) -> Duration {
        Duration::from_millis(self.response_slow_threshold_ms)
    }
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }
}

/// Session transplant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capture a logged-in session from the browser on `source_address`.
    pub transplant: bool,
    pub source_address: String,
    /// HTTPS origins whose cookies and storage may be transplanted.
    pub trusted_origins: Vec<String>,
    pub origin_nav_timeout_ms: u64,
    /// Pause after landing on an origin before reading or writing storage.
    pub origin_settle_ms: u64,
    pub apply_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            transplant: false,
            source_address: DEFAULT_DEBUGGER_ADDRESS.to_string(),
            trusted_origins: vec![
                "https://www.usnews.com".to_string(),
                "https://premium.usnews.com".to_string(),
            ],
            origin_nav_timeout_ms: 30_000,
            origin_settle_ms: 1_000,
            apply_attempts: 3,
        }
    }
}

impl SessionSettings {
    pub fn origin_nav_timeout(&self) -> Duration {
        Duration::from_millis(self.origin_nav_timeout_ms)
    }
    pub fn origin_settle(&self) -> Duration {
        Duration::from_millis(self.origin_settle_ms)
    }
}

/// Per page-type navigation overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageOverride {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
}

/// Page Retriever settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverSettings {
    pub base_host: String,
    /// Path prefix between host and profile segment.
    pub path_prefix: String,
    pub downloads_dir: PathBuf,
    /// Captures shorter than this are treated as failed loads.
    pub min_document_len: usize,
    pub truncate_at_widget: bool,
    /// Literal markers searched in captured markup; the earliest hit is the
    /// truncation point.
    pub widget_markers: Vec<String>,
    pub page_overrides: HashMap<PageType, PageOverride>,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            base_host: "https://premium.usnews.com".to_string(),
            path_prefix: "best-colleges".to_string(),
            downloads_dir: PathBuf::from("downloads"),
            min_document_len: 1_024,
            truncate_at_widget: true,
            widget_markers: vec![
                "<div id=\"blueshift-recommendations-widget\"".to_string(),
                "id=\"blueshift-recommendations-widget\"".to_string(),
                "blueshift-recommendations-widget".to_string(),
                "<div id=\"null-recommendations-widget\"".to_string(),
                "id=\"null-recommendations-widget\"".to_string(),
                "null-recommendations-widget".to_string(),
                "SailthruRecommend__Container".to_string(),
            ],
            page_overrides: HashMap::new(),
        }
    }
}

/// Retrieval Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Delay after a page was saved.
    pub wait_success_ms: u64,
    /// Delay after a page was skipped or failed.
    pub wait_skip_ms: u64,
    /// Log a progress summary every N entities.
    pub progress_every: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            wait_success_ms: 10_000,
            wait_skip_ms: 2_000,
            progress_every: 10,
        }
    }
}

impl OrchestratorSettings {
    pub fn wait_success(&self) -> Duration {
        Duration::from_millis(self.wait_success_ms)
    }
    pub fn wait_skip(&self) -> Duration {
        Duration::from_millis(self.wait_skip_ms)
    }
}

impl ScraperConfig {
    /// Load a config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> ScrapeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScrapeError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ScrapeError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Resolve and load the effective config, then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> ScrapeResult<Self> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => {
                tracing::info!("Loading config: {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        if let Ok(addr) = std::env::var("RANKSCRAPE_DEBUGGER_ADDR") {
            config.browser.debugger_address = addr.clone();
            config.session.source_address = addr;
        }
        Ok(config)
    }

    /// A config with every wait collapsed to zero, for offline runs.
    pub fn without_delays() -> Self {
        let mut config = Self::default();
        let b = &mut config.browser;
        b.content_marker_wait_ms = 0;
        b.settle_delay_ms = 0;
        b.retry_backoff_ms = 0;
        b.restart_pause_ms = 0;
        b.poll_interval_ms = 1;
        config.session.origin_settle_ms = 0;
        config.orchestrator.wait_success_ms = 0;
        config.orchestrator.wait_skip_ms = 0;
        config
    }
}

/// Resolve the config file path: explicit, env, then `./rankscrape.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("RANKSCRAPE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from("rankscrape.json");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

/// Resolve the dataset path: explicit, env, then `data/universities.json`.
pub fn resolve_dataset_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("RANKSCRAPE_DATASET") {
        return PathBuf::from(env_path);
    }

    PathBuf::from("data/universities.json")
}
