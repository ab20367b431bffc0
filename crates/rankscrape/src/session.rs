//! Session transplant: copy a logged-in session from a user's browser into
//! the controlled one.
//!
//! A `SessionState` lives in memory only. It is captured once per run and
//! applied, never mutated, into the controlled browser.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::browser::BrowserController;
use crate::config::{BrowserSettings, SessionSettings};
use crate::renderer::{BrowserCookie, BrowserLauncher};
use crate::types::ScrapeResult;
use crate::wait::pause;

/// Reads every local and session storage entry of the current origin.
pub const STORAGE_DUMP_SCRIPT: &str = "(() => { \
    const dump = (s) => { const out = {}; \
        for (let i = 0; i < s.length; i++) { const k = s.key(i); out[k] = s.getItem(k); } \
        return out; }; \
    return { local: dump(window.localStorage), session: dump(window.sessionStorage) }; \
})()";

/// Wipes local and session storage of the current origin.
pub const STORAGE_CLEAR_SCRIPT: &str =
    "(() => { window.localStorage.clear(); window.sessionStorage.clear(); return true; })()";

/// Cookies and storage captured for one origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginSnapshot {
    pub origin: String,
    /// Keyed by cookie name; a later capture of the same name wins.
    pub cookies: BTreeMap<String, BrowserCookie>,
    pub local_storage: BTreeMap<String, String>,
    pub session_storage: BTreeMap<String, String>,
}

impl OriginSnapshot {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty() && self.session_storage.is_empty()
    }
}

/// Authenticated session state, one snapshot per trusted origin in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub origins: Vec<OriginSnapshot>,
}

impl SessionState {
    /// A state with an empty snapshot for every origin.
    pub fn empty(origins: &[String]) -> Self {
        Self {
            origins: dedup_origins(origins)
                .iter()
                .map(|o| OriginSnapshot::new(o))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.origins.iter().all(OriginSnapshot::is_empty)
    }

    pub fn cookie_count(&self) -> usize {
        self.origins.iter().map(|o| o.cookies.len()).sum()
    }

    pub fn storage_count(&self) -> usize {
        self.origins
            .iter()
            .map(|o| o.local_storage.len() + o.session_storage.len())
            .sum()
    }
}

/// Normalize and deduplicate origins, keeping first-seen order.
pub fn dedup_origins(origins: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(origins.len());
    for origin in origins {
        let normalized = origin.trim().trim_end_matches('/').to_string();
        if !normalized.is_empty() && !seen.contains(&normalized) {
            seen.push(normalized);
        }
    }
    seen
}

/// Whether a cookie for `domain` may be written while on `origin`.
///
/// The leading dot is ignored; the origin host must equal the domain or be a
/// subdomain of it.
pub fn cookie_matches_origin(domain: &str, origin: &str) -> bool {
    let Some(host) = url::Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
    else {
        return false;
    };
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Capture cookies and storage for each trusted origin from `source`.
///
/// Failures are per origin: an unreachable origin yields an empty snapshot
/// and capture moves on.
pub async fn capture(
    source: &mut BrowserController,
    origins: &[String],
    settings: &SessionSettings,
) -> SessionState {
    let mut state = SessionState::default();

    for origin in dedup_origins(origins) {
        let mut snapshot = OriginSnapshot::new(&origin);

        if let Err(e) = source.visit(&origin, settings.origin_nav_timeout()).await {
            warn!(origin, "Session capture skipped origin: {e}");
            state.origins.push(snapshot);
            continue;
        }
        pause(settings.origin_settle()).await;

        match source.get_cookies().await {
            Ok(cookies) => {
                for cookie in cookies {
                    snapshot.cookies.insert(cookie.name.clone(), cookie);
                }
            }
            Err(e) => warn!(origin, "Reading cookies failed: {e}"),
        }

        match source.execute(STORAGE_DUMP_SCRIPT).await {
            Ok(value) => {
                snapshot.local_storage = string_map(value.get("local"));
                snapshot.session_storage = string_map(value.get("session"));
            }
            Err(e) => warn!(origin, "Reading storage failed: {e}"),
        }

        info!(
            origin,
            cookies = snapshot.cookies.len(),
            local = snapshot.local_storage.len(),
            session = snapshot.session_storage.len(),
            "Captured origin"
        );
        state.origins.push(snapshot);
    }

    state
}

/// Attach to the source browser at `settings.source_address` and capture.
///
/// An unreachable endpoint is not an error: the result is an empty
/// snapshot for every origin and the run continues without a session.
pub async fn capture_from_endpoint(
    launcher: Arc<dyn BrowserLauncher>,
    browser_settings: &BrowserSettings,
    settings: &SessionSettings,
) -> SessionState {
    let mut source_settings = browser_settings.clone();
    source_settings.attach_existing = true;
    source_settings.debugger_address = settings.source_address.clone();

    let mut source = BrowserController::new(launcher, source_settings);
    if let Err(e) = source.launch().await {
        warn!(
            endpoint = %settings.source_address,
            "Source browser unreachable, continuing without session: {e}"
        );
        return SessionState::empty(&settings.trusted_origins);
    }

    let state = capture(&mut source, &settings.trusted_origins, settings).await;
    source.close().await;
    state
}

fn storage_script(storage: &str, entries: &BTreeMap<String, String>) -> String {
    let payload = serde_json::to_string(entries).unwrap_or_else(|_| "{}".to_string());
    format!(
        "(() => {{ const entries = {payload}; \
         for (const [k, v] of Object.entries(entries)) {{ window.{storage}.setItem(k, v); }} \
         return Object.keys(entries).length; }})()"
    )
}

/// Write `state` into the controlled browser once.
pub async fn apply(
    controller: &mut BrowserController,
    state: &SessionState,
    settings: &SessionSettings,
) -> ScrapeResult<()> {
    for snapshot in &state.origins {
        if snapshot.is_empty() {
            continue;
        }

        controller
            .visit(&snapshot.origin, settings.origin_nav_timeout())
            .await?;
        pause(settings.origin_settle()).await;

        let cookies: Vec<BrowserCookie> = snapshot
            .cookies
            .values()
            .filter(|c| cookie_matches_origin(&c.domain, &snapshot.origin))
            .cloned()
            .collect();
        let skipped = snapshot.cookies.len() - cookies.len();
        if skipped > 0 {
            debug!(origin = %snapshot.origin, skipped, "Skipped cookies for foreign domains");
        }
        controller.set_cookies(cookies).await?;

        if !snapshot.local_storage.is_empty() {
            controller
                .execute(&storage_script("localStorage", &snapshot.local_storage))
                .await?;
        }
        if !snapshot.session_storage.is_empty() {
            controller
                .execute(&storage_script("sessionStorage", &snapshot.session_storage))
                .await?;
        }
        debug!(origin = %snapshot.origin, "Applied session");
    }
    Ok(())
}

/// Apply with up to `apply_attempts` tries, restarting the browser between
/// them. Returns whether the session is in place.
///
/// Either way the controller is marked as handled, so the run proceeds
/// without a session instead of retrying on every page.
pub async fn apply_with_retry(
    controller: &mut BrowserController,
    state: &SessionState,
    settings: &SessionSettings,
) -> bool {
    if state.is_empty() {
        controller.mark_session_applied(true);
        return false;
    }

    let attempts = settings.apply_attempts.max(1);
    for attempt in 1..=attempts {
        match apply(controller, state, settings).await {
            Ok(()) => {
                info!(
                    cookies = state.cookie_count(),
                    storage = state.storage_count(),
                    "Session applied"
                );
                controller.mark_session_applied(true);
                return true;
            }
            Err(e) => {
                warn!(attempt, attempts, "Session apply failed: {e}");
                if attempt < attempts {
                    if let Err(e) = controller.reconnect().await {
                        warn!("Restart after failed session apply failed: {e}");
                    }
                }
            }
        }
    }

    warn!("Proceeding without session");
    controller.mark_session_applied(true);
    false
}

/// Remove cookies and storage left behind by the previous entity.
pub async fn clear_browser_data(controller: &mut BrowserController) -> ScrapeResult<()> {
    controller.clear_cookies().await?;
    controller.execute(STORAGE_CLEAR_SCRIPT).await?;
    debug!("Cleared browser data");
    Ok(())
}
