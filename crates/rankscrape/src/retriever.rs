//! Page Retriever: one `(entity, page type)` from URL to stored document.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::browser::{BrowserController, NavigateOptions};
use crate::config::{RetrieverSettings, SessionSettings};
use crate::session::{apply_with_retry, SessionState};
use crate::store::{content_digest, DocumentStore};
use crate::types::{CapturedDocument, Entity, PageType, RetrievalResult, ScrapeResult};

/// Appended where the markup was cut before a recommendation widget.
pub const TRUNCATION_NOTE: &str = "\n<!-- Truncated before recommendations widget -->\n";

fn canonical_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<link[^>]+rel="canonical"[^>]+href="([^"]+)""#)
            .expect("canonical link regex is valid")
    })
}

/// `{base_host}/{prefix}/{slug}-{id}` plus `/{suffix}` for sub-pages.
pub fn build_url(base_host: &str, path_prefix: &str, entity: &Entity, page_type: PageType) -> String {
    let mut url = format!(
        "{}/{}/{}",
        base_host.trim_end_matches('/'),
        path_prefix.trim_matches('/'),
        entity.profile_segment()
    );
    if page_type != PageType::Main {
        url.push('/');
        url.push_str(page_type.suffix());
    }
    url
}

/// Cut `html` at the earliest widget marker and append [`TRUNCATION_NOTE`].
/// Markup without a marker, or with one at offset zero, is returned as is.
pub fn truncate_at_widget(html: &str, markers: &[String]) -> String {
    let cut = markers
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| html.find(m.as_str()))
        .min();
    match cut {
        Some(idx) if idx > 0 => format!("{}{}", &html[..idx], TRUNCATION_NOTE),
        _ => html.to_string(),
    }
}

fn last_segment(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    path.split('/')
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Whether a sub-page request landed on a different page, usually the
/// entity's main profile. Checks the final URL and the canonical link.
pub fn redirected_away(final_url: &str, html: &str, page_type: PageType) -> bool {
    if page_type == PageType::Main {
        return false;
    }
    let expected = page_type.suffix();

    if !final_url.is_empty() && last_segment(final_url).as_deref() != Some(expected) {
        return true;
    }
    if let Some(caps) = canonical_pattern().captures(html) {
        if last_segment(&caps[1]).as_deref() != Some(expected) {
            return true;
        }
    }
    false
}

/// Retrieves pages through a controller it does not own and stores them.
pub struct PageRetriever {
    store: DocumentStore,
    settings: RetrieverSettings,
    session_settings: SessionSettings,
}

impl PageRetriever {
    pub fn new(
        store: DocumentStore,
        settings: RetrieverSettings,
        session_settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            settings,
            session_settings,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn url_for(&self, entity: &Entity, page_type: PageType) -> String {
        build_url(
            &self.settings.base_host,
            &self.settings.path_prefix,
            entity,
            page_type,
        )
    }

    fn navigate_options(&self, controller: &BrowserController, page_type: PageType) -> NavigateOptions {
        let mut options = controller.default_navigate_options();
        if let Some(ov) = self.settings.page_overrides.get(&page_type) {
            if let Some(ms) = ov.timeout_ms {
                options.timeout = Duration::from_millis(ms);
            }
            if let Some(retries) = ov.retries {
                options.retries = retries;
            }
        }
        options
    }

    /// Retrieve one page.
    ///
    /// Page-level problems come back as `Ok` with a `failed` outcome. Only a
    /// lost browser connection is returned as `Err`, so the caller can decide
    /// whether to reconnect.
    pub async fn retrieve(
        &self,
        controller: &mut BrowserController,
        entity: &Entity,
        page_type: PageType,
        session: Option<&SessionState>,
    ) -> ScrapeResult<RetrievalResult> {
        let url = self.url_for(entity, page_type);

        if let Some(state) = session {
            if !controller.session_applied() {
                apply_with_retry(controller, state, &self.session_settings).await;
            }
        }

        let options = self.navigate_options(controller, page_type);
        let mut short_retry_left = 1;
        let mut redirect_retry_left = 1;

        info!(entity = %entity.name, page = %page_type, "Retrieving {url}");

        let markup = loop {
            let snapshot = match controller.navigate_with(&url, options).await {
                Ok(s) => s,
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    warn!(entity = %entity.name, page = %page_type, "Navigation failed: {e}");
                    return Ok(RetrievalResult::failed(entity, page_type, e.to_string()));
                }
            };

            debug!(
                page = %page_type,
                timed_out = snapshot.timed_out,
                widget = snapshot.widget_detected,
                "Page loaded"
            );

            let markup = if self.settings.truncate_at_widget {
                truncate_at_widget(&snapshot.html, &self.settings.widget_markers)
            } else {
                snapshot.html.clone()
            };

            if markup.len() < self.settings.min_document_len {
                if short_retry_left > 0 {
                    short_retry_left -= 1;
                    warn!(
                        page = %page_type,
                        bytes = markup.len(),
                        "Document below minimum length; retrying once"
                    );
                    continue;
                }
                return Ok(RetrievalResult::failed(
                    entity,
                    page_type,
                    format!(
                        "document too short ({} < {} bytes)",
                        markup.len(),
                        self.settings.min_document_len
                    ),
                ));
            }

            if redirected_away(&snapshot.final_url, &snapshot.html, page_type) {
                if redirect_retry_left > 0 {
                    redirect_retry_left -= 1;
                    info!(page = %page_type, "Redirect detected; re-applying session and retrying");
                    if let Some(state) = session {
                        apply_with_retry(controller, state, &self.session_settings).await;
                    }
                    continue;
                }
                info!(page = %page_type, "Still redirected; not saving a copy of another page");
                return Ok(RetrievalResult::duplicate(
                    entity,
                    page_type,
                    Some("redirected".to_string()),
                ));
            }

            break markup;
        };

        let digest = content_digest(&markup);
        let previous = self
            .store
            .lookup_digest(entity, page_type)
            .unwrap_or_else(|e| {
                warn!(page = %page_type, "Cannot read stored digest, treating as new: {e}");
                None
            });
        if previous.as_deref() == Some(digest.as_str()) {
            debug!(entity = %entity.name, page = %page_type, "Unchanged content");
            return Ok(RetrievalResult::duplicate(entity, page_type, None));
        }
        if let Some(other) = self.store.page_with_digest(entity, &digest, page_type) {
            info!(entity = %entity.name, page = %page_type, "Same content as {other}; not saving");
            return Ok(RetrievalResult::duplicate(
                entity,
                page_type,
                Some(format!("same as {other}")),
            ));
        }

        let document = CapturedDocument {
            entity_id: entity.numeric_id.clone(),
            page_type,
            content_digest: digest,
            captured_at: chrono::Utc::now(),
            raw_markup: markup,
        };
        match self.store.save(entity, &document) {
            Ok(path) => {
                info!(
                    entity = %entity.name,
                    page = %page_type,
                    bytes = document.raw_markup.len(),
                    "Saved {}",
                    path.display()
                );
                Ok(RetrievalResult::saved(
                    entity,
                    page_type,
                    document.raw_markup.len(),
                ))
            }
            Err(e) => {
                warn!(entity = %entity.name, page = %page_type, "Save failed: {e}");
                Ok(RetrievalResult::failed(entity, page_type, e.to_string()))
            }
        }
    }
}
