//! Retrieval Orchestrator: drives entities and page types through one
//! controller, sequentially, and aggregates a [`RunReport`].
//!
//! One entity's failure never aborts the run. Cancellation is checked
//! between entities only; a page in progress always finishes first.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserController, ControllerState};
use crate::config::OrchestratorSettings;
use crate::retriever::PageRetriever;
use crate::session::{clear_browser_data, SessionState};
use crate::types::{Entity, Outcome, PageType, RetrievalResult, RunReport};
use crate::wait::pause;

/// Which of the given entities to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Only the first entity.
    Single,
    All,
}

pub struct Orchestrator {
    controller: BrowserController,
    retriever: PageRetriever,
    settings: OrchestratorSettings,
    session: Option<SessionState>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        controller: BrowserController,
        retriever: PageRetriever,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            controller,
            retriever,
            settings,
            session: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Apply `session` before each entity's first navigation.
    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run before the next entity.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn controller(&self) -> &BrowserController {
        &self.controller
    }

    /// Release the browser.
    pub async fn shutdown(&mut self) {
        self.controller.close().await;
    }

    /// Retrieve `page_types` for `entities` and return aggregated counters.
    pub async fn run(
        &mut self,
        entities: &[Entity],
        page_types: &[PageType],
        mode: RunMode,
    ) -> RunReport {
        let page_types = PageType::canonical_order(page_types);
        let targets = match mode {
            RunMode::Single => &entities[..entities.len().min(1)],
            RunMode::All => entities,
        };
        let total = targets.len();
        let mut report = RunReport::default();

        info!(entities = total, pages = page_types.len(), ?mode, "Starting run");

        for (i, entity) in targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(processed = i, total, "Stop requested; returning partial results");
                report.interrupted = true;
                break;
            }

            info!("[{}/{}] {}", i + 1, total, entity.name);
            report.entities_attempted += 1;
            self.run_entity(entity, &page_types, &mut report).await;

            let every = self.settings.progress_every;
            if every > 0 && (i + 1) % every == 0 && i + 1 < total {
                log_progress(i + 1, total, &report);
            }
        }

        log_progress(report.entities_attempted, total, &report);
        report
    }

    async fn run_entity(&mut self, entity: &Entity, page_types: &[PageType], report: &mut RunReport) {
        if self.retriever.store().is_complete(entity, page_types) {
            info!(entity = %entity.name, "All pages already stored; skipping");
            for &page_type in page_types {
                report.record(RetrievalResult::already_complete(entity, page_type));
            }
            return;
        }

        if !self.ensure_browser().await {
            warn!(entity = %entity.name, "No working browser; marking entity failed");
            for &page_type in page_types {
                report.record(RetrievalResult::failed(entity, page_type, "browser unavailable"));
            }
            return;
        }

        if self.session.is_some() {
            self.controller.mark_session_applied(false);
        }

        for (idx, &page_type) in page_types.iter().enumerate() {
            let result = match self.retrieve(entity, page_type).await {
                Ok(result) => result,
                Err(detail) => {
                    warn!(
                        entity = %entity.name,
                        page = %page_type,
                        "Browser lost and could not be recovered; abandoning entity"
                    );
                    for &remaining in &page_types[idx..] {
                        report.record(RetrievalResult::failed(entity, remaining, detail.clone()));
                    }
                    return;
                }
            };

            let delay = if result.outcome == Outcome::Saved {
                self.settings.wait_success()
            } else {
                self.settings.wait_skip()
            };
            report.record(result);

            if idx + 1 < page_types.len() {
                pause(delay).await;
            }
        }

        if !self.controller.settings().attach_existing {
            if let Err(e) = clear_browser_data(&mut self.controller).await {
                debug!("Clearing browser data failed: {e}");
            }
        }
    }

    /// Retrieve one page. A lost connection gets one recovery and one
    /// retry; `Err` means the browser is gone for this entity.
    async fn retrieve(&mut self, entity: &Entity, page_type: PageType) -> Result<RetrievalResult, String> {
        let session = self.session.as_ref();
        match self
            .retriever
            .retrieve(&mut self.controller, entity, page_type, session)
            .await
        {
            Ok(result) => return Ok(result),
            Err(e) => warn!(entity = %entity.name, page = %page_type, "Connectivity failure: {e}"),
        }

        if !self.recover().await {
            return Err("browser unreachable".to_string());
        }

        let session = self.session.as_ref();
        self.retriever
            .retrieve(&mut self.controller, entity, page_type, session)
            .await
            .map_err(|e| e.to_string())
    }

    /// Launch on first use; afterwards probe and reconnect once if needed.
    async fn ensure_browser(&mut self) -> bool {
        if self.controller.state() == ControllerState::Uninitialized {
            return match self.controller.launch().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Browser launch failed: {e}");
                    false
                }
            };
        }
        self.recover().await
    }

    async fn recover(&mut self) -> bool {
        if self.controller.health_check().await {
            return true;
        }
        warn!("Browser health check failed; reconnecting");
        match self.controller.reconnect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Reconnect failed: {e}");
                false
            }
        }
    }
}

fn log_progress(processed: usize, total: usize, report: &RunReport) {
    let rate = report
        .success_rate()
        .map(|r| format!("{r:.1}%"))
        .unwrap_or_else(|| "n/a".to_string());
    info!(
        processed,
        total,
        saved = report.saved,
        skipped = report.skipped_duplicate + report.skipped_already_complete,
        failed = report.failed,
        "Progress: success rate {rate}"
    );
}
