//! Core data types for entities, page types, captures and run results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A university record from the static dataset.
///
/// Identity is the numeric identifier; the slug and the identifier together
/// form the path segment of every target URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub canonical_slug: String,
    pub numeric_id: String,
}

impl Entity {
    pub fn new(name: &str, canonical_slug: &str, numeric_id: &str) -> Self {
        Self {
            name: name.to_string(),
            canonical_slug: canonical_slug.to_string(),
            numeric_id: numeric_id.to_string(),
        }
    }

    /// `{slug}-{id}`, the profile segment used in URLs.
    pub fn profile_segment(&self) -> String {
        format!("{}-{}", self.canonical_slug, self.numeric_id)
    }
}

/// The fixed set of topical sub-pages captured per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageType {
    Main,
    OverallRankings,
    Applying,
    Paying,
    Academics,
    StudentLife,
    CampusInfo,
}

impl PageType {
    /// Canonical retrieval order.
    pub const ALL: [PageType; 7] = [
        PageType::Main,
        PageType::OverallRankings,
        PageType::Applying,
        PageType::Paying,
        PageType::Academics,
        PageType::StudentLife,
        PageType::CampusInfo,
    ];

    /// URL path suffix. Empty for the main page.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Main => "",
            Self::OverallRankings => "overall-rankings",
            Self::Applying => "applying",
            Self::Paying => "paying",
            Self::Academics => "academics",
            Self::StudentLife => "student-life",
            Self::CampusInfo => "campus-info",
        }
    }

    /// Stable file name for the stored document.
    pub fn file_name(self) -> String {
        match self {
            Self::Main => "main.html".to_string(),
            other => format!("{}.html", other.suffix().replace('-', "_")),
        }
    }

    /// Sort `types` into canonical order and drop duplicates.
    pub fn canonical_order(types: &[PageType]) -> Vec<PageType> {
        let mut out: Vec<PageType> = types.to_vec();
        out.sort();
        out.dedup();
        out
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            other => write!(f, "{}", other.suffix()),
        }
    }
}

impl FromStr for PageType {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_matches('/').to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "" | "main" => Ok(Self::Main),
            "overall-rankings" | "rankings" => Ok(Self::OverallRankings),
            "applying" => Ok(Self::Applying),
            "paying" | "cost" => Ok(Self::Paying),
            "academics" => Ok(Self::Academics),
            "student-life" => Ok(Self::StudentLife),
            "campus-info" => Ok(Self::CampusInfo),
            _ => Err(ScrapeError::Config(format!("unknown page type: {s}"))),
        }
    }
}

/// A document captured by the retriever after a successful load.
#[derive(Debug, Clone)]
pub struct CapturedDocument {
    pub entity_id: String,
    pub page_type: PageType,
    pub raw_markup: String,
    /// SHA-256 of `raw_markup`, lowercase hex.
    pub content_digest: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of retrieving one page type for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Saved,
    SkippedDuplicate,
    SkippedAlreadyComplete,
    Failed,
}

/// Per-page result, aggregated into [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub entity: String,
    pub page_type: PageType,
    pub outcome: Outcome,
    pub byte_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl RetrievalResult {
    pub fn saved(entity: &Entity, page_type: PageType, byte_count: usize) -> Self {
        Self::with_outcome(entity, page_type, Outcome::Saved, byte_count, None)
    }

    pub fn duplicate(entity: &Entity, page_type: PageType, detail: Option<String>) -> Self {
        Self::with_outcome(entity, page_type, Outcome::SkippedDuplicate, 0, detail)
    }

    pub fn already_complete(entity: &Entity, page_type: PageType) -> Self {
        Self::with_outcome(entity, page_type, Outcome::SkippedAlreadyComplete, 0, None)
    }

    pub fn failed(entity: &Entity, page_type: PageType, detail: impl Into<String>) -> Self {
        Self::with_outcome(entity, page_type, Outcome::Failed, 0, Some(detail.into()))
    }

    fn with_outcome(
        entity: &Entity,
        page_type: PageType,
        outcome: Outcome,
        byte_count: usize,
        error_detail: Option<String>,
    ) -> Self {
        Self {
            entity: entity.name.clone(),
            page_type,
            outcome,
            byte_count,
            error_detail,
        }
    }
}

/// Aggregated counters for one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub entities_attempted: usize,
    pub saved: usize,
    pub skipped_duplicate: usize,
    pub skipped_already_complete: usize,
    pub failed: usize,
    /// True when the run stopped early on a cancellation request.
    pub interrupted: bool,
    pub results: Vec<RetrievalResult>,
}

impl RunReport {
    pub fn record(&mut self, result: RetrievalResult) {
        match result.outcome {
            Outcome::Saved => self.saved += 1,
            Outcome::SkippedDuplicate => self.skipped_duplicate += 1,
            Outcome::SkippedAlreadyComplete => self.skipped_already_complete += 1,
            Outcome::Failed => self.failed += 1,
        }
        self.results.push(result);
    }

    /// Results for one entity, in recorded order.
    pub fn for_entity<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RetrievalResult> {
        self.results.iter().filter(move |r| r.entity == name)
    }

    /// Share of saved pages among pages that were actually attempted.
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.saved + self.failed;
        if attempted == 0 {
            None
        } else {
            Some(self.saved as f64 / attempted as f64 * 100.0)
        }
    }
}

/// Distinguishes why a navigation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationFailure {
    /// The browser connection is gone; a reconnect may help.
    Unreachable,
    /// The page itself is an error page; retrying will not help.
    Page,
    /// Transient page errors persisted through every retry.
    Exhausted,
}

impl fmt::Display for NavigationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "browser unreachable"),
            Self::Page => write!(f, "page error"),
            Self::Exhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Errors that can occur while scraping.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Navigation error ({kind}) for {url}: {detail}")]
    Navigation {
        kind: NavigationFailure,
        url: String,
        detail: String,
    },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Browser closed")]
    Closed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Whether the error means the browser connection itself is lost.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ScrapeError::Closed
                | ScrapeError::Launch(_)
                | ScrapeError::Navigation {
                    kind: NavigationFailure::Unreachable,
                    ..
                }
        )
    }
}

/// Convenience result type.
pub type ScrapeResult<T> = Result<T, ScrapeError>;
