//! Page parsers: stored markup to typed records.
//!
//! Parsing is pure. Each parsable page type has one fixed-shape record with
//! named optional fields for the well-known keys; everything else found on
//! the page lands in the record's `fields` and `lists` maps.

mod profile;
mod rankings;

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::types::PageType;

pub use profile::{AcademicsRecord, ApplyingRecord, CampusInfoRecord, CostRecord, StudentLifeRecord};
pub use rankings::{OverallRankingsRecord, ProgramRanking};

/// A parsed page, tagged by page type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "page_type", rename_all = "kebab-case")]
pub enum PageRecord {
    OverallRankings(OverallRankingsRecord),
    Applying(ApplyingRecord),
    Paying(CostRecord),
    Academics(AcademicsRecord),
    StudentLife(StudentLifeRecord),
    CampusInfo(CampusInfoRecord),
}

impl PageRecord {
    pub fn page_type(&self) -> PageType {
        match self {
            Self::OverallRankings(_) => PageType::OverallRankings,
            Self::Applying(_) => PageType::Applying,
            Self::Paying(_) => PageType::Paying,
            Self::Academics(_) => PageType::Academics,
            Self::StudentLife(_) => PageType::StudentLife,
            Self::CampusInfo(_) => PageType::CampusInfo,
        }
    }
}

/// Parsed record plus the entity it belongs to, as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub university_name: String,
    pub extracted_at: chrono::DateTime<chrono::Utc>,
    pub record: PageRecord,
}

/// Parse stored markup. The main page has no parser; a page yielding no
/// data at all also returns `None`.
pub fn parse_page(page_type: PageType, markup: &str) -> Option<PageRecord> {
    let document = Html::parse_document(markup);
    let record = match page_type {
        PageType::Main => return None,
        PageType::OverallRankings => {
            let record = rankings::parse(&document);
            if record.rankings.is_empty() && record.fields.is_empty() {
                return None;
            }
            PageRecord::OverallRankings(record)
        }
        other => {
            let fields = PageFields::extract(&document);
            if fields.is_empty() {
                return None;
            }
            match other {
                PageType::Applying => PageRecord::Applying(ApplyingRecord::from_fields(fields)),
                PageType::Paying => {
                    let mut record = CostRecord::from_fields(fields);
                    if let Some(meta) = meta_description(&document) {
                        record.fields.entry("meta_description".to_string()).or_insert(meta);
                    }
                    PageRecord::Paying(record)
                }
                PageType::Academics => PageRecord::Academics(AcademicsRecord::from_fields(fields)),
                PageType::StudentLife => {
                    PageRecord::StudentLife(StudentLifeRecord::from_fields(fields))
                }
                _ => PageRecord::CampusInfo(CampusInfoRecord::from_fields(fields)),
            }
        }
    };
    tracing::debug!(page = %page_type, "Parsed page");
    Some(record)
}

/// Lowercase snake_case key from a visible label.
pub fn sanitize_key(text: &str) -> String {
    let mut key = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            key.push(c);
        } else if !key.ends_with('_') {
            key.push('_');
        }
    }
    let mut collapsed = String::with_capacity(key.len());
    for c in key.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('_').to_string()
}

/// Text content with whitespace runs collapsed.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn meta_description(document: &Html) -> Option<String> {
    let sel = Selector::parse(r#"meta[name="description"]"#).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Key/value data and titled lists found on a profile page.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PageFields {
    pub values: BTreeMap<String, String>,
    pub lists: BTreeMap<String, Vec<String>>,
}

impl PageFields {
    /// `[data-test-id]` elements first, then `DataRow` label/value rows,
    /// then `TruncatedList` lists keyed by their section heading.
    pub fn extract(document: &Html) -> Self {
        let mut fields = Self::default();

        if let Ok(sel) = Selector::parse("[data-test-id]") {
            for el in document.select(&sel) {
                let Some(id) = el.value().attr("data-test-id") else {
                    continue;
                };
                let text = element_text(&el);
                if !id.is_empty() && !text.is_empty() {
                    fields.values.insert(id.to_string(), text);
                }
            }
        }

        if let (Ok(rows), Ok(para)) = (
            Selector::parse(r#"div[class*="DataRow__Row"]"#),
            Selector::parse("p"),
        ) {
            for row in document.select(&rows) {
                let mut cells = row.select(&para);
                let (Some(label), Some(value)) = (cells.next(), cells.next()) else {
                    continue;
                };
                let key = sanitize_key(&element_text(&label));
                let value = element_text(&value);
                if !key.is_empty() && !value.is_empty() {
                    fields.values.insert(key, value);
                }
            }
        }

        if let (Ok(lists), Ok(items)) = (
            Selector::parse(r#"div[class*="TruncatedList"]"#),
            Selector::parse("li"),
        ) {
            for list in document.select(&lists) {
                let entries: Vec<String> = list
                    .select(&items)
                    .map(|li| element_text(&li))
                    .filter(|t| !t.is_empty())
                    .collect();
                if entries.is_empty() {
                    continue;
                }
                if let Some(title) = section_title(&list) {
                    let key = format!("{}_list", sanitize_key(&title));
                    fields.lists.entry(key).or_insert(entries);
                }
            }
        }

        fields
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.lists.is_empty()
    }

    /// Remove and return the first present key among `keys`.
    pub fn take(&mut self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.values.remove(*k))
    }

    pub fn take_list(&mut self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .find_map(|k| self.lists.remove(*k))
            .unwrap_or_default()
    }
}

fn is_heading(el: &ElementRef<'_>) -> bool {
    let name = el.value().name();
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5")
        || el
            .value()
            .attr("class")
            .map(|c| c.contains("Heading"))
            .unwrap_or(false)
}

/// Nearest heading before `el`, looking at preceding siblings of the
/// element and of up to three ancestors.
fn section_title(el: &ElementRef<'_>) -> Option<String> {
    let mut current = Some(*el);
    for _ in 0..4 {
        let node = current?;
        for sibling in node.prev_siblings().filter_map(ElementRef::wrap) {
            if is_heading(&sibling) {
                let text = element_text(&sibling);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        current = node.parent().and_then(ElementRef::wrap);
    }
    None
}
