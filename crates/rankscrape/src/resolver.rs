//! Identifier resolution against the static university dataset.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::types::{Entity, ScrapeError, ScrapeResult};

/// One dataset record. Either a profile `link` ending in `{slug}-{id}` or
/// explicit `slug` and `numeric_id` fields.
#[derive(Debug, Deserialize)]
struct DatasetRecord {
    name: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, alias = "id")]
    numeric_id: Option<serde_json::Value>,
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9][A-Za-z0-9-]*?)-(\d+)$").expect("profile link regex is valid")
    })
}

/// Split a profile link like `/best-colleges/princeton-university-2627`
/// into slug and numeric identifier.
pub fn parse_profile_link(link: &str) -> Option<(String, String)> {
    let path = link.split(['?', '#']).next().unwrap_or(link);
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let caps = link_pattern().captures(last)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

impl DatasetRecord {
    fn into_entity(self) -> ScrapeResult<Entity> {
        let id = match &self.numeric_id {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        match (self.slug, id, self.link) {
            (Some(slug), Some(id), _) => Ok(Entity::new(&self.name, &slug, &id)),
            (_, _, Some(link)) => {
                let (slug, id) = parse_profile_link(&link).ok_or_else(|| {
                    ScrapeError::Dataset(format!("{}: cannot parse link {link}", self.name))
                })?;
                Ok(Entity::new(&self.name, &slug, &id))
            }
            _ => Err(ScrapeError::Dataset(format!(
                "{}: record needs a link or slug and numeric_id",
                self.name
            ))),
        }
    }
}

/// Ordered, read-only entity dataset.
///
/// Dataset order is significant: it breaks ties between substring matches.
#[derive(Debug, Clone, Default)]
pub struct EntityDirectory {
    entities: Vec<Entity>,
}

impl EntityDirectory {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// Load the dataset from a JSON array of records.
    pub fn load(path: &Path) -> ScrapeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScrapeError::Dataset(format!("cannot read dataset {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ScrapeResult<Self> {
        let records: Vec<DatasetRecord> = serde_json::from_str(raw)
            .map_err(|e| ScrapeError::Dataset(format!("invalid dataset: {e}")))?;
        let entities = records
            .into_iter()
            .map(DatasetRecord::into_entity)
            .collect::<ScrapeResult<Vec<_>>>()?;
        tracing::debug!("Loaded {} entities", entities.len());
        Ok(Self { entities })
    }

    /// Exact case-insensitive name match first, then the first substring
    /// match in dataset order.
    pub fn resolve(&self, query: &str) -> ScrapeResult<Entity> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(ScrapeError::NotFound(query.to_string()));
        }

        if let Some(entity) = self
            .entities
            .iter()
            .find(|e| e.name.to_lowercase() == needle)
        {
            return Ok(entity.clone());
        }

        self.entities
            .iter()
            .find(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
            .ok_or_else(|| ScrapeError::NotFound(query.to_string()))
    }

    /// All entities in dataset order.
    pub fn list_all(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
