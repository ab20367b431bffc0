//! On-disk document store with a per-entity digest index.
//!
//! Layout: `<root>/<entity dir>/<page file>.html` plus
//! `<root>/<entity dir>/.digests.json`. Every write goes through a temporary
//! file in the same directory and an atomic rename. A save that cannot write
//! its index rolls the document back.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::types::{CapturedDocument, Entity, PageType, ScrapeError, ScrapeResult};

const DIGEST_INDEX: &str = ".digests.json";

/// SHA-256 of the markup, lowercase hex.
pub fn content_digest(markup: &str) -> String {
    hex::encode(Sha256::digest(markup.as_bytes()))
}

/// Directory name for an entity's documents.
pub fn slugify_name(name: &str) -> String {
    name.replace(' ', "_")
        .replace('&', "and")
        .replace([',', '.'], "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DigestIndex {
    entity_id: String,
    #[serde(default)]
    digests: BTreeMap<PageType, DigestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DigestEntry {
    digest: String,
    captured_at: chrono::DateTime<chrono::Utc>,
    bytes: usize,
}

/// Which page types are on disk for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStatus {
    pub name: String,
    pub directory: PathBuf,
    pub present: Vec<PageType>,
    pub missing: Vec<PageType>,
}

impl EntityStatus {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Stores captured documents keyed by `(entity, page type)`.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, entity: &Entity) -> PathBuf {
        self.root.join(slugify_name(&entity.name))
    }

    pub fn document_path(&self, entity: &Entity, page_type: PageType) -> PathBuf {
        self.entity_dir(entity).join(page_type.file_name())
    }

    /// A non-empty document exists for the pair.
    pub fn has_document(&self, entity: &Entity, page_type: PageType) -> bool {
        std::fs::metadata(self.document_path(entity, page_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    pub fn is_complete(&self, entity: &Entity, page_types: &[PageType]) -> bool {
        !page_types.is_empty() && page_types.iter().all(|p| self.has_document(entity, *p))
    }

    pub fn read_document(&self, entity: &Entity, page_type: PageType) -> ScrapeResult<String> {
        let path = self.document_path(entity, page_type);
        std::fs::read_to_string(&path).map_err(|e| {
            ScrapeError::Persistence(format!("cannot read {}: {e}", path.display()))
        })
    }

    fn load_index(&self, entity: &Entity) -> DigestIndex {
        let path = self.entity_dir(entity).join(DIGEST_INDEX);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable digest index {}: {e}", path.display());
                DigestIndex::default()
            }),
            Err(_) => DigestIndex::default(),
        }
    }

    /// Last known digest for the pair. Falls back to re-hashing the stored
    /// file when the index has no entry. A digest without a file is ignored.
    pub fn lookup_digest(
        &self,
        entity: &Entity,
        page_type: PageType,
    ) -> ScrapeResult<Option<String>> {
        if !self.has_document(entity, page_type) {
            return Ok(None);
        }
        if let Some(entry) = self.load_index(entity).digests.get(&page_type) {
            return Ok(Some(entry.digest.clone()));
        }
        let markup = self.read_document(entity, page_type)?;
        Ok(Some(content_digest(&markup)))
    }

    /// Persist the document and its digest. Returns the document path.
    ///
    /// Both files are staged before either is renamed into place. If the
    /// index cannot be replaced the previous document is restored, so a
    /// failed save leaves the stored pair as it was.
    pub fn save(&self, entity: &Entity, document: &CapturedDocument) -> ScrapeResult<PathBuf> {
        let dir = self.entity_dir(entity);
        std::fs::create_dir_all(&dir).map_err(|e| {
            ScrapeError::Persistence(format!("cannot create {}: {e}", dir.display()))
        })?;

        let path = dir.join(document.page_type.file_name());
        let index_path = dir.join(DIGEST_INDEX);

        let mut index = self.load_index(entity);
        index.entity_id = entity.numeric_id.clone();
        index.digests.insert(
            document.page_type,
            DigestEntry {
                digest: document.content_digest.clone(),
                captured_at: document.captured_at,
                bytes: document.raw_markup.len(),
            },
        );
        let payload = serde_json::to_vec_pretty(&index)?;

        let staged_document = stage(&path, document.raw_markup.as_bytes())?;
        let staged_index = stage(&index_path, &payload)?;
        let previous = std::fs::read(&path).ok();

        staged_document
            .persist(&path)
            .map_err(|e| persistence(&path, e.error))?;
        if let Err(e) = staged_index.persist(&index_path) {
            restore(&path, previous.as_deref());
            return Err(persistence(&index_path, e.error));
        }

        tracing::debug!(
            entity = %entity.name,
            page = %document.page_type,
            bytes = document.raw_markup.len(),
            "Stored {}",
            path.display()
        );
        Ok(path)
    }

    /// Another page type of `entity` whose recorded digest equals `digest`.
    pub fn page_with_digest(
        &self,
        entity: &Entity,
        digest: &str,
        except: PageType,
    ) -> Option<PageType> {
        self.load_index(entity)
            .digests
            .iter()
            .find(|(page_type, entry)| {
                **page_type != except
                    && entry.digest == digest
                    && self.has_document(entity, **page_type)
            })
            .map(|(page_type, _)| *page_type)
    }

    /// Completeness of each entity against `page_types`.
    pub fn status(&self, entities: &[Entity], page_types: &[PageType]) -> Vec<EntityStatus> {
        entities
            .iter()
            .map(|entity| {
                let (present, missing) = page_types
                    .iter()
                    .copied()
                    .partition(|p| self.has_document(entity, *p));
                EntityStatus {
                    name: entity.name.clone(),
                    directory: self.entity_dir(entity),
                    present,
                    missing,
                }
            })
            .collect()
    }
}

/// Write `bytes` to a synced temporary file next to `path`.
fn stage(path: &Path, bytes: &[u8]) -> ScrapeResult<NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| ScrapeError::Persistence(format!("no parent for {}", path.display())))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| persistence(path, e))?;
    tmp.write_all(bytes).map_err(|e| persistence(path, e))?;
    tmp.as_file().sync_all().map_err(|e| persistence(path, e))?;
    Ok(tmp)
}

/// Put back what was at `path` before a half-finished save.
fn restore(path: &Path, previous: Option<&[u8]>) {
    let result = match previous {
        Some(bytes) => stage(path, bytes).and_then(|tmp| {
            tmp.persist(path)
                .map(|_| ())
                .map_err(|e| persistence(path, e.error))
        }),
        None => std::fs::remove_file(path).map_err(|e| persistence(path, e)),
    };
    if let Err(e) = result {
        tracing::warn!("Could not roll back {}: {e}", path.display());
    }
}

fn persistence(path: &Path, err: std::io::Error) -> ScrapeError {
    ScrapeError::Persistence(format!("{}: {err}", path.display()))
}
