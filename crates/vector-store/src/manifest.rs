//! Catalog of ingested documents, kept next to the vector snapshot.

use crate::error::{Result, VectorStoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub doc_id: String,
    pub filename: String,
    pub original_name: String,
    pub pages: usize,
    pub chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl DocumentEntry {
    pub fn new(doc_id: impl Into<String>, original_name: impl Into<String>) -> Self {
        let now = Utc::now();
        let original_name = original_name.into();
        Self {
            doc_id: doc_id.into(),
            filename: original_name.clone(),
            original_name,
            pages: 0,
            chunks: 0,
            namespace: None,
            created_at: now,
            updated_at: now,
            meta: Map::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestOut<'a> {
    schema_version: u32,
    documents: &'a [DocumentEntry],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionedManifest {
    schema_version: u32,
    documents: Vec<DocumentEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestIn {
    Versioned(VersionedManifest),
    Legacy(Vec<DocumentEntry>),
}

#[derive(Debug, Clone)]
pub struct DocumentManifest {
    path: PathBuf,
}

impl DocumentManifest {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries; a missing or unreadable manifest reads as empty.
    #[must_use]
    pub fn load(&self) -> Vec<DocumentEntry> {
        match self.try_load() {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("Failed to read manifest {:?}: {err}", self.path);
                Vec::new()
            }
        }
    }

    fn try_load(&self) -> Result<Vec<DocumentEntry>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<ManifestIn>(&bytes)? {
            ManifestIn::Versioned(manifest) => {
                if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
                    return Err(VectorStoreError::UnsupportedSchema {
                        path: self.path.clone(),
                        found: manifest.schema_version,
                        expected: MANIFEST_SCHEMA_VERSION,
                    });
                }
                Ok(manifest.documents)
            }
            ManifestIn::Legacy(documents) => Ok(documents),
        }
    }

    pub fn save(&self, entries: &[DocumentEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&ManifestOut {
            schema_version: MANIFEST_SCHEMA_VERSION,
            documents: entries,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Inserts `entry`, or replaces the entry with the same `doc_id` while
    /// keeping its original `created_at` and refreshing `updated_at`.
    pub fn upsert_document(&self, mut entry: DocumentEntry) -> Result<DocumentEntry> {
        let mut entries = self.load();
        match entries.iter_mut().find(|e| e.doc_id == entry.doc_id) {
            Some(existing) => {
                entry.created_at = existing.created_at;
                entry.updated_at = Utc::now();
                *existing = entry.clone();
            }
            None => entries.push(entry.clone()),
        }
        self.save(&entries)?;
        Ok(entry)
    }

    /// Returns whether an entry was removed.
    pub fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|e| e.doc_id != doc_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }

    #[must_use]
    pub fn get_document(&self, doc_id: &str) -> Option<DocumentEntry> {
        self.load().into_iter().find(|e| e.doc_id == doc_id)
    }

    /// Most recently created entry, optionally restricted to one namespace.
    /// Ties go to the entry added last.
    #[must_use]
    pub fn latest(&self, namespace: Option<&str>) -> Option<DocumentEntry> {
        self.load()
            .into_iter()
            .filter(|e| namespace.is_none() || e.namespace.as_deref() == namespace)
            .max_by_key(|e| e.created_at)
    }
}
