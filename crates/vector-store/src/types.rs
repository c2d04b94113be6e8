use crate::tokenizer::{term_frequencies, TermFrequency};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_ALPHA: f32 = 0.7;

/// Record as supplied by ingestion, before the store derives its caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub id: String,
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl NewRecord {
    pub fn new(
        id: impl Into<String>,
        doc_id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            doc_id: doc_id.into(),
            namespace: None,
            text: text.into(),
            embedding,
            meta: Map::new(),
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn page(mut self, page: i64) -> Self {
        self.meta.insert("page".to_string(), Value::from(page));
        self
    }

    #[must_use]
    pub fn meta_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    pub id: String,
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    /// Derived at write time; recomputed on load when absent.
    #[serde(default)]
    pub term_frequency: TermFrequency,
}

impl VectorRecord {
    #[must_use]
    pub fn page(&self) -> Option<i64> {
        match self.meta.get("page")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Portion of the id after its last `:` separator (the chunk-local id).
    #[must_use]
    pub fn chunk_suffix(&self) -> &str {
        self.id
            .rsplit_once(':')
            .map_or(self.id.as_str(), |(_, suffix)| suffix)
    }

    pub(crate) fn ensure_term_frequency(&mut self) {
        if self.term_frequency.is_empty() {
            self.term_frequency = term_frequencies(&self.text);
        }
    }
}

impl From<NewRecord> for VectorRecord {
    fn from(record: NewRecord) -> Self {
        let term_frequency = term_frequencies(&record.text);
        Self {
            id: record.id,
            doc_id: record.doc_id,
            namespace: record.namespace,
            text: record.text,
            embedding: record.embedding,
            meta: record.meta,
            term_frequency,
        }
    }
}

/// Query-time view of a record; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    /// Fused score used for ranking.
    pub score: f32,
    /// Cosine similarity component.
    pub semantic: f32,
    /// Raw BM25 value, before the logistic squash.
    pub lexical: f32,
}

impl ScoredRecord {
    #[must_use]
    pub fn lexical_normalized(&self) -> f32 {
        crate::hybrid::normalize_bm25(self.lexical)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    pub namespace: Option<String>,
    /// Allow-list of document ids; `None` or empty means no restriction.
    pub doc_ids: Option<Vec<String>>,
    /// Weight of the semantic component in `[0, 1]`.
    pub alpha: f32,
    /// Raw query text for lexical scoring.
    pub query: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            namespace: None,
            doc_ids: None,
            alpha: DEFAULT_ALPHA,
            query: None,
        }
    }
}

impl SearchOptions {
    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn doc_ids<I, S>(mut self, doc_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_ids = Some(doc_ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub(crate) fn admits(&self, record: &VectorRecord) -> bool {
        if let Some(namespace) = &self.namespace {
            if record.namespace.as_deref() != Some(namespace.as_str()) {
                return false;
            }
        }
        match &self.doc_ids {
            Some(ids) if !ids.is_empty() => ids.iter().any(|id| *id == record.doc_id),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCount {
    pub doc_id: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub path: Option<PathBuf>,
    pub records: usize,
    pub documents: Vec<DocumentCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub doc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub chunks: usize,
}
