//! Embedding pre-chunked documents and loading them into the store.

use crate::error::{Result, RetrievalError};
use crate::provider::EmbeddingProvider;
use kb_vector_store::{NewRecord, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within its document.
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub page: Option<i64>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            page: None,
        }
    }

    #[must_use]
    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    pub doc_id: String,
    pub namespace: Option<String>,
    pub chunks: Vec<Chunk>,
    /// Copied into every record's metadata.
    pub meta: Map<String, Value>,
    /// Drop the document's existing records before upserting.
    pub replace_existing: bool,
}

impl IngestRequest {
    pub fn new(doc_id: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self {
            doc_id: doc_id.into(),
            namespace: None,
            chunks,
            meta: Map::new(),
            replace_existing: false,
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn meta_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub doc_id: String,
    pub chunks: usize,
    /// Distinct page numbers seen among the chunks.
    pub pages: usize,
    pub replaced: usize,
}

/// Embeds chunk texts in batches of `batch_size` and upserts one record per
/// chunk with id `<docId>:<chunkId>`. The store is written once.
pub async fn ingest_document(
    store: &mut VectorStore,
    embedder: &dyn EmbeddingProvider,
    request: IngestRequest,
    batch_size: usize,
) -> Result<IngestReport> {
    let pages: BTreeSet<i64> = request.chunks.iter().filter_map(|c| c.page).collect();
    let mut report = IngestReport {
        doc_id: request.doc_id.clone(),
        chunks: request.chunks.len(),
        pages: pages.len(),
        replaced: 0,
    };

    if request.chunks.is_empty() {
        log::warn!("Document {} has no chunks, nothing to ingest", request.doc_id);
        return Ok(report);
    }

    let embeddings = embed_in_batches(embedder, &request.chunks, batch_size.max(1)).await?;

    let IngestRequest {
        doc_id,
        namespace,
        chunks,
        meta,
        replace_existing,
    } = request;

    let records: Vec<NewRecord> = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            let mut record =
                NewRecord::new(format!("{doc_id}:{}", chunk.id), &doc_id, chunk.text, embedding);
            if let Some(ns) = &namespace {
                record = record.namespace(ns.clone());
            }
            for (key, value) in &meta {
                record = record.meta_entry(key.clone(), value.clone());
            }
            if let Some(page) = chunk.page {
                record = record.page(page);
            }
            record
        })
        .collect();

    if replace_existing {
        report.replaced = store.replace_document(&doc_id, records)?;
    } else {
        store.upsert(records)?;
    }

    log::info!(
        "Ingested {} chunks across {} pages for {}",
        report.chunks,
        report.pages,
        report.doc_id
    );
    Ok(report)
}

async fn embed_in_batches(
    embedder: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(chunks.len());
    for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .map_err(|err| RetrievalError::Embedding(format!("{err:#}")))?;
        if vectors.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "batch {batch_idx}: sent {} texts, received {} vectors",
                texts.len(),
                vectors.len()
            )));
        }
        log::debug!("Embedded batch {} ({} chunks)", batch_idx, texts.len());
        embeddings.extend(vectors);
    }
    Ok(embeddings)
}
