use crate::config::{RetrievalConfig, DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_VARIANT_COUNT};
use crate::context::{stitch_context, Source};
use crate::error::{Result, RetrievalError};
use crate::fusion::merge_max;
use crate::provider::EmbeddingProvider;
use crate::query_expansion::QueryExpander;
use kb_vector_store::{
    ScoredRecord, SearchOptions, StoreInfo, VectorStore, DEFAULT_ALPHA, DEFAULT_TOP_K,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Floors applied by [`RetrieveRequest::broadened`].
pub const BROADENED_MIN_TOP_K: usize = 8;
pub const BROADENED_MIN_VARIANTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveRequest {
    pub query: String,
    /// Restrict to these documents; `None` or empty means all documents.
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub top_k: usize,
    pub alpha: f32,
    pub use_expansion: bool,
    pub variant_count: usize,
    pub max_context_chars: usize,
    #[serde(default)]
    pub debug: bool,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            doc_ids: None,
            namespace: None,
            top_k: DEFAULT_TOP_K,
            alpha: DEFAULT_ALPHA,
            use_expansion: true,
            variant_count: DEFAULT_VARIANT_COUNT,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            debug: false,
        }
    }

    pub fn from_config(query: impl Into<String>, config: &RetrievalConfig) -> Self {
        Self {
            query: query.into(),
            doc_ids: None,
            namespace: config.namespace.clone(),
            top_k: config.top_k,
            alpha: config.alpha,
            use_expansion: config.use_expansion,
            variant_count: config.variant_count,
            max_context_chars: config.max_context_chars,
            debug: false,
        }
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
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn expansion(mut self, enabled: bool) -> Self {
        self.use_expansion = enabled;
        self
    }

    #[must_use]
    pub fn variant_count(mut self, count: usize) -> Self {
        self.variant_count = count;
        self
    }

    #[must_use]
    pub fn max_context_chars(mut self, max: usize) -> Self {
        self.max_context_chars = max;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Wider variant of this request for a second attempt after an empty
    /// result: more hits, more variants, expansion forced on.
    #[must_use]
    pub fn broadened(&self) -> Self {
        Self {
            top_k: self.top_k.max(BROADENED_MIN_TOP_K),
            use_expansion: true,
            variant_count: self.variant_count.max(BROADENED_MIN_VARIANTS),
            ..self.clone()
        }
    }

    /// Store search options for one query variant.
    #[must_use]
    pub fn search_options(&self, variant: &str) -> SearchOptions {
        SearchOptions {
            top_k: self.top_k,
            namespace: self.namespace.clone(),
            doc_ids: self.doc_ids.clone().filter(|ids| !ids.is_empty()),
            alpha: self.alpha,
            query: Some(variant.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitDebug {
    pub id: String,
    pub doc_id: String,
    pub page: Option<i64>,
    pub score: f32,
    pub semantic: f32,
    pub lexical: f32,
}

impl From<&ScoredRecord> for HitDebug {
    fn from(hit: &ScoredRecord) -> Self {
        Self {
            id: hit.record.id.clone(),
            doc_id: hit.record.doc_id.clone(),
            page: hit.record.page(),
            score: hit.score,
            semantic: hit.semantic,
            lexical: hit.lexical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalDebug {
    pub queries: Vec<String>,
    pub result_count: usize,
    pub took_ms: u64,
    pub hits: Vec<HitDebug>,
    pub store: StoreInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrieval {
    pub context: String,
    /// Full ranked result, including hits that did not fit in `context`.
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<RetrievalDebug>,
}

/// Expansion → per-variant hybrid search → merge-max → context stitching.
///
/// The store is borrowed per call; the retriever itself holds only the
/// provider handles.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    expander: QueryExpander,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, expander: QueryExpander) -> Self {
        Self { embedder, expander }
    }

    #[must_use]
    pub fn expander(&self) -> &QueryExpander {
        &self.expander
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub async fn retrieve(
        &self,
        store: &mut VectorStore,
        request: &RetrieveRequest,
    ) -> Result<Retrieval> {
        if request.query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        let started = Instant::now();

        let variants = if request.use_expansion {
            self.expander
                .expand(&request.query, request.variant_count)
                .await
        } else {
            vec![request.query.clone()]
        };
        log::debug!("Retrieving with {} query variants", variants.len());

        // Variants run one after another; latency grows with their number.
        let mut pooled: Vec<ScoredRecord> = Vec::new();
        for variant in &variants {
            let hits = self.search_variant(store, variant, request).await?;
            log::debug!("Variant '{}': {} hits", variant, hits.len());
            pooled.extend(hits);
        }

        let ranked = merge_max(pooled, request.top_k);
        let context = stitch_context(&ranked, request.max_context_chars);
        let sources: Vec<Source> = ranked.iter().map(Source::from).collect();
        let took_ms = started.elapsed().as_millis() as u64;

        log::info!(
            "Retrieved {} sources ({} context chars) in {} ms",
            sources.len(),
            context.chars().count(),
            took_ms
        );

        let debug = request.debug.then(|| RetrievalDebug {
            queries: variants.clone(),
            result_count: ranked.len(),
            took_ms,
            hits: ranked.iter().map(HitDebug::from).collect(),
            store: store.info(),
        });

        Ok(Retrieval {
            context,
            sources,
            debug,
        })
    }

    /// Like [`Retriever::retrieve`], retrying once with
    /// [`RetrieveRequest::broadened`] when nothing usable came back.
    pub async fn retrieve_or_broaden(
        &self,
        store: &mut VectorStore,
        request: &RetrieveRequest,
    ) -> Result<Retrieval> {
        let first = self.retrieve(store, request).await?;
        if !first.context.trim().is_empty() && !first.sources.is_empty() {
            return Ok(first);
        }
        log::info!("No context for '{}', retrying with a broadened request", request.query);
        self.retrieve(store, &request.broadened()).await
    }

    /// Embeds `variant` and runs one hybrid search with it.
    pub async fn search_variant(
        &self,
        store: &mut VectorStore,
        variant: &str,
        request: &RetrieveRequest,
    ) -> Result<Vec<ScoredRecord>> {
        let embedding = self.embed_query(variant).await?;
        let hits = store.search_hybrid(&embedding, &request.search_options(variant))?;
        Ok(hits)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|err| RetrievalError::Embedding(format!("{err:#}")))?;
        if vectors.len() != 1 {
            return Err(RetrievalError::Embedding(format!(
                "expected 1 query vector, provider returned {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("expander", &self.expander)
            .finish_non_exhaustive()
    }
}
