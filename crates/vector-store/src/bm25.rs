//! Okapi BM25 statistics over the record store.
//!
//! Statistics are derived data: they are rebuilt lazily on the first scoring
//! call after any mutation and then reused until the next mutation.
//!
//! ```text
//!            mutation                      score request
//!   Clean ─────────────> Dirty ─────────────────────────> Clean
//!     ^                    │   (recompute df, idf, avgdl)
//!     └── score request ───┘ (no-op while Clean)
//! ```

use crate::tokenizer::{document_length, TermFrequency};
use crate::types::VectorRecord;
use std::collections::HashMap;

pub const K1: f32 = 1.2;
pub const B: f32 = 0.75;

/// Which records contribute to document frequencies and average length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bm25Scope {
    /// Every record in the store, regardless of namespace.
    #[default]
    Store,
    /// One statistics table per namespace; namespace-constrained queries use
    /// their own table, unconstrained queries use the store-wide one.
    Namespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bm25State {
    Clean,
    Dirty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStats {
    doc_count: usize,
    document_frequency: HashMap<String, usize>,
    idf: HashMap<String, f32>,
    avgdl: f32,
}

impl CorpusStats {
    pub fn build<'a>(records: impl IntoIterator<Item = &'a VectorRecord>) -> Self {
        let mut doc_count = 0usize;
        let mut total_length = 0u64;
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for record in records {
            doc_count += 1;
            total_length += u64::from(document_length(&record.term_frequency));
            // Keys are unique per record, so each token counts once.
            for token in record.term_frequency.keys() {
                *document_frequency.entry(token.clone()).or_insert(0) += 1;
            }
        }

        let n = doc_count.max(1) as f32;
        let idf = document_frequency
            .iter()
            .map(|(token, &df)| {
                let df = df as f32;
                (token.clone(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let avgdl = if doc_count == 0 {
            0.0
        } else {
            total_length as f32 / doc_count as f32
        };

        Self {
            doc_count,
            document_frequency,
            idf,
            avgdl,
        }
    }

    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    #[must_use]
    pub fn avgdl(&self) -> f32 {
        self.avgdl
    }

    #[must_use]
    pub fn document_frequency(&self, token: &str) -> usize {
        self.document_frequency.get(token).copied().unwrap_or(0)
    }

    /// Unknown tokens have an IDF of zero.
    #[must_use]
    pub fn idf(&self, token: &str) -> f32 {
        self.idf.get(token).copied().unwrap_or(0.0)
    }

    /// Raw BM25 score of a record (given its cached term frequencies).
    #[must_use]
    pub fn score(&self, query_tokens: &[String], freq: &TermFrequency) -> f32 {
        let dl = document_length(freq) as f32;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        query_tokens
            .iter()
            .filter_map(|token| {
                let f = *freq.get(token)? as f32;
                let norm = f + K1 * (1.0 - B + B * (dl / avgdl));
                Some(self.idf(token) * (f * (K1 + 1.0)) / norm)
            })
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
struct ScopedStats {
    store: CorpusStats,
    namespaces: HashMap<Option<String>, CorpusStats>,
}

impl ScopedStats {
    fn build(records: &[VectorRecord], scope: Bm25Scope) -> Self {
        let store = CorpusStats::build(records);
        let namespaces = match scope {
            Bm25Scope::Store => HashMap::new(),
            Bm25Scope::Namespace => {
                let mut grouped: HashMap<Option<String>, Vec<&VectorRecord>> = HashMap::new();
                for record in records {
                    grouped
                        .entry(record.namespace.clone())
                        .or_default()
                        .push(record);
                }
                grouped
                    .into_iter()
                    .map(|(namespace, members)| (namespace, CorpusStats::build(members)))
                    .collect()
            }
        };
        Self { store, namespaces }
    }

    fn for_namespace(&self, namespace: Option<&str>) -> &CorpusStats {
        match namespace {
            Some(ns) => self
                .namespaces
                .get(&Some(ns.to_string()))
                .unwrap_or(&self.store),
            None => &self.store,
        }
    }
}

/// Lazily recomputed BM25 table. `cache == None` is the `Dirty` state.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    scope: Bm25Scope,
    cache: Option<ScopedStats>,
}

impl Bm25Index {
    #[must_use]
    pub fn new(scope: Bm25Scope) -> Self {
        Self { scope, cache: None }
    }

    #[must_use]
    pub fn scope(&self) -> Bm25Scope {
        self.scope
    }

    #[must_use]
    pub fn state(&self) -> Bm25State {
        if self.cache.is_some() {
            Bm25State::Clean
        } else {
            Bm25State::Dirty
        }
    }

    /// Transition to `Dirty`. Called on every mutation of the record set.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Recompute if `Dirty`, then return the statistics that apply to a query
    /// constrained to `namespace`.
    pub fn fresh_stats(
        &mut self,
        records: &[VectorRecord],
        namespace: Option<&str>,
    ) -> &CorpusStats {
        let scope = self.scope;
        let stats = self.cache.get_or_insert_with(|| {
            log::debug!(
                "Recomputing BM25 statistics over {} records ({:?} scope)",
                records.len(),
                scope
            );
            ScopedStats::build(records, scope)
        });
        stats.for_namespace(namespace)
    }
}
