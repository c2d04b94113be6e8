use crate::bm25::CorpusStats;
use crate::error::{Result, VectorStoreError};
use crate::tokenizer::tokenize;
use crate::types::{ScoredRecord, SearchOptions, VectorRecord, DEFAULT_ALPHA};

/// Guards the cosine denominator against true-zero vectors.
pub const COSINE_EPSILON: f32 = 1e-8;

/// Cosine similarity; fails fast when the dimensions differ.
pub fn cosine_similarity(query: &[f32], stored: &[f32]) -> Result<f32> {
    if query.len() != stored.len() {
        return Err(VectorStoreError::InvalidDimension {
            expected: stored.len(),
            actual: query.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_q = 0.0f32;
    let mut norm_s = 0.0f32;
    for (q, s) in query.iter().zip(stored) {
        dot += q * s;
        norm_q += q * q;
        norm_s += s * s;
    }
    Ok(dot / (norm_q.sqrt() * norm_s.sqrt() + COSINE_EPSILON))
}

/// Logistic squash of a raw BM25 value into `(0, 1)`.
#[must_use]
pub fn normalize_bm25(raw: f32) -> f32 {
    1.0 / (1.0 + (-raw).exp())
}

#[must_use]
pub fn effective_alpha(alpha: f32) -> f32 {
    if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        DEFAULT_ALPHA
    }
}

#[must_use]
pub fn fuse(alpha: f32, semantic: f32, lexical_normalized: f32) -> f32 {
    alpha * semantic + (1.0 - alpha) * lexical_normalized
}

/// Filters `candidates` by the namespace / document constraints in
/// `options`, scores the survivors and returns the `top_k` best, highest
/// fused score first. Ties keep candidate order.
pub fn score_candidates<'a>(
    query_embedding: &[f32],
    stats: &CorpusStats,
    candidates: impl IntoIterator<Item = &'a VectorRecord>,
    options: &SearchOptions,
) -> Result<Vec<ScoredRecord>> {
    let alpha = effective_alpha(options.alpha);
    let query_tokens = options
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .map(tokenize);

    let mut scored: Vec<(&VectorRecord, f32, f32, f32)> = Vec::new();
    for record in candidates {
        if !options.admits(record) {
            continue;
        }
        let semantic = cosine_similarity(query_embedding, &record.embedding)?;
        let lexical = query_tokens
            .as_deref()
            .map_or(0.0, |tokens| stats.score(tokens, &record.term_frequency));
        let score = fuse(alpha, semantic, normalize_bm25(lexical));
        scored.push((record, score, semantic, lexical));
    }

    // `sort_by` is stable, so equal scores keep filtered order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(options.top_k);

    Ok(scored
        .into_iter()
        .map(|(record, score, semantic, lexical)| ScoredRecord {
            record: record.clone(),
            score,
            semantic,
            lexical,
        })
        .collect())
}
