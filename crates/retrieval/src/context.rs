//! Stitching ranked hits into a bounded prompt context.

use kb_vector_store::{ScoredRecord, VectorRecord};
use serde::Serialize;

/// Rendered in place of the page number when a record has none.
pub const MISSING_PAGE: &str = "?";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub doc_id: String,
    pub page: Option<i64>,
    pub score: f32,
}

impl From<&ScoredRecord> for Source {
    fn from(hit: &ScoredRecord) -> Self {
        Self {
            id: hit.record.id.clone(),
            doc_id: hit.record.doc_id.clone(),
            page: hit.record.page(),
            score: hit.score,
        }
    }
}

/// `[docId chunkId p<page>] text`
#[must_use]
pub fn format_context_line(record: &VectorRecord) -> String {
    let page = record
        .page()
        .map_or_else(|| MISSING_PAGE.to_string(), |p| p.to_string());
    format!(
        "[{} {} p{}] {}",
        record.doc_id,
        record.chunk_suffix(),
        page,
        record.text
    )
}

/// Joins formatted lines with `\n` while the total stays within
/// `max_chars` characters. Stops at the first line that does not fit.
#[must_use]
pub fn stitch_context(hits: &[ScoredRecord], max_chars: usize) -> String {
    let mut used = 0usize;
    let mut lines: Vec<String> = Vec::new();
    for hit in hits {
        let line = format_context_line(&hit.record);
        let len = line.chars().count();
        if used + len > max_chars {
            break;
        }
        used += len + 1;
        lines.push(line);
    }
    lines.join("\n")
}
