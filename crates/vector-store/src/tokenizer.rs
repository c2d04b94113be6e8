//! Text normalization shared by indexing and querying.

use std::collections::BTreeMap;

/// Cached per-record token counts.
pub type TermFrequency = BTreeMap<String, u32>;

/// Lower-cases `text`, treats every character outside `[a-z0-9]` as a
/// separator and returns the remaining non-empty tokens in order.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
                ch
            } else {
                ' '
            }
        })
        .collect();

    normalized
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[must_use]
pub fn term_frequencies(text: &str) -> TermFrequency {
    let mut freq = TermFrequency::new();
    for token in tokenize(text) {
        *freq.entry(token).or_insert(0) += 1;
    }
    freq
}

/// Document length as used by BM25: the total number of tokens.
#[must_use]
pub fn document_length(freq: &TermFrequency) -> u32 {
    freq.values().sum()
}
