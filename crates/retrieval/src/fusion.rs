use kb_vector_store::ScoredRecord;
use std::collections::HashMap;

/// Pools hits from several query variants, keeping one instance per record
/// id: the one with the highest fused score. Scores are never summed or
/// averaged, so matching several rephrasings earns no bonus.
///
/// Returns the `top_k` best, highest first; ties keep first-seen order.
#[must_use]
pub fn merge_max(hits: impl IntoIterator<Item = ScoredRecord>, top_k: usize) -> Vec<ScoredRecord> {
    let mut pooled: Vec<ScoredRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in hits {
        match index.get(&hit.record.id) {
            Some(&idx) => {
                if hit.score > pooled[idx].score {
                    pooled[idx] = hit;
                }
            }
            None => {
                index.insert(hit.record.id.clone(), pooled.len());
                pooled.push(hit);
            }
        }
    }

    pooled.sort_by(|a, b| b.score.total_cmp(&a.score));
    pooled.truncate(top_k);
    pooled
}
