use kb_vector_store::{
    cosine_similarity, Bm25Scope, Bm25State, NewRecord, SearchOptions, StoreOptions, VectorStore,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn fake_embedding(dim: usize, seed: f32) -> Vec<f32> {
    let raw: Vec<f32> = (0..dim)
        .map(|i| (seed + i as f32).sin() + (seed * (i as f32 + 1.0)).cos())
        .collect();
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    raw.into_iter().map(|v| v / norm.max(f32::EPSILON)).collect()
}

fn pdf_record(id: &str, doc: &str, text: &str, embedding: Vec<f32>) -> NewRecord {
    NewRecord::new(id, doc, text, embedding).namespace("pdf")
}

fn seeded_store() -> VectorStore {
    let mut store = VectorStore::in_memory();
    store
        .upsert(vec![
            pdf_record(
                "d1:c1",
                "d1",
                "The quick brown fox jumps over the lazy dog",
                fake_embedding(8, 1.0),
            ),
            pdf_record(
                "d1:c2",
                "d1",
                "A slow green turtle rests under a warm sun",
                fake_embedding(8, 2.0),
            ),
            pdf_record(
                "d2:c1",
                "d2",
                "Quantum mechanics explores particles and waves",
                fake_embedding(8, 3.0),
            ),
        ])
        .unwrap();
    store
}

#[test]
fn hybrid_search_ranks_lexical_and_semantic_match_first() {
    let mut store = seeded_store();
    let options = SearchOptions::default()
        .namespace("pdf")
        .query("fox over dog")
        .top_k(2)
        .alpha(0.6);
    let hits = store
        .search_hybrid(&fake_embedding(8, 1.0), &options)
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, "d1:c1");
    assert!(hits[0].lexical > 0.0);
    assert!(hits[0].score >= hits[1].score);
}

#[test]
fn doc_filter_excludes_the_semantically_best_record() {
    let mut store = seeded_store();
    let query = fake_embedding(8, 3.0);

    // Unfiltered, d2:c1 is the closest vector.
    let unfiltered = store
        .search_hybrid(&query, &SearchOptions::default().namespace("pdf").alpha(1.0))
        .unwrap();
    assert_eq!(unfiltered[0].record.id, "d2:c1");
    let best = store
        .records()
        .iter()
        .map(|r| cosine_similarity(&query, &r.embedding).unwrap())
        .fold(f32::MIN, f32::max);
    assert!((unfiltered[0].semantic - best).abs() < 1e-6);

    let filtered = store
        .search_hybrid(
            &query,
            &SearchOptions::default()
                .namespace("pdf")
                .doc_ids(["d1"])
                .alpha(1.0),
        )
        .unwrap();
    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|hit| hit.record.doc_id == "d1"));
}

#[test]
fn empty_doc_filter_means_no_restriction() {
    let mut store = seeded_store();
    let hits = store
        .search_hybrid(
            &fake_embedding(8, 1.0),
            &SearchOptions::default().doc_ids(Vec::<String>::new()),
        )
        .unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn namespace_filter_is_exact() {
    let mut store = seeded_store();
    store
        .upsert(vec![NewRecord::new("n1:c1", "n1", "fox notes", fake_embedding(8, 1.0))
            .namespace("notes")])
        .unwrap();

    let hits = store
        .search_hybrid(
            &fake_embedding(8, 1.0),
            &SearchOptions::default().namespace("notes").query("fox"),
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, "n1:c1");

    let none = store
        .search_hybrid(
            &fake_embedding(8, 1.0),
            &SearchOptions::default().namespace("pd"),
        )
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn namespace_scoped_statistics_change_lexical_scores() {
    let records = vec![
        pdf_record("d1:c1", "d1", "fox den", fake_embedding(4, 1.0)),
        pdf_record("d1:c2", "d1", "owl nest", fake_embedding(4, 2.0)),
        NewRecord::new("n1:c1", "n1", "fox", fake_embedding(4, 3.0)).namespace("notes"),
        NewRecord::new("n1:c2", "n1", "fox", fake_embedding(4, 4.0)).namespace("notes"),
        NewRecord::new("n1:c3", "n1", "fox", fake_embedding(4, 5.0)).namespace("notes"),
    ];
    let options = SearchOptions::default().namespace("pdf").query("fox");

    let mut global = VectorStore::in_memory();
    global.upsert(records.clone()).unwrap();
    let global_hit = global
        .search_hybrid(&fake_embedding(4, 1.0), &options)
        .unwrap()
        .into_iter()
        .find(|h| h.record.id == "d1:c1")
        .unwrap();

    let mut scoped = VectorStore::with_options(
        None::<&std::path::Path>,
        StoreOptions {
            bm25_scope: Bm25Scope::Namespace,
        },
    );
    scoped.upsert(records).unwrap();
    let scoped_hit = scoped
        .search_hybrid(&fake_embedding(4, 1.0), &options)
        .unwrap()
        .into_iter()
        .find(|h| h.record.id == "d1:c1")
        .unwrap();

    // "fox" is common store-wide but rare inside the pdf namespace.
    assert!(scoped_hit.lexical > global_hit.lexical);
}

#[test]
fn reader_picks_up_another_writers_snapshot() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vectors.json");

    let mut reader = VectorStore::open(&path);
    reader
        .upsert(vec![pdf_record(
            "d1:c1",
            "d1",
            "alpha beta",
            fake_embedding(8, 1.0),
        )])
        .unwrap();

    let zebra = fake_embedding(8, 7.0);
    let options = SearchOptions::default()
        .namespace("pdf")
        .doc_ids(["d9"])
        .query("zebra");
    assert!(reader.search_hybrid(&zebra, &options).unwrap().is_empty());
    assert_eq!(reader.bm25_state(), Bm25State::Clean);

    let mut writer = VectorStore::open(&path);
    assert_eq!(writer.len(), 1);
    writer
        .upsert(vec![pdf_record("d9:c1", "d9", "zebra stripes", zebra.clone())])
        .unwrap();

    let hits = reader.search_hybrid(&zebra, &options).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, "d9:c1");
    assert_eq!(reader.len(), 2);
}

#[test]
fn full_reload_discards_local_only_records() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vectors.json");

    let mut first = VectorStore::open(&path);
    first
        .upsert(vec![pdf_record("d1:c1", "d1", "alpha", fake_embedding(4, 1.0))])
        .unwrap();

    let mut second = VectorStore::open(&path);
    second.clear_namespace(None).unwrap();
    second
        .upsert(vec![
            pdf_record("d2:c1", "d2", "beta", fake_embedding(4, 2.0)),
            pdf_record("d2:c2", "d2", "gamma", fake_embedding(4, 3.0)),
        ])
        .unwrap();

    assert!(first.reload_if_stale());
    assert!(first.get("d1:c1").is_none());
    assert_eq!(first.len(), 2);
}

#[test]
fn upserting_distinct_ids_grows_store_to_that_count() {
    let mut store = VectorStore::in_memory();
    for k in 0..25 {
        store
            .upsert(vec![pdf_record(
                &format!("d{}:c{}", k % 3, k),
                &format!("d{}", k % 3),
                "text",
                vec![1.0, 0.0],
            )])
            .unwrap();
    }
    assert_eq!(store.len(), 25);
}

proptest! {
    #[test]
    fn proptest_doc_filter_only_returns_allowed_documents(
        allowed in proptest::collection::hash_set(0usize..6, 1..4),
        seed in 0.0f32..10.0,
        top_k in 1usize..12,
    ) {
        let mut store = VectorStore::in_memory();
        let records: Vec<NewRecord> = (0..12)
            .map(|i| {
                pdf_record(
                    &format!("d{}:c{}", i % 6, i),
                    &format!("d{}", i % 6),
                    &format!("chunk {i} about topic {}", i % 4),
                    fake_embedding(6, i as f32),
                )
            })
            .collect();
        store.upsert(records).unwrap();

        let allowed: Vec<String> = allowed.into_iter().map(|d| format!("d{d}")).collect();
        let options = SearchOptions::default()
            .doc_ids(allowed.clone())
            .query("topic chunk")
            .top_k(top_k);
        let hits = store.search_hybrid(&fake_embedding(6, seed), &options).unwrap();

        prop_assert!(hits.len() <= top_k);
        for hit in &hits {
            prop_assert!(allowed.contains(&hit.record.doc_id));
        }
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn proptest_upsert_same_id_keeps_size(texts in proptest::collection::vec("[a-z ]{1,20}", 1..10)) {
        let mut store = VectorStore::in_memory();
        for text in &texts {
            store.upsert(vec![pdf_record("d1:c1", "d1", text, vec![1.0])]).unwrap();
        }
        prop_assert_eq!(store.len(), 1);
        prop_assert_eq!(&store.get("d1:c1").unwrap().text, texts.last().unwrap());
    }
}
