use crate::bm25::{Bm25Index, Bm25Scope, Bm25State};
use crate::error::Result;
use crate::hybrid::score_candidates;
use crate::snapshot::{Snapshot, SnapshotStamp};
use crate::types::{
    DocumentCount, DocumentSummary, NewRecord, ScoredRecord, SearchOptions, StoreInfo,
    VectorRecord,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub bm25_scope: Bm25Scope,
}

/// Ordered, id-keyed collection of records with hybrid search.
///
/// The store is plain data mutated through `&mut self`; callers that share
/// it between threads wrap it in their own lock. When a snapshot path is
/// configured every mutation is written through to disk and every search
/// first checks whether another process replaced the snapshot.
#[derive(Debug)]
pub struct VectorStore {
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
    bm25: Bm25Index,
    snapshot: Option<Snapshot>,
    last_loaded: Option<SnapshotStamp>,
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl VectorStore {
    /// Store without a snapshot; persistence is a no-op.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_options(None::<&Path>, StoreOptions::default())
    }

    /// Store backed by the snapshot at `path`, loaded now if it exists.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::with_options(Some(path), StoreOptions::default())
    }

    pub fn with_options(path: Option<impl AsRef<Path>>, options: StoreOptions) -> Self {
        let snapshot = path.map(Snapshot::new);
        let mut store = Self {
            records: Vec::new(),
            positions: HashMap::new(),
            bm25: Bm25Index::new(options.bm25_scope),
            snapshot,
            last_loaded: None,
        };

        let existing = store.snapshot.as_ref().map(|snapshot| {
            log::info!("Initializing VectorStore at {:?}", snapshot.path());
            snapshot.exists()
        });
        if existing == Some(true) {
            store.reload_from_disk();
        }
        store
    }

    /// Inserts new ids at the end and replaces existing ids in place.
    /// Returns the number of records written.
    pub fn upsert(&mut self, records: impl IntoIterator<Item = NewRecord>) -> Result<usize> {
        let written = self.insert_records(records);
        log::debug!("Upserted {written} records (total {})", self.records.len());
        self.persist()?;
        Ok(written)
    }

    /// Drops every record of `doc_id`, then upserts `records`, with a single
    /// snapshot write. Returns the number of records dropped.
    pub fn replace_document(
        &mut self,
        doc_id: &str,
        records: impl IntoIterator<Item = NewRecord>,
    ) -> Result<usize> {
        let removed = self.retain(|record| record.doc_id != doc_id);
        let written = self.insert_records(records);
        log::info!("Replaced document {doc_id}: dropped {removed}, wrote {written} records");
        self.persist()?;
        Ok(removed)
    }

    fn insert_records(&mut self, records: impl IntoIterator<Item = NewRecord>) -> usize {
        let mut written = 0usize;
        for record in records {
            let record = VectorRecord::from(record);
            match self.positions.get(&record.id) {
                Some(&idx) => self.records[idx] = record,
                None => {
                    self.positions.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
            written += 1;
        }
        self.bm25.invalidate();
        written
    }

    /// Removes every record belonging to one of `doc_ids`. Returns the
    /// number of records removed.
    pub fn delete_by_doc_ids<S: AsRef<str>>(&mut self, doc_ids: &[S]) -> Result<usize> {
        let doc_ids: HashSet<&str> = doc_ids.iter().map(|id| id.as_ref()).collect();
        let removed = self.retain(|record| !doc_ids.contains(record.doc_id.as_str()));
        log::info!("Deleted {removed} records for {} documents", doc_ids.len());
        self.persist()?;
        Ok(removed)
    }

    /// Removes the records of `namespace`, or every record when `None`.
    pub fn clear_namespace(&mut self, namespace: Option<&str>) -> Result<usize> {
        let removed = match namespace {
            Some(ns) => self.retain(|record| record.namespace.as_deref() != Some(ns)),
            None => self.retain(|_| false),
        };
        log::info!("Cleared {removed} records (namespace: {namespace:?})");
        self.persist()?;
        Ok(removed)
    }

    /// Hybrid semantic + BM25 search.
    ///
    /// Reloads the snapshot first when another writer replaced it.
    pub fn search_hybrid(
        &mut self,
        query_embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredRecord>> {
        self.reload_if_stale();

        let stats = self
            .bm25
            .fresh_stats(&self.records, options.namespace.as_deref());
        let hits = score_candidates(query_embedding, stats, &self.records, options)?;

        log::debug!(
            "Hybrid search over {} records returned {} hits (top_k {}, alpha {})",
            self.records.len(),
            hits.len(),
            options.top_k,
            options.alpha
        );
        Ok(hits)
    }

    /// Reloads the whole collection if the snapshot on disk is newer than
    /// the one last loaded or written by this instance. Returns whether a
    /// reload happened.
    pub fn reload_if_stale(&mut self) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        let current = match snapshot.stamp() {
            Ok(Some(stamp)) => stamp,
            Ok(None) => return false,
            Err(err) => {
                log::warn!("Failed to stat snapshot {:?}: {err}", snapshot.path());
                return false;
            }
        };
        let stale = self
            .last_loaded
            .map_or(true, |loaded| current.is_newer_than(&loaded));
        if !stale {
            return false;
        }

        log::debug!("Snapshot {:?} changed on disk, reloading", snapshot.path());
        self.reload_from_disk()
    }

    fn reload_from_disk(&mut self) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        let stamp = match snapshot.stamp() {
            Ok(Some(stamp)) => stamp,
            Ok(None) => return false,
            Err(err) => {
                log::warn!("Failed to stat snapshot {:?}: {err}", snapshot.path());
                return false;
            }
        };

        match snapshot.read() {
            Ok(records) => {
                log::info!(
                    "Loaded {} records from {:?}",
                    records.len(),
                    snapshot.path()
                );
                self.last_loaded = Some(stamp);
                self.replace_records(records);
                true
            }
            Err(err) => {
                // Remember the stamp so the same broken file is not retried
                // on every search.
                log::warn!(
                    "Failed to load vector store snapshot {:?}: {err}; keeping {} in-memory records",
                    snapshot.path(),
                    self.records.len()
                );
                self.last_loaded = Some(stamp);
                false
            }
        }
    }

    fn replace_records(&mut self, records: Vec<VectorRecord>) {
        self.records = Vec::with_capacity(records.len());
        self.positions.clear();
        for record in records {
            // Later duplicates replace earlier ones, as an upsert would.
            match self.positions.get(&record.id) {
                Some(&idx) => self.records[idx] = record,
                None => {
                    self.positions.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }
        self.bm25.invalidate();
    }

    fn retain(&mut self, keep: impl Fn(&VectorRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|record| keep(record));
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.id.clone(), idx))
            .collect();
        self.bm25.invalidate();
        before - self.records.len()
    }

    fn persist(&mut self) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let stamp = snapshot.write(&self.records)?;
        self.last_loaded = Some(stamp);
        log::debug!(
            "Persisted {} records to {:?}",
            self.records.len(),
            snapshot.path()
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.positions.get(id).map(|&idx| &self.records[idx])
    }

    #[must_use]
    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.snapshot.as_ref().map(Snapshot::path)
    }

    #[must_use]
    pub fn bm25_state(&self) -> Bm25State {
        self.bm25.state()
    }

    #[must_use]
    pub fn bm25_scope(&self) -> Bm25Scope {
        self.bm25.scope()
    }

    /// Record and per-document chunk counts, documents in first-seen order.
    #[must_use]
    pub fn info(&self) -> StoreInfo {
        let mut documents: Vec<DocumentCount> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            match index.get(record.doc_id.as_str()) {
                Some(&idx) => documents[idx].chunks += 1,
                None => {
                    index.insert(record.doc_id.as_str(), documents.len());
                    documents.push(DocumentCount {
                        doc_id: record.doc_id.clone(),
                        chunks: 1,
                    });
                }
            }
        }

        StoreInfo {
            path: self.path().map(Path::to_path_buf),
            records: self.records.len(),
            documents,
        }
    }

    /// Documents present in the store, optionally restricted to a namespace.
    #[must_use]
    pub fn list_documents(&self, namespace: Option<&str>) -> Vec<DocumentSummary> {
        let mut documents: Vec<DocumentSummary> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            if let Some(ns) = namespace {
                if record.namespace.as_deref() != Some(ns) {
                    continue;
                }
            }
            match index.get(record.doc_id.as_str()) {
                Some(&idx) => documents[idx].chunks += 1,
                None => {
                    index.insert(record.doc_id.as_str(), documents.len());
                    documents.push(DocumentSummary {
                        doc_id: record.doc_id.clone(),
                        namespace: record.namespace.clone(),
                        chunks: 1,
                    });
                }
            }
        }
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorStoreError;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(id: &str, doc: &str, text: &str, embedding: Vec<f32>) -> NewRecord {
        NewRecord::new(id, doc, text, embedding).namespace("pdf")
    }

    #[test]
    fn upsert_replaces_in_place_and_appends_new_ids() {
        let mut store = VectorStore::in_memory();
        store
            .upsert(vec![
                record("d1:c1", "d1", "first", vec![1.0, 0.0]),
                record("d1:c2", "d1", "second", vec![0.0, 1.0]),
            ])
            .unwrap();
        store
            .upsert(vec![
                record("d1:c1", "d1", "first revised", vec![1.0, 1.0]),
                record("d2:c1", "d2", "third", vec![1.0, 0.0]),
            ])
            .unwrap();

        let ids: Vec<&str> = store.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d1:c1", "d1:c2", "d2:c1"]);
        assert_eq!(store.get("d1:c1").unwrap().text, "first revised");
        assert_eq!(
            store.get("d1:c1").unwrap().term_frequency.get("revised"),
            Some(&1)
        );
    }

    #[test]
    fn repeated_upserts_of_one_id_keep_size_and_latest_content() {
        let mut store = VectorStore::in_memory();
        for round in 0..10 {
            store
                .upsert(vec![record("d1:c1", "d1", &format!("round {round}"), vec![1.0])])
                .unwrap();
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("d1:c1").unwrap().text, "round 9");
    }

    #[test]
    fn delete_and_clear_update_positions() {
        let mut store = VectorStore::in_memory();
        store
            .upsert(vec![
                record("d1:c1", "d1", "a", vec![1.0]),
                record("d2:c1", "d2", "b", vec![1.0]),
                NewRecord::new("n1:c1", "n1", "c", vec![1.0]).namespace("notes"),
            ])
            .unwrap();

        assert_eq!(store.delete_by_doc_ids(&["d1"]).unwrap(), 1);
        assert!(store.get("d1:c1").is_none());
        assert_eq!(store.get("d2:c1").unwrap().doc_id, "d2");

        assert_eq!(store.clear_namespace(Some("pdf")).unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("n1:c1").unwrap().text, "c");

        assert_eq!(store.clear_namespace(None).unwrap(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn replace_document_swaps_chunks_and_keeps_other_documents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.json");
        let mut store = VectorStore::open(&path);
        store
            .upsert(vec![
                record("d1:c1", "d1", "old one", vec![1.0]),
                record("d1:c2", "d1", "old two", vec![1.0]),
                record("d2:c1", "d2", "other", vec![1.0]),
            ])
            .unwrap();

        let removed = store
            .replace_document("d1", vec![record("d1:c9", "d1", "fresh", vec![1.0])])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(!store.reload_if_stale());

        let reopened = VectorStore::open(&path);
        let ids: Vec<&str> = reopened.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d2:c1", "d1:c9"]);
        assert_eq!(reopened.get("d1:c9").unwrap().text, "fresh");
    }

    #[test]
    fn failed_replace_leaves_snapshot_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.json");
        let mut store = VectorStore::open(&path);
        store
            .upsert(vec![record("d1:c1", "d1", "original", vec![1.0])])
            .unwrap();

        // A directory in place of the temp file makes the next write fail.
        std::fs::create_dir(tmp.path().join("vectors.json.tmp")).unwrap();
        assert!(store
            .replace_document("d1", vec![record("d1:c2", "d1", "fresh", vec![1.0])])
            .is_err());

        let on_disk = VectorStore::open(&path);
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk.get("d1:c1").unwrap().text, "original");
    }

    #[test]
    fn mutations_mark_bm25_dirty_and_search_cleans_it() {
        let mut store = VectorStore::in_memory();
        store
            .upsert(vec![record("d1:c1", "d1", "fox", vec![1.0, 0.0])])
            .unwrap();
        assert_eq!(store.bm25_state(), Bm25State::Dirty);

        store
            .search_hybrid(&[1.0, 0.0], &SearchOptions::default().query("fox"))
            .unwrap();
        assert_eq!(store.bm25_state(), Bm25State::Clean);

        store.delete_by_doc_ids(&["missing"]).unwrap();
        assert_eq!(store.bm25_state(), Bm25State::Dirty);
    }

    #[test]
    fn search_rejects_mismatched_query_dimension() {
        let mut store = VectorStore::in_memory();
        store
            .upsert(vec![record("d1:c1", "d1", "fox", vec![1.0, 0.0, 0.0])])
            .unwrap();
        let err = store
            .search_hybrid(&[1.0, 0.0], &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn search_on_empty_store_is_empty() {
        let mut store = VectorStore::in_memory();
        let hits = store
            .search_hybrid(&[1.0], &SearchOptions::default().query("anything"))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn write_through_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.json");
        {
            let mut store = VectorStore::open(&path);
            store
                .upsert(vec![
                    record("d1:c1", "d1", "alpha", vec![1.0, 0.0]).page(1),
                    record("d2:c1", "d2", "beta", vec![0.0, 1.0]).page(4),
                ])
                .unwrap();
            store.delete_by_doc_ids(&["d2"]).unwrap();
        }

        let reopened = VectorStore::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("d1:c1").unwrap().page(), Some(1));
        assert_eq!(reopened.bm25_state(), Bm25State::Dirty);
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut store = VectorStore::open(&path);
        assert!(store.is_empty());
        assert!(!store.reload_if_stale());

        // The store keeps working and overwrites the broken file.
        store
            .upsert(vec![record("d1:c1", "d1", "alpha", vec![1.0])])
            .unwrap();
        assert_eq!(VectorStore::open(&path).len(), 1);
    }

    #[test]
    fn own_writes_do_not_trigger_reload() {
        let tmp = TempDir::new().unwrap();
        let mut store = VectorStore::open(tmp.path().join("vectors.json"));
        store
            .upsert(vec![record("d1:c1", "d1", "alpha", vec![1.0])])
            .unwrap();
        assert!(!store.reload_if_stale());
    }

    #[test]
    fn info_and_document_listing() {
        let mut store = VectorStore::in_memory();
        store
            .upsert(vec![
                record("d1:c1", "d1", "a", vec![1.0]),
                record("d2:c1", "d2", "b", vec![1.0]),
                record("d1:c2", "d1", "c", vec![1.0]),
                NewRecord::new("n1:c1", "n1", "d", vec![1.0]).namespace("notes"),
            ])
            .unwrap();

        let info = store.info();
        assert_eq!(info.records, 4);
        assert_eq!(info.path, None);
        assert_eq!(
            info.documents,
            vec![
                DocumentCount {
                    doc_id: "d1".into(),
                    chunks: 2
                },
                DocumentCount {
                    doc_id: "d2".into(),
                    chunks: 1
                },
                DocumentCount {
                    doc_id: "n1".into(),
                    chunks: 1
                },
            ]
        );

        let pdf_docs = store.list_documents(Some("pdf"));
        assert_eq!(pdf_docs.len(), 2);
        assert_eq!(pdf_docs[0].chunks, 2);
        assert_eq!(pdf_docs[0].namespace.as_deref(), Some("pdf"));
        assert_eq!(store.list_documents(None).len(), 3);
    }
}
