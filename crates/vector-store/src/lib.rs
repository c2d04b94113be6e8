//! # KB Vector Store
//!
//! In-memory record store for embedded document chunks with hybrid
//! (semantic + BM25) ranking and a JSON snapshot shared between processes.
//!
//! ## Features
//!
//! - **Hybrid ranking**: cosine similarity fused with a logistic-squashed BM25 score
//! - **Lazy BM25 statistics**: recomputed on the first search after a mutation
//! - **Write-through snapshot**: every mutation rewrites the JSON file
//! - **Multi-process coherence**: searches reload the snapshot when it changed on disk
//!
//! ## Architecture
//!
//! ```text
//! NewRecord[]
//!     │
//!     ├──> Tokenizer
//!     │      └─> cached term frequencies
//!     │
//!     ├──> VectorStore (ordered, id-keyed)
//!     │      ├─> BM25 index (Clean / Dirty)
//!     │      └─> Hybrid scorer
//!     │
//!     └──> Snapshot (JSON, advisory-locked atomic replace)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use kb_vector_store::{NewRecord, SearchOptions, VectorStore};
//!
//! fn main() -> kb_vector_store::Result<()> {
//!     let mut store = VectorStore::open(".data/vectors.json");
//!     store.upsert(vec![
//!         NewRecord::new("d1:p1_c0", "d1", "The quick brown fox", vec![0.1, 0.9]).namespace("pdf"),
//!     ])?;
//!
//!     let options = SearchOptions::default().namespace("pdf").query("brown fox");
//!     for hit in store.search_hybrid(&[0.1, 0.8], &options)? {
//!         println!("{}: {:.3}", hit.record.id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

mod bm25;
mod error;
mod hybrid;
mod manifest;
mod paths;
mod snapshot;
mod store;
mod tokenizer;
mod types;

pub use bm25::{Bm25Index, Bm25Scope, Bm25State, CorpusStats, B, K1};
pub use error::{Result, VectorStoreError};
pub use hybrid::{
    cosine_similarity, effective_alpha, fuse, normalize_bm25, score_candidates, COSINE_EPSILON,
};
pub use manifest::{DocumentEntry, DocumentManifest, MANIFEST_SCHEMA_VERSION};
pub use paths::{
    config_path, default_data_dir, manifest_path, snapshot_path, CONFIG_FILE_NAME, DATA_DIR_ENV,
    DEFAULT_DATA_DIR_NAME, MANIFEST_FILE_NAME, SNAPSHOT_FILE_NAME,
};
pub use snapshot::{Snapshot, SnapshotStamp, SNAPSHOT_SCHEMA_VERSION};
pub use store::{StoreOptions, VectorStore};
pub use tokenizer::{document_length, term_frequencies, tokenize, TermFrequency};
pub use types::{
    DocumentCount, DocumentSummary, NewRecord, ScoredRecord, SearchOptions, StoreInfo,
    VectorRecord, DEFAULT_ALPHA, DEFAULT_TOP_K,
};
