mod answer;
mod config;
mod context;
mod error;
mod fusion;
mod ingest;
mod pipeline;
mod provider;
mod query_expansion;

pub use answer::{
    build_answer_prompt, synthesize_answer, Answer, ANSWER_SYSTEM_PROMPT, NO_CONTEXT_ANSWER,
};
pub use config::{
    RetrievalConfig, DEFAULT_ANSWER_MAX_TOKENS, DEFAULT_ANSWER_TEMPERATURE,
    DEFAULT_EMBED_BATCH_SIZE, DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_VARIANT_COUNT,
};
pub use context::{format_context_line, stitch_context, Source, MISSING_PAGE};
pub use error::{Result, RetrievalError};
pub use fusion::merge_max;
pub use ingest::{ingest_document, Chunk, IngestReport, IngestRequest};
pub use pipeline::{
    HitDebug, RetrievalDebug, Retrieval, RetrieveRequest, Retriever, BROADENED_MIN_TOP_K,
    BROADENED_MIN_VARIANTS,
};
pub use provider::{EmbeddingProvider, GenerationRequest, TextGenerator};
pub use query_expansion::{
    QueryExpander, DEFAULT_EXPANSION_MAX_TOKENS, DEFAULT_EXPANSION_TEMPERATURE,
};
