use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] kb_vector_store::VectorStoreError),

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("Generation provider error: {0}")]
    Generation(String),

    #[error("Empty query")]
    EmptyQuery,

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}
