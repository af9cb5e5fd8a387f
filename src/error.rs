use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the ingestion and retrieval core.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing model dimension, missing credentials or an invalid limit.
    #[error("configuration error: {0}")]
    Config(String),

    /// A batch item is larger than the provider accepts.
    #[error("input {index} has {tokens} tokens, above the per-item limit of {limit}")]
    TokenLimit {
        index: usize,
        tokens: usize,
        limit: usize,
    },

    #[error("embedding provider returned {actual} vectors for {expected} inputs")]
    EmbeddingCount { expected: usize, actual: usize },

    #[error("embedding {index} has dimension {actual}, expected {expected}")]
    EmbeddingDimension {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Vector store metadata that does not match the chunk record shape.
    #[error("malformed chunk metadata for {id}: {reason}")]
    Metadata { id: String, reason: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("lexical index error: {0}")]
    Lexical(String),

    /// A background ingestion task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Provider(err.to_string())
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Error::Lexical(err.to_string())
    }
}

/// Stage of an ingestion run, reported alongside failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Chunking,
    Embedding,
    Upserting,
    Persisting,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IngestStage::Chunking => "chunking",
            IngestStage::Embedding => "embedding",
            IngestStage::Upserting => "upserting",
            IngestStage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// An ingestion failure with the stage it happened in and the number of
/// records already committed to the vector store.
#[derive(Debug, Error)]
#[error("ingestion failed during {stage} after {committed} committed records: {source}")]
pub struct IngestError {
    pub stage: IngestStage,
    pub committed: usize,
    #[source]
    pub source: Error,
}

impl IngestError {
    pub fn new(stage: IngestStage, committed: usize, source: Error) -> Self {
        Self {
            stage,
            committed,
            source,
        }
    }
}
