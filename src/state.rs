use anyhow::Context;
use std::sync::Arc;

use crate::chunking::{TiktokenTokenizer, Tokenizer};
use crate::config::{Config, VectorBackend};
use crate::ingest::IngestionPipeline;
use crate::llm::embeddings::{build_provider, BatchEmbedder};
use crate::search::bm25::{Bm25Ranker, LexicalRanker, NoopRanker};
use crate::search::hybrid::HybridRetriever;
use crate::search::vector::{MemoryVectorIndex, PineconeIndex, VectorIndex};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub retriever: Arc<HybridRetriever>,
    pub pipeline: Arc<IngestionPipeline>,
    /// Bounds background ingestion started over HTTP.
    pub ingest_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config.repos_dir())
            .with_context(|| format!("Failed to create {}", config.repos_dir().display()))?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let tokenizer: Arc<dyn Tokenizer> =
            Arc::new(TiktokenTokenizer::cl100k().context("Failed to load cl100k tokenizer")?);
        let provider = build_provider(http_client.clone(), &config.embedding)?;
        let embedder = Arc::new(BatchEmbedder::new(provider, tokenizer.clone(), &config.embedding)?);

        let vectors: Arc<dyn VectorIndex> = match config.vector.backend {
            VectorBackend::Pinecone => {
                let host = config
                    .vector
                    .index_host
                    .as_deref()
                    .context("PINECONE_INDEX_HOST is not set")?;
                let api_key = config
                    .vector
                    .api_key
                    .clone()
                    .context("PINECONE_API_KEY is not set")?;
                Arc::new(PineconeIndex::new(http_client.clone(), host, api_key))
            }
            VectorBackend::Memory => Arc::new(
                MemoryVectorIndex::open_or_create(&config.vector_dir())
                    .context("Failed to open vector store")?,
            ),
        };

        let lexical: Arc<dyn LexicalRanker> = if config.retrieval.lexical_enabled {
            Arc::new(Bm25Ranker::new(config.repos_dir()))
        } else {
            tracing::info!("Lexical search disabled; using vector ranking only");
            Arc::new(NoopRanker)
        };

        let retriever = Arc::new(HybridRetriever::new(
            embedder.clone(),
            lexical,
            vectors.clone(),
            config.retrieval.clone(),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            tokenizer,
            embedder,
            vectors,
            config.ingest.clone(),
            config.repos_dir(),
        ));

        Ok(Self::from_parts(config, retriever, pipeline))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        config: Config,
        retriever: Arc<HybridRetriever>,
        pipeline: Arc<IngestionPipeline>,
    ) -> Self {
        let permits = config.ingest.effective_concurrency();
        Self {
            config,
            retriever,
            pipeline,
            ingest_semaphore: Arc::new(tokio::sync::Semaphore::new(permits)),
        }
    }
}
