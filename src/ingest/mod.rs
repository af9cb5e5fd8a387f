//! Repository ingestion: chunk → embed → fit metadata → upsert.

pub mod fit;

use std::path::PathBuf;
use std::sync::Arc;

use crate::chunking::{chunk_file, ChunkerOptions, Tokenizer};
use crate::config::IngestConfig;
use crate::error::{Error, IngestError, IngestStage};
use crate::llm::embeddings::BatchEmbedder;
use crate::models::{is_valid_repository_id, Chunk, ChunkMetadata, IndexedRecord, IngestReport, RepositorySnapshot};
use crate::search::bm25::{lexical_path, write_documents, LexicalDocument};
use crate::search::vector::{VectorIndex, DEFAULT_NAMESPACE};

pub use fit::{fit_to_budget, serialized_size, DEFAULT_METADATA_BUDGET};

pub struct IngestionPipeline {
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Arc<BatchEmbedder>,
    vectors: Arc<dyn VectorIndex>,
    config: IngestConfig,
    /// Parent of the per-repository workdirs holding `.bm25.jsonl`
    repos_dir: PathBuf,
}

impl IngestionPipeline {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Arc<BatchEmbedder>,
        vectors: Arc<dyn VectorIndex>,
        config: IngestConfig,
        repos_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tokenizer,
            embedder,
            vectors,
            config,
            repos_dir: repos_dir.into(),
        }
    }

    /// Ingest one repository snapshot.
    ///
    /// Re-running on unchanged input overwrites the same ids. A failed upsert
    /// batch stops the run; batches already written stay in place.
    pub async fn ingest(&self, snapshot: &RepositorySnapshot) -> Result<IngestReport, IngestError> {
        let repo = snapshot.repository_id.as_str();
        if !is_valid_repository_id(repo) {
            return Err(IngestError::new(
                IngestStage::Chunking,
                0,
                Error::Config(format!("invalid repository id {repo:?}")),
            ));
        }

        // ── Chunk ────────────────────────────────────────────
        let options = ChunkerOptions::new(self.config.max_chunk_tokens);
        let mut chunks: Vec<Chunk> = Vec::new();
        for file in &snapshot.files {
            let file_chunks = chunk_file(repo, &file.path, &file.text, options, self.tokenizer.as_ref())
                .map_err(|e| IngestError::new(IngestStage::Chunking, 0, e))?;
            chunks.extend(file_chunks);
        }
        tracing::info!(
            "Created {} chunks from {} files for {repo}",
            chunks.len(),
            snapshot.files.len()
        );

        // ── Embed ────────────────────────────────────────────
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_all(&texts)
            .await
            .map_err(|e| IngestError::new(IngestStage::Embedding, 0, e))?;
        self.check_dimensions(&embeddings, chunks.len())
            .map_err(|e| IngestError::new(IngestStage::Embedding, 0, e))?;

        // ── Fit metadata ─────────────────────────────────────
        let mut truncated_records = 0usize;
        let records: Vec<IndexedRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| {
                let natural = ChunkMetadata::from_chunk(chunk, self.embedder.model(), &snapshot.tech_stack);
                let metadata = fit_to_budget(&natural, self.config.metadata_byte_budget);
                if metadata.is_truncated() {
                    truncated_records += 1;
                }
                IndexedRecord {
                    id: chunk.id.clone(),
                    vector,
                    metadata,
                }
            })
            .collect();
        if truncated_records > 0 {
            tracing::info!("Truncated text of {truncated_records} records to fit metadata budget");
        }

        // ── Upsert ───────────────────────────────────────────
        let batch_size = self.config.upsert_batch_size.max(1);
        let total_batches = records.len().div_ceil(batch_size);
        let mut committed = 0usize;
        for (i, batch) in records.chunks(batch_size).enumerate() {
            if let Err(e) = self.upsert_batch(repo, batch).await {
                // Keep what was committed before the failure
                if let Err(flush_err) = self.vectors.flush().await {
                    tracing::warn!("Failed to flush vector store for {repo}: {flush_err}");
                }
                return Err(IngestError::new(IngestStage::Upserting, committed, e));
            }
            committed += batch.len();
            tracing::debug!("Upserted batch {}/{total_batches} for {repo}", i + 1);
        }
        self.vectors
            .flush()
            .await
            .map_err(|e| IngestError::new(IngestStage::Upserting, committed, e))?;

        // ── Lexical documents ────────────────────────────────
        let docs: Vec<LexicalDocument> = chunks
            .into_iter()
            .map(|c| LexicalDocument { id: c.id, text: c.text })
            .collect();
        let path = lexical_path(&self.repos_dir.join(repo));
        tokio::task::spawn_blocking(move || write_documents(&path, &docs))
            .await
            .map_err(|e| IngestError::new(IngestStage::Persisting, committed, Error::Task(e.to_string())))?
            .map_err(|e| IngestError::new(IngestStage::Persisting, committed, e))?;

        tracing::info!("Ingestion complete for {repo}: {committed} records");
        Ok(IngestReport {
            repository_id: repo.to_string(),
            files: snapshot.files.len(),
            chunks: records.len(),
            records_upserted: committed,
            truncated_records,
        })
    }

    async fn upsert_batch(&self, repo: &str, batch: &[IndexedRecord]) -> Result<(), Error> {
        self.vectors.upsert(repo, batch).await?;
        if self.config.mirror_to_default {
            self.vectors.upsert(DEFAULT_NAMESPACE, batch).await?;
        }
        Ok(())
    }

    fn check_dimensions(&self, embeddings: &[Vec<f32>], expected: usize) -> Result<(), Error> {
        if embeddings.len() != expected {
            return Err(Error::EmbeddingCount {
                expected,
                actual: embeddings.len(),
            });
        }
        let dimension = self.embedder.dimension();
        match embeddings.iter().position(|v| v.len() != dimension) {
            Some(index) => Err(Error::EmbeddingDimension {
                index,
                expected: dimension,
                actual: embeddings[index].len(),
            }),
            None => Ok(()),
        }
    }
}

/// Ingest several repositories, at most `config.concurrency` at a time.
/// Results are returned in input order.
pub async fn ingest_many(
    pipeline: Arc<IngestionPipeline>,
    snapshots: Vec<RepositorySnapshot>,
) -> Vec<Result<IngestReport, IngestError>> {
    let permits = pipeline.config.effective_concurrency();
    let semaphore = Arc::new(tokio::sync::Semaphore::new(permits));

    let handles: Vec<_> = snapshots
        .into_iter()
        .map(|snapshot| {
            let pipeline = pipeline.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| IngestError::new(IngestStage::Chunking, 0, Error::Task("ingest semaphore closed".to_string())))?;
                pipeline.ingest(&snapshot).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::new(IngestStage::Chunking, 0, Error::Task(e.to_string()))),
        });
    }
    results
}
