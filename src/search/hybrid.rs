use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::TtlCache;
use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::llm::embeddings::BatchEmbedder;
use crate::models::{RankedItem, RetrievedChunk, SkillMatch};
use crate::search::bm25::LexicalRanker;
use crate::search::fusion::rrf_fusion;
use crate::search::vector::{VectorIndex, VectorMatch, DEFAULT_NAMESPACE};

/// Number of file paths reported per repository in skill results.
const SKILL_SAMPLE_PATHS: usize = 5;

/// Key of the shared result cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    /// (repository, query)
    Repo(String, String),
    All(String),
    Skill(String),
}

/// Value stored in the shared result cache.
#[derive(Debug, Clone)]
pub enum CachedResult {
    Chunks(Arc<Vec<RetrievedChunk>>),
    Skills(Arc<Vec<SkillMatch>>),
}

/// Query → ranked chunks, fusing BM25 and vector rankings.
///
/// Pipeline per query:
/// 1. Result cache lookup by (repository, query).
/// 2. BM25 over the repository's lexical index (skipped for global queries).
/// 3. Query embedding through the embedding cache.
/// 4. Vector search in the repository namespace, or a wider search of the
///    default namespace when no repository is given.
/// 5. RRF fusion, then resolution of fused ids against the vector metadata.
pub struct HybridRetriever {
    embedder: Arc<BatchEmbedder>,
    lexical: Arc<dyn LexicalRanker>,
    vectors: Arc<dyn VectorIndex>,
    embedding_cache: Arc<TtlCache<(String, String), Arc<Vec<f32>>>>,
    result_cache: Arc<TtlCache<ResultKey, CachedResult>>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<BatchEmbedder>,
        lexical: Arc<dyn LexicalRanker>,
        vectors: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        let embedding_cache = Arc::new(TtlCache::new(config.embedding_ttl()));
        let result_cache = Arc::new(TtlCache::new(config.result_ttl()));
        Self::with_caches(embedder, lexical, vectors, embedding_cache, result_cache, config)
    }

    /// Build with caches supplied by the caller (shared or isolated).
    pub fn with_caches(
        embedder: Arc<BatchEmbedder>,
        lexical: Arc<dyn LexicalRanker>,
        vectors: Arc<dyn VectorIndex>,
        embedding_cache: Arc<TtlCache<(String, String), Arc<Vec<f32>>>>,
        result_cache: Arc<TtlCache<ResultKey, CachedResult>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            lexical,
            vectors,
            embedding_cache,
            result_cache,
            config,
        }
    }

    /// Ranked chunks for `query`, at most `limit`. `None` searches every
    /// repository through the default namespace.
    pub async fn retrieve(
        &self,
        repository_id: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let cache_key = match repository_id {
            Some(repo) => ResultKey::Repo(repo.to_string(), query.to_string()),
            None => ResultKey::All(query.to_string()),
        };
        if let Some(CachedResult::Chunks(hits)) = self.result_cache.get(&cache_key) {
            tracing::debug!("Result cache hit for {cache_key:?}");
            return Ok(truncated(&hits, limit));
        }

        let bm25_hits = match repository_id {
            Some(repo) => self.lexical.rank(repo, query, self.config.lexical_top_n).await,
            None => Vec::new(),
        };

        let query_embedding = self.embed_cached(query).await?;
        let (namespace, top_k) = match repository_id {
            Some(repo) => (repo, self.config.repo_top_k),
            None => (DEFAULT_NAMESPACE, self.config.global_top_k),
        };
        let matches = self.vectors.query(&query_embedding, top_k, namespace).await?;

        let vector_hits: Vec<RankedItem> = matches
            .iter()
            .map(|m| RankedItem::new(m.id.as_str(), m.score))
            .collect();
        let fused = rrf_fusion(&bm25_hits, &vector_hits, self.config.rrf_k, self.config.fused_limit);

        let by_id: HashMap<&str, &VectorMatch> = matches.iter().map(|m| (m.id.as_str(), m)).collect();
        let hits: Vec<RetrievedChunk> = fused
            .iter()
            .filter_map(|item| {
                let m = by_id.get(item.id.as_str())?;
                Some(RetrievedChunk {
                    id: item.id.clone(),
                    repository_id: m.metadata.repository_id.clone(),
                    path: m.metadata.file_path.clone(),
                    start: m.metadata.start_token,
                    end: m.metadata.end_token,
                    text: m.metadata.text.clone(),
                    truncated: m.metadata.is_truncated(),
                    score: item.score,
                })
            })
            .collect();

        tracing::info!(
            "Hybrid search '{query}': {} BM25, {} vector, {} fused",
            bm25_hits.len(),
            matches.len(),
            hits.len()
        );

        let hits = Arc::new(hits);
        self.result_cache.insert(cache_key, CachedResult::Chunks(hits.clone()));
        Ok(truncated(&hits, limit))
    }

    /// Repositories ranked by how well their chunks match a skill or
    /// technology name. Repositories already tagged with the skill get a boost.
    pub async fn retrieve_by_skill(&self, skill: &str, limit: Option<usize>) -> Result<Vec<SkillMatch>> {
        let limit = limit.unwrap_or(self.config.default_skill_limit);
        let cache_key = ResultKey::Skill(skill.to_string());
        if let Some(CachedResult::Skills(matches)) = self.result_cache.get(&cache_key) {
            tracing::debug!("Result cache hit for {cache_key:?}");
            return Ok(truncated(&matches, limit));
        }

        let embedding = self.embed_cached(skill).await?;
        let matches = self
            .vectors
            .query(&embedding, self.config.skill_top_k, DEFAULT_NAMESPACE)
            .await?;

        let ranked = rank_repositories(&matches, skill, self.config.skill_boost);
        tracing::info!("Skill search '{skill}': {} repositories from {} matches", ranked.len(), matches.len());

        let ranked = Arc::new(ranked);
        self.result_cache.insert_with_ttl(
            cache_key,
            CachedResult::Skills(ranked.clone()),
            self.config.skill_ttl(),
        );
        Ok(truncated(&ranked, limit))
    }

    async fn embed_cached(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        let key = (self.embedder.model().to_string(), text.to_string());
        if let Some(v) = self.embedding_cache.get(&key) {
            tracing::debug!("Embedding cache hit");
            return Ok(v);
        }
        let v = Arc::new(self.embedder.embed_query(text).await?);
        self.embedding_cache.insert(key, v.clone());
        Ok(v)
    }
}

fn truncated<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items.iter().take(limit).cloned().collect()
}

/// Group matches by repository and score each repository by its best match.
fn rank_repositories(matches: &[VectorMatch], skill: &str, boost: f32) -> Vec<SkillMatch> {
    struct Group {
        tech_stack: Vec<String>,
        best: f32,
        paths: Vec<String>,
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();
    for m in matches {
        let repo = &m.metadata.repository_id;
        let group = groups.entry(repo.clone()).or_insert_with(|| {
            order.push(repo.clone());
            Group {
                tech_stack: Vec::new(),
                best: f32::NEG_INFINITY,
                paths: Vec::new(),
            }
        });
        for tag in &m.metadata.tech_stack {
            if !group.tech_stack.contains(tag) {
                group.tech_stack.push(tag.clone());
            }
        }
        group.best = group.best.max(m.score);
        if group.paths.len() < SKILL_SAMPLE_PATHS && !group.paths.contains(&m.metadata.file_path) {
            group.paths.push(m.metadata.file_path.clone());
        }
    }

    let needle = skill.to_lowercase();
    let mut ranked: Vec<SkillMatch> = order
        .into_iter()
        .filter_map(|repo| {
            let group = groups.remove(&repo)?;
            let tagged = group
                .tech_stack
                .iter()
                .any(|t| t.to_lowercase().contains(&needle));
            let factor = if tagged { boost } else { 1.0 };
            Some(SkillMatch {
                repository: repo,
                tech_stack: group.tech_stack,
                score: group.best * factor,
                sample_paths: group.paths,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::test_support::CharTokenizer;
    use crate::config::EmbeddingConfig;
    use crate::error::Error;
    use crate::llm::embeddings::test_support::FakeProvider;
    use crate::llm::embeddings::EmbeddingProvider;
    use crate::models::{ChunkMetadata, IndexedRecord};
    use crate::search::bm25::NoopRanker;
    use crate::search::vector::MemoryVectorIndex;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    const DIM: usize = 8;

    /// Fixed lexical ranking, recording the repositories it was asked about.
    struct FixedRanker {
        hits: Vec<RankedItem>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LexicalRanker for FixedRanker {
        async fn rank(&self, repository_id: &str, _query: &str, limit: usize) -> Vec<RankedItem> {
            self.calls.lock().push(repository_id.to_string());
            self.hits.iter().take(limit).cloned().collect()
        }
    }

    /// Vector index that fails every query.
    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn upsert(&self, _namespace: &str, _records: &[IndexedRecord]) -> Result<()> {
            Ok(())
        }

        async fn query(&self, _vector: &[f32], _top_k: usize, _namespace: &str) -> Result<Vec<VectorMatch>> {
            Err(Error::VectorStore("connection refused".to_string()))
        }
    }

    fn embedder(provider: Arc<dyn EmbeddingProvider>) -> Arc<BatchEmbedder> {
        let config = EmbeddingConfig {
            model: "fake".to_string(),
            dimension_override: Some(DIM),
            ..Default::default()
        };
        Arc::new(BatchEmbedder::new(provider, Arc::new(CharTokenizer), &config).unwrap())
    }

    fn record(id: &str, repo: &str, path: &str, vector: Vec<f32>, tags: &[&str]) -> IndexedRecord {
        IndexedRecord {
            id: id.to_string(),
            vector,
            metadata: ChunkMetadata {
                repository_id: repo.to_string(),
                file_path: path.to_string(),
                start_token: 0,
                end_token: 5,
                token_count: 5,
                model_name: "fake".to_string(),
                text: Some(format!("body of {path}")),
                truncated: None,
                tech_stack: tags.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[i] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_fuses_lexical_and_vector() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        vectors
            .upsert(
                "acme",
                &[
                    record("v1", "acme", "src/a.rs", axis(0), &[]),
                    record("v2", "acme", "src/b.rs", axis(1), &[]),
                    record("v3", "acme", "src/c.rs", axis(2), &[]),
                ],
            )
            .await
            .unwrap();
        let lexical = Arc::new(FixedRanker {
            hits: vec![RankedItem::new("v3", 9.0), RankedItem::new("lex-only", 5.0)],
            calls: Mutex::new(Vec::new()),
        });

        let retriever = HybridRetriever::new(
            embedder(Arc::new(FakeProvider::new(DIM))),
            lexical.clone(),
            vectors,
            RetrievalConfig::default(),
        );
        let hits = retriever.retrieve(Some("acme"), "query", 10).await.unwrap();

        // v3 is in both rankings; the lexical-only id has no metadata and is dropped
        assert_eq!(hits[0].id, "v3");
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.id != "lex-only"));
        assert_eq!(*lexical.calls.lock(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn test_global_search_skips_lexical_and_uses_default_namespace() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        vectors
            .upsert(DEFAULT_NAMESPACE, &[record("g1", "acme", "src/a.rs", axis(0), &[])])
            .await
            .unwrap();
        let lexical = Arc::new(FixedRanker {
            hits: vec![RankedItem::new("g1", 1.0)],
            calls: Mutex::new(Vec::new()),
        });

        let retriever = HybridRetriever::new(
            embedder(Arc::new(FakeProvider::new(DIM))),
            lexical.clone(),
            vectors,
            RetrievalConfig::default(),
        );
        let hits = retriever.retrieve(None, "query", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repository_id, "acme");
        assert!(lexical.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_results_and_embeddings_are_cached() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        vectors
            .upsert("acme", &[record("v1", "acme", "src/a.rs", axis(0), &[])])
            .await
            .unwrap();
        let provider = Arc::new(FakeProvider::new(DIM));
        let retriever = HybridRetriever::new(
            embedder(provider.clone()),
            Arc::new(NoopRanker),
            vectors.clone(),
            RetrievalConfig::default(),
        );

        let first = retriever.retrieve(Some("acme"), "q", 10).await.unwrap();
        // New data is invisible while the result is cached
        vectors
            .upsert("acme", &[record("v2", "acme", "src/b.rs", axis(0), &[])])
            .await
            .unwrap();
        let second = retriever.retrieve(Some("acme"), "q", 10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 1);

        // Different repository key misses the result cache but reuses the embedding
        retriever.retrieve(None, "q", 10).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_result_cache_expires() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        vectors
            .upsert("acme", &[record("v1", "acme", "src/a.rs", axis(0), &[])])
            .await
            .unwrap();
        let result_cache = Arc::new(TtlCache::new(Duration::from_millis(10)));
        let retriever = HybridRetriever::with_caches(
            embedder(Arc::new(FakeProvider::new(DIM))),
            Arc::new(NoopRanker),
            vectors.clone(),
            Arc::new(TtlCache::new(Duration::from_secs(60))),
            result_cache,
            RetrievalConfig::default(),
        );

        assert_eq!(retriever.retrieve(Some("acme"), "q", 10).await.unwrap().len(), 1);
        vectors
            .upsert("acme", &[record("v2", "acme", "src/b.rs", axis(0), &[])])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(retriever.retrieve(Some("acme"), "q", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_keys_do_not_collide_on_separators() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        vectors
            .upsert("a:b", &[record("in-ab", "a:b", "ab.rs", axis(0), &[])])
            .await
            .unwrap();
        vectors
            .upsert("a", &[record("in-a", "a", "a.rs", axis(0), &[])])
            .await
            .unwrap();
        let retriever = HybridRetriever::new(
            embedder(Arc::new(FakeProvider::new(DIM))),
            Arc::new(NoopRanker),
            vectors,
            RetrievalConfig::default(),
        );

        let first = retriever.retrieve(Some("a:b"), "c", 10).await.unwrap();
        let second = retriever.retrieve(Some("a"), "b:c", 10).await.unwrap();
        assert_eq!(first[0].id, "in-ab");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "in-a");
    }

    #[tokio::test]
    async fn test_limit_applies_after_cache() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        let records: Vec<_> = (0..5)
            .map(|i| record(&format!("v{i}"), "acme", &format!("f{i}.rs"), axis(i), &[]))
            .collect();
        vectors.upsert("acme", &records).await.unwrap();
        let retriever = HybridRetriever::new(
            embedder(Arc::new(FakeProvider::new(DIM))),
            Arc::new(NoopRanker),
            vectors,
            RetrievalConfig::default(),
        );
        assert_eq!(retriever.retrieve(Some("acme"), "q", 2).await.unwrap().len(), 2);
        assert_eq!(retriever.retrieve(Some("acme"), "q", 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_vector_failure_surfaces() {
        let retriever = HybridRetriever::new(
            embedder(Arc::new(FakeProvider::new(DIM))),
            Arc::new(NoopRanker),
            Arc::new(DownIndex),
            RetrievalConfig::default(),
        );
        let err = retriever.retrieve(Some("acme"), "q", 10).await.unwrap_err();
        assert!(matches!(err, Error::VectorStore(_)));
    }

    #[test]
    fn test_rank_repositories_boosts_tagged() {
        let m = |repo: &str, path: &str, score: f32, tags: &[&str]| VectorMatch {
            id: format!("{repo}-{path}"),
            score,
            metadata: record("x", repo, path, axis(0), tags).metadata,
        };
        let matches = vec![
            m("untagged", "a.py", 0.9, &["python"]),
            m("tagged", "b.rs", 0.7, &["Rust", "tokio"]),
            m("tagged", "c.rs", 0.65, &["axum"]),
            m("untagged", "a.py", 0.5, &[]),
        ];

        let ranked = rank_repositories(&matches, "rust", 1.5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].repository, "tagged");
        assert!((ranked[0].score - 0.7 * 1.5).abs() < 1e-6);
        assert_eq!(ranked[0].tech_stack, vec!["Rust", "tokio", "axum"]);
        assert_eq!(ranked[0].sample_paths, vec!["b.rs", "c.rs"]);
        assert_eq!(ranked[1].repository, "untagged");
        assert!((ranked[1].score - 0.9).abs() < 1e-6);
        assert_eq!(ranked[1].sample_paths, vec!["a.py"]);
    }

    #[tokio::test]
    async fn test_skill_search_cached_and_limited() {
        let vectors = Arc::new(MemoryVectorIndex::new());
        vectors
            .upsert(
                DEFAULT_NAMESPACE,
                &[
                    record("a", "repo-a", "a.rs", axis(0), &["rust"]),
                    record("b", "repo-b", "b.go", axis(1), &["go"]),
                    record("c", "repo-c", "c.py", axis(2), &["python"]),
                ],
            )
            .await
            .unwrap();
        let provider = Arc::new(FakeProvider::new(DIM));
        let retriever = HybridRetriever::new(
            embedder(provider.clone()),
            Arc::new(NoopRanker),
            vectors,
            RetrievalConfig::default(),
        );

        let all = retriever.retrieve_by_skill("rust", None).await.unwrap();
        assert_eq!(all.len(), 3);
        let one = retriever.retrieve_by_skill("rust", Some(1)).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0], all[0]);
        assert_eq!(provider.call_count(), 1);
    }
}
