//! Integration tests for the ingestion and retrieval pipeline.
//!
//! These tests run the full flow against local fakes: a character-level
//! tokenizer, a bag-of-words embedding provider and the in-memory vector
//! index. No network access is needed.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use repo_retrieval::chunking::Tokenizer;
use repo_retrieval::config::{EmbeddingConfig, IngestConfig, RetrievalConfig};
use repo_retrieval::error::{Error, Result};
use repo_retrieval::ingest::{ingest_many, IngestionPipeline};
use repo_retrieval::llm::embeddings::{BatchEmbedder, EmbeddingProvider};
use repo_retrieval::search::bm25::{lexical_path, Bm25Ranker, NoopRanker};
use repo_retrieval::search::hybrid::HybridRetriever;
use repo_retrieval::search::vector::{MemoryVectorIndex, DEFAULT_NAMESPACE};
use repo_retrieval::source::snapshot_from_dir;

const DIM: usize = 256;

struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(|c| c as u32).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .map(|&t| char::from_u32(t).ok_or_else(|| Error::Tokenizer(format!("bad token {t}"))))
            .collect()
    }
}

/// Hashed bag-of-words vectors: texts sharing words have positive cosine similarity.
struct BagOfWordsProvider {
    calls: AtomicUsize,
}

impl BagOfWordsProvider {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
            v[(h % DIM as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsProvider {
    async fn embed(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|t| Self::vector(t)).collect())
    }
}

struct Harness {
    pipeline: Arc<IngestionPipeline>,
    embedder: Arc<BatchEmbedder>,
    provider: Arc<BagOfWordsProvider>,
    store: Arc<MemoryVectorIndex>,
}

impl Harness {
    fn new(repos_dir: &Path) -> Self {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(CharTokenizer);
        let provider = Arc::new(BagOfWordsProvider::new());
        let embed_config = EmbeddingConfig {
            model: "bag-of-words".to_string(),
            dimension_override: Some(DIM),
            batch_size: 3,
            max_input_tokens: 8192,
            ..Default::default()
        };
        let embedder = Arc::new(
            BatchEmbedder::new(provider.clone(), tokenizer.clone(), &embed_config).unwrap(),
        );
        let store = Arc::new(MemoryVectorIndex::new());
        let pipeline = Arc::new(IngestionPipeline::new(
            tokenizer,
            embedder.clone(),
            store.clone(),
            IngestConfig::default(),
            repos_dir,
        ));
        Self {
            pipeline,
            embedder,
            provider,
            store,
        }
    }

    fn retriever(&self, repos_dir: &Path) -> HybridRetriever {
        HybridRetriever::new(
            self.embedder.clone(),
            Arc::new(Bm25Ranker::new(repos_dir)),
            self.store.clone(),
            RetrievalConfig::default(),
        )
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A small Rust service and a small Python service under `repos_dir`.
fn sample_repos(repos_dir: &Path) {
    let rust = repos_dir.join("user-service");
    write(
        &rust,
        "src/main.rs",
        "use axum::Router;\nfn main() {\n    let app = Router::new();\n    axum::serve(app).await;\n}",
    );
    write(
        &rust,
        "src/db.rs",
        "pub struct Database {\n    pool: PgPool,\n}\n\nimpl Database {\n    pub async fn connect(url: &str) -> Result<Self> {\n        let pool = PgPool::connect(url).await?;\n        Ok(Self { pool })\n    }\n}",
    );
    write(
        &rust,
        "src/handlers.rs",
        "pub async fn health_check() -> &'static str {\n    \"OK\"\n}\n\npub async fn create_user(Json(body): Json<CreateUser>) -> StatusCode {\n    StatusCode::CREATED\n}",
    );
    write(&rust, "README.md", "# User Service\n\nA REST API for managing users.");

    let python = repos_dir.join("flask-app");
    write(
        &python,
        "app.py",
        "from flask import Flask, jsonify\n\napp = Flask(__name__)\n\n@app.route('/health')\ndef health():\n    return jsonify(status='ok')",
    );
    write(&python, "README.md", "# Flask app\n\nA small Python web service.");
}

async fn ingest_samples(harness: &Harness, repos_dir: &Path) {
    let snapshots = vec![
        snapshot_from_dir(
            "user-service",
            &repos_dir.join("user-service"),
            vec!["rust".to_string(), "axum".to_string()],
        ),
        snapshot_from_dir(
            "flask-app",
            &repos_dir.join("flask-app"),
            vec!["python".to_string(), "flask".to_string()],
        ),
    ];
    for result in ingest_many(harness.pipeline.clone(), snapshots).await {
        result.unwrap();
    }
}

#[tokio::test]
async fn test_ingest_then_search_repository() {
    let dir = tempfile::tempdir().unwrap();
    sample_repos(dir.path());
    let harness = Harness::new(dir.path());
    ingest_samples(&harness, dir.path()).await;

    assert_eq!(harness.store.count("user-service"), 4);
    assert_eq!(harness.store.count("flask-app"), 2);
    assert_eq!(harness.store.count(DEFAULT_NAMESPACE), 6);
    assert!(lexical_path(&dir.path().join("user-service")).exists());

    let retriever = harness.retriever(dir.path());
    let results = retriever
        .retrieve(Some("user-service"), "PgPool database connect", 10)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].path, "src/db.rs");
    assert!(results.iter().all(|r| r.repository_id == "user-service"));
    assert!(results[0].text.as_deref().unwrap().contains("PgPool"));
    assert_eq!(results[0].start, 0);
}

#[tokio::test]
async fn test_global_search_spans_repositories() {
    let dir = tempfile::tempdir().unwrap();
    sample_repos(dir.path());
    let harness = Harness::new(dir.path());
    ingest_samples(&harness, dir.path()).await;

    let retriever = harness.retriever(dir.path());
    let results = retriever.retrieve(None, "health", 20).await.unwrap();

    let repos: HashSet<&str> = results.iter().map(|r| r.repository_id.as_str()).collect();
    assert!(repos.contains("user-service"));
    assert!(repos.contains("flask-app"));
    assert_eq!(results.len(), 6);

    let limited = retriever.retrieve(None, "health", 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_skill_search_boosts_tagged_repository() {
    let dir = tempfile::tempdir().unwrap();
    sample_repos(dir.path());
    let harness = Harness::new(dir.path());
    ingest_samples(&harness, dir.path()).await;

    let retriever = harness.retriever(dir.path());
    let matches = retriever.retrieve_by_skill("python", None).await.unwrap();

    assert_eq!(matches[0].repository, "flask-app");
    assert_eq!(matches[0].tech_stack, vec!["python", "flask"]);
    assert!(matches[0].sample_paths.len() <= 5);
    assert!(matches[0].sample_paths.contains(&"README.md".to_string()));
    assert!(matches.iter().any(|m| m.repository == "user-service"));
}

#[tokio::test]
async fn test_repeated_query_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    sample_repos(dir.path());
    let harness = Harness::new(dir.path());
    ingest_samples(&harness, dir.path()).await;

    let retriever = harness.retriever(dir.path());
    let first = retriever
        .retrieve(Some("flask-app"), "jsonify status", 5)
        .await
        .unwrap();
    let calls = harness.provider.calls();
    let second = retriever
        .retrieve(Some("flask-app"), "jsonify status", 5)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.provider.calls(), calls);
}

#[tokio::test]
async fn test_missing_lexical_file_falls_back_to_vectors() {
    let dir = tempfile::tempdir().unwrap();
    sample_repos(dir.path());
    let harness = Harness::new(dir.path());
    ingest_samples(&harness, dir.path()).await;
    std::fs::remove_file(lexical_path(&dir.path().join("user-service"))).unwrap();

    let with_bm25 = harness.retriever(dir.path());
    let vector_only = HybridRetriever::new(
        harness.embedder.clone(),
        Arc::new(NoopRanker),
        harness.store.clone(),
        RetrievalConfig::default(),
    );

    let a = with_bm25
        .retrieve(Some("user-service"), "create user handler", 10)
        .await
        .unwrap();
    let b = vector_only
        .retrieve(Some("user-service"), "create user handler", 10)
        .await
        .unwrap();

    assert_eq!(a.len(), 4);
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_reingest_keeps_chunk_ids() {
    let dir = tempfile::tempdir().unwrap();
    sample_repos(dir.path());
    let harness = Harness::new(dir.path());

    let snapshot = snapshot_from_dir("user-service", &dir.path().join("user-service"), Vec::new());
    let first = harness.pipeline.ingest(&snapshot).await.unwrap();
    let ids = harness.store.ids("user-service");

    // The lexical file written by the first run is hidden and never re-ingested
    let snapshot = snapshot_from_dir("user-service", &dir.path().join("user-service"), Vec::new());
    let second = harness.pipeline.ingest(&snapshot).await.unwrap();

    assert_eq!(first.chunks, second.chunks);
    assert_eq!(harness.store.ids("user-service"), ids);
}
