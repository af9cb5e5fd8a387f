use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Known embedding models and their vector dimension.
const MODEL_DIMENSIONS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
    ("nomic-embed-text", 768),
    ("mxbai-embed-large", 1024),
];

/// Upper bound for concurrent repository ingestions.
pub const MAX_INGEST_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root for repository workdirs and local index data
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub ingest: IngestConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" or "ollama"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Overrides the model table when set
    pub dimension_override: Option<usize>,
    /// Maximum inputs per provider request
    pub batch_size: usize,
    /// Hard per-input token ceiling accepted by the model
    pub max_input_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Pinecone,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub backend: VectorBackend,
    /// Pinecone index host, e.g. "https://my-index-abc123.svc.pinecone.io"
    pub index_host: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub max_chunk_tokens: usize,
    /// Per-record metadata budget in bytes
    pub metadata_byte_budget: usize,
    pub upsert_batch_size: usize,
    /// Concurrent repository ingestions (1..=5)
    pub concurrency: usize,
    /// Also write every record into the default namespace for global search
    pub mirror_to_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub lexical_enabled: bool,
    pub lexical_top_n: usize,
    pub repo_top_k: usize,
    pub global_top_k: usize,
    pub skill_top_k: usize,
    pub rrf_k: f32,
    pub fused_limit: usize,
    pub embedding_ttl_secs: u64,
    pub result_ttl_secs: u64,
    pub skill_ttl_secs: u64,
    pub skill_boost: f32,
    pub default_skill_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            embedding: EmbeddingConfig::default(),
            vector: VectorConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimension_override: None,
            batch_size: 64,
            max_input_tokens: 8192,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            index_host: None,
            api_key: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 4000,
            metadata_byte_budget: 40 * 1024,
            upsert_batch_size: 64,
            concurrency: 2,
            mirror_to_default: true,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_enabled: true,
            lexical_top_n: 40,
            repo_top_k: 40,
            global_top_k: 80,
            skill_top_k: 100,
            rrf_k: 60.0,
            fused_limit: 20,
            embedding_ttl_secs: 60,
            result_ttl_secs: 10,
            skill_ttl_secs: 30,
            skill_boost: 1.5,
            default_skill_limit: 20,
        }
    }
}

impl EmbeddingConfig {
    /// Vector dimension of the configured model.
    pub fn dimension(&self) -> Result<usize> {
        if let Some(dim) = self.dimension_override {
            return Ok(dim);
        }
        MODEL_DIMENSIONS
            .iter()
            .find(|(name, _)| *name == self.model)
            .map(|(_, dim)| *dim)
            .ok_or_else(|| {
                Error::Config(format!(
                    "no dimension known for embedding model '{}'; set EMBEDDING_DIM",
                    self.model
                ))
            })
    }
}

impl IngestConfig {
    /// Concurrency limit clamped to the supported range.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_INGEST_CONCURRENCY)
    }
}

impl RetrievalConfig {
    pub fn embedding_ttl(&self) -> Duration {
        Duration::from_secs(self.embedding_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn skill_ttl(&self) -> Duration {
        Duration::from_secs(self.skill_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(v) = val.parse() {
            *target = v;
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REPO_RETRIEVAL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("REPO_RETRIEVAL_BIND_ADDR") {
            config.bind_addr = addr;
        }

        // Embedding provider
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(key) =
            std::env::var("EMBEDDING_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            config.embedding.api_key = Some(key);
        }
        if let Ok(dim) = std::env::var("EMBEDDING_DIM") {
            if let Ok(d) = dim.parse() {
                config.embedding.dimension_override = Some(d);
            }
        }
        env_parse("EMBEDDING_BATCH_SIZE", &mut config.embedding.batch_size);
        env_parse("EMBEDDING_MAX_INPUT_TOKENS", &mut config.embedding.max_input_tokens);

        // Vector store
        if let Ok(backend) = std::env::var("VECTOR_STORE") {
            match backend.to_lowercase().as_str() {
                "pinecone" => config.vector.backend = VectorBackend::Pinecone,
                "memory" => config.vector.backend = VectorBackend::Memory,
                other => tracing::warn!("Unknown VECTOR_STORE '{other}', keeping default"),
            }
        }
        if let Ok(host) = std::env::var("PINECONE_INDEX_HOST") {
            config.vector.index_host = Some(host);
        }
        if let Ok(key) = std::env::var("PINECONE_API_KEY") {
            config.vector.api_key = Some(key);
        }

        // Ingestion
        env_parse("CHUNK_MAX_TOKENS", &mut config.ingest.max_chunk_tokens);
        env_parse("METADATA_BYTE_BUDGET", &mut config.ingest.metadata_byte_budget);
        env_parse("UPSERT_BATCH_SIZE", &mut config.ingest.upsert_batch_size);
        env_parse("INGEST_CONCURRENCY", &mut config.ingest.concurrency);

        // Retrieval
        env_parse("LEXICAL_ENABLED", &mut config.retrieval.lexical_enabled);

        config
    }

    /// Fail fast on settings that cannot work at all.
    pub fn validate(&self) -> Result<()> {
        self.embedding.dimension()?;
        if self.embedding.batch_size == 0 {
            return Err(Error::Config("EMBEDDING_BATCH_SIZE must be positive".to_string()));
        }
        if self.ingest.max_chunk_tokens == 0 || self.ingest.upsert_batch_size == 0 {
            return Err(Error::Config(
                "chunk size and upsert batch size must be positive".to_string(),
            ));
        }
        if self.embedding.provider == "openai" && self.embedding.api_key.is_none() {
            return Err(Error::Config(
                "EMBEDDING_API_KEY is required for the openai provider".to_string(),
            ));
        }
        if self.vector.backend == VectorBackend::Pinecone
            && (self.vector.index_host.is_none() || self.vector.api_key.is_none())
        {
            return Err(Error::Config(
                "PINECONE_INDEX_HOST and PINECONE_API_KEY are required for the pinecone backend"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    /// Working directory of one repository snapshot.
    pub fn repo_workdir(&self, repository_id: &str) -> PathBuf {
        self.repos_dir().join(repository_id)
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}
