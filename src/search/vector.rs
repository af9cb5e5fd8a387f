use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::models::{ChunkMetadata, IndexedRecord};

/// Namespace queried when no repository is specified.
pub const DEFAULT_NAMESPACE: &str = "";

/// A nearest-neighbor hit with validated chunk metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Namespaced nearest-neighbor store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by id.
    async fn upsert(&self, namespace: &str, records: &[IndexedRecord]) -> Result<()>;

    /// Top `top_k` matches by similarity, best first.
    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<VectorMatch>>;

    /// Make upserts so far durable. Remote stores commit on upsert.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Turn raw store metadata into a typed record, rejecting anything malformed.
pub fn parse_metadata(id: &str, raw: serde_json::Value) -> Result<ChunkMetadata> {
    let metadata: ChunkMetadata = serde_json::from_value(raw).map_err(|e| Error::Metadata {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    metadata.validate().map_err(|reason| Error::Metadata {
        id: id.to_string(),
        reason,
    })?;
    Ok(metadata)
}

// ─── In-memory ───────────────────────────────────────────

/// A stored vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    embedding: Vec<f32>,
    metadata: ChunkMetadata,
}

type Namespaces = HashMap<String, BTreeMap<String, VectorEntry>>;

/// In-memory vector store with optional disk persistence and cosine similarity search.
///
/// Upserts only touch memory; [`VectorIndex::flush`] writes `vectors.json`.
pub struct MemoryVectorIndex {
    namespaces: RwLock<Namespaces>,
    persist_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            persist_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn open_or_create(vector_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join("vectors.json");

        let namespaces = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)?;
            serde_json::from_str(&data)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            namespaces: RwLock::new(namespaces),
            persist_path: Some(persist_path),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn count(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .get(namespace)
            .map(|ns| ns.len())
            .unwrap_or(0)
    }

    pub fn ids(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .read()
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, namespace: &str, id: &str) -> Option<IndexedRecord> {
        let namespaces = self.namespaces.read();
        let entry = namespaces.get(namespace)?.get(id)?;
        Some(IndexedRecord {
            id: id.to_string(),
            vector: entry.embedding.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    /// Whether there are upserts not yet written by `flush`.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, namespace: &str, records: &[IndexedRecord]) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            ns.insert(
                record.id.clone(),
                VectorEntry {
                    embedding: record.vector.clone(),
                    metadata: record.metadata.clone(),
                },
            );
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &String, &VectorEntry)> = ns
            .iter()
            .map(|(id, e)| (cosine_similarity(vector, &e.embedding), id, e))
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, id, e)| VectorMatch {
                id: id.clone(),
                score,
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    /// Serialize under the read lock, write the file off the async runtime
    /// (atomic write via temp file + rename).
    async fn flush(&self) -> Result<()> {
        let Some(path) = self.persist_path.clone() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let serialized = {
            let namespaces = self.namespaces.read();
            serde_json::to_vec(&*namespaces)
        };
        let data = match serialized {
            Ok(data) => data,
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
        };

        let written = tokio::task::spawn_blocking(move || -> Result<()> {
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, data)?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))
        .and_then(|r| r);

        if written.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        written
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

// ─── Pinecone ────────────────────────────────────────────

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a ChunkMetadata,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    namespace: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Client for a Pinecone serverless index.
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
}

impl PineconeIndex {
    pub fn new(client: reqwest::Client, host: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::VectorStore(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::VectorStore(format!(
                "Pinecone {path} returned {status}: {body}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, records: &[IndexedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let req = UpsertRequest {
            vectors: records
                .iter()
                .map(|r| UpsertVector {
                    id: &r.id,
                    values: &r.vector,
                    metadata: &r.metadata,
                })
                .collect(),
            namespace,
        };
        self.post("/vectors/upsert", &req).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<VectorMatch>> {
        let req = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace,
        };
        let body: QueryResponse = self
            .post("/query", &req)
            .await?
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to parse Pinecone query response: {e}")))?;

        body.matches
            .into_iter()
            .map(|m| {
                let raw = m.metadata.ok_or_else(|| Error::Metadata {
                    id: m.id.clone(),
                    reason: "match has no metadata".to_string(),
                })?;
                let metadata = parse_metadata(&m.id, raw)?;
                Ok(VectorMatch {
                    id: m.id,
                    score: m.score,
                    metadata,
                })
            })
            .collect()
    }
}
