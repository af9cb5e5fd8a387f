use serde::{Deserialize, Serialize};

/// One token-bounded slice of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub repository_id: String,
    pub file_path: String,
    pub start_token: usize,
    /// Exclusive
    pub end_token: usize,
    pub token_count: usize,
    pub text: String,
}

/// Metadata stored next to every vector. Field names follow the vector
/// store's camelCase convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub repository_id: String,
    pub file_path: String,
    pub start_token: usize,
    pub end_token: usize,
    pub token_count: usize,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tech_stack: Vec<String>,
}

impl ChunkMetadata {
    pub fn from_chunk(chunk: &Chunk, model_name: &str, tech_stack: &[String]) -> Self {
        Self {
            repository_id: chunk.repository_id.clone(),
            file_path: chunk.file_path.clone(),
            start_token: chunk.start_token,
            end_token: chunk.end_token,
            token_count: chunk.token_count,
            model_name: model_name.to_string(),
            text: Some(chunk.text.clone()),
            truncated: None,
            tech_stack: tech_stack.to_vec(),
        }
    }

    /// Check the token range invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.end_token < self.start_token {
            return Err(format!(
                "endToken {} precedes startToken {}",
                self.end_token, self.start_token
            ));
        }
        if self.end_token - self.start_token != self.token_count {
            return Err(format!(
                "token range [{}, {}) does not match tokenCount {}",
                self.start_token, self.end_token, self.token_count
            ));
        }
        Ok(())
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated.unwrap_or(false)
    }
}

/// A record ready for upsert into the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// One entry of a ranked list, produced by a single ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: String,
    pub score: f32,
}

impl RankedItem {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// A file handed to ingestion by a file source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoFile {
    pub path: String,
    pub text: String,
}

/// A materialized repository ready for ingestion.
#[derive(Debug, Clone, Default)]
pub struct RepositorySnapshot {
    /// A single path segment of ASCII letters, digits, `-`, `_` and `.`
    /// (see [`is_valid_repository_id`]). It names both the workdir under
    /// `<data_dir>/repos/` and the vector namespace, so `owner/name` is
    /// written as `owner-name` or `owner.name`.
    pub repository_id: String,
    pub tech_stack: Vec<String>,
    pub files: Vec<RepoFile>,
}

/// Summary of a finished ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub repository_id: String,
    pub files: usize,
    pub chunks: usize,
    pub records_upserted: usize,
    pub truncated_records: usize,
}

/// Retrieval result returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub repository_id: String,
    pub path: String,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub truncated: bool,
    /// Fused RRF score
    pub score: f32,
}

/// Cross-repository skill search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMatch {
    pub repository: String,
    pub tech_stack: Vec<String>,
    pub score: f32,
    pub sample_paths: Vec<String>,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Omit to search across all repositories
    pub repository_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RetrievedChunk>,
}

/// Skill search request
#[derive(Debug, Clone, Deserialize)]
pub struct SkillRequest {
    pub skill: String,
    pub limit: Option<usize>,
}

/// Ingest request for a repository already present in its workdir
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

fn default_limit() -> usize {
    20
}

/// Repository ids double as directory names and vector namespaces.
pub fn is_valid_repository_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
