use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::error::{Error, Result};
use crate::models::{is_valid_repository_id, RankedItem};

/// File name of the per-repository lexical document list.
pub const LEXICAL_FILE_NAME: &str = ".bm25.jsonl";

/// Weight of prefix matches relative to exact term matches.
const PREFIX_BOOST: f32 = 0.5;

/// One line of the persisted document list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalDocument {
    pub id: String,
    pub text: String,
}

pub fn lexical_path(workdir: &Path) -> PathBuf {
    workdir.join(LEXICAL_FILE_NAME)
}

/// Write the document list as JSON lines (atomic write via temp file + rename).
pub fn write_documents(path: &Path, docs: &[LexicalDocument]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp_path)?);
        for d in docs {
            serde_json::to_writer(&mut out, d)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read the document list. `Ok(None)` when the file does not exist;
/// malformed lines are skipped.
pub fn read_documents(path: &Path) -> Result<Option<Vec<LexicalDocument>>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut docs = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LexicalDocument>(&line) {
            Ok(d) => docs.push(d),
            Err(e) => tracing::warn!("Skipping malformed line {} in {}: {e}", line_no + 1, path.display()),
        }
    }
    Ok(Some(docs))
}

/// In-memory BM25 index over one repository's documents, built on tantivy.
pub struct Bm25Index {
    index: Index,
    reader: IndexReader,
    f_id: Field,
    f_text: Field,
}

impl Bm25Index {
    pub fn build(docs: &[LexicalDocument]) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("id", STRING | STORED);
        let f_text = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index.writer_with_num_threads(1, 20_000_000)?;
        for d in docs {
            writer.add_document(doc!(
                f_id => d.id.clone(),
                f_text => d.text.clone(),
            ))?;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            f_id,
            f_text,
        })
    }

    /// Load from a persisted document list; `Ok(None)` when the file is absent.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match read_documents(path)? {
            Some(docs) => Ok(Some(Self::build(&docs)?)),
            None => Ok(None),
        }
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Top `limit` documents for `query`. Every query term matches exactly
    /// (BM25) or as a prefix of an indexed term.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<RankedItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let terms = self.query_terms(query)?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(terms.len() * 2);
        for t in &terms {
            let term = Term::from_field_text(self.f_text, t);
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(term.clone(), IndexRecordOption::WithFreqs)),
            ));
            clauses.push((
                Occur::Should,
                Box::new(BoostQuery::new(
                    Box::new(FuzzyTermQuery::new_prefix(term, 0, true)),
                    PREFIX_BOOST,
                )),
            ));
        }
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let Some(id) = doc.get_first(self.f_id).and_then(|v| v.as_str()) else {
                continue;
            };
            hits.push(RankedItem::new(id, score));
        }
        Ok(hits)
    }

    fn query_terms(&self, query: &str) -> Result<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(self.f_text)?;
        let mut stream = analyzer.token_stream(query);
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        while let Some(token) = stream.next() {
            if seen.insert(token.text.clone()) {
                terms.push(token.text.clone());
            }
        }
        Ok(terms)
    }
}

/// Lexical half of hybrid retrieval. Never fails: problems degrade to an
/// empty ranking.
#[async_trait]
pub trait LexicalRanker: Send + Sync {
    async fn rank(&self, repository_id: &str, query: &str, limit: usize) -> Vec<RankedItem>;
}

/// Ranker used when lexical search is disabled.
pub struct NoopRanker;

#[async_trait]
impl LexicalRanker for NoopRanker {
    async fn rank(&self, _repository_id: &str, _query: &str, _limit: usize) -> Vec<RankedItem> {
        Vec::new()
    }
}

/// Builds a repository's BM25 index from `<repos_dir>/<id>/.bm25.jsonl`.
pub struct Bm25Ranker {
    repos_dir: PathBuf,
}

impl Bm25Ranker {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
        }
    }

    fn search_blocking(path: &Path, query: &str, limit: usize) -> Result<Vec<RankedItem>> {
        match Bm25Index::load(path)? {
            Some(index) => index.search(query, limit),
            None => {
                tracing::debug!("No lexical index at {}, using vector results only", path.display());
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl LexicalRanker for Bm25Ranker {
    async fn rank(&self, repository_id: &str, query: &str, limit: usize) -> Vec<RankedItem> {
        if !is_valid_repository_id(repository_id) {
            tracing::warn!("Refusing lexical search for invalid repository id {repository_id:?}");
            return Vec::new();
        }
        let path = lexical_path(&self.repos_dir.join(repository_id));
        let q = query.to_string();
        let result = tokio::task::spawn_blocking(move || Self::search_blocking(&path, &q, limit))
            .await
            .map_err(|e| Error::Lexical(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("BM25 search failed for {repository_id}: {e}");
                Vec::new()
            }
        }
    }
}
