//! Token-window chunking: files are split into consecutive windows of at most
//! `max_tokens` tokens, decoded back to text.

pub mod tokenizer;

use uuid::Uuid;

pub use tokenizer::{TiktokenTokenizer, Tokenizer};

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Namespace for content-addressed chunk ids.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_9a3e_52b4_4d0e_9c8a_1f2e_7b3d_5a60);

/// Window policy for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerOptions {
    pub max_tokens: usize,
    /// Tokens shared between consecutive windows; must be below `max_tokens`.
    pub overlap: usize,
}

impl ChunkerOptions {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap: 0,
        }
    }
}

/// A decoded token window of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenWindow {
    pub start: usize,
    /// Exclusive
    pub end: usize,
    pub text: String,
}

/// Split `text` into token windows `[i, min(i + max_tokens, n))`.
///
/// Empty or whitespace-only input yields no windows.
pub fn chunk_text(
    text: &str,
    options: ChunkerOptions,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<TokenWindow>> {
    if options.max_tokens == 0 {
        return Err(Error::Config("max chunk tokens must be positive".to_string()));
    }
    if options.overlap >= options.max_tokens {
        return Err(Error::Config(format!(
            "chunk overlap {} must be smaller than max chunk tokens {}",
            options.overlap, options.max_tokens
        )));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokens = tokenizer.encode(text);
    let n = tokens.len();
    let step = options.max_tokens - options.overlap;

    let mut windows = Vec::with_capacity(n / step + 1);
    let mut start = 0usize;
    while start < n {
        let end = (start + options.max_tokens).min(n);
        windows.push(TokenWindow {
            start,
            end,
            text: tokenizer.decode(&tokens[start..end])?,
        });
        if end == n {
            break;
        }
        start += step;
    }

    Ok(windows)
}

/// Chunk one file of a repository into id-bearing chunks.
pub fn chunk_file(
    repository_id: &str,
    file_path: &str,
    text: &str,
    options: ChunkerOptions,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<Chunk>> {
    let windows = chunk_text(text, options, tokenizer)?;
    Ok(windows
        .into_iter()
        .map(|w| Chunk {
            id: chunk_id(repository_id, file_path, w.start, w.end),
            repository_id: repository_id.to_string(),
            file_path: file_path.to_string(),
            start_token: w.start,
            end_token: w.end,
            token_count: w.end - w.start,
            text: w.text,
        })
        .collect())
}

/// Deterministic id of a chunk; re-ingesting the same window overwrites it.
pub fn chunk_id(repository_id: &str, file_path: &str, start: usize, end: usize) -> String {
    let name = format!("{repository_id}:{file_path}:{start}:{end}");
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, name.as_bytes()).to_string()
}
