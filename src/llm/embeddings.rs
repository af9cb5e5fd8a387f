use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chunking::Tokenizer;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// A remote (or in-process) model that turns texts into vectors.
///
/// Implementations return one vector per input, in input order. Shape
/// validation happens in [`BatchEmbedder`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider named in the config.
pub fn build_provider(
    client: reqwest::Client,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                Error::Config("EMBEDDING_API_KEY is required for the openai provider".to_string())
            })?;
            Ok(Arc::new(OpenAiProvider::new(client, &config.base_url, api_key)))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(client, &config.base_url))),
        other => Err(Error::Config(format!("Unknown embedding provider: {other}"))),
    }
}

// ─── Batching ────────────────────────────────────────────

/// Splits inputs into provider-sized batches, enforces the per-input token
/// ceiling and checks every response for shape.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    model: String,
    dimension: usize,
    batch_size: usize,
    max_input_tokens: usize,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::Config("embedding batch size must be positive".to_string()));
        }
        Ok(Self {
            provider,
            tokenizer,
            model: config.model.clone(),
            dimension: config.dimension()?,
            batch_size: config.batch_size,
            max_input_tokens: config.max_input_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed every text, one provider call per batch, batches in order.
    ///
    /// Any oversized input or malformed response fails the whole call; no
    /// partial result is returned.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        let total_batches = texts.len().div_ceil(self.batch_size);

        for (batch_idx, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_idx * self.batch_size;
            self.check_token_limits(batch, offset)?;

            let embeddings = self.provider.embed(&self.model, batch).await?;
            self.check_shape(&embeddings, batch.len(), offset)?;
            all_embeddings.extend(embeddings);

            tracing::debug!(
                "Embedded batch {}/{} ({} inputs)",
                batch_idx + 1,
                total_batches,
                batch.len()
            );
        }

        Ok(all_embeddings)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = [text.to_string()];
        self.check_token_limits(&inputs, 0)?;
        let embeddings = self.provider.embed(&self.model, &inputs).await?;
        self.check_shape(&embeddings, 1, 0)?;
        embeddings
            .into_iter()
            .next()
            .ok_or(Error::EmbeddingCount { expected: 1, actual: 0 })
    }

    fn check_token_limits(&self, batch: &[String], offset: usize) -> Result<()> {
        for (i, text) in batch.iter().enumerate() {
            let tokens = self.tokenizer.count(text);
            if tokens > self.max_input_tokens {
                return Err(Error::TokenLimit {
                    index: offset + i,
                    tokens,
                    limit: self.max_input_tokens,
                });
            }
        }
        Ok(())
    }

    fn check_shape(&self, embeddings: &[Vec<f32>], expected: usize, offset: usize) -> Result<()> {
        if embeddings.len() != expected {
            return Err(Error::EmbeddingCount {
                expected,
                actual: embeddings.len(),
            });
        }
        for (i, embedding) in embeddings.iter().enumerate() {
            if embedding.len() != self.dimension {
                return Err(Error::EmbeddingDimension {
                    index: offset + i,
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }
        Ok(())
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            client,
            url: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let req = OpenAiEmbedRequest { model, input: inputs };
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "OpenAI embed API returned {status}: {body}"
            )));
        }

        let mut body: OpenAiEmbedResponse = resp.json().await?;
        body.data.sort_by_key(|d| d.index.unwrap_or(0));
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/api/embed", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let req = OllamaEmbedRequest { model, input: inputs };
        let resp = self.client.post(&self.url).json(&req).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Ollama embed API returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = resp.json().await?;
        Ok(body.embeddings)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeProvider;
    use super::*;
    use crate::chunking::test_support::CharTokenizer;

    /// Returns vectors of a fixed, possibly wrong, shape.
    struct ShapedProvider {
        count: Option<usize>,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for ShapedProvider {
        async fn embed(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            let n = self.count.unwrap_or(inputs.len());
            Ok(vec![vec![0.5; self.dimension]; n])
        }
    }

    fn config(batch_size: usize, max_input_tokens: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            model: "test-model".to_string(),
            dimension_override: Some(8),
            batch_size,
            max_input_tokens,
            ..Default::default()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk number {i}")).collect()
    }

    #[tokio::test]
    async fn test_batches_respect_size_and_order() {
        let provider = Arc::new(FakeProvider::new(8));
        let embedder =
            BatchEmbedder::new(provider.clone(), Arc::new(CharTokenizer), &config(4, 100)).unwrap();

        let inputs = texts(10);
        let vectors = embedder.embed_all(&inputs).await.unwrap();

        assert_eq!(vectors.len(), 10);
        assert_eq!(*provider.calls.lock(), vec![4, 4, 2]);
        for (text, vector) in inputs.iter().zip(&vectors) {
            assert_eq!(vector, &test_support::fake_vector(text, 8));
        }
    }

    #[tokio::test]
    async fn test_oversized_input_fails_before_provider_call() {
        let provider = Arc::new(FakeProvider::new(8));
        let embedder =
            BatchEmbedder::new(provider.clone(), Arc::new(CharTokenizer), &config(4, 10)).unwrap();

        let inputs = vec!["short".to_string(), "x".repeat(11)];
        let err = embedder.embed_all(&inputs).await.unwrap_err();
        assert!(matches!(
            err,
            Error::TokenLimit {
                index: 1,
                tokens: 11,
                limit: 10
            }
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_vector_count_rejected() {
        let provider = Arc::new(ShapedProvider {
            count: Some(1),
            dimension: 8,
        });
        let embedder = BatchEmbedder::new(provider, Arc::new(CharTokenizer), &config(4, 100)).unwrap();
        let err = embedder.embed_all(&texts(3)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::EmbeddingCount {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let provider = Arc::new(ShapedProvider {
            count: None,
            dimension: 5,
        });
        let embedder = BatchEmbedder::new(provider, Arc::new(CharTokenizer), &config(4, 100)).unwrap();
        let err = embedder.embed_query("where is auth handled").await.unwrap_err();
        assert!(matches!(
            err,
            Error::EmbeddingDimension {
                expected: 8,
                actual: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let provider = Arc::new(FakeProvider::new(8));
        let embedder =
            BatchEmbedder::new(provider.clone(), Arc::new(CharTokenizer), &config(4, 100)).unwrap();
        assert!(embedder.embed_all(&[]).await.unwrap().is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_provider(reqwest::Client::new(), &config),
            Err(Error::Config(_))
        ));
    }
}
