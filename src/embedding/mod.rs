use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;

/// Capability contract for the external embedding provider. The engine
/// only consumes vectors; the provider's identity and model choice are
/// configuration, not part of this contract.
pub trait EmbeddingProvider: Send + Sync {
    /// Encode a batch of texts into fixed-length vectors, one per text,
    /// in input order
    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, ProviderError>> + Send;
}

/// Retry policy for provider calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff, doubled per retry
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

/// Encode a batch with a bounded timeout and a fixed retry count with
/// doubling backoff. On exhausting retries the caller degrades the
/// affected chunks to lexical-only matching; the run is not aborted.
pub async fn encode_with_retry<P: EmbeddingProvider>(
    provider: &P,
    texts: &[String],
    retry: &RetryConfig,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut backoff_ms = retry.backoff_ms;
    let mut last_error = ProviderError::Timeout(retry.timeout_ms);

    for attempt in 0..=retry.max_retries {
        if attempt > 0 {
            warn!(
                "embedding batch retry {} of {} after {} ms",
                attempt, retry.max_retries, backoff_ms
            );
            tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            backoff_ms = backoff_ms.saturating_mul(2);
        }

        let call = provider.encode_batch(texts);
        match tokio::time::timeout(std::time::Duration::from_millis(retry.timeout_ms), call).await {
            Ok(Ok(vectors)) => {
                if vectors.len() != texts.len() {
                    return Err(ProviderError::ShapeMismatch(format!(
                        "expected {} vectors, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }
                return Ok(vectors);
            }
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = ProviderError::Timeout(retry.timeout_ms),
        }
    }

    Err(last_error)
}

/// Cosine similarity of two vectors. Returns 0.0 for mismatched
/// dimensions or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Configuration for the HTTP embedding client
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embeddings endpoint URL
    pub endpoint: String,
    /// Model name forwarded to the provider
    pub model: String,
    /// API key sent as a bearer token, if required
    pub api_key: Option<String>,
}

impl EmbeddingConfig {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            endpoint,
            model,
            api_key: None,
        }
    }
}

/// HTTP embedding client speaking the common `{model, input}` ->
/// `{data: [{embedding}]}` embeddings wire shape
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

impl EmbeddingProvider for HttpEmbeddingClient {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!("{} - {}", status, body)));
        }

        let response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ShapeMismatch(e.to_string()))?;

        let mut rows = response.data;
        rows.sort_by_key(|r| r.index);
        Ok(rows.into_iter().map(|r| r.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}


#[cfg(test)]
mod tests {
    use super::testing::MockProvider;
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.5, -0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_mismatched_dims() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() {
        let provider = MockProvider::new();
        let texts = vec!["hello".to_string(), "world".to_string()];
        let a = provider.encode_batch(&texts).await.unwrap();
        let b = provider.encode_batch(&texts).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_synonym_group_similarity() {
        let provider =
            MockProvider::with_synonyms(vec![vec!["nur eingebildet", "nicht wirklich passiert"]]);
        let texts = vec![
            "das hast du dir nur eingebildet".to_string(),
            "das ist nicht wirklich passiert".to_string(),
            "schönes wetter heute".to_string(),
        ];
        let vectors = provider.encode_batch(&texts).await.unwrap();
        assert!(cosine_similarity(&vectors[0], &vectors[1]) > 0.9);
        assert!(cosine_similarity(&vectors[0], &vectors[2]) < 0.9);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_error() {
        let provider = MockProvider::new();
        provider.set_failing(true);
        let retry = RetryConfig {
            timeout_ms: 1_000,
            max_retries: 1,
            backoff_ms: 1,
        };
        let result = encode_with_retry(&provider, &["x".to_string()], &retry).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_retry_success_passes_through() {
        let provider = MockProvider::new();
        let retry = RetryConfig::default();
        let vectors = encode_with_retry(&provider, &["x".to_string()], &retry)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
    }
}
