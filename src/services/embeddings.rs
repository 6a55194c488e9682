//! Embedding generation for the vector tier.
//!
//! Talks to an OpenAI-compatible embeddings endpoint. When no endpoint is
//! configured, deterministic hash-based placeholder vectors are produced
//! instead, so the vector tier keeps working in development and tests
//! without a provider.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maximum retries before giving up on the provider.
const MAX_RETRIES: u32 = 2;

/// Delay before the first retry (doubles each time).
const RETRY_DELAY_MS: u64 = 500;

/// Maximum texts per API call.
const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Option<Vec<EmbedData>>,
    error: Option<EmbedError>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedError {
    message: String,
}

/// Service for generating text embeddings.
#[derive(Clone)]
pub struct EmbeddingService {
    inner: Arc<EmbeddingServiceInner>,
}

struct EmbeddingServiceInner {
    config: EmbeddingConfig,
    client: Client,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        if config.base_url.is_empty() {
            warn!(
                dimension = config.dimension,
                "No embedding provider configured, using hash-based placeholders"
            );
        } else {
            debug!(
                base_url = %config.base_url,
                model = %config.model,
                dimension = config.dimension,
                "Embedding service configured"
            );
        }

        Ok(Self {
            inner: Arc::new(EmbeddingServiceInner { config, client }),
        })
    }

    /// The dimension of vectors this service produces.
    pub fn dimension(&self) -> usize {
        self.inner.config.dimension
    }

    /// Whether a real provider is configured.
    pub fn has_provider(&self) -> bool {
        !self.inner.config.base_url.is_empty()
    }

    /// Generate an embedding for a single text.
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("Provider returned no embedding".to_string()))
    }

    /// Generate embeddings for multiple texts, batched at
    /// [`MAX_BATCH_SIZE`] per API call.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if !self.has_provider() {
            debug!(count = texts.len(), "Generating placeholder embeddings");
            let dim = self.inner.config.dimension;
            return Ok(texts.iter().map(|t| hash_embed(t, dim)).collect());
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            all.extend(self.call_with_retries(chunk).await?);
        }

        Ok(all)
    }

    async fn call_with_retries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut delay = Duration::from_millis(RETRY_DELAY_MS);
        let mut attempt = 0;

        loop {
            match self.call_provider(texts).await {
                Ok(vectors) => return Ok(vectors),
                // Only transient failures are worth repeating
                Err(e) if is_retryable(&e) && attempt < MAX_RETRIES => {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying embedding request");
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_provider(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let config = &self.inner.config;
        let url = format!("{}/embeddings", config.base_url.trim_end_matches('/'));

        let body = json!({
            "model": config.model,
            "input": texts,
        });

        let mut request = self.inner.client.post(&url).json(&body);
        if let Some(ref key) = config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Embedding request failed: {}", e)))?;

        let resp: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        if let Some(error) = resp.error {
            return Err(Error::Embedding(format!(
                "Embedding provider error: {}",
                error.message
            )));
        }

        let mut data = resp
            .data
            .ok_or_else(|| Error::Embedding("No embeddings in response".to_string()))?;

        if data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Provider returned {} embeddings for {} texts",
                data.len(),
                texts.len()
            )));
        }

        // Provider order is not guaranteed
        data.sort_by_key(|e| e.index);

        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

fn is_retryable(error: &Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("rate")
        || msg.contains("429")
        || msg.contains("503")
        || msg.contains("timeout")
        || msg.contains("temporarily")
}

/// Deterministic placeholder embedding. Not semantic; only useful so the
/// vector tier has stable inputs without a provider.
pub fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut embedding = vec![0.0f32; dim];

    for (i, slot) in embedding.iter_mut().enumerate() {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        (i as u64).hash(&mut hasher);
        let hash = hasher.finish();

        *slot = ((hash as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32;
    }

    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }

    embedding
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder_config() -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: String::new(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimension: 384,
        }
    }

    #[test]
    fn test_hash_embed_deterministic() {
        let a = hash_embed("retry the token refresh", 384);
        let b = hash_embed("retry the token refresh", 384);
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn test_hash_embed_normalized() {
        let emb = hash_embed("some text", 384);
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_hash_embed_distinct_texts() {
        assert_ne!(hash_embed("alpha", 64), hash_embed("beta", 64));
    }

    #[tokio::test]
    async fn test_no_provider_uses_placeholders() {
        let service = EmbeddingService::new(placeholder_config()).unwrap();
        assert!(!service.has_provider());

        let vectors = service
            .embed(vec!["hello".to_string(), "world".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 384);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_on_first_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let requests_seen = requests.clone();

        // Provider that always rejects the API key
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                requests_seen.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let body = r#"{"error":{"message":"invalid api key"}}"#;
                let response = format!(
                    "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        let service = EmbeddingService::new(EmbeddingConfig {
            base_url: format!("http://{}", addr),
            model: "test".to_string(),
            api_key: None,
            dimension: 8,
        })
        .unwrap();

        let result = service.embed(vec!["hello".to_string()]).await;
        assert!(matches!(result, Err(Error::Embedding(_))));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embed_empty_returns_empty() {
        let service = EmbeddingService::new(placeholder_config()).unwrap();
        assert!(service.embed(vec![]).await.unwrap().is_empty());
    }
}
