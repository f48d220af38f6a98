use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding provider returned no vector")]
    Empty,
    #[error("embedding provider returned {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

/// Turns event content into a vector. Implementations may be slow or fail;
/// callers bound every call with a timeout.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the embedding method; stored next to every vector.
    fn model(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: String, dimensions: usize) -> Self {
        self.model = model;
        self.dimensions = dimensions;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let endpoint = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&EmbeddingRequest {
                model: &self.model,
                input: [text],
                encoding_format: "float",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbedderError::Unavailable(status.to_string()));
        }
        let response: EmbeddingResponse = response.json().await?;

        let vector = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or(EmbedderError::Empty)?;

        if vector.len() != self.dimensions {
            return Err(EmbedderError::Dimensions {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

/// Offline embedder: hashes lowercase word tokens into a fixed number of
/// buckets and L2-normalizes the counts. Texts sharing vocabulary land close
/// together, which is enough to cluster events without a provider.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    model: String,
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model: format!("hashing-bow-{dimensions}"),
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let index = u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((index % self.dimensions as u64) as usize, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.len() > 1)
            .map(str::to_lowercase);

        for token in tokens {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use crate::similarity::cosine_similarity;

    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Vendor pricing review").await.unwrap();
        let b = embedder.embed("vendor PRICING review!").await.unwrap();

        assert_eq!(a.len(), embedder.dimensions());
        assert_eq!(a, b);
        assert_eq!(embedder.model(), "hashing-bow-64");
    }

    #[tokio::test]
    async fn hashing_embedder_separates_unrelated_text() {
        let embedder = HashingEmbedder::default();
        let pricing = embedder.embed("vendor pricing review for Q3").await.unwrap();
        let pricing_again = embedder.embed("Q3 vendor pricing review notes").await.unwrap();
        let lunch = embedder.embed("lunch with the design team").await.unwrap();

        let related = cosine_similarity(&pricing, &pricing_again).unwrap().unwrap();
        let unrelated = cosine_similarity(&pricing, &lunch).unwrap().unwrap();
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let vector = HashingEmbedder::new(8).embed("  ").await.unwrap();
        assert!(vector.iter().all(|x| *x == 0.0));
    }
}
