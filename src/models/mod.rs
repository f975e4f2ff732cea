// Hosted model providers
// Embedding and generation adapters behind async traits

pub mod client;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{ModelClient, ModelInfo};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),
    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),
    #[error("Generation request timed out after {0:?}")]
    Timeout(Duration),
}

/// Maps texts to fixed-dimension vectors, one per text, in input order
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(EmbeddingError::InvalidResponse(format!(
                "expected 1 vector for the query, received {}",
                vectors.len() + 1
            ))),
        }
    }
}

/// Produces answer text from a prompt
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Run an embedding call under a caller-imposed deadline
#[inline]
pub async fn embed_within<T, F>(timeout: Duration, call: F) -> Result<T, EmbeddingError>
where
    F: Future<Output = Result<T, EmbeddingError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| EmbeddingError::Timeout(timeout))?
}

/// Run a generation call under a caller-imposed deadline
#[inline]
pub async fn generate_within<F>(timeout: Duration, call: F) -> Result<String, GenerationError>
where
    F: Future<Output = Result<String, GenerationError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| GenerationError::Timeout(timeout))?
}
