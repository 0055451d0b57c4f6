pub mod cache;
pub mod remote;

pub use cache::CachedEmbedder;
pub use remote::RemoteEmbedder;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Unified embedding model seam. The model itself is an external
/// collaborator; everything behind this trait is replaceable in tests.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a document, chunk, or concept phrase.
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embed for ingestion.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_document(text).await?);
        }
        Ok(out)
    }

    /// Embedding vector dimension.
    fn dimension(&self) -> usize;

    /// Model identifier mixed into embedding-cache keys.
    fn model_id(&self) -> &str;
}

/// Reject vectors with the wrong dimension or non-finite components before
/// they reach the store.
pub fn validate_embedding(vector: &[f32], expected_dimension: usize) -> Result<()> {
    if vector.len() != expected_dimension {
        return Err(Error::InvalidEmbeddings {
            reason: format!(
                "expected dimension {}, got {}",
                expected_dimension,
                vector.len()
            ),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidEmbeddings {
            reason: "vector contains NaN or infinite components".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_wrong_dimension() {
        let err = validate_embedding(&[0.1, 0.2], 384).unwrap_err();
        assert_eq!(err.code(), "INVALID_EMBEDDINGS");
    }

    #[test]
    fn validation_rejects_nan() {
        let mut vector = vec![0.0f32; 384];
        vector[7] = f32::NAN;
        assert!(validate_embedding(&vector, 384).is_err());
        vector[7] = f32::INFINITY;
        assert!(validate_embedding(&vector, 384).is_err());
    }

    #[test]
    fn validation_accepts_finite_vector() {
        assert!(validate_embedding(&vec![0.5f32; 384], 384).is_ok());
    }
}
