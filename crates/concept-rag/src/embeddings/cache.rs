//! Cache-aside wrapper around any embedding model.
//!
//! Keys are SHA-256 of (text, model id); embeddings are pure, so entries
//! never expire. A cached lookup returns the stored vector byte-identical.

use std::sync::Arc;

use async_trait::async_trait;

use super::EmbeddingModel;
use crate::cache::{embedding_cache_key, CacheStats, TtlLru};
use crate::error::Result;

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingModel>,
    cache: TtlLru<String, Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingModel>, capacity: usize) -> Self {
        Self {
            inner,
            cache: TtlLru::new(capacity, None),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn key(&self, text: &str) -> String {
        embedding_cache_key(text, self.inner.model_id())
    }
}

#[async_trait]
impl EmbeddingModel for CachedEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.key(text);
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }
        let vector = self.inner.embed_query(text).await?;
        self.cache.insert(key, vector.clone());
        Ok(vector)
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.key(text);
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }
        let vector = self.inner.embed_document(text).await?;
        self.cache.insert(key, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Resolve hits first, then batch only the misses upstream.
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&self.key(text)) {
                Some(vector) => out.push(Some(vector)),
                None => {
                    out.push(None);
                    misses.push(i);
                }
            }
        }

        if !misses.is_empty() {
            let pending: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&pending).await?;
            for (&i, vector) in misses.iter().zip(vectors.into_iter()) {
                self.cache.insert(self.key(&texts[i]), vector.clone());
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.expect("all slots filled")).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
