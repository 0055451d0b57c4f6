use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier sent to the embedding endpoint and mixed into
    /// embedding-cache keys.
    pub model_id: String,
    pub dimension: usize,
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in whitespace tokens.
    pub chunk_tokens: usize,
    /// Overlap between consecutive windows, in tokens.
    pub overlap_tokens: usize,
    pub min_chunk_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Vector search fetches `limit * overfetch` candidates before rescoring.
    pub overfetch: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub result_cache_capacity: usize,
    pub result_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Parallel document workers. Production deployments run 10.
    pub workers: usize,
    pub extensions: Vec<String>,
    /// Chat model used for concept extraction.
    pub llm_model: String,
    /// Shared token-bucket refill rate for LLM + embedding calls.
    pub rate_tokens_per_sec: f64,
    pub rate_burst: f64,
    pub overwrite: bool,
    /// Extracted text below this chars-per-page threshold flags the
    /// document for OCR.
    pub ocr_char_density_threshold: usize,
    /// Tables at or above this row count get an IVF_PQ index after a batch.
    pub index_min_rows: usize,
}

impl SearchConfig {
    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.chunking.chunk_tokens < 50 {
            return Err("chunking.chunk_tokens must be >= 50".into());
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_tokens {
            return Err("chunking.overlap_tokens must be < chunk_tokens".into());
        }
        if self.search.default_limit == 0 {
            return Err("search.default_limit must be > 0".into());
        }
        if self.search.overfetch == 0 {
            return Err("search.overfetch must be > 0".into());
        }
        if self.ingest.workers == 0 {
            return Err("ingest.workers must be > 0".into());
        }
        if self.ingest.rate_tokens_per_sec <= 0.0 {
            return Err("ingest.rate_tokens_per_sec must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, validating before returning.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".concept_rag");

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                model_id: "text-embedding-3-small".to_string(),
                dimension: 384,
                cache_capacity: 10_000,
            },
            chunking: ChunkingConfig {
                chunk_tokens: 1000,
                overlap_tokens: 200,
                min_chunk_tokens: 20,
            },
            search: SearchConfig {
                default_limit: 10,
                overfetch: 3,
                bm25_k1: 1.5,
                bm25_b: 0.75,
                result_cache_capacity: 1000,
                result_cache_ttl_secs: 300,
            },
            ingest: IngestConfig {
                workers: 1,
                extensions: vec!["pdf".into(), "epub".into(), "txt".into(), "md".into()],
                llm_model: "openai/gpt-4o-mini".into(),
                rate_tokens_per_sec: 2.0,
                rate_burst: 4.0,
                overwrite: false,
                ocr_char_density_threshold: 200,
                index_min_rows: 256,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let mut config = EngineConfig::default();
        config.chunking.overlap_tokens = config.chunking.chunk_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = EngineConfig::default();
        config.ingest.workers = 0;
        assert!(config.validate().is_err());
    }
}
