pub mod lru;

pub use lru::{CacheStats, TtlLru};

use sha2::{Digest, Sha256};

/// Deterministic fingerprint for search-result cache keys: SHA-256 over the
/// query text and every knob that changes the result set.
pub fn result_cache_key(
    query: &str,
    limit: usize,
    source: Option<&str>,
    profile: &str,
    exclude_meta_content: bool,
    exclude_references: bool,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(limit.to_le_bytes());
    hasher.update(source.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(profile.as_bytes());
    hasher.update([exclude_meta_content as u8, exclude_references as u8]);
    format!("{:x}", hasher.finalize())
}

/// Embedding cache key: SHA-256 over the text and the model id. Embeddings
/// are pure, so entries never expire.
pub fn embedding_cache_key(text: &str, model_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(model_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_key_is_sensitive_to_every_input() {
        let base = result_cache_key("q", 10, None, "catalog", false, false);
        assert_eq!(base, result_cache_key("q", 10, None, "catalog", false, false));
        assert_ne!(base, result_cache_key("q2", 10, None, "catalog", false, false));
        assert_ne!(base, result_cache_key("q", 11, None, "catalog", false, false));
        assert_ne!(base, result_cache_key("q", 10, Some("/a.pdf"), "catalog", false, false));
        assert_ne!(base, result_cache_key("q", 10, None, "chunks", false, false));
        assert_ne!(base, result_cache_key("q", 10, None, "catalog", true, false));
        assert_ne!(base, result_cache_key("q", 10, None, "catalog", false, true));
    }

    #[test]
    fn embedding_key_includes_model() {
        assert_ne!(
            embedding_cache_key("hello", "model-a"),
            embedding_cache_key("hello", "model-b")
        );
    }
}
