use serde::{Deserialize, Serialize};

/// One row per source document. Created by ingestion, replaced on rehash,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: u32,
    /// Absolute source path. The display title derives from it.
    pub source: String,
    /// LLM summary enriched with the document's primary concepts.
    pub text: String,
    /// SHA-256 content hash for dedup.
    pub hash: String,
    pub vector: Vec<f32>,
    /// Sorted, deduplicated.
    pub concept_ids: Vec<u32>,
    /// Sorted, deduplicated.
    pub category_ids: Vec<u32>,
    pub concept_density: Option<f32>,
}

/// One row per sliding-window chunk of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: u32,
    pub source: String,
    pub text: String,
    pub page_number: u32,
    /// Human-readable location, e.g. a token range.
    pub loc: String,
    pub vector: Vec<f32>,
    pub concept_ids: Vec<u32>,
    pub category_ids: Vec<u32>,
    /// concept_ids.len() / token count; quality signal for ranking.
    pub concept_density: f32,
    pub is_toc: bool,
    pub is_front_matter: bool,
    pub is_back_matter: bool,
    pub is_meta_content: bool,
    pub is_reference: bool,
    pub has_math_issues: bool,
}

/// One row per canonical concept name. The whole table is a derived
/// projection, truncated and rebuilt after each ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub id: u32,
    /// Canonical display name (unsuffixed even when the id carries a
    /// collision suffix).
    pub concept: String,
    pub vector: Vec<f32>,
    pub weight: f32,
    /// Exact count over the chunk table at last rebuild.
    pub chunk_count: u32,
    pub catalog_ids: Vec<u32>,
    /// Co-occurring concept names, top 32 by co-occurrence count.
    pub related_concepts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: u32,
    pub name: String,
    pub aliases: Vec<String>,
    pub parent_id: Option<u32>,
    pub document_count: u32,
    pub chunk_count: u32,
}

/// Per-component breakdown of a composite score, kept for debugging and
/// deterministic test assertions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub vector: f32,
    pub bm25: f32,
    pub title: f32,
    pub concept: f32,
    pub thesaurus: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHit {
    pub id: u32,
    pub source: String,
    pub title: String,
    pub text: String,
    pub score: f32,
    pub concept_density: Option<f32>,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub id: u32,
    pub source: String,
    pub page_number: u32,
    pub loc: String,
    pub text: String,
    pub score: f32,
    pub concept_density: f32,
    pub is_meta_content: bool,
    pub is_reference: bool,
    pub breakdown: ScoreBreakdown,
}

/// Ranked results plus a degradation marker: when vector search fails the
/// engine falls back to BM25-only scoring and flags the result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResults<T> {
    pub hits: Vec<T>,
    pub degraded: bool,
}

impl<T> RankedResults<T> {
    pub fn new(hits: Vec<T>) -> Self {
        Self { hits, degraded: false }
    }

    pub fn degraded(hits: Vec<T>) -> Self {
        Self { hits, degraded: true }
    }
}

/// Chunks matching a concept, grouped by source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptSearchResult {
    pub concept: String,
    pub concept_id: u32,
    pub sources: Vec<ConceptSourceChunks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptSourceChunks {
    pub source: String,
    pub title: String,
    pub chunks: Vec<ChunkHit>,
}

/// A source document featuring a concept as primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConceptHit {
    pub source: String,
    pub title: String,
    pub catalog_id: u32,
    pub concept_weight: f32,
}

/// Concept bundle returned by `extract_concepts` and by the LLM extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptBundle {
    pub primary_concepts: Vec<String>,
    pub categories: Vec<String>,
    pub related_concepts: Vec<String>,
}

/// Metadata filter compiled to a SQL-style predicate over scalar fields.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub source: Option<String>,
    pub exclude_meta_content: bool,
    pub exclude_references: bool,
}

impl ChunkFilter {
    pub fn to_predicate(&self) -> Option<String> {
        let mut predicates = Vec::new();

        if let Some(ref source) = self.source {
            predicates.push(format!("source = '{}'", source.replace('\'', "''")));
        }
        if self.exclude_meta_content {
            predicates.push("is_meta_content = false".to_string());
        }
        if self.exclude_references {
            predicates.push("is_reference = false".to_string());
        }

        if predicates.is_empty() {
            None
        } else {
            Some(predicates.join(" AND "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_predicate_escapes_quotes() {
        let filter = ChunkFilter {
            source: Some("/it's/here.pdf".into()),
            exclude_meta_content: true,
            exclude_references: false,
        };
        let predicate = filter.to_predicate().unwrap();
        assert!(predicate.contains("source = '/it''s/here.pdf'"));
        assert!(predicate.contains("is_meta_content = false"));
        assert!(!predicate.contains("is_reference"));
    }

    #[test]
    fn empty_filter_has_no_predicate() {
        assert!(ChunkFilter::default().to_predicate().is_none());
    }
}
