//! Hybrid scoring engine.
//!
//! Four query shapes share one rescoring path: catalog search, chunk search
//! within a source, broad chunk search, and concept search. Candidates come
//! from vector search (top `limit · overfetch`), metadata filters apply,
//! then every candidate is rescored with the composite formula. If vector
//! search fails the engine degrades to BM25-only scoring and flags the
//! result set; a candidate that fails scoring is skipped and logged, never
//! fatal.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::bm25::{tokenize, Bm25Scorer, Bm25Stats};
use super::scoring::{self, CATALOG_WEIGHTS, CHUNK_WEIGHTS};
use super::thesaurus::Thesaurus;
use crate::cache::{result_cache_key, CacheStats, TtlLru};
use crate::concepts::id_cache::{IdMaps, IdNameCache};
use crate::config::SearchConfig;
use crate::embeddings::EmbeddingModel;
use crate::error::{Error, Result};
use crate::hash::title_from_source;
use crate::storage::{CatalogRepository, ChunkRepository, ConceptRepository};
use crate::types::{
    CatalogRecord, ChunkFilter, ChunkHit, ChunkRecord, ConceptSearchResult, ConceptSourceChunks,
    DocumentHit, RankedResults, ScoreBreakdown,
};

const MAX_QUERY_CHARS: usize = 8192;

#[derive(Clone)]
enum CachedValue {
    Documents(RankedResults<DocumentHit>),
    Chunks(RankedResults<ChunkHit>),
}

pub struct SearchEngine {
    catalog: CatalogRepository,
    chunks: ChunkRepository,
    concepts: ConceptRepository,
    concept_cache: Arc<IdNameCache>,
    embedder: Arc<dyn EmbeddingModel>,
    thesaurus: RwLock<Thesaurus>,
    scorer: Bm25Scorer,
    overfetch: usize,
    result_cache: TtlLru<String, CachedValue>,
    catalog_stats: Mutex<Option<Arc<Bm25Stats>>>,
    chunk_stats: Mutex<Option<Arc<Bm25Stats>>>,
}

impl SearchEngine {
    pub fn new(
        catalog: CatalogRepository,
        chunks: ChunkRepository,
        concepts: ConceptRepository,
        concept_cache: Arc<IdNameCache>,
        embedder: Arc<dyn EmbeddingModel>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            catalog,
            chunks,
            concepts,
            concept_cache,
            embedder,
            thesaurus: RwLock::new(Thesaurus::builtin()),
            scorer: Bm25Scorer::new(config.bm25_k1, config.bm25_b),
            overfetch: config.overfetch,
            result_cache: TtlLru::new(
                config.result_cache_capacity,
                Some(config.result_cache_ttl()),
            ),
            catalog_stats: Mutex::new(None),
            chunk_stats: Mutex::new(None),
        }
    }

    /// Drop cached results and corpus statistics; called after ingestion
    /// batches change the tables.
    pub fn invalidate(&self) {
        self.result_cache.clear();
        *self.catalog_stats.lock() = None;
        *self.chunk_stats.lock() = None;
    }

    /// Rebuild the thesaurus with concept-name stems from the fresh index.
    pub fn refresh_thesaurus(&self, concept_names: &[String]) {
        let mut thesaurus = Thesaurus::builtin();
        thesaurus.extend_with_concepts(concept_names);
        *self.thesaurus.write() = thesaurus;
    }

    pub fn result_cache_stats(&self) -> CacheStats {
        self.result_cache.stats()
    }

    // ── Catalog search ────────────────────────────────────────────────

    pub async fn catalog_search(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<RankedResults<DocumentHit>> {
        let query_tokens = validate_query(text)?;
        let key = result_cache_key(text, limit, None, "catalog", false, false);
        if let Some(CachedValue::Documents(cached)) = self.result_cache.get(&key) {
            return Ok(cached);
        }

        let stats = self.catalog_bm25().await?;
        let fetch = limit.max(1) * self.overfetch;

        let (candidates, degraded) = match self.catalog_candidates(text, fetch).await {
            Ok(hits) => {
                let with_distance: Vec<(CatalogRecord, Option<f32>)> =
                    hits.into_iter().map(|(r, d)| (r, Some(d))).collect();
                (with_distance, false)
            }
            Err(err) => {
                tracing::warn!(error = %err, "vector search failed, degrading to BM25-only");
                let rows = self.catalog.all().await?;
                (rows.into_iter().map(|r| (r, None)).collect(), true)
            }
        };

        let snapshot = self.concept_cache.snapshot();
        let thesaurus = self.thesaurus.read();
        let mut hits = Vec::with_capacity(candidates.len());
        for (record, distance) in &candidates {
            match self.score_document(record, *distance, &query_tokens, &stats, &snapshot, &thesaurus, degraded) {
                Ok(hit) => hits.push(hit),
                Err(err) => {
                    tracing::warn!(id = record.id, error = %err, "candidate failed scoring, skipped");
                }
            }
        }
        drop(thesaurus);

        hits.sort_by(|a, b| {
            scoring::compare_ranked(
                (a.score, a.concept_density.unwrap_or(0.0), a.id, a.source.as_str()),
                (b.score, b.concept_density.unwrap_or(0.0), b.id, b.source.as_str()),
            )
        });
        hits.truncate(limit);

        let results = RankedResults { hits, degraded };
        self.result_cache.insert(key, CachedValue::Documents(results.clone()));
        Ok(results)
    }

    async fn catalog_candidates(&self, text: &str, k: usize) -> Result<Vec<(CatalogRecord, f32)>> {
        let query_vector = self.embedder.embed_query(text).await?;
        self.catalog.vector_search(&query_vector, k).await
    }

    #[allow(clippy::too_many_arguments)]
    fn score_document(
        &self,
        record: &CatalogRecord,
        distance: Option<f32>,
        query_tokens: &[String],
        stats: &Bm25Stats,
        snapshot: &IdMaps,
        thesaurus: &Thesaurus,
        degraded: bool,
    ) -> Result<DocumentHit> {
        let concept_names: Vec<String> = record
            .concept_ids
            .iter()
            .filter_map(|id| snapshot.name_of(*id).map(String::from))
            .collect();

        let breakdown = ScoreBreakdown {
            vector: distance.map(scoring::similarity_from_distance).unwrap_or(0.0),
            bm25: self.scorer.score_bounded(stats, query_tokens, &record.text),
            title: scoring::title_match(query_tokens, &record.source),
            concept: scoring::concept_alignment(query_tokens, &concept_names),
            thesaurus: scoring::thesaurus_score(query_tokens, &record.text, thesaurus),
        };
        let score = if degraded {
            breakdown.bm25
        } else {
            CATALOG_WEIGHTS.combine(&breakdown)
        };
        if !score.is_finite() {
            return Err(Error::InvalidEmbeddings { reason: "non-finite score".to_string() });
        }

        Ok(DocumentHit {
            id: record.id,
            title: title_from_source(&record.source),
            source: record.source.clone(),
            text: record.text.clone(),
            score,
            concept_density: record.concept_density,
            breakdown,
        })
    }

    // ── Chunk searches ────────────────────────────────────────────────

    /// Chunk search within one source. Meta-content is filtered by default.
    pub async fn chunks_search(
        &self,
        text: &str,
        source: &str,
        limit: usize,
    ) -> Result<RankedResults<ChunkHit>> {
        if source.trim().is_empty() {
            return Err(Error::MissingParameter { name: "source" });
        }
        if self.catalog.get_by_source(source).await?.is_none() {
            return Err(Error::SourceNotFound { source: source.to_string() });
        }
        let filter = ChunkFilter {
            source: Some(source.to_string()),
            exclude_meta_content: true,
            exclude_references: false,
        };
        self.chunk_search_inner(text, limit, filter, "chunks").await
    }

    /// Chunk search across the whole corpus. References and meta-content
    /// are filtered by default.
    pub async fn broad_chunks_search(
        &self,
        text: &str,
        limit: usize,
        exclude_meta_content: Option<bool>,
        exclude_references: Option<bool>,
    ) -> Result<RankedResults<ChunkHit>> {
        let filter = ChunkFilter {
            source: None,
            exclude_meta_content: exclude_meta_content.unwrap_or(true),
            exclude_references: exclude_references.unwrap_or(true),
        };
        self.chunk_search_inner(text, limit, filter, "broad").await
    }

    async fn chunk_search_inner(
        &self,
        text: &str,
        limit: usize,
        filter: ChunkFilter,
        profile: &str,
    ) -> Result<RankedResults<ChunkHit>> {
        let query_tokens = validate_query(text)?;
        let key = result_cache_key(
            text,
            limit,
            filter.source.as_deref(),
            profile,
            filter.exclude_meta_content,
            filter.exclude_references,
        );
        if let Some(CachedValue::Chunks(cached)) = self.result_cache.get(&key) {
            return Ok(cached);
        }

        let stats = self.chunk_bm25().await?;
        let fetch = limit.max(1) * self.overfetch;

        let (candidates, degraded) = match self.chunk_candidates(text, fetch, &filter).await {
            Ok(hits) => {
                let with_distance: Vec<(ChunkRecord, Option<f32>)> =
                    hits.into_iter().map(|(r, d)| (r, Some(d))).collect();
                (with_distance, false)
            }
            Err(err) => {
                tracing::warn!(error = %err, "vector search failed, degrading to BM25-only");
                let rows = self.chunks.scan_filtered(&filter, fetch * 16).await?;
                (rows.into_iter().map(|r| (r, None)).collect(), true)
            }
        };

        let snapshot = self.concept_cache.snapshot();
        let thesaurus = self.thesaurus.read();
        let mut hits = Vec::with_capacity(candidates.len());
        for (record, distance) in &candidates {
            match self.score_chunk(record, *distance, &query_tokens, &stats, &snapshot, &thesaurus, degraded) {
                Ok(hit) => hits.push(hit),
                Err(err) => {
                    tracing::warn!(id = record.id, error = %err, "candidate failed scoring, skipped");
                }
            }
        }
        drop(thesaurus);

        hits.sort_by(|a, b| {
            scoring::compare_ranked(
                (a.score, a.concept_density, a.id, a.source.as_str()),
                (b.score, b.concept_density, b.id, b.source.as_str()),
            )
        });
        hits.truncate(limit);

        let results = RankedResults { hits, degraded };
        self.result_cache.insert(key, CachedValue::Chunks(results.clone()));
        Ok(results)
    }

    async fn chunk_candidates(
        &self,
        text: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>> {
        let query_vector = self.embedder.embed_query(text).await?;
        self.chunks.vector_search(&query_vector, k, filter).await
    }

    #[allow(clippy::too_many_arguments)]
    fn score_chunk(
        &self,
        record: &ChunkRecord,
        distance: Option<f32>,
        query_tokens: &[String],
        stats: &Bm25Stats,
        snapshot: &IdMaps,
        thesaurus: &Thesaurus,
        degraded: bool,
    ) -> Result<ChunkHit> {
        let concept_names: Vec<String> = record
            .concept_ids
            .iter()
            .filter_map(|id| snapshot.name_of(*id).map(String::from))
            .collect();

        let breakdown = ScoreBreakdown {
            vector: distance.map(scoring::similarity_from_distance).unwrap_or(0.0),
            bm25: self.scorer.score_bounded(stats, query_tokens, &record.text),
            title: 0.0,
            concept: scoring::concept_alignment(query_tokens, &concept_names),
            thesaurus: scoring::thesaurus_score(query_tokens, &record.text, thesaurus),
        };
        let score = if degraded {
            breakdown.bm25
        } else {
            CHUNK_WEIGHTS.combine(&breakdown)
        };
        if !score.is_finite() {
            return Err(Error::InvalidEmbeddings { reason: "non-finite score".to_string() });
        }

        Ok(ChunkHit {
            id: record.id,
            source: record.source.clone(),
            page_number: record.page_number,
            loc: record.loc.clone(),
            text: record.text.clone(),
            score,
            concept_density: record.concept_density,
            is_meta_content: record.is_meta_content,
            is_reference: record.is_reference,
            breakdown,
        })
    }

    // ── Concept search ────────────────────────────────────────────────

    /// Chunks containing a concept, ranked by
    /// `cos(concept.vector, chunk.vector) · (1 + ln(1 + concept_density))`
    /// and grouped by source.
    pub async fn concept_search(&self, concept: &str, limit: usize) -> Result<ConceptSearchResult> {
        let name = concept.trim();
        if name.is_empty() {
            return Err(Error::MissingParameter { name: "concept" });
        }
        let id = self
            .concept_cache
            .id_of(name)
            .ok_or_else(|| Error::ConceptNotFound { name: name.to_string() })?;
        let record = self
            .concepts
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::ConceptNotFound { name: name.to_string() })?;

        let chunk_rows = self.chunks.all().await?;
        let mut scored: Vec<ChunkHit> = chunk_rows
            .into_iter()
            .filter(|chunk| chunk.concept_ids.contains(&id))
            .map(|chunk| {
                let cos = scoring::cosine(&record.vector, &chunk.vector);
                let score = (cos * (1.0 + (1.0 + chunk.concept_density).ln())).max(0.0);
                ChunkHit {
                    id: chunk.id,
                    source: chunk.source.clone(),
                    page_number: chunk.page_number,
                    loc: chunk.loc.clone(),
                    text: chunk.text.clone(),
                    score,
                    concept_density: chunk.concept_density,
                    is_meta_content: chunk.is_meta_content,
                    is_reference: chunk.is_reference,
                    breakdown: ScoreBreakdown::default(),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            scoring::compare_ranked(
                (a.score, a.concept_density, a.id, a.source.as_str()),
                (b.score, b.concept_density, b.id, b.source.as_str()),
            )
        });
        scored.truncate(limit);

        // Group by source, preserving rank order within and across groups.
        let mut sources: Vec<ConceptSourceChunks> = Vec::new();
        for hit in scored {
            match sources.iter_mut().find(|s| s.source == hit.source) {
                Some(group) => group.chunks.push(hit),
                None => sources.push(ConceptSourceChunks {
                    title: title_from_source(&hit.source),
                    source: hit.source.clone(),
                    chunks: vec![hit],
                }),
            }
        }

        Ok(ConceptSearchResult {
            concept: record.concept,
            concept_id: id,
            sources,
        })
    }

    // ── Corpus statistics ─────────────────────────────────────────────

    async fn catalog_bm25(&self) -> Result<Arc<Bm25Stats>> {
        let generation = self.catalog.count().await?;
        if let Some(stats) = self.catalog_stats.lock().as_ref() {
            if stats.generation == generation {
                return Ok(stats.clone());
            }
        }
        let rows = self.catalog.all().await?;
        let stats = Arc::new(Bm25Stats::build(
            rows.iter().map(|r| r.text.as_str()),
            generation,
        ));
        *self.catalog_stats.lock() = Some(stats.clone());
        Ok(stats)
    }

    async fn chunk_bm25(&self) -> Result<Arc<Bm25Stats>> {
        let generation = self.chunks.count().await?;
        if let Some(stats) = self.chunk_stats.lock().as_ref() {
            if stats.generation == generation {
                return Ok(stats.clone());
            }
        }
        let rows = self.chunks.all().await?;
        let stats = Arc::new(Bm25Stats::build(
            rows.iter().map(|r| r.text.as_str()),
            generation,
        ));
        *self.chunk_stats.lock() = Some(stats.clone());
        Ok(stats)
    }
}

fn validate_query(text: &str) -> Result<Vec<String>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidQuery { reason: "query is empty".to_string() });
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(Error::InvalidQuery {
            reason: format!("query exceeds {} characters", MAX_QUERY_CHARS),
        });
    }
    Ok(tokenize(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_invalid() {
        assert_eq!(validate_query("   ").unwrap_err().code(), "INVALID_QUERY");
    }

    #[test]
    fn oversized_query_is_invalid() {
        let long = "x".repeat(MAX_QUERY_CHARS + 1);
        assert_eq!(validate_query(&long).unwrap_err().code(), "INVALID_QUERY");
    }

    #[test]
    fn normal_query_tokenizes() {
        assert_eq!(validate_query("Clean Architecture!").unwrap(), vec!["clean", "architecture"]);
    }
}
