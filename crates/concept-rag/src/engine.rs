//! Engine facade: wires the store, repositories, caches, scoring engine,
//! and ingestion pipeline, and exposes the tool surface.

use std::path::Path;
use std::sync::Arc;

use crate::concepts::{ConceptIndexBuilder, IdNameCache};
use crate::config::EngineConfig;
use crate::embeddings::{CachedEmbedder, EmbeddingModel};
use crate::error::{Error, Result};
use crate::hash::title_from_source;
use crate::ingest::{IngestPipeline, IngestReport};
use crate::llm::ChatClient;
use crate::resilience::{ResilienceProfile, ResilientExecutor};
use crate::search::SearchEngine;
use crate::storage::{
    CatalogRepository, CategoryRepository, ChunkRepository, ConceptRepository, TableStore,
};
use crate::types::{
    CategoryRecord, ChunkHit, ConceptBundle, ConceptSearchResult, DocumentHit, RankedResults,
    ScoreBreakdown, SourceConceptHit,
};

pub struct ConceptRagEngine {
    config: EngineConfig,
    catalog: CatalogRepository,
    chunks: ChunkRepository,
    concepts: ConceptRepository,
    categories: CategoryRepository,
    concept_cache: Arc<IdNameCache>,
    category_cache: Arc<IdNameCache>,
    embedder: Arc<dyn EmbeddingModel>,
    search: SearchEngine,
}

impl ConceptRagEngine {
    /// Open the database directory, ensure the four tables, and load the ID
    /// caches. `embedder` is the external embedding collaborator; it gets
    /// fronted by the embedding cache here.
    pub async fn open(config: EngineConfig, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        config.validate().map_err(|reason| Error::SchemaValidation {
            field: "config".to_string(),
            reason,
        })?;
        if embedder.dimension() != config.embedding.dimension {
            return Err(Error::InvalidEmbeddings {
                reason: format!(
                    "embedder dimension {} does not match configured {}",
                    embedder.dimension(),
                    config.embedding.dimension
                ),
            });
        }

        let store = Arc::new(
            TableStore::open(&config.data_dir, config.embedding.dimension).await?,
        );
        let catalog = CatalogRepository::new(store.clone());
        let chunks = ChunkRepository::new(store.clone());
        let concepts = ConceptRepository::new(store.clone());
        let categories = CategoryRepository::new(store.clone());
        catalog.ensure_table().await?;
        chunks.ensure_table().await?;
        concepts.ensure_table().await?;
        categories.ensure_table().await?;

        let embedder: Arc<dyn EmbeddingModel> = Arc::new(CachedEmbedder::new(
            embedder,
            config.embedding.cache_capacity,
        ));

        // ID caches load once at startup; rebuilds swap them atomically.
        let concept_cache = Arc::new(IdNameCache::empty());
        let concept_rows = concepts.all().await?;
        let concept_names: Vec<String> =
            concept_rows.iter().map(|c| c.concept.clone()).collect();
        concept_cache.swap(concept_rows.into_iter().map(|c| (c.id, c.concept)));

        let category_cache = Arc::new(IdNameCache::empty());
        category_cache.swap(
            categories
                .all()
                .await?
                .into_iter()
                .map(|c| (c.id, c.name)),
        );

        let search = SearchEngine::new(
            catalog.clone(),
            chunks.clone(),
            concepts.clone(),
            concept_cache.clone(),
            embedder.clone(),
            &config.search,
        );
        search.refresh_thesaurus(&concept_names);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            concepts = concept_cache.len(),
            categories = category_cache.len(),
            "engine opened"
        );

        Ok(Self {
            config,
            catalog,
            chunks,
            concepts,
            categories,
            concept_cache,
            category_cache,
            embedder,
            search,
        })
    }

    // ── Search surface ────────────────────────────────────────────────

    pub async fn catalog_search(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<RankedResults<DocumentHit>> {
        self.search.catalog_search(text, limit).await
    }

    pub async fn chunks_search(
        &self,
        text: &str,
        source: &str,
        limit: usize,
    ) -> Result<RankedResults<ChunkHit>> {
        self.search.chunks_search(text, source, limit).await
    }

    pub async fn broad_chunks_search(
        &self,
        text: &str,
        limit: usize,
        exclude_meta_content: Option<bool>,
        exclude_references: Option<bool>,
    ) -> Result<RankedResults<ChunkHit>> {
        self.search
            .broad_chunks_search(text, limit, exclude_meta_content, exclude_references)
            .await
    }

    pub async fn concept_search(&self, concept: &str, limit: usize) -> Result<ConceptSearchResult> {
        self.search.concept_search(concept, limit).await
    }

    // ── Concept / category surface ────────────────────────────────────

    /// Concept bundle for an already-ingested source.
    pub async fn extract_concepts(&self, source: &str) -> Result<ConceptBundle> {
        if source.trim().is_empty() {
            return Err(Error::MissingParameter { name: "source" });
        }
        let row = self
            .catalog
            .get_by_source(source)
            .await?
            .ok_or_else(|| Error::SourceNotFound { source: source.to_string() })?;

        let primary_concepts = self.concept_cache.names_of(&row.concept_ids);
        let categories = self.category_cache.names_of(&row.category_ids);

        // Related concepts: union over this document's concept rows.
        let mut related: Vec<String> = Vec::new();
        for id in &row.concept_ids {
            if let Some(concept) = self.concepts.get_by_id(*id).await? {
                for name in concept.related_concepts {
                    if !primary_concepts.iter().any(|p| p.eq_ignore_ascii_case(&name))
                        && !related.iter().any(|r| r.eq_ignore_ascii_case(&name))
                    {
                        related.push(name);
                    }
                }
            }
        }

        Ok(ConceptBundle {
            primary_concepts,
            categories,
            related_concepts: related,
        })
    }

    /// Sources that feature a concept as primary.
    pub async fn source_concepts(&self, concept: &str, limit: usize) -> Result<Vec<SourceConceptHit>> {
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

        let catalog_rows = self.catalog.all().await?;
        let mut hits: Vec<SourceConceptHit> = catalog_rows
            .into_iter()
            .filter(|row| record.catalog_ids.contains(&row.id))
            .map(|row| SourceConceptHit {
                title: title_from_source(&row.source),
                source: row.source,
                catalog_id: row.id,
                concept_weight: record.weight,
            })
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.catalog_id.cmp(&b.catalog_id)));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Documents carrying a category (name or alias).
    pub async fn category_search(&self, category: &str, limit: usize) -> Result<Vec<DocumentHit>> {
        let name = category.trim();
        if name.is_empty() {
            return Err(Error::MissingParameter { name: "category" });
        }
        let id = self
            .resolve_category(name)
            .await?
            .ok_or_else(|| Error::ConceptNotFound { name: name.to_string() })?;

        let catalog_rows = self.catalog.all().await?;
        let mut hits: Vec<DocumentHit> = catalog_rows
            .into_iter()
            .filter(|row| row.category_ids.contains(&id))
            .map(|row| DocumentHit {
                id: row.id,
                title: title_from_source(&row.source),
                source: row.source,
                text: row.text,
                score: 0.0,
                concept_density: row.concept_density,
                breakdown: ScoreBreakdown::default(),
            })
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn list_categories(&self) -> Result<Vec<CategoryRecord>> {
        let mut rows = self.categories.all().await?;
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    /// Concept names appearing in a category's documents, strongest first.
    pub async fn list_concepts_in_category(&self, category: &str) -> Result<Vec<String>> {
        let name = category.trim();
        if name.is_empty() {
            return Err(Error::MissingParameter { name: "category" });
        }
        let id = self
            .resolve_category(name)
            .await?
            .ok_or_else(|| Error::ConceptNotFound { name: name.to_string() })?;

        let catalog_rows = self.catalog.all().await?;
        let mut concept_ids: Vec<u32> = catalog_rows
            .iter()
            .filter(|row| row.category_ids.contains(&id))
            .flat_map(|row| row.concept_ids.iter().copied())
            .collect();
        concept_ids.sort_unstable();
        concept_ids.dedup();

        let mut weighted: Vec<(String, f32)> = Vec::new();
        for cid in concept_ids {
            if let Some(concept) = self.concepts.get_by_id(cid).await? {
                weighted.push((concept.concept, concept.weight));
            }
        }
        weighted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(weighted.into_iter().map(|(name, _)| name).collect())
    }

    async fn resolve_category(&self, name: &str) -> Result<Option<u32>> {
        if let Some(id) = self.category_cache.id_of(name) {
            return Ok(Some(id));
        }
        // Fall back to alias matching over the table.
        let lower = name.to_lowercase();
        for row in self.categories.all().await? {
            if row.aliases.iter().any(|a| a.to_lowercase() == lower) {
                return Ok(Some(row.id));
            }
        }
        Ok(None)
    }

    // ── Ingestion ─────────────────────────────────────────────────────

    /// Run an ingestion batch over a directory. Requires the LLM API key in
    /// the environment; aborts before any store write when it is missing or
    /// rejected.
    pub async fn ingest(&self, root: &Path) -> Result<IngestReport> {
        let chat = ChatClient::from_env(&self.config.ingest.llm_model)?;
        self.ingest_with_client(root, chat).await
    }

    /// Ingestion with an explicit chat client (tests inject a fake endpoint).
    pub async fn ingest_with_client(&self, root: &Path, chat: ChatClient) -> Result<IngestReport> {
        let index_builder = ConceptIndexBuilder::new(
            self.catalog.clone(),
            self.chunks.clone(),
            self.concepts.clone(),
            self.embedder.clone(),
            self.concept_cache.clone(),
        );
        let pipeline = IngestPipeline::new(
            self.config.clone(),
            self.catalog.clone(),
            self.chunks.clone(),
            self.concepts.clone(),
            self.categories.clone(),
            self.embedder.clone(),
            chat,
            Arc::new(ResilientExecutor::new(ResilienceProfile::llm())),
            Arc::new(ResilientExecutor::new(ResilienceProfile::embedding())),
            index_builder,
            self.category_cache.clone(),
        );

        let report = pipeline.run(root).await?;

        // Tables changed: drop result caches and stats, refresh the
        // thesaurus from the fresh concept index.
        self.search.invalidate();
        let names: Vec<String> = self
            .concepts
            .all()
            .await?
            .into_iter()
            .map(|c| c.concept)
            .collect();
        self.search.refresh_thesaurus(&names);

        Ok(report)
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn concept_cache(&self) -> &IdNameCache {
        &self.concept_cache
    }

    pub fn category_cache(&self) -> &IdNameCache {
        &self.category_cache
    }

    pub async fn catalog_count(&self) -> Result<usize> {
        self.catalog.count().await
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        self.chunks.count().await
    }

    pub async fn all_catalog_entries(&self) -> Result<Vec<crate::types::CatalogRecord>> {
        self.catalog.all().await
    }

    pub async fn all_chunks(&self) -> Result<Vec<crate::types::ChunkRecord>> {
        self.chunks.all().await
    }

    pub async fn all_concepts(&self) -> Result<Vec<crate::types::ConceptRecord>> {
        self.concepts.all().await
    }
}
