//! Concept index builder.
//!
//! The concepts table is derived: after an ingestion batch it is rebuilt in
//! full from the catalog and chunk concept arrays. Chunk counts are exact
//! recounts over the chunk table; incremental updates are forbidden (they
//! undercount after partial re-seeds). After the rebuild the ID caches are
//! reloaded with an atomic swap.

use std::collections::HashMap;
use std::sync::Arc;

use crate::embeddings::EmbeddingModel;
use crate::error::Result;
use crate::hash::{concept_id, concept_id_suffixed};
use crate::storage::{CatalogRepository, ChunkRepository, ConceptRepository};
use crate::types::ConceptRecord;

use super::id_cache::IdNameCache;

pub const MAX_RELATED_CONCEPTS: usize = 32;

/// Authoritative name → id assignment, shared between ingestion (which
/// writes concept_ids into catalog and chunk rows) and the rebuild (which
/// resolves them back to names). Hash collisions are resolved by retrying
/// with a `::k` suffix; the display name stays unsuffixed.
#[derive(Debug, Default, Clone)]
pub struct ConceptNameRegistry {
    by_id: HashMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl ConceptNameRegistry {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, String)>) -> Self {
        let mut registry = Self::default();
        for (id, name) in pairs {
            registry.by_name.insert(name.to_lowercase(), id);
            registry.by_id.insert(id, name);
        }
        registry
    }

    /// Id for a name, assigning a fresh (possibly collision-suffixed) id on
    /// first sight.
    pub fn assign(&mut self, name: &str) -> u32 {
        let lower = name.to_lowercase();
        if let Some(id) = self.by_name.get(&lower) {
            return *id;
        }

        let mut id = concept_id(name);
        let mut k = 0u32;
        while self.by_id.contains_key(&id) {
            k += 1;
            id = concept_id_suffixed(name, k);
        }
        self.by_name.insert(lower, id);
        self.by_id.insert(id, name.to_string());
        id
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (u32, String)> + '_ {
        self.by_id.iter().map(|(id, name)| (*id, name.clone()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

pub struct ConceptIndexBuilder {
    catalog: CatalogRepository,
    chunks: ChunkRepository,
    concepts: ConceptRepository,
    embedder: Arc<dyn EmbeddingModel>,
    concept_cache: Arc<IdNameCache>,
}

impl ConceptIndexBuilder {
    pub fn new(
        catalog: CatalogRepository,
        chunks: ChunkRepository,
        concepts: ConceptRepository,
        embedder: Arc<dyn EmbeddingModel>,
        concept_cache: Arc<IdNameCache>,
    ) -> Self {
        Self { catalog, chunks, concepts, embedder, concept_cache }
    }

    /// Full truncate-and-rebuild. The complete replacement row set is
    /// materialized (embeddings included) before the table is touched, so
    /// any failure up to that point leaves the previous table intact.
    pub async fn rebuild(&self, registry: &ConceptNameRegistry) -> Result<usize> {
        let catalog_rows = self.catalog.all().await?;
        let chunk_rows = self.chunks.all().await?;

        // Every concept id referenced anywhere, resolved through the registry.
        let mut referenced: Vec<u32> = catalog_rows
            .iter()
            .flat_map(|r| r.concept_ids.iter().copied())
            .chain(chunk_rows.iter().flat_map(|r| r.concept_ids.iter().copied()))
            .collect();
        referenced.sort_unstable();
        referenced.dedup();

        let mut catalog_ids_by_concept: HashMap<u32, Vec<u32>> = HashMap::new();
        for row in &catalog_rows {
            for cid in &row.concept_ids {
                catalog_ids_by_concept.entry(*cid).or_default().push(row.id);
            }
        }

        let mut chunk_count_by_concept: HashMap<u32, u32> = HashMap::new();
        for row in &chunk_rows {
            for cid in &row.concept_ids {
                *chunk_count_by_concept.entry(*cid).or_insert(0) += 1;
            }
        }

        let mut records = Vec::with_capacity(referenced.len());
        for id in referenced {
            let Some(name) = registry.name_of(id) else {
                tracing::warn!(concept_id = id, "referenced concept id has no registered name, skipping");
                continue;
            };

            let vector = self.embedder.embed_document(name).await?;

            let mut catalog_ids = catalog_ids_by_concept.get(&id).cloned().unwrap_or_default();
            catalog_ids.sort_unstable();
            catalog_ids.dedup();

            let chunk_count = chunk_count_by_concept.get(&id).copied().unwrap_or(0);
            let weight = weight_for(chunk_count, catalog_ids.len());
            let related_concepts =
                related_for(id, &catalog_ids, &catalog_rows, registry);

            records.push(ConceptRecord {
                id,
                concept: name.to_string(),
                vector,
                weight,
                chunk_count,
                catalog_ids,
                related_concepts,
            });
        }

        // Row set is complete; now replace the table and swap the cache.
        self.concepts.replace_all(&records).await?;
        self.concept_cache
            .swap(records.iter().map(|r| (r.id, r.concept.clone())));

        Ok(records.len())
    }
}

/// weight = ln(1 + chunk_count) · (1 + 0.5·ln(1 + |catalog_ids|))
pub fn weight_for(chunk_count: u32, catalog_count: usize) -> f32 {
    (1.0 + chunk_count as f32).ln() * (1.0 + 0.5 * (1.0 + catalog_count as f32).ln())
}

/// Union of co-occurring concept names across the documents featuring this
/// concept, top 32 by co-occurrence count descending, ties by name.
fn related_for(
    id: u32,
    catalog_ids: &[u32],
    catalog_rows: &[crate::types::CatalogRecord],
    registry: &ConceptNameRegistry,
) -> Vec<String> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for row in catalog_rows {
        if !catalog_ids.contains(&row.id) {
            continue;
        }
        for other in &row.concept_ids {
            if *other == id {
                continue;
            }
            if let Some(name) = registry.name_of(*other) {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(MAX_RELATED_CONCEPTS)
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_assignment_is_stable_and_case_insensitive() {
        let mut registry = ConceptNameRegistry::default();
        let a = registry.assign("Dependency Injection");
        let b = registry.assign("dependency injection");
        assert_eq!(a, b);
        assert_eq!(registry.name_of(a), Some("Dependency Injection"));
    }

    #[test]
    fn collisions_get_suffixed_ids() {
        let mut registry = ConceptNameRegistry::default();
        let first = registry.assign("observer");
        // Force a collision by pre-seeding another name at observer's slot.
        let mut forced = ConceptNameRegistry::from_pairs(vec![(first, "occupant".to_string())]);
        let second = forced.assign("observer");
        assert_ne!(first, second);
        assert_eq!(second, crate::hash::concept_id_suffixed("observer", 1));
        assert_eq!(forced.name_of(second), Some("observer"));
    }

    #[test]
    fn weight_grows_with_chunk_count_and_catalog_spread() {
        assert_eq!(weight_for(0, 0), 0.0);
        assert!(weight_for(10, 1) > weight_for(5, 1));
        assert!(weight_for(10, 3) > weight_for(10, 1));
    }

    #[test]
    fn related_ranking_is_by_cooccurrence_then_name() {
        use crate::types::CatalogRecord;

        let mut registry = ConceptNameRegistry::default();
        let target = registry.assign("target");
        let common = registry.assign("common");
        let rare_a = registry.assign("aardvark");
        let rare_b = registry.assign("zebra");

        let row = |id: u32, concepts: Vec<u32>| CatalogRecord {
            id,
            source: format!("/doc{}.pdf", id),
            text: String::new(),
            hash: String::new(),
            vector: Vec::new(),
            concept_ids: concepts,
            category_ids: Vec::new(),
            concept_density: None,
        };

        let rows = vec![
            row(1, vec![target, common, rare_a]),
            row(2, vec![target, common, rare_b]),
        ];

        let related = related_for(target, &[1, 2], &rows, &registry);
        assert_eq!(related[0], "common");
        // Tied singles rank by name.
        assert_eq!(related[1], "aardvark");
        assert_eq!(related[2], "zebra");
    }
}
