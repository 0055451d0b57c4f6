//! Chunk repository: one row per sliding-window chunk.

use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float32Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema};

use super::columns::*;
use super::store::TableStore;
use crate::embeddings::validate_embedding;
use crate::error::Result;
use crate::types::{ChunkFilter, ChunkRecord};

pub const TABLE: &str = "chunks";

#[derive(Clone)]
pub struct ChunkRepository {
    store: Arc<TableStore>,
}

impl ChunkRepository {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::UInt32, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("page_number", DataType::UInt32, false),
            Field::new("loc", DataType::Utf8, false),
            vector_field("vector", self.store.dimension()),
            u32_list_field("concept_ids"),
            u32_list_field("category_ids"),
            Field::new("concept_density", DataType::Float32, false),
            Field::new("is_toc", DataType::Boolean, false),
            Field::new("is_front_matter", DataType::Boolean, false),
            Field::new("is_back_matter", DataType::Boolean, false),
            Field::new("is_meta_content", DataType::Boolean, false),
            Field::new("is_reference", DataType::Boolean, false),
            Field::new("has_math_issues", DataType::Boolean, false),
        ]))
    }

    fn to_batch(&self, rows: &[ChunkRecord]) -> Result<RecordBatch> {
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        let sources: Vec<&str> = rows.iter().map(|r| r.source.as_str()).collect();
        let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
        let pages: Vec<u32> = rows.iter().map(|r| r.page_number).collect();
        let locs: Vec<&str> = rows.iter().map(|r| r.loc.as_str()).collect();
        let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
        let concept_ids: Vec<Vec<u32>> = rows.iter().map(|r| r.concept_ids.clone()).collect();
        let category_ids: Vec<Vec<u32>> = rows.iter().map(|r| r.category_ids.clone()).collect();
        let densities: Vec<f32> = rows.iter().map(|r| r.concept_density).collect();
        let is_toc: Vec<bool> = rows.iter().map(|r| r.is_toc).collect();
        let is_front: Vec<bool> = rows.iter().map(|r| r.is_front_matter).collect();
        let is_back: Vec<bool> = rows.iter().map(|r| r.is_back_matter).collect();
        let is_meta: Vec<bool> = rows.iter().map(|r| r.is_meta_content).collect();
        let is_reference: Vec<bool> = rows.iter().map(|r| r.is_reference).collect();
        let has_math: Vec<bool> = rows.iter().map(|r| r.has_math_issues).collect();

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(UInt32Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(texts)),
                Arc::new(UInt32Array::from(pages)),
                Arc::new(StringArray::from(locs)),
                Arc::new(vector_column(&vectors, self.store.dimension())),
                Arc::new(u32_list_column(&concept_ids)),
                Arc::new(u32_list_column(&category_ids)),
                Arc::new(Float32Array::from(densities)),
                Arc::new(BooleanArray::from(is_toc)),
                Arc::new(BooleanArray::from(is_front)),
                Arc::new(BooleanArray::from(is_back)),
                Arc::new(BooleanArray::from(is_meta)),
                Arc::new(BooleanArray::from(is_reference)),
                Arc::new(BooleanArray::from(has_math)),
            ],
        )
        .map_err(|e| crate::error::Error::database("chunks.to_batch", e))
    }

    fn from_batches(batches: &[RecordBatch]) -> Vec<(ChunkRecord, Option<f32>)> {
        let mut rows = Vec::new();
        for batch in batches {
            for i in 0..batch.num_rows() {
                rows.push((
                    ChunkRecord {
                        id: read_u32(batch, "id", i),
                        source: read_str(batch, "source", i),
                        text: read_str(batch, "text", i),
                        page_number: read_u32(batch, "page_number", i),
                        loc: read_str(batch, "loc", i),
                        vector: read_vector(batch, "vector", i),
                        concept_ids: read_u32_list(batch, "concept_ids", i),
                        category_ids: read_u32_list(batch, "category_ids", i),
                        concept_density: read_f32(batch, "concept_density", i),
                        is_toc: read_bool(batch, "is_toc", i),
                        is_front_matter: read_bool(batch, "is_front_matter", i),
                        is_back_matter: read_bool(batch, "is_back_matter", i),
                        is_meta_content: read_bool(batch, "is_meta_content", i),
                        is_reference: read_bool(batch, "is_reference", i),
                        has_math_issues: read_bool(batch, "has_math_issues", i),
                    },
                    read_distance(batch, i),
                ));
            }
        }
        rows
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let empty = self.to_batch(&[])?;
        self.store.ensure_table(TABLE, self.schema(), empty).await
    }

    pub async fn append(&self, rows: &[ChunkRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for row in rows {
            validate_embedding(&row.vector, self.store.dimension())?;
        }
        let batch = self.to_batch(rows)?;
        self.store.append(TABLE, self.schema(), batch).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(TABLE).await
    }

    pub async fn all(&self) -> Result<Vec<ChunkRecord>> {
        let batches = self.store.scan(TABLE, None, None).await?;
        Ok(Self::from_batches(&batches).into_iter().map(|(r, _)| r).collect())
    }

    pub async fn for_source(&self, source: &str) -> Result<Vec<ChunkRecord>> {
        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        let batches = self.store.scan(TABLE, Some(&predicate), None).await?;
        Ok(Self::from_batches(&batches).into_iter().map(|(r, _)| r).collect())
    }

    pub async fn count_for_source(&self, source: &str) -> Result<usize> {
        Ok(self.for_source(source).await?.len())
    }

    pub async fn delete_by_source(&self, source: &str) -> Result<()> {
        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        self.store.delete(TABLE, &predicate).await
    }

    pub async fn create_vector_index(&self, min_rows: usize) -> Result<bool> {
        self.store.create_vector_index(TABLE, min_rows).await
    }

    /// Top-k chunks by cosine similarity under a metadata filter.
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>> {
        let predicate = filter.to_predicate();
        let batches = self
            .store
            .vector_search(TABLE, query_vector, k, predicate.as_deref())
            .await?;
        Ok(Self::from_batches(&batches)
            .into_iter()
            .map(|(r, d)| (r, d.unwrap_or(1.0)))
            .collect())
    }

    /// Filtered scan without vector ranking, used by the BM25-only fallback.
    pub async fn scan_filtered(
        &self,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let predicate = filter.to_predicate();
        let batches = self
            .store
            .scan(TABLE, predicate.as_deref(), Some(limit))
            .await?;
        Ok(Self::from_batches(&batches).into_iter().map(|(r, _)| r).collect())
    }
}
