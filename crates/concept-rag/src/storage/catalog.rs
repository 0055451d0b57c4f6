//! Catalog repository: one row per source document.

use std::sync::Arc;

use arrow_array::{ArrayRef, Float32Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema};

use super::columns::*;
use super::store::TableStore;
use crate::embeddings::validate_embedding;
use crate::error::Result;
use crate::types::CatalogRecord;

pub const TABLE: &str = "catalog";

#[derive(Clone)]
pub struct CatalogRepository {
    store: Arc<TableStore>,
}

impl CatalogRepository {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::UInt32, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("hash", DataType::Utf8, false),
            vector_field("vector", self.store.dimension()),
            u32_list_field("concept_ids"),
            u32_list_field("category_ids"),
            Field::new("concept_density", DataType::Float32, true),
        ]))
    }

    fn to_batch(&self, rows: &[CatalogRecord]) -> Result<RecordBatch> {
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        let sources: Vec<&str> = rows.iter().map(|r| r.source.as_str()).collect();
        let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
        let hashes: Vec<&str> = rows.iter().map(|r| r.hash.as_str()).collect();
        let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
        let concept_ids: Vec<Vec<u32>> = rows.iter().map(|r| r.concept_ids.clone()).collect();
        let category_ids: Vec<Vec<u32>> = rows.iter().map(|r| r.category_ids.clone()).collect();
        let densities: Vec<Option<f32>> = rows.iter().map(|r| r.concept_density).collect();

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(UInt32Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(hashes)),
                Arc::new(vector_column(&vectors, self.store.dimension())),
                Arc::new(u32_list_column(&concept_ids)),
                Arc::new(u32_list_column(&category_ids)),
                Arc::new(Float32Array::from(densities)),
            ],
        )
        .map_err(|e| crate::error::Error::database("catalog.to_batch", e))
    }

    fn from_batches(batches: &[RecordBatch]) -> Vec<(CatalogRecord, Option<f32>)> {
        let mut rows = Vec::new();
        for batch in batches {
            for i in 0..batch.num_rows() {
                rows.push((
                    CatalogRecord {
                        id: read_u32(batch, "id", i),
                        source: read_str(batch, "source", i),
                        text: read_str(batch, "text", i),
                        hash: read_str(batch, "hash", i),
                        vector: read_vector(batch, "vector", i),
                        concept_ids: read_u32_list(batch, "concept_ids", i),
                        category_ids: read_u32_list(batch, "category_ids", i),
                        concept_density: read_opt_f32(batch, "concept_density", i),
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

    pub async fn append(&self, rows: &[CatalogRecord]) -> Result<()> {
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

    pub async fn all(&self) -> Result<Vec<CatalogRecord>> {
        let batches = self.store.scan(TABLE, None, None).await?;
        Ok(Self::from_batches(&batches).into_iter().map(|(r, _)| r).collect())
    }

    pub async fn get_by_source(&self, source: &str) -> Result<Option<CatalogRecord>> {
        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        let batches = self.store.scan(TABLE, Some(&predicate), Some(1)).await?;
        Ok(Self::from_batches(&batches).into_iter().map(|(r, _)| r).next())
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<CatalogRecord>> {
        let predicate = format!("hash = '{}'", hash.replace('\'', "''"));
        let batches = self.store.scan(TABLE, Some(&predicate), Some(1)).await?;
        Ok(Self::from_batches(&batches).into_iter().map(|(r, _)| r).next())
    }

    pub async fn delete_by_source(&self, source: &str) -> Result<()> {
        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        self.store.delete(TABLE, &predicate).await
    }

    pub async fn create_vector_index(&self, min_rows: usize) -> Result<bool> {
        self.store.create_vector_index(TABLE, min_rows).await
    }

    /// Top-k rows by cosine similarity; returns (record, distance).
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<(CatalogRecord, f32)>> {
        let batches = self.store.vector_search(TABLE, query_vector, k, None).await?;
        Ok(Self::from_batches(&batches)
            .into_iter()
            .map(|(r, d)| (r, d.unwrap_or(1.0)))
            .collect())
    }
}
