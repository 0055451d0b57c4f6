//! Concept repository.
//!
//! The concepts table is a derived projection: the index builder replaces
//! it wholesale after each ingestion batch. The replacement row set is
//! materialized in full before the table is touched, so a failed rebuild
//! leaves the previous table intact.

use std::sync::Arc;

use arrow_array::{ArrayRef, Float32Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema};

use super::columns::*;
use super::store::TableStore;
use crate::error::Result;
use crate::types::ConceptRecord;

pub const TABLE: &str = "concepts";

#[derive(Clone)]
pub struct ConceptRepository {
    store: Arc<TableStore>,
}

impl ConceptRepository {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::UInt32, false),
            Field::new("concept", DataType::Utf8, false),
            vector_field("vector", self.store.dimension()),
            Field::new("weight", DataType::Float32, false),
            Field::new("chunk_count", DataType::UInt32, false),
            u32_list_field("catalog_ids"),
            utf8_list_field("related_concepts"),
        ]))
    }

    fn to_batch(&self, rows: &[ConceptRecord]) -> Result<RecordBatch> {
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.concept.as_str()).collect();
        let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
        let weights: Vec<f32> = rows.iter().map(|r| r.weight).collect();
        let chunk_counts: Vec<u32> = rows.iter().map(|r| r.chunk_count).collect();
        let catalog_ids: Vec<Vec<u32>> = rows.iter().map(|r| r.catalog_ids.clone()).collect();
        let related: Vec<Vec<String>> = rows.iter().map(|r| r.related_concepts.clone()).collect();

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(UInt32Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(names)),
                Arc::new(vector_column(&vectors, self.store.dimension())),
                Arc::new(Float32Array::from(weights)),
                Arc::new(UInt32Array::from(chunk_counts)),
                Arc::new(u32_list_column(&catalog_ids)),
                Arc::new(utf8_list_column(&related)),
            ],
        )
        .map_err(|e| crate::error::Error::database("concepts.to_batch", e))
    }

    fn from_batches(batches: &[RecordBatch]) -> Vec<ConceptRecord> {
        let mut rows = Vec::new();
        for batch in batches {
            for i in 0..batch.num_rows() {
                rows.push(ConceptRecord {
                    id: read_u32(batch, "id", i),
                    concept: read_str(batch, "concept", i),
                    vector: read_vector(batch, "vector", i),
                    weight: read_f32(batch, "weight", i),
                    chunk_count: read_u32(batch, "chunk_count", i),
                    catalog_ids: read_u32_list(batch, "catalog_ids", i),
                    related_concepts: read_utf8_list(batch, "related_concepts", i),
                });
            }
        }
        rows
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let empty = self.to_batch(&[])?;
        self.store.ensure_table(TABLE, self.schema(), empty).await
    }

    /// Truncate-and-replace with a fully materialized row set.
    pub async fn replace_all(&self, rows: &[ConceptRecord]) -> Result<()> {
        let batch = self.to_batch(rows)?;
        self.store.drop_table(TABLE).await?;
        self.store.ensure_table(TABLE, self.schema(), batch).await?;
        tracing::info!(concepts = rows.len(), "rebuilt concepts table");
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(TABLE).await
    }

    pub async fn all(&self) -> Result<Vec<ConceptRecord>> {
        let batches = self.store.scan(TABLE, None, None).await?;
        Ok(Self::from_batches(&batches))
    }

    pub async fn create_vector_index(&self, min_rows: usize) -> Result<bool> {
        self.store.create_vector_index(TABLE, min_rows).await
    }

    pub async fn get_by_id(&self, id: u32) -> Result<Option<ConceptRecord>> {
        let predicate = format!("id = {}", id);
        let batches = self.store.scan(TABLE, Some(&predicate), Some(1)).await?;
        Ok(Self::from_batches(&batches).into_iter().next())
    }
}
