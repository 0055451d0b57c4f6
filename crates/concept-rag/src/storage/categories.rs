//! Category repository.

use std::sync::Arc;

use arrow_array::{ArrayRef, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema};

use super::columns::*;
use super::store::TableStore;
use crate::error::Result;
use crate::types::CategoryRecord;

pub const TABLE: &str = "categories";

#[derive(Clone)]
pub struct CategoryRepository {
    store: Arc<TableStore>,
}

impl CategoryRepository {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::UInt32, false),
            Field::new("name", DataType::Utf8, false),
            utf8_list_field("aliases"),
            Field::new("parent_id", DataType::UInt32, true),
            Field::new("document_count", DataType::UInt32, false),
            Field::new("chunk_count", DataType::UInt32, false),
        ]))
    }

    fn to_batch(&self, rows: &[CategoryRecord]) -> Result<RecordBatch> {
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let aliases: Vec<Vec<String>> = rows.iter().map(|r| r.aliases.clone()).collect();
        let parents: Vec<Option<u32>> = rows.iter().map(|r| r.parent_id).collect();
        let doc_counts: Vec<u32> = rows.iter().map(|r| r.document_count).collect();
        let chunk_counts: Vec<u32> = rows.iter().map(|r| r.chunk_count).collect();

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(UInt32Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(names)),
                Arc::new(utf8_list_column(&aliases)),
                Arc::new(UInt32Array::from(parents)),
                Arc::new(UInt32Array::from(doc_counts)),
                Arc::new(UInt32Array::from(chunk_counts)),
            ],
        )
        .map_err(|e| crate::error::Error::database("categories.to_batch", e))
    }

    fn from_batches(batches: &[RecordBatch]) -> Vec<CategoryRecord> {
        let mut rows = Vec::new();
        for batch in batches {
            for i in 0..batch.num_rows() {
                rows.push(CategoryRecord {
                    id: read_u32(batch, "id", i),
                    name: read_str(batch, "name", i),
                    aliases: read_utf8_list(batch, "aliases", i),
                    parent_id: read_opt_u32(batch, "parent_id", i),
                    document_count: read_u32(batch, "document_count", i),
                    chunk_count: read_u32(batch, "chunk_count", i),
                });
            }
        }
        rows
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let empty = self.to_batch(&[])?;
        self.store.ensure_table(TABLE, self.schema(), empty).await
    }

    /// Counts are recomputed with the concept index; upserts during
    /// ingestion replace the whole table like the concepts projection.
    pub async fn replace_all(&self, rows: &[CategoryRecord]) -> Result<()> {
        let batch = self.to_batch(rows)?;
        self.store.drop_table(TABLE).await?;
        self.store.ensure_table(TABLE, self.schema(), batch).await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<CategoryRecord>> {
        let batches = self.store.scan(TABLE, None, None).await?;
        Ok(Self::from_batches(&batches))
    }

    pub async fn get_by_id(&self, id: u32) -> Result<Option<CategoryRecord>> {
        let predicate = format!("id = {}", id);
        let batches = self.store.scan(TABLE, Some(&predicate), Some(1)).await?;
        Ok(Self::from_batches(&batches).into_iter().next())
    }
}
