//! Connection to the LanceDB database directory.
//!
//! The store is opened once; repositories hold a shared reference and open
//! tables per operation. Row-level operations run through the store's
//! resilient executor (bulkhead + timeout + breaker); table DDL (create,
//! drop, index build) runs unwrapped because index builds legitimately
//! exceed the per-call deadline.

use std::path::Path;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::Schema;
use futures::TryStreamExt;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{Error, Result};
use crate::resilience::{ResilienceProfile, ResilientExecutor};

/// Full scans cap out here; a local document library stays far below it.
const SCAN_LIMIT: usize = 1_000_000;

pub struct TableStore {
    db: lancedb::Connection,
    dimension: usize,
    exec: ResilientExecutor,
}

impl TableStore {
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(&path.display().to_string())
            .execute()
            .await
            .map_err(|e| Error::database("store.open", e))?;
        Ok(Self {
            db,
            dimension,
            exec: ResilientExecutor::new(ResilienceProfile::store()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn open_table(&self, name: &str) -> Result<lancedb::Table> {
        self.db
            .open_table(name)
            .execute()
            .await
            .map_err(|e| Error::database("store.open_table", e))
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.db
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::database("store.table_names", e))
    }

    /// Create the table from an empty batch when it does not exist yet.
    pub async fn ensure_table(
        &self,
        name: &str,
        schema: Arc<Schema>,
        empty: RecordBatch,
    ) -> Result<()> {
        let names = self.table_names().await?;
        if names.iter().any(|n| n == name) {
            return Ok(());
        }
        let batches = RecordBatchIterator::new(vec![Ok(empty)], schema);
        self.db
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .map_err(|e| Error::database("store.create_table", e))?;
        tracing::debug!(table = name, "created table");
        Ok(())
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        let names = self.table_names().await?;
        if names.iter().any(|n| n == name) {
            self.db
                .drop_table(name, &[])
                .await
                .map_err(|e| Error::database("store.drop_table", e))?;
        }
        Ok(())
    }

    pub async fn append(&self, name: &str, schema: Arc<Schema>, batch: RecordBatch) -> Result<()> {
        self.exec
            .run(|| {
                let schema = schema.clone();
                let batch = batch.clone();
                async move {
                    let table = self.open_table(name).await?;
                    let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
                    table
                        .add(Box::new(reader))
                        .execute()
                        .await
                        .map(|_| ())
                        .map_err(|e| Error::database("store.append", e))
                }
            })
            .await
    }

    pub async fn count(&self, name: &str) -> Result<usize> {
        self.exec
            .run(|| async move {
                let table = self.open_table(name).await?;
                table
                    .count_rows(None)
                    .await
                    .map_err(|e| Error::database("store.count", e))
            })
            .await
    }

    pub async fn delete(&self, name: &str, predicate: &str) -> Result<()> {
        self.exec
            .run(|| async move {
                let table = self.open_table(name).await?;
                table
                    .delete(predicate)
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::database("store.delete", e))
            })
            .await
    }

    /// Plain scan with an optional SQL-style predicate over scalar fields.
    pub async fn scan(
        &self,
        name: &str,
        predicate: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<RecordBatch>> {
        self.exec
            .run(|| async move {
                let table = self.open_table(name).await?;
                let mut query = table.query().limit(limit.unwrap_or(SCAN_LIMIT));
                if let Some(predicate) = predicate {
                    query = query.only_if(predicate);
                }
                let stream = query
                    .execute()
                    .await
                    .map_err(|e| Error::database("store.scan", e))?;
                stream
                    .try_collect()
                    .await
                    .map_err(|e| Error::database("store.scan", e))
            })
            .await
    }

    /// Cosine top-k vector search with an optional scalar predicate.
    pub async fn vector_search(
        &self,
        name: &str,
        query_vector: &[f32],
        k: usize,
        predicate: Option<&str>,
    ) -> Result<Vec<RecordBatch>> {
        self.exec
            .run(|| async move {
                let table = self.open_table(name).await?;
                let mut query = table
                    .query()
                    .nearest_to(query_vector)
                    .map_err(|e| Error::database("store.vector_search", e))?
                    .distance_type(lancedb::DistanceType::Cosine)
                    .limit(k);
                if let Some(predicate) = predicate {
                    query = query.only_if(predicate);
                }
                let stream = query
                    .execute()
                    .await
                    .map_err(|e| Error::database("store.vector_search", e))?;
                stream
                    .try_collect()
                    .await
                    .map_err(|e| Error::database("store.vector_search", e))
            })
            .await
    }

    /// Create an IVF_PQ index on `vector` when the table is large enough.
    /// Partition count follows `max(2, min(256, rows / 300))`.
    pub async fn create_vector_index(&self, name: &str, min_rows: usize) -> Result<bool> {
        let rows = self.count(name).await?;
        if rows < min_rows {
            return Ok(false);
        }
        let partitions = (rows / 300).clamp(2, 256) as u32;
        let table = self.open_table(name).await?;
        table
            .create_index(
                &["vector"],
                Index::IvfPq(
                    IvfPqIndexBuilder::default()
                        .num_partitions(partitions)
                        .num_sub_vectors(16),
                ),
            )
            .execute()
            .await
            .map_err(|e| Error::database("store.create_index", e))?;
        tracing::info!(table = name, rows, partitions, "created IVF_PQ index");
        Ok(true)
    }
}
