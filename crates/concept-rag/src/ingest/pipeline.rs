//! Ingestion pipeline.
//!
//! Per document: discover → dedup → load → chunk → classify → embed →
//! extract concepts → commit. Parallel workers share one token-bucket rate
//! limiter for LLM and embedding calls; commits serialize through the
//! single consumer of the worker stream. The API key is preflight-validated
//! before any store write. After the batch: concept index rebuild, category
//! stats, and IVF_PQ index creation on large tables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::concepts::extractor::ConceptExtractor;
use crate::concepts::index_builder::{ConceptIndexBuilder, ConceptNameRegistry};
use crate::concepts::IdNameCache;
use crate::config::EngineConfig;
use crate::embeddings::EmbeddingModel;
use crate::error::{Error, Result};
use crate::hash::{category_id, chunk_id, source_id};
use crate::ingest::checkpoint::{Checkpoint, CheckpointFile};
use crate::ingest::classifier::MetaContentClassifier;
use crate::ingest::rate_limit::TokenBucket;
use crate::llm::ChatClient;
use crate::processing::{DocumentLoader, TokenChunker};
use crate::resilience::ResilientExecutor;
use crate::search::bm25::tokenize;
use crate::storage::{CatalogRepository, CategoryRepository, ChunkRepository, ConceptRepository};
use crate::types::{CatalogRecord, CategoryRecord, ChunkRecord};

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub discovered: usize,
    pub processed: usize,
    pub skipped_duplicates: usize,
    pub skipped_quarantined: usize,
    pub failed: Vec<String>,
    pub quarantined: Vec<String>,
    pub chunks_written: usize,
    pub concepts_indexed: usize,
}

struct PreparedDocument {
    source: String,
    hash: String,
    replace_existing: bool,
    catalog_row: CatalogRecord,
    chunk_rows: Vec<ChunkRecord>,
    category_names: Vec<String>,
}

enum WorkOutcome {
    Prepared(Box<PreparedDocument>),
    SkippedDuplicate(String),
    Failed { source: String, error: Error },
}

pub struct IngestPipeline {
    config: EngineConfig,
    catalog: CatalogRepository,
    chunks: ChunkRepository,
    concepts: ConceptRepository,
    categories: CategoryRepository,
    embedder: Arc<dyn EmbeddingModel>,
    chat: ChatClient,
    llm_exec: Arc<ResilientExecutor>,
    embed_exec: Arc<ResilientExecutor>,
    bucket: Arc<TokenBucket>,
    loader: DocumentLoader,
    chunker: TokenChunker,
    classifier: MetaContentClassifier,
    checkpoint_file: CheckpointFile,
    index_builder: ConceptIndexBuilder,
    category_cache: Arc<IdNameCache>,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        catalog: CatalogRepository,
        chunks: ChunkRepository,
        concepts: ConceptRepository,
        categories: CategoryRepository,
        embedder: Arc<dyn EmbeddingModel>,
        chat: ChatClient,
        llm_exec: Arc<ResilientExecutor>,
        embed_exec: Arc<ResilientExecutor>,
        index_builder: ConceptIndexBuilder,
        category_cache: Arc<IdNameCache>,
    ) -> Self {
        let bucket = Arc::new(TokenBucket::new(
            config.ingest.rate_tokens_per_sec,
            config.ingest.rate_burst,
        ));
        let loader = DocumentLoader::new(config.ingest.ocr_char_density_threshold);
        let chunker = TokenChunker::new(
            config.chunking.chunk_tokens,
            config.chunking.overlap_tokens,
            config.chunking.min_chunk_tokens,
        );
        let checkpoint_file = CheckpointFile::new(&config.data_dir);
        Self {
            config,
            catalog,
            chunks,
            concepts,
            categories,
            embedder,
            chat,
            llm_exec,
            embed_exec,
            bucket,
            loader,
            chunker,
            classifier: MetaContentClassifier::new(),
            checkpoint_file,
            index_builder,
            category_cache,
        }
    }

    /// Run a full ingestion batch over a source directory. Resumable: the
    /// checkpoint skips already-committed content hashes, retries failed
    /// files once, and quarantines repeat offenders.
    pub async fn run(&self, root: &Path) -> Result<IngestReport> {
        // Preflight the API key before anything touches the store.
        self.chat.preflight().await?;

        let mut report = IngestReport::default();
        let checkpoint = Arc::new(Mutex::new(self.checkpoint_file.load().map_err(
            |e| Error::database("checkpoint.load", e),
        )?));

        let files = self.discover(root);
        report.discovered = files.len();
        tracing::info!(root = %root.display(), files = files.len(), "ingestion batch starting");

        // Seed the name registry with the previous index so re-ingested
        // documents keep their concept ids.
        let registry = Arc::new(Mutex::new(ConceptNameRegistry::from_pairs(
            self.concepts
                .all()
                .await?
                .into_iter()
                .map(|c| (c.id, c.concept)),
        )));

        checkpoint.lock().stage = Some("processing".to_string());

        let mut pending: Vec<PathBuf> = Vec::new();
        for path in files {
            let source = path.display().to_string();
            if checkpoint.lock().is_quarantined(&source) {
                report.skipped_quarantined += 1;
                tracing::warn!(source = %source, "skipping quarantined file");
                continue;
            }
            pending.push(path);
        }

        // First pass, then one retry pass for this run's failures.
        let mut batch_categories: HashMap<u32, String> = HashMap::new();
        let mut retry: Vec<PathBuf> = Vec::new();
        self.process_batch(
            &pending,
            &checkpoint,
            &registry,
            &mut batch_categories,
            &mut report,
            Some(&mut retry),
        )
        .await?;
        if !retry.is_empty() {
            tracing::info!(files = retry.len(), "retrying failed files");
            self.process_batch(
                &retry,
                &checkpoint,
                &registry,
                &mut batch_categories,
                &mut report,
                None,
            )
            .await?;
        }

        // Post-batch passes: concept index, category stats, vector indexes.
        checkpoint.lock().stage = Some("index_rebuild".to_string());
        self.save_checkpoint(&checkpoint)?;

        let registry_snapshot = registry.lock().clone();
        report.concepts_indexed = self.index_builder.rebuild(&registry_snapshot).await?;
        self.rebuild_category_stats(&batch_categories).await?;

        let min_rows = self.config.ingest.index_min_rows;
        if let Err(err) = self.catalog.create_vector_index(min_rows).await {
            tracing::warn!(table = "catalog", error = %err, "vector index creation failed");
        }
        if let Err(err) = self.chunks.create_vector_index(min_rows).await {
            tracing::warn!(table = "chunks", error = %err, "vector index creation failed");
        }
        if let Err(err) = self.concepts.create_vector_index(min_rows).await {
            tracing::warn!(table = "concepts", error = %err, "vector index creation failed");
        }

        checkpoint.lock().stage = Some("complete".to_string());
        self.save_checkpoint(&checkpoint)?;

        tracing::info!(
            processed = report.processed,
            skipped_duplicates = report.skipped_duplicates,
            chunks = report.chunks_written,
            concepts = report.concepts_indexed,
            failed = report.failed.len(),
            quarantined = report.quarantined.len(),
            "ingestion batch complete"
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        files: &[PathBuf],
        checkpoint: &Arc<Mutex<Checkpoint>>,
        registry: &Arc<Mutex<ConceptNameRegistry>>,
        batch_categories: &mut HashMap<u32, String>,
        report: &mut IngestReport,
        mut retry: Option<&mut Vec<PathBuf>>,
    ) -> Result<()> {
        let workers = self.config.ingest.workers.max(1);
        let mut stream = futures::stream::iter(files.iter().cloned())
            .map(|path| {
                let checkpoint = checkpoint.clone();
                let registry = registry.clone();
                async move { (path.clone(), self.process_document(&path, &checkpoint, &registry).await) }
            })
            .buffer_unordered(workers);

        // Single committer: workers prepare, this loop writes.
        while let Some((path, outcome)) = stream.next().await {
            match outcome {
                WorkOutcome::Prepared(prepared) => {
                    match self.commit(&prepared).await {
                        Ok(chunk_count) => {
                            report.processed += 1;
                            report.chunks_written += chunk_count;
                            for name in &prepared.category_names {
                                batch_categories.insert(category_id(name), name.clone());
                            }
                            let mut cp = checkpoint.lock();
                            cp.mark_processed(prepared.hash.clone(), &prepared.source);
                            drop(cp);
                            self.save_checkpoint(checkpoint)?;
                        }
                        Err(err) => {
                            self.note_failure(&prepared.source, &err, checkpoint, report, retry.as_deref_mut(), &path);
                        }
                    }
                }
                WorkOutcome::SkippedDuplicate(source) => {
                    report.skipped_duplicates += 1;
                    tracing::debug!(source = %source, "duplicate content, skipped");
                }
                WorkOutcome::Failed { source, error } => {
                    // A dead API key aborts the whole batch.
                    if matches!(error, Error::Auth { .. }) {
                        return Err(error);
                    }
                    self.note_failure(&source, &error, checkpoint, report, retry.as_deref_mut(), &path);
                }
            }
        }
        Ok(())
    }

    fn note_failure(
        &self,
        source: &str,
        error: &Error,
        checkpoint: &Arc<Mutex<Checkpoint>>,
        report: &mut IngestReport,
        retry: Option<&mut Vec<PathBuf>>,
        path: &Path,
    ) {
        tracing::error!(source = %source, error = %error, "document failed");
        let attempts = {
            let mut cp = checkpoint.lock();
            cp.record_failure(source)
        };
        let _ = self.save_checkpoint(checkpoint);
        match retry {
            Some(retry_list) if attempts < crate::ingest::checkpoint::MAX_FILE_ATTEMPTS => {
                retry_list.push(path.to_path_buf());
            }
            _ => {
                report.quarantined.push(source.to_string());
            }
        }
        report.failed.push(source.to_string());
    }

    fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|ext| {
                        let ext = ext.to_lowercase();
                        self.config.ingest.extensions.iter().any(|allowed| *allowed == ext)
                    })
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }

    async fn process_document(
        &self,
        path: &Path,
        checkpoint: &Arc<Mutex<Checkpoint>>,
        registry: &Arc<Mutex<ConceptNameRegistry>>,
    ) -> WorkOutcome {
        let source = path.display().to_string();
        match self.prepare(path, &source, checkpoint, registry).await {
            Ok(Some(prepared)) => WorkOutcome::Prepared(Box::new(prepared)),
            Ok(None) => WorkOutcome::SkippedDuplicate(source),
            Err(error) => WorkOutcome::Failed { source, error },
        }
    }

    async fn prepare(
        &self,
        path: &Path,
        source: &str,
        checkpoint: &Arc<Mutex<Checkpoint>>,
        registry: &Arc<Mutex<ConceptNameRegistry>>,
    ) -> Result<Option<PreparedDocument>> {
        // Content-addressed dedup.
        let bytes = std::fs::read(path).map_err(|e| Error::Upstream {
            endpoint: source.to_string(),
            message: format!("failed to read file: {}", e),
        })?;
        let hash = format!("{:x}", Sha256::digest(&bytes));
        drop(bytes);

        if checkpoint.lock().is_processed(&hash) && !self.config.ingest.overwrite {
            return Ok(None);
        }

        let mut replace_existing = false;
        if let Some(existing) = self.catalog.get_by_hash(&hash).await? {
            let has_chunks = self.chunks.count_for_source(&existing.source).await? > 0;
            if has_chunks && !self.config.ingest.overwrite {
                return Ok(None);
            }
            replace_existing = true;
        }
        if self.catalog.get_by_source(source).await?.is_some() {
            // Same path, new content: the old row is replaced on rehash.
            replace_existing = true;
        }

        // Load and chunk.
        let document = self.loader.load(path).map_err(|e| Error::Upstream {
            endpoint: source.to_string(),
            message: format!("failed to load document: {}", e),
        })?;
        if document.needs_ocr {
            let first_attempt = checkpoint.lock().ocr_attempted.insert(source.to_string());
            if first_attempt {
                tracing::warn!(source = %source, "extracted text below density threshold, OCR needed");
            }
        }
        let pieces = self.chunker.chunk(&document.text);
        if pieces.is_empty() {
            return Err(Error::SchemaValidation {
                field: "document".to_string(),
                reason: format!("no extractable text: {}", source),
            });
        }

        // Embed chunk texts (rate-limited, resilient).
        let chunk_texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        self.bucket.acquire(1.0).await;
        let embedder = self.embedder.clone();
        let texts_ref = &chunk_texts;
        let chunk_vectors = self
            .embed_exec
            .run(|| {
                let embedder = embedder.clone();
                async move { embedder.embed_batch(texts_ref).await }
            })
            .await?;

        // One LLM extraction per document.
        self.bucket.acquire(1.0).await;
        let title = document.title.clone();
        let text_ref = document.text.as_str();
        let extraction = self
            .llm_exec
            .run(|| {
                let title = title.clone();
                async move { ConceptExtractor::new(&self.chat).extract(&title, text_ref).await }
            })
            .await?;

        // Resolve names to stable ids through the shared registry.
        let (doc_concept_ids, doc_category_ids, concept_names) = {
            let mut reg = registry.lock();
            let mut concept_ids: Vec<u32> = extraction
                .bundle
                .primary_concepts
                .iter()
                .map(|name| reg.assign(name))
                .collect();
            concept_ids.sort_unstable();
            concept_ids.dedup();

            let mut cat_ids: Vec<u32> = extraction
                .bundle
                .categories
                .iter()
                .map(|name| category_id(name))
                .collect();
            cat_ids.sort_unstable();
            cat_ids.dedup();

            let names: Vec<(u32, String)> = extraction
                .bundle
                .primary_concepts
                .iter()
                .map(|n| (reg.id_of(n).unwrap_or_default(), n.clone()))
                .collect();
            (concept_ids, cat_ids, names)
        };

        // Catalog text: the model summary enriched with primary concepts.
        let summary = if extraction.summary.is_empty() {
            document.text.chars().take(600).collect::<String>()
        } else {
            extraction.summary.clone()
        };
        let catalog_text = format!(
            "{}\n\nPrimary concepts: {}",
            summary,
            extraction.bundle.primary_concepts.join(", ")
        );

        self.bucket.acquire(1.0).await;
        let embedder = self.embedder.clone();
        let catalog_text_ref = catalog_text.as_str();
        let catalog_vector = self
            .embed_exec
            .run(|| {
                let embedder = embedder.clone();
                async move { embedder.embed_document(catalog_text_ref).await }
            })
            .await?;

        // Chunk rows: concept ids present in the chunk text, density, flags.
        let mut chunk_rows = Vec::with_capacity(pieces.len());
        let mut density_sum = 0.0f32;
        for (piece, vector) in pieces.iter().zip(chunk_vectors.into_iter()) {
            let page_number = document.page_for_offset(piece.start_offset);
            let flags = self
                .classifier
                .classify(&piece.text, page_number, document.total_pages);

            let chunk_concept_ids = concepts_in_text(&piece.text, &concept_names);
            let density = if piece.token_count == 0 {
                0.0
            } else {
                chunk_concept_ids.len() as f32 / piece.token_count as f32
            };
            density_sum += density;

            chunk_rows.push(ChunkRecord {
                id: chunk_id(source, piece.start_offset),
                source: source.to_string(),
                text: piece.text.clone(),
                page_number,
                loc: piece.loc.clone(),
                vector,
                concept_ids: chunk_concept_ids,
                category_ids: doc_category_ids.clone(),
                concept_density: density,
                is_toc: flags.is_toc,
                is_front_matter: flags.is_front_matter,
                is_back_matter: flags.is_back_matter,
                is_meta_content: flags.is_meta_content,
                is_reference: flags.is_reference,
                has_math_issues: flags.has_math_issues,
            });
        }

        let catalog_row = CatalogRecord {
            id: source_id(source),
            source: source.to_string(),
            text: catalog_text,
            hash: hash.clone(),
            vector: catalog_vector,
            concept_ids: doc_concept_ids,
            category_ids: doc_category_ids,
            concept_density: if chunk_rows.is_empty() {
                None
            } else {
                Some(density_sum / chunk_rows.len() as f32)
            },
        };

        Ok(Some(PreparedDocument {
            source: source.to_string(),
            hash,
            replace_existing,
            catalog_row,
            chunk_rows,
            category_names: extraction.bundle.categories,
        }))
    }

    /// Per-document commit through the single writer: catalog row first,
    /// then its chunks, then the checkpoint (handled by the caller).
    async fn commit(&self, prepared: &PreparedDocument) -> Result<usize> {
        if prepared.replace_existing {
            self.catalog.delete_by_source(&prepared.source).await?;
            self.chunks.delete_by_source(&prepared.source).await?;
        }
        self.catalog.append(std::slice::from_ref(&prepared.catalog_row)).await?;
        self.chunks.append(&prepared.chunk_rows).await?;
        tracing::info!(
            source = %prepared.source,
            chunks = prepared.chunk_rows.len(),
            "committed document"
        );
        Ok(prepared.chunk_rows.len())
    }

    /// Recompute category rows from scratch: document and chunk counts from
    /// the tables, names and aliases preserved from the previous table,
    /// names for categories new in this batch taken from the extraction.
    async fn rebuild_category_stats(&self, batch_names: &HashMap<u32, String>) -> Result<()> {
        let previous: HashMap<u32, CategoryRecord> = self
            .categories
            .all()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let catalog_rows = self.catalog.all().await?;
        let chunk_rows = self.chunks.all().await?;

        let mut doc_counts: HashMap<u32, u32> = HashMap::new();
        for row in &catalog_rows {
            for id in &row.category_ids {
                *doc_counts.entry(*id).or_insert(0) += 1;
            }
        }
        let mut chunk_counts: HashMap<u32, u32> = HashMap::new();
        for row in &chunk_rows {
            for id in &row.category_ids {
                *chunk_counts.entry(*id).or_insert(0) += 1;
            }
        }

        let mut ids: Vec<u32> = doc_counts.keys().copied().collect();
        ids.sort_unstable();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let (name, aliases, parent_id) = match previous.get(&id) {
                Some(prev) => (prev.name.clone(), prev.aliases.clone(), prev.parent_id),
                None => match batch_names
                    .get(&id)
                    .cloned()
                    .or_else(|| self.category_cache.name_of(id))
                {
                    Some(name) => (name, Vec::new(), None),
                    None => {
                        tracing::warn!(category_id = id, "category id has no known name, skipping");
                        continue;
                    }
                },
            };
            records.push(CategoryRecord {
                id,
                name,
                aliases,
                parent_id,
                document_count: doc_counts.get(&id).copied().unwrap_or(0),
                chunk_count: chunk_counts.get(&id).copied().unwrap_or(0),
            });
        }

        self.categories.replace_all(&records).await?;
        self.category_cache
            .swap(records.iter().map(|r| (r.id, r.name.clone())));
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &Arc<Mutex<Checkpoint>>) -> Result<()> {
        let snapshot = checkpoint.lock().clone();
        self.checkpoint_file
            .save(&snapshot)
            .map_err(|e| Error::database("checkpoint.save", e))
    }
}

/// Concept ids whose names appear (all tokens, whole-word) in the chunk.
fn concepts_in_text(text: &str, concept_names: &[(u32, String)]) -> Vec<u32> {
    let text_tokens: std::collections::HashSet<String> = tokenize(text).into_iter().collect();
    let mut ids: Vec<u32> = concept_names
        .iter()
        .filter(|(_, name)| {
            let name_tokens = tokenize(name);
            !name_tokens.is_empty() && name_tokens.iter().all(|t| text_tokens.contains(t))
        })
        .map(|(id, _)| *id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concepts_in_text_requires_every_token() {
        let names = vec![
            (1u32, "dependency injection".to_string()),
            (2u32, "event sourcing".to_string()),
        ];
        let text = "Constructor-based dependency injection keeps collaborators explicit.";
        assert_eq!(concepts_in_text(text, &names), vec![1]);
    }

    #[test]
    fn concepts_in_text_handles_no_matches() {
        let names = vec![(1u32, "saga pattern".to_string())];
        assert!(concepts_in_text("nothing relevant here", &names).is_empty());
    }
}
