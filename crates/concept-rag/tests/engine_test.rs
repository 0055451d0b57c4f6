//! End-to-end tests over a real database directory: ingest a small text
//! corpus against a canned LLM endpoint, then exercise the search surface
//! and the index invariants.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use concept_rag::embeddings::EmbeddingModel;
use concept_rag::error::Result;
use concept_rag::llm::ChatClient;
use concept_rag::{ConceptRagEngine, EngineConfig};

/// Deterministic bag-of-tokens embedder: each token bumps one of 384 buckets,
/// then the vector is L2-normalized. Similar texts share buckets, so cosine
/// ranking behaves sensibly without a model.
struct HashEmbedder;

#[async_trait]
impl EmbeddingModel for HashEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_document(text).await
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 384];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let bucket = (concept_rag::hash::fnv1a_32(token) % 384) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        384
    }

    fn model_id(&self) -> &str {
        "hash-bag-384"
    }
}

/// Minimal HTTP/1.1 responder returning the same status and body for every
/// request. Connections are closed per response.
async fn spawn_canned_server(status: u16, body: String) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 4096];
                loop {
                    let n = match socket.read(&mut tmp).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(header_end) = find_subslice(&buf, b"\r\n\r\n") {
                        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                        let content_length = headers
                            .lines()
                            .find_map(|l| l.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}/v1/chat/completions", addr)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extraction_body() -> String {
    let inner = serde_json::json!({
        "primary_concepts": ["software architecture", "dependency injection"],
        "categories": ["software architecture"],
        "related_concepts": ["design patterns"],
        "summary": "A study of structuring systems around explicit dependencies."
    });
    serde_json::json!({
        "choices": [{ "message": { "content": inner.to_string() } }]
    })
    .to_string()
}

fn test_config(data_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.data_dir = data_dir.to_path_buf();
    config.chunking.chunk_tokens = 120;
    config.chunking.overlap_tokens = 20;
    config.chunking.min_chunk_tokens = 5;
    config.ingest.workers = 2;
    config.ingest.rate_tokens_per_sec = 10_000.0;
    config.ingest.rate_burst = 10_000.0;
    config
}

fn paragraph(theme: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "{} shapes the way teams reason about change, and section {} \
                 revisits dependency injection with concrete examples.",
                theme, i
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_corpus(dir: &Path) {
    std::fs::write(
        dir.join("Software_Architecture.txt"),
        paragraph("Software architecture", 18),
    )
    .unwrap();
    std::fs::write(
        dir.join("Garden_Notes.txt"),
        paragraph("Seasonal planting", 14),
    )
    .unwrap();
    std::fs::write(
        dir.join("Cooking_Basics.txt"),
        paragraph("Mother sauces and technique", 14),
    )
    .unwrap();
}

async fn open_engine(data_dir: &Path) -> ConceptRagEngine {
    ConceptRagEngine::open(test_config(data_dir), Arc::new(HashEmbedder))
        .await
        .unwrap()
}

#[tokio::test]
async fn ingest_then_search_end_to_end() {
    let data_dir = tempfile::tempdir().unwrap();
    let corpus = tempfile::tempdir().unwrap();
    write_corpus(corpus.path());

    let endpoint = spawn_canned_server(200, extraction_body()).await;
    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();

    let engine = open_engine(data_dir.path()).await;
    let report = engine.ingest_with_client(corpus.path(), chat).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed.len(), 0);
    assert!(report.chunks_written >= 3);
    assert_eq!(engine.catalog_count().await.unwrap(), 3);

    // Catalog search: the architecture title must rank first.
    let results = engine.catalog_search("software architecture", 2).await.unwrap();
    assert!(!results.degraded);
    assert!(results.hits.len() <= 2);
    assert!(!results.hits.is_empty());
    assert!(results.hits[0].source.contains("Software_Architecture"));
    for hit in &results.hits {
        assert!(hit.score > 0.0 && hit.score <= 1.05);
    }

    // Concept search: every returned chunk carries the concept id.
    let concept = engine.concept_search("dependency injection", 5).await.unwrap();
    let concept_id = concept.concept_id;
    assert!(!concept.sources.is_empty());
    let chunk_rows = engine.all_chunks().await.unwrap();
    for group in &concept.sources {
        for chunk in &group.chunks {
            let row = chunk_rows.iter().find(|r| r.id == chunk.id).unwrap();
            assert!(row.concept_ids.contains(&concept_id));
        }
    }

    // Broad search with meta-content excluded returns no ToC chunks.
    let broad = engine
        .broad_chunks_search("dependency", 10, Some(true), Some(true))
        .await
        .unwrap();
    for hit in &broad.hits {
        assert!(!hit.is_meta_content);
        assert!(!hit.is_reference);
    }

    // Scoped chunk search rejects unknown sources.
    let err = engine
        .chunks_search("anything", "/nonexistent.pdf", 5)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SOURCE_NOT_FOUND");

    // extract_concepts returns the ingested bundle.
    let source = corpus
        .path()
        .join("Software_Architecture.txt")
        .display()
        .to_string();
    let bundle = engine.extract_concepts(&source).await.unwrap();
    assert!(bundle
        .primary_concepts
        .iter()
        .any(|c| c.eq_ignore_ascii_case("dependency injection")));
    assert_eq!(bundle.categories, vec!["software architecture"]);

    // Category surface.
    let categories = engine.list_categories().await.unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].name, "software architecture");
    assert_eq!(categories[0].document_count, 3);

    let docs = engine.category_search("software architecture", 10).await.unwrap();
    assert_eq!(docs.len(), 3);

    let concepts_in_category = engine
        .list_concepts_in_category("software architecture")
        .await
        .unwrap();
    assert!(concepts_in_category
        .iter()
        .any(|c| c.eq_ignore_ascii_case("software architecture")));
}

#[tokio::test]
async fn concept_index_invariants_hold_after_rebuild() {
    let data_dir = tempfile::tempdir().unwrap();
    let corpus = tempfile::tempdir().unwrap();
    write_corpus(corpus.path());

    let endpoint = spawn_canned_server(200, extraction_body()).await;
    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();

    let engine = open_engine(data_dir.path()).await;
    engine.ingest_with_client(corpus.path(), chat).await.unwrap();

    let catalog = engine.all_catalog_entries().await.unwrap();
    let chunks = engine.all_chunks().await.unwrap();
    let concepts = engine.all_concepts().await.unwrap();

    // I1: every concept_id in catalog and chunks resolves to a name.
    for row in &catalog {
        for id in &row.concept_ids {
            assert!(engine.concept_cache().name_of(*id).is_some());
        }
    }
    for row in &chunks {
        for id in &row.concept_ids {
            assert!(engine.concept_cache().name_of(*id).is_some());
        }
    }

    // I2: every catalog_id on a concept resolves to a catalog row.
    for concept in &concepts {
        for catalog_id in &concept.catalog_ids {
            assert!(catalog.iter().any(|r| r.id == *catalog_id));
        }
    }

    // I3: chunk_count is an exact recount.
    for concept in &concepts {
        let expected = chunks
            .iter()
            .filter(|c| c.concept_ids.contains(&concept.id))
            .count() as u32;
        assert_eq!(concept.chunk_count, expected, "concept {}", concept.concept);
    }

    // I6: vectors are 384-dim and finite.
    for concept in &concepts {
        assert_eq!(concept.vector.len(), 384);
        assert!(concept.vector.iter().all(|v| v.is_finite()));
    }

    // Related concepts are bounded and never self-referential.
    for concept in &concepts {
        assert!(concept.related_concepts.len() <= 32);
        assert!(!concept
            .related_concepts
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&concept.concept)));
    }
}

#[tokio::test]
async fn reingest_without_overwrite_is_a_noop() {
    let data_dir = tempfile::tempdir().unwrap();
    let corpus = tempfile::tempdir().unwrap();
    write_corpus(corpus.path());

    let endpoint = spawn_canned_server(200, extraction_body()).await;
    let engine = open_engine(data_dir.path()).await;

    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();
    let first = engine.ingest_with_client(corpus.path(), chat).await.unwrap();
    assert_eq!(first.processed, 3);
    let catalog_rows = engine.catalog_count().await.unwrap();
    let chunk_rows = engine.chunk_count().await.unwrap();

    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();
    let second = engine.ingest_with_client(corpus.path(), chat).await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped_duplicates, 3);
    assert_eq!(engine.catalog_count().await.unwrap(), catalog_rows);
    assert_eq!(engine.chunk_count().await.unwrap(), chunk_rows);
}

#[tokio::test]
async fn resume_processes_only_new_documents() {
    let data_dir = tempfile::tempdir().unwrap();
    let corpus = tempfile::tempdir().unwrap();
    std::fs::write(corpus.path().join("One.txt"), paragraph("Queueing theory", 12)).unwrap();
    std::fs::write(corpus.path().join("Two.txt"), paragraph("Stream processing", 12)).unwrap();

    let endpoint = spawn_canned_server(200, extraction_body()).await;
    let engine = open_engine(data_dir.path()).await;

    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();
    let first = engine.ingest_with_client(corpus.path(), chat).await.unwrap();
    assert_eq!(first.processed, 2);

    // Three more documents arrive; the checkpoint skips the first two.
    std::fs::write(corpus.path().join("Three.txt"), paragraph("Consensus protocols", 12)).unwrap();
    std::fs::write(corpus.path().join("Four.txt"), paragraph("Column stores", 12)).unwrap();
    std::fs::write(corpus.path().join("Five.txt"), paragraph("Vector indexes", 12)).unwrap();

    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();
    let second = engine.ingest_with_client(corpus.path(), chat).await.unwrap();
    assert_eq!(second.processed, 3);
    assert_eq!(second.skipped_duplicates, 2);
    assert_eq!(engine.catalog_count().await.unwrap(), 5);

    // Chunk counts match a fresh full ingest of the same corpus.
    let fresh_dir = tempfile::tempdir().unwrap();
    let fresh = open_engine(fresh_dir.path()).await;
    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();
    fresh.ingest_with_client(corpus.path(), chat).await.unwrap();

    let mut resumed: Vec<(String, u32)> = engine
        .all_concepts()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.concept, c.chunk_count))
        .collect();
    let mut fresh_counts: Vec<(String, u32)> = fresh
        .all_concepts()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.concept, c.chunk_count))
        .collect();
    resumed.sort();
    fresh_counts.sort();
    assert_eq!(resumed, fresh_counts);
}

#[tokio::test]
async fn preflight_auth_failure_aborts_before_any_store_write() {
    let data_dir = tempfile::tempdir().unwrap();
    let corpus = tempfile::tempdir().unwrap();
    write_corpus(corpus.path());

    let endpoint =
        spawn_canned_server(401, r#"{"error": "invalid api key"}"#.to_string()).await;
    let chat = ChatClient::new(&endpoint, "bad-key", "test-model").unwrap();

    let engine = open_engine(data_dir.path()).await;
    let err = engine.ingest_with_client(corpus.path(), chat).await.unwrap_err();
    assert_eq!(err.code(), "AUTH_ERROR");
    assert_eq!(engine.catalog_count().await.unwrap(), 0);
    assert_eq!(engine.chunk_count().await.unwrap(), 0);
}

#[tokio::test]
async fn cached_search_results_match_uncached() {
    let data_dir = tempfile::tempdir().unwrap();
    let corpus = tempfile::tempdir().unwrap();
    write_corpus(corpus.path());

    let endpoint = spawn_canned_server(200, extraction_body()).await;
    let chat = ChatClient::new(&endpoint, "test-key", "test-model").unwrap();
    let engine = open_engine(data_dir.path()).await;
    engine.ingest_with_client(corpus.path(), chat).await.unwrap();

    let uncached = engine.catalog_search("dependency injection", 3).await.unwrap();
    let cached = engine.catalog_search("dependency injection", 3).await.unwrap();

    assert_eq!(cached.hits.len(), uncached.hits.len());
    for (a, b) in uncached.hits.iter().zip(cached.hits.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.score, b.score);
        assert_eq!(a.source, b.source);
    }
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let data_dir = tempfile::tempdir().unwrap();
    let engine = open_engine(data_dir.path()).await;

    let err = engine.catalog_search("   ", 5).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_QUERY");

    let err = engine.concept_search("no such concept", 5).await.unwrap_err();
    assert_eq!(err.code(), "CONCEPT_NOT_FOUND");
}
