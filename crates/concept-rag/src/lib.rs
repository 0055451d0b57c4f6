//! Concept-aware retrieval engine over a local document library.
//!
//! Ingests PDFs and EPUBs, extracts per-document concepts and categories
//! through an external LLM, stores embeddings for documents, chunks, and
//! concepts in LanceDB, and serves semantic queries that blend vector
//! similarity with BM25, title matching, concept alignment, and thesaurus
//! expansion.

pub mod cache;
pub mod concepts;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod llm;
pub mod processing;
pub mod resilience;
pub mod search;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use config::EngineConfig;
pub use engine::ConceptRagEngine;
pub use error::{Error, Result};
pub use types::{
    CatalogRecord, CategoryRecord, ChunkHit, ChunkRecord, ConceptBundle, ConceptRecord,
    ConceptSearchResult, DocumentHit, RankedResults, SourceConceptHit,
};
