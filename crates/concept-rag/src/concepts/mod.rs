pub mod extractor;
pub mod id_cache;
pub mod index_builder;

pub use extractor::ConceptExtractor;
pub use id_cache::IdNameCache;
pub use index_builder::ConceptIndexBuilder;
