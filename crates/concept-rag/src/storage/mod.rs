pub mod catalog;
pub mod categories;
pub mod chunks;
pub mod columns;
pub mod concepts;
pub mod store;

pub use catalog::CatalogRepository;
pub use categories::CategoryRepository;
pub use chunks::ChunkRepository;
pub use concepts::ConceptRepository;
pub use store::TableStore;
